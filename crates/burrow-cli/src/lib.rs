//! # burrow-cli
//!
//! Command-line front end for [`burrow_wireguard`].
//!
//! Provides commands for:
//! - Server setup and peer registration
//! - Client setup in full or split tunnel mode
//! - Bringing tunnels up and down, and reporting their state
//!
//! # Architecture
//!
//! Arguments are parsed into [`Cli`], resolved into [`settings::Settings`],
//! and dispatched to one of the executors in [`commands`]. Every executor
//! produces a report that is printed as a table or as JSON.
//!
//! ```text
//! ┌────────┐   Settings    ┌──────────┐   wg / wg-quick   ┌────────┐
//! │  Cli   │──────────────►│ commands │──────────────────►│  host  │
//! └────────┘               └──────────┘                   └────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod settings;

pub use cli::{Cli, Commands, Format, TargetArgs};
pub use error::CliError;
pub use output::OutputFormat;
pub use settings::Settings;
