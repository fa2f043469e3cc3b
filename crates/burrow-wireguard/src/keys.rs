//! Curve25519 identity keys.
//!
//! Keys are 32 bytes. On disk and in configuration documents they are
//! standard base64 (44 characters, one `=` of padding), the same text
//! `wg genkey` and `wg pubkey` produce.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand_core::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;

use crate::error::{Result, WireGuardError};

/// Length of every key, private or public.
pub const KEY_SIZE: usize = 32;

fn array_from_slice(bytes: &[u8]) -> Result<[u8; KEY_SIZE]> {
    <[u8; KEY_SIZE]>::try_from(bytes).map_err(|_| WireGuardError::InvalidKeyLength(bytes.len()))
}

fn array_from_base64(text: &str) -> Result<[u8; KEY_SIZE]> {
    let decoded = BASE64
        .decode(text.trim())
        .map_err(|e| WireGuardError::InvalidBase64(e.to_string()))?;
    array_from_slice(&decoded)
}

/// The shareable half of an identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Wraps a slice of raw key bytes.
    ///
    /// # Errors
    ///
    /// [`WireGuardError::InvalidKeyLength`] unless the slice is 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        array_from_slice(bytes).map(Self)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Base64 text form.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parses the base64 text form. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// [`WireGuardError::InvalidBase64`] or [`WireGuardError::InvalidKeyLength`].
    pub fn from_base64(text: &str) -> Result<Self> {
        array_from_base64(text).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_base64()).finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for PublicKey {
    type Err = WireGuardError;

    fn from_str(text: &str) -> Result<Self> {
        Self::from_base64(text)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = std::borrow::Cow::<str>::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// The secret half of an identity.
///
/// Not `Serialize` and not `Display`; [`PrivateKey::to_base64`] is the only
/// way to get the text form, for key files and documents.
#[derive(Clone)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Draws a fresh key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Wraps a slice of raw key bytes.
    ///
    /// # Errors
    ///
    /// [`WireGuardError::InvalidKeyLength`] unless the slice is 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        array_from_slice(bytes).map(Self)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// The matching public key, as `wg pubkey` would print it.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// Base64 text form.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parses the base64 text form. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// [`WireGuardError::InvalidBase64`] or [`WireGuardError::InvalidKeyLength`].
    pub fn from_base64(text: &str) -> Result<Self> {
        array_from_base64(text).map(Self)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for PrivateKey {}

/// A private key with its public key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// A fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_private_key(PrivateKey::generate())
    }

    /// Derives the public half from `private`.
    #[must_use]
    pub fn from_private_key(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Pairs halves produced elsewhere (key files, `wg pubkey`).
    ///
    /// The public key is trusted as given; use [`KeyPair::is_consistent`] to
    /// check it against the private key.
    #[must_use]
    pub const fn from_parts(private: PrivateKey, public: PublicKey) -> Self {
        Self { private, public }
    }

    /// The secret half.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// The shareable half.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Whether the public key is the one derived from the private key.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.private.public_key() == self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_keys_differ() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
        assert_ne!(a.private_key(), b.private_key());
    }

    #[test]
    fn known_vector_matches_wg_pubkey() {
        // RFC 7748 section 6.1, Alice's key pair.
        let private = PrivateKey::from_bytes_array([
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2, 0x66, 0x45,
            0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5, 0x1d, 0xb9, 0x2c, 0x2a,
        ]);
        let expected = PublicKey::from_bytes_array([
            0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e, 0xf7, 0x5a,
            0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e, 0xaa, 0x9b, 0x4e, 0x6a,
        ]);
        assert_eq!(private.public_key(), expected);
    }

    #[test]
    fn text_form_is_44_chars_with_padding() {
        let text = PrivateKey::generate().to_base64();
        assert_eq!(text.len(), 44);
        assert!(text.ends_with('='));
        assert_eq!(PrivateKey::from_base64(&text).expect("decode").to_base64(), text);
    }

    #[test]
    fn key_file_newline_is_ignored() {
        let public = PrivateKey::generate().public_key();
        let line = format!("{public}\n");
        assert_eq!(line.parse::<PublicKey>().expect("decode"), public);
    }

    #[test]
    fn debug_never_prints_private_half() {
        let pair = KeyPair::generate();
        let secret = pair.private_key().to_base64();
        assert!(!format!("{:?}", pair.private_key()).contains(&secret));
        assert!(!format!("{pair:?}").contains(&secret));
        assert!(format!("{pair:?}").contains(&pair.public_key().to_base64()));
    }

    #[test]
    fn public_key_serializes_as_text() {
        let public = PrivateKey::generate().public_key();
        let json = serde_json::to_string(&public).expect("serialize");
        assert_eq!(json, format!("\"{public}\""));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).expect("deserialize"), public);
    }

    #[test]
    fn mismatched_halves_are_inconsistent() {
        let pair = KeyPair::generate();
        assert!(pair.is_consistent());

        let stranger = KeyPair::generate();
        let mixed = KeyPair::from_parts(pair.private_key().clone(), *stranger.public_key());
        assert!(!mixed.is_consistent());
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        assert!(matches!(PrivateKey::from_bytes(&[0u8; 31]), Err(WireGuardError::InvalidKeyLength(31))));
        assert!(matches!(PublicKey::from_base64("AAAA"), Err(WireGuardError::InvalidKeyLength(3))));
        assert!(matches!(
            PublicKey::from_base64("not base64!"),
            Err(WireGuardError::InvalidBase64(_))
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_bytes_survive_text_form(bytes in prop::array::uniform32(any::<u8>())) {
                let public = PublicKey::from_bytes_array(bytes);
                prop_assert_eq!(public.to_base64().parse::<PublicKey>().ok(), Some(public));
            }

            #[test]
            fn derived_pairs_are_consistent(seed: [u8; 32]) {
                let pair = KeyPair::from_private_key(PrivateKey::from_bytes_array(seed));
                prop_assert!(pair.is_consistent());
            }
        }
    }
}
