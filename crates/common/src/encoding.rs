//! Wire encoding of binary values
//!
//! Nonces, ciphertexts, salts, and public key material serialize as base64url
//! without padding.

use std::fmt;
use std::ops::Deref;

use data_encoding::BASE64URL_NOPAD;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("value is not valid unpadded base64url")]
    Base64,
}

/// A byte value that crosses the wire as unpadded base64url
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Base64Url(Vec<u8>);

impl Base64Url {
    pub fn new(bytes: Vec<u8>) -> Self {
        Base64Url(bytes)
    }

    pub fn from_encoded(encoded: &str) -> Result<Self, EncodingError> {
        BASE64URL_NOPAD
            .decode(encoded.as_bytes())
            .map(Base64Url)
            .map_err(|_| EncodingError::Base64)
    }

    pub fn encoded(&self) -> String {
        BASE64URL_NOPAD.encode(&self.0)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Base64Url {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for Base64Url {
    fn from(bytes: Vec<u8>) -> Self {
        Base64Url(bytes)
    }
}

impl From<&[u8]> for Base64Url {
    fn from(bytes: &[u8]) -> Self {
        Base64Url(bytes.to_vec())
    }
}

impl fmt::Display for Base64Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

impl fmt::Debug for Base64Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base64Url({} bytes)", self.0.len())
    }
}

impl Serialize for Base64Url {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

impl<'de> Deserialize<'de> for Base64Url {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Base64Url::from_encoded(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let value = Base64Url::new(vec![0, 1, 2, 250, 251, 252]);
        let encoded = value.encoded();
        assert!(!encoded.contains('='));

        let back = Base64Url::from_encoded(&encoded).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_serde_as_string() {
        let value = Base64Url::new(b"torus".to_vec());
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"dG9ydXM\"");

        let back: Base64Url = serde_json::from_str(&json).unwrap();
        assert_eq!(&*back, b"torus");
    }

    #[test]
    fn test_rejects_padding() {
        assert!(Base64Url::from_encoded("dG9ydXM=").is_err());
    }
}
