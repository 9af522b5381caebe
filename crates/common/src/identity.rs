//! Object identities
//!
//! Every registry object is named by a 17-byte identity: a one-byte type tag
//! followed by a 16-byte body. Mutable objects (users, orgs, machines, ...)
//! get a random body; immutable objects (keys, claims, credentials, ...) are
//! content-addressed, taking the body from `SHA-256(type_tag || canonical_body)`.
//!
//! Identities display as lowercase base32 without padding and parse back
//! round-trip.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Size of an encoded identity in bytes: type tag (1) || body (16)
pub const ID_SIZE: usize = 17;
/// Size of an identity body in bytes
pub const ID_BODY_SIZE: usize = 16;

/// Errors that can occur constructing or parsing identities
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid identity length, expected {ID_SIZE}, got {0}")]
    InvalidLength(usize),
    #[error("unknown identity type tag: {0:#04x}")]
    UnknownTypeTag(u8),
    #[error("identity is not valid base32")]
    Base32,
}

macro_rules! object_types {
    ($(($variant:ident, $value:literal, $name:literal)),* $(,)?) => {
        /// The closed set of object types an identity can name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum ObjectType {
            $($variant = $value,)*
        }

        impl ObjectType {
            pub fn tag(self) -> u8 {
                self as u8
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(ObjectType::$variant => $name,)*
                }
            }
        }

        impl TryFrom<u8> for ObjectType {
            type Error = IdentityError;

            fn try_from(tag: u8) -> Result<Self, Self::Error> {
                match tag {
                    $($value => Ok(ObjectType::$variant),)*
                    other => Err(IdentityError::UnknownTypeTag(other)),
                }
            }
        }
    };
}

object_types! {
    (User, 0x01, "user"),
    (Org, 0x02, "org"),
    (Team, 0x03, "team"),
    (Machine, 0x04, "machine"),
    (MachineToken, 0x05, "machine_token"),
    (PublicKey, 0x06, "public_key"),
    (PrivateKey, 0x07, "private_key"),
    (Claim, 0x08, "claim"),
    (Keyring, 0x09, "keyring"),
    (KeyringMember, 0x0a, "keyring_member"),
    (Credential, 0x0b, "credential"),
    (Policy, 0x0c, "policy"),
    (PolicyAttachment, 0x0d, "policy_attachment"),
    (Profile, 0x0e, "profile"),
    (Environment, 0x0f, "environment"),
    (Service, 0x10, "service"),
    (Project, 0x11, "project"),
}

/// A type-tagged object identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([u8; ID_SIZE]);

impl Id {
    /// Mint a random identity for a mutable object.
    pub fn new_mutable(object_type: ObjectType) -> Self {
        let mut bytes = [0u8; ID_SIZE];
        bytes[0] = object_type.tag();
        getrandom::getrandom(&mut bytes[1..]).expect("failed to generate random bytes");
        Id(bytes)
    }

    /// Derive a content-addressed identity for an immutable object.
    ///
    /// The body is the first 16 bytes of `SHA-256(type_tag || canonical_body)`.
    pub fn new_immutable(object_type: ObjectType, canonical_body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([object_type.tag()]);
        hasher.update(canonical_body);
        let digest = hasher.finalize();

        let mut bytes = [0u8; ID_SIZE];
        bytes[0] = object_type.tag();
        bytes[1..].copy_from_slice(&digest[..ID_BODY_SIZE]);
        Id(bytes)
    }

    /// Reconstruct an identity from raw bytes, validating the type tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != ID_SIZE {
            return Err(IdentityError::InvalidLength(bytes.len()));
        }
        ObjectType::try_from(bytes[0])?;

        let mut buff = [0u8; ID_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Id(buff))
    }

    pub fn object_type(&self) -> ObjectType {
        // The tag was validated on construction.
        ObjectType::try_from(self.0[0]).expect("identity carries a valid type tag")
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE32_NOPAD.encode(&self.0).to_ascii_lowercase())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}:{})", self.object_type().name(), self)
    }
}

impl FromStr for Id {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = BASE32_NOPAD
            .decode(s.to_ascii_uppercase().as_bytes())
            .map_err(|_| IdentityError::Base32)?;
        Id::from_bytes(&decoded)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mutable_identity_roundtrip() {
        let id = Id::new_mutable(ObjectType::Machine);
        assert_eq!(id.object_type(), ObjectType::Machine);

        let display = id.to_string();
        let parsed: Id = display.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_immutable_identity_is_deterministic() {
        let body = br#"{"name":"workers"}"#;
        let a = Id::new_immutable(ObjectType::Claim, body);
        let b = Id::new_immutable(ObjectType::Claim, body);
        assert_eq!(a, b);

        let c = Id::new_immutable(ObjectType::Claim, br#"{"name":"others"}"#);
        assert_ne!(a, c);

        // The same body under a different tag names a different object.
        let d = Id::new_immutable(ObjectType::Credential, body);
        assert_ne!(a.as_bytes()[1..], d.as_bytes()[1..]);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut bytes = [0u8; ID_SIZE];
        bytes[0] = 0xff;
        assert!(matches!(
            Id::from_bytes(&bytes),
            Err(IdentityError::UnknownTypeTag(0xff))
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            Id::from_bytes(&[0x01; 5]),
            Err(IdentityError::InvalidLength(5))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let id = Id::new_mutable(ObjectType::Org);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
