//! Envelope body types
//!
//! One body type per identity type tag. The tag a body belongs under is
//! carried on the [`Body`] trait so envelope decoding can reject a body that
//! arrived under the wrong identity instead of panicking at use.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::encoding::Base64Url;
use crate::identity::{Id, ObjectType};
use crate::pathexp::PathExp;

/// Marker for types that can appear as an envelope body.
pub trait Body: Serialize {
    const TYPE: ObjectType;
}

/// Algorithm tags recorded in envelopes.
pub mod alg {
    /// Ed25519 signatures
    pub const EDDSA: &str = "eddsa";
    /// Curve25519 public-key boxes (keyring member keys)
    pub const EASYBOX: &str = "easybox";
    /// XSalsa20-Poly1305 secret boxes (private scalars, credentials)
    pub const SECRETBOX: &str = "secretbox";
    /// Master key wrapping under a scrypt-derived KEK
    pub const TRIPLESEC: &str = "triplesec-v3";
    /// Curve25519 encryption keys
    pub const CURVE25519: &str = "curve25519";
    /// scrypt KEK derivation
    pub const SCRYPT: &str = "scrypt";
}

/// A wrapped master key: 256 random bits sealed under a KEK derived from the
/// owner's passphrase or token secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    pub alg: String,
    pub value: Base64Url,
}

/// The public half of a login keypair, kept by the registry to verify
/// login HMACs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPublicKey {
    pub alg: String,
    pub salt: Base64Url,
    pub value: Base64Url,
}

/// An encrypted key or value: ciphertext plus the nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    pub alg: String,
    pub nonce: Base64Url,
    pub value: Base64Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Active,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub name: String,
    pub email: String,
    pub state: UserState,
    pub password: LoginPublicKey,
    pub master: MasterKey,
}

impl Body for User {
    const TYPE: ObjectType = ObjectType::User;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    pub name: String,
    pub created_by: Id,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Body for Org {
    const TYPE: ObjectType = ObjectType::Org;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamType {
    User,
    Machine,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub org_id: Id,
    pub name: String,
    pub team_type: TeamType,
    pub created_by: Id,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Body for Team {
    const TYPE: ObjectType = ObjectType::Team;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Active,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub org_id: Id,
    pub team_id: Id,
    pub name: String,
    pub state: MachineState,
    pub created_by: Id,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub destroyed_by: Option<Id>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub destroyed: Option<OffsetDateTime>,
}

impl Body for Machine {
    const TYPE: ObjectType = ObjectType::Machine;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineToken {
    pub org_id: Id,
    pub machine_id: Id,
    pub public_key: LoginPublicKey,
    pub master: MasterKey,
    pub state: MachineState,
    pub created_by: Id,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub destroyed_by: Option<Id>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub destroyed: Option<OffsetDateTime>,
}

impl Body for MachineToken {
    const TYPE: ObjectType = ObjectType::MachineToken;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Signing,
    Encryption,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub org_id: Id,
    pub owner_id: Id,
    pub key_type: KeyType,
    pub alg: String,
    pub value: Base64Url,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Body for PublicKey {
    const TYPE: ObjectType = ObjectType::PublicKey;
}

/// A private scalar sealed under the owner's master key.
///
/// `pnonce` feeds the per-key subkey derivation; `key.nonce` is the secretbox
/// nonce the scalar was sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    pub org_id: Id,
    pub owner_id: Id,
    pub public_key_id: Id,
    pub pnonce: Base64Url,
    pub key: SealedValue,
}

impl Body for PrivateKey {
    const TYPE: ObjectType = ObjectType::PrivateKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Signature,
    Revocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub org_id: Id,
    pub owner_id: Id,
    pub key_id: Id,
    pub claimant_id: Id,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub previous: Option<Id>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Claim {
    /// A key's first claim: the key claims itself.
    pub fn self_signature(org_id: Id, owner_id: Id, key_id: Id, created: OffsetDateTime) -> Self {
        Claim {
            org_id,
            owner_id,
            key_id,
            claimant_id: key_id,
            claim_type: ClaimType::Signature,
            previous: None,
            created,
        }
    }
}

impl Body for Claim {
    const TYPE: ObjectType = ObjectType::Claim;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyring {
    pub org_id: Id,
    pub pathexp: PathExp,
    pub previous: Option<Id>,
    pub created_by: Id,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Body for Keyring {
    const TYPE: ObjectType = ObjectType::Keyring;
}

/// Grants one owner read access to a keyring: `key` is the keyring's master
/// encryption key boxed to the member's encryption public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringMember {
    pub org_id: Id,
    pub keyring_id: Id,
    pub owner_id: Id,
    pub public_key_id: Id,
    pub encrypting_key_id: Id,
    pub key: SealedValue,
    pub created_by: Id,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Body for KeyringMember {
    const TYPE: ObjectType = ObjectType::KeyringMember;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Set,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub org_id: Id,
    pub keyring_id: Id,
    pub pathexp: PathExp,
    pub name: String,
    pub previous: Option<Id>,
    pub state: CredentialState,
    pub nonce: Base64Url,
    pub value: Base64Url,
}

impl Body for Credential {
    const TYPE: ObjectType = ObjectType::Credential;
}

/// The public profile the registry returns for `users.get_self` and inside
/// org claim trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub name: String,
    pub email: String,
}

impl Body for Profile {
    const TYPE: ObjectType = ObjectType::Profile;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::canonical::to_canonical_vec;

    fn ts() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn test_claim_type_field_name() {
        let claim = Claim::self_signature(
            Id::new_mutable(ObjectType::Org),
            Id::new_mutable(ObjectType::Machine),
            Id::new_immutable(ObjectType::PublicKey, b"{}"),
            ts(),
        );
        let json = serde_json::to_value(&claim).unwrap();
        assert_eq!(json["type"], "signature");
        assert_eq!(json["claimant_id"], json["key_id"]);
    }

    #[test]
    fn test_created_serializes_rfc3339_utc() {
        let org = Org {
            name: "knotty-buoy".to_string(),
            created_by: Id::new_mutable(ObjectType::User),
            created: ts(),
        };
        let json = serde_json::to_value(&org).unwrap();
        let created = json["created"].as_str().unwrap();
        assert!(created.ends_with('Z') || created.contains("+00:00"));
    }

    #[test]
    fn test_canonical_body_is_stable() {
        let member = KeyringMember {
            org_id: Id::new_mutable(ObjectType::Org),
            keyring_id: Id::new_mutable(ObjectType::Keyring),
            owner_id: Id::new_mutable(ObjectType::Machine),
            public_key_id: Id::new_immutable(ObjectType::PublicKey, b"pk"),
            encrypting_key_id: Id::new_immutable(ObjectType::PublicKey, b"ek"),
            key: SealedValue {
                alg: alg::EASYBOX.to_string(),
                nonce: Base64Url::new(vec![7; 24]),
                value: Base64Url::new(vec![9; 48]),
            },
            created_by: Id::new_mutable(ObjectType::User),
            created: ts(),
        };

        let a = to_canonical_vec(&member).unwrap();
        let b = to_canonical_vec(&member.clone()).unwrap();
        assert_eq!(a, b);
    }
}
