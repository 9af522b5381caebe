//! Envelope wrappers
//!
//! A persisted object is `{id, version, body}`; signed objects additionally
//! carry `{signature: {alg, public_key_id, value}}` over the canonical body
//! serialization. Decoding checks the identity's type tag against the body
//! type, so a mis-tagged envelope fails to decode instead of panicking later.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::encoding::Base64Url;
use crate::identity::Id;
use crate::primitive::Body;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope id names a {actual} but the body is a {expected}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("envelope cannot be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A detached signature over a canonical body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub alg: String,
    pub public_key_id: Id,
    pub value: Base64Url,
}

/// An unsigned persisted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: Id,
    pub version: u8,
    pub body: T,
}

/// A signed persisted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub id: Id,
    pub version: u8,
    pub body: T,
    pub signature: Signature,
}

impl<T: Body> Envelope<T> {
    /// Verify the identity's type tag names this body type.
    pub fn checked(self) -> Result<Self, EnvelopeError> {
        check_tag::<T>(&self.id)?;
        Ok(self)
    }

    /// Decode an envelope from JSON, enforcing the id/body tag pairing.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EnvelopeError>
    where
        T: DeserializeOwned,
    {
        let envelope: Envelope<T> = serde_json::from_value(value)?;
        envelope.checked()
    }
}

impl<T: Body> Signed<T> {
    pub fn checked(self) -> Result<Self, EnvelopeError> {
        check_tag::<T>(&self.id)?;
        Ok(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, EnvelopeError>
    where
        T: DeserializeOwned,
    {
        let signed: Signed<T> = serde_json::from_value(value)?;
        signed.checked()
    }
}

fn check_tag<T: Body>(id: &Id) -> Result<(), EnvelopeError> {
    if id.object_type() != T::TYPE {
        return Err(EnvelopeError::TypeMismatch {
            expected: T::TYPE.name(),
            actual: id.object_type().name(),
        });
    }
    Ok(())
}
