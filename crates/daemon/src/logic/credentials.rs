//! Credential set and get
//!
//! Setting a credential resolves (or creates) the keyring for its path,
//! encrypts the value under the keyring MEK, chains it to the previous
//! credential at that path and name, and posts the batch. Getting lists
//! envelopes from the registry and decrypts each through the session's
//! keyring membership.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::envelope::Envelope;
use common::identity::{Id, ObjectType};
use common::pathexp::PathExp;
use common::primitive::{Credential, CredentialState};

use crate::crypto::{box_credential, unbox_credential};
use crate::observer::Notifier;
use crate::registry::KeyringSection;
use crate::secure::SecretHandle;

use super::{Engine, LogicError};

/// One `{path, name, value}` to set.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRequest {
    pub pathexp: PathExp,
    pub name: String,
    pub value: String,
}

/// A credential with its body decrypted.
#[derive(Debug, Clone, Serialize)]
pub struct PlainCredential {
    pub id: Id,
    pub pathexp: PathExp,
    pub name: String,
    pub value: String,
}

impl Engine {
    /// Encrypt and store a batch of credentials.
    pub async fn set_credentials(
        &self,
        notifier: &Notifier,
        requests: Vec<CredentialRequest>,
    ) -> Result<Vec<Envelope<Credential>>, LogicError> {
        if requests.is_empty() {
            return Err(LogicError::InvalidInput("no credentials given".to_string()));
        }
        for request in &requests {
            if !request.pathexp.is_concrete() {
                return Err(LogicError::InvalidInput(format!(
                    "credentials are set at concrete paths, got {}",
                    request.pathexp
                )));
            }
        }

        let steps = notifier.subtask(2);
        let org_id = self.org_id_for(&requests[0].pathexp).await?;

        steps.notify("Encrypting credentials", true).await?;
        let mut sections = self.client.keyrings().list(&org_id).await?;
        let own_key = self.own_encryption_key(&org_id).await?;
        let trees = self.client.orgs().get_tree(&org_id).await?;

        let mut meks: HashMap<Id, SecretHandle> = HashMap::new();
        let mut envelopes = Vec::with_capacity(requests.len());

        for request in &requests {
            let index = match find_keyring(&sections, &request.pathexp) {
                Some(index) => index,
                None => {
                    let created = self.create_keyring(&org_id, &request.pathexp).await?;
                    sections.push(created);
                    sections.len() - 1
                }
            };
            let section = &sections[index];
            let keyring_id = section.keyring.id;

            if !meks.contains_key(&keyring_id) {
                let mek = self.unwrap_own_mek(section, &own_key, &trees)?;
                meks.insert(keyring_id, mek);
            }
            let mek = meks.get(&keyring_id).expect("mek just inserted");

            let previous = self.latest_credential_id(request).await?;
            let (nonce, value) = box_credential(mek.borrow(), request.value.as_bytes())?;

            let body = Credential {
                org_id,
                keyring_id,
                pathexp: request.pathexp.clone(),
                name: request.name.clone(),
                previous,
                state: CredentialState::Set,
                nonce,
                value,
            };
            let canonical = common::canonical::to_canonical_vec(&body)
                .map_err(crate::crypto::CryptoError::from)?;
            envelopes.push(Envelope {
                id: Id::new_immutable(ObjectType::Credential, &canonical),
                version: 2,
                body,
            });
        }

        steps.notify("Uploading credentials", true).await?;
        Ok(self.client.credentials().create(&envelopes).await?)
    }

    /// Fetch and decrypt every credential matching a path expression.
    pub async fn get_credentials(
        &self,
        pathexp: &PathExp,
        team_ids: &[Id],
    ) -> Result<Vec<PlainCredential>, LogicError> {
        let org_id = self.org_id_for(pathexp).await?;
        let envelopes = self
            .client
            .credentials()
            .search(&pathexp.to_string(), team_ids)
            .await?;
        if envelopes.is_empty() {
            return Ok(Vec::new());
        }

        let sections = self.client.keyrings().list(&org_id).await?;
        let own_key = self.own_encryption_key(&org_id).await?;
        let trees = self.client.orgs().get_tree(&org_id).await?;

        let mut meks: HashMap<Id, SecretHandle> = HashMap::new();
        let mut plain = Vec::with_capacity(envelopes.len());

        for envelope in envelopes {
            if envelope.body.state == CredentialState::Unset {
                continue;
            }
            if !pathexp.matches(&envelope.body.pathexp) {
                continue;
            }

            let keyring_id = envelope.body.keyring_id;
            if !meks.contains_key(&keyring_id) {
                let section = sections
                    .iter()
                    .find(|section| section.keyring.id == keyring_id)
                    .ok_or_else(|| LogicError::NotFound("credential keyring".to_string()))?;
                let mek = self.unwrap_own_mek(section, &own_key, &trees)?;
                meks.insert(keyring_id, mek);
            }
            let mek = meks.get(&keyring_id).expect("mek just inserted");

            let value = unbox_credential(mek.borrow(), &envelope.body.nonce, &envelope.body.value)?;
            let value = String::from_utf8(value.to_vec())
                .map_err(|_| LogicError::Internal("credential is not utf-8".to_string()))?;

            plain.push(PlainCredential {
                id: envelope.id,
                pathexp: envelope.body.pathexp,
                name: envelope.body.name,
                value,
            });
        }

        Ok(plain)
    }

    /// Resolve the org identity a path expression is scoped to.
    async fn org_id_for(&self, pathexp: &PathExp) -> Result<Id, LogicError> {
        let org = self
            .client
            .orgs()
            .get_by_name(pathexp.org())
            .await?
            .ok_or_else(|| LogicError::NotFound(format!("org {}", pathexp.org())))?;
        self.db.put(&org).await?;
        Ok(org.id)
    }

    /// The id of the newest credential at this path and name, for version
    /// chaining.
    async fn latest_credential_id(
        &self,
        request: &CredentialRequest,
    ) -> Result<Option<Id>, LogicError> {
        let path = format!("{}/{}", request.pathexp, request.name);
        let existing = self.client.credentials().get(&path).await?;

        // The registry returns newest first; any entry not chained to by
        // another is the head.
        Ok(existing
            .iter()
            .find(|candidate| {
                !existing
                    .iter()
                    .any(|other| other.body.previous == Some(candidate.id))
            })
            .map(|envelope| envelope.id))
    }
}

fn find_keyring(sections: &[KeyringSection], pathexp: &PathExp) -> Option<usize> {
    sections
        .iter()
        .position(|section| section.keyring.body.pathexp == *pathexp)
}
