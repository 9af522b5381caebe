//! Machine creation
//!
//! Builds the machine, its first token, and the token's keypairs as one
//! atomic registry segment, then grants the new token read access to every
//! keyring the creating session can read. The keypairs are produced by a
//! crypto engine running over an *ephemeral* machine session so the global
//! session is never mutated.

use time::OffsetDateTime;
use zeroize::Zeroizing;

use common::envelope::Envelope;
use common::identity::{Id, ObjectType};
use common::primitive::{alg, LoginPublicKey, Machine, MachineState, MachineToken};

use crate::crypto::{
    self, create_master_key_object, derive_login_keypair, generate_salt, generate_token_secret,
};
use crate::observer::Notifier;
use crate::registry::{ClaimedKeyPair, MachineCreationSegment, MachineSegment};
use crate::secure::SecretHandle;
use crate::session::SessionStore;

use super::{Engine, LogicError};

/// The result of machine creation. The token secret is the only
/// irrecoverable output: it is handed to the caller exactly once and never
/// persisted.
pub struct CreatedMachine {
    pub segment: MachineSegment,
    pub token_id: Id,
    pub token_secret: SecretHandle,
}

impl Engine {
    /// Create a machine in `org_id` under the role team `team_id`.
    pub async fn create_machine(
        &self,
        notifier: &Notifier,
        org_id: Id,
        team_id: Id,
        name: &str,
    ) -> Result<CreatedMachine, LogicError> {
        if name.is_empty() {
            return Err(LogicError::InvalidInput("machine name required".to_string()));
        }
        let created_by = self.session.auth_id().ok_or(LogicError::Unauthorized)?;

        let steps = notifier.subtask(4);

        steps.notify("Generating machine token", true).await?;
        let token_secret = generate_token_secret(&self.guard)?;
        let salt = generate_salt();
        let secret_copy = Zeroizing::new(token_secret.borrow().to_vec());
        let login_salt = salt.clone();
        let login_keypair = tokio::task::spawn_blocking(move || {
            derive_login_keypair(&secret_copy, &login_salt)
        })
        .await??;

        let machine = Envelope {
            id: Id::new_mutable(ObjectType::Machine),
            version: 1,
            body: Machine {
                org_id,
                team_id,
                name: name.to_string(),
                state: MachineState::Active,
                created_by,
                created: OffsetDateTime::now_utc(),
                destroyed_by: None,
                destroyed: None,
            },
        };

        let master_secret = Zeroizing::new(token_secret.borrow().to_vec());
        let master = tokio::task::spawn_blocking(move || {
            create_master_key_object(&master_secret)
        })
        .await??;

        let token = Envelope {
            id: Id::new_mutable(ObjectType::MachineToken),
            version: 1,
            body: MachineToken {
                org_id,
                machine_id: machine.id,
                public_key: LoginPublicKey {
                    alg: alg::EDDSA.to_string(),
                    salt,
                    value: login_keypair.public_key(),
                },
                master,
                state: MachineState::Active,
                created_by,
                created: OffsetDateTime::now_utc(),
                destroyed_by: None,
                destroyed: None,
            },
        };

        steps.notify("Generating token keypairs", true).await?;
        let keypairs = self
            .token_keypairs(org_id, machine.clone(), token.clone(), &token_secret)
            .await?;

        let encryption_key = keypairs
            .iter()
            .map(|pair| &pair.public.public_key)
            .find(|public| public.body.key_type == common::primitive::KeyType::Encryption)
            .map(|public| (public.id, public.body.value.to_vec()))
            .ok_or_else(|| LogicError::Internal("missing encryption keypair".to_string()))?;

        steps.notify("Creating machine", true).await?;
        let segment = MachineCreationSegment {
            machine,
            token: token.clone(),
            keypairs,
        };
        let created = self.client.machines().create(&segment).await?;

        steps
            .notify("Creating keyring memberships for token", true)
            .await?;
        self.encode_token(notifier, &token, encryption_key).await?;

        Ok(CreatedMachine {
            segment: created,
            token_id: token.id,
            token_secret,
        })
    }

    /// Generate and package the token's signing and encryption keypairs,
    /// operating as the machine through an ephemeral session.
    async fn token_keypairs(
        &self,
        org_id: Id,
        machine: Envelope<Machine>,
        token: Envelope<MachineToken>,
        token_secret: &SecretHandle,
    ) -> Result<Vec<ClaimedKeyPair>, LogicError> {
        let token_id = token.id;

        // An empty machine session lets the crypto engine derive and seal
        // keys on behalf of the not-yet-persisted machine.
        let ephemeral = SessionStore::new();
        let mut secret_copy = token_secret.borrow().to_vec();
        let secret_handle = self.guard.import(&mut secret_copy)?;
        ephemeral.populate_machine(machine, token, secret_handle, String::new())?;

        let engine = crypto::Engine::new(ephemeral, self.guard.clone());
        let keypairs = tokio::task::spawn_blocking(move || {
            super::keypairs::package_claimed_keypairs(&engine, org_id, token_id)
        })
        .await??;

        Ok(keypairs)
    }

    /// Grant the new token read access to every keyring the creating
    /// session can read.
    async fn encode_token(
        &self,
        notifier: &Notifier,
        token: &Envelope<MachineToken>,
        (public_key_id, public_key): (Id, Vec<u8>),
    ) -> Result<(), LogicError> {
        let steps = notifier.subtask(1);

        let set = self
            .derive_memberships(&token.body.org_id, token.id, public_key_id, &public_key)
            .await?;

        steps.notify("Uploading keyring memberships", true).await?;
        self.post_memberships(&set).await?;
        tracing::debug!(members = set.len(), "keyring memberships uploaded");
        Ok(())
    }
}
