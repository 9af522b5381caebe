//! Keyring access and membership derivation
//!
//! A keyring's master encryption key (MEK) reaches a principal through its
//! member record: the MEK boxed to the member's encryption public key. The
//! helpers here unwrap our own MEK, wrap MEKs for new members, and
//! materialize keyrings for fresh credential paths.

use time::OffsetDateTime;

use common::envelope::Envelope;
use common::identity::{Id, ObjectType};
use common::pathexp::PathExp;
use common::primitive::{KeyType, Keyring, KeyringMember};

use crate::crypto::{decrypt_member_key, encrypt_member_key};
use crate::registry::{ClaimTree, KeyringSection};
use crate::secure::SecretHandle;

use super::{Engine, LogicError};

/// The session principal's encryption keypair, with the private scalar
/// unsealed into guarded memory.
pub(crate) struct OwnEncryptionKey {
    pub public_id: Id,
    pub secret: crypto_box::SecretKey,
}

impl Engine {
    /// Fetch and unseal the session principal's encryption keypair for an
    /// org.
    pub(crate) async fn own_encryption_key(
        &self,
        org_id: &Id,
    ) -> Result<OwnEncryptionKey, LogicError> {
        let keypairs = self.client.keypairs().list(org_id).await?;
        let pair = keypairs
            .into_iter()
            .find(|pair| pair.public.public_key.body.key_type == KeyType::Encryption)
            .ok_or_else(|| LogicError::NotFound("encryption keypair".to_string()))?;

        let crypto = self.crypto.clone();
        let private = pair.private_key.body.clone();
        let scalar =
            tokio::task::spawn_blocking(move || crypto.unseal_private_key(&private)).await??;

        let bytes: [u8; 32] = scalar
            .borrow()
            .try_into()
            .map_err(|_| LogicError::Internal("encryption scalar length".to_string()))?;

        Ok(OwnEncryptionKey {
            public_id: pair.public.public_key.id,
            secret: crypto_box::SecretKey::from(bytes),
        })
    }

    /// Unwrap the keyring MEK granted to the session principal by its
    /// member record.
    pub(crate) fn unwrap_own_mek(
        &self,
        section: &KeyringSection,
        own_key: &OwnEncryptionKey,
        trees: &[ClaimTree],
    ) -> Result<SecretHandle, LogicError> {
        let owner_id = self.session.auth_id().ok_or(LogicError::Unauthorized)?;
        let member = section
            .member_for(&owner_id)
            .ok_or_else(|| LogicError::NotFound("keyring membership".to_string()))?;

        let sender = find_public_key(trees, &member.body.encrypting_key_id)
            .ok_or_else(|| LogicError::NotFound("encrypting public key".to_string()))?;

        Ok(decrypt_member_key(
            &self.guard,
            &member.body.key,
            sender,
            &own_key.secret,
        )?)
    }

    /// Materialize member records wrapping each readable keyring's MEK to a
    /// new owner. Returns the records split by keyring layout: v1 members
    /// are posted as one batch, v2 members one at a time per keyring.
    pub(crate) async fn derive_memberships(
        &self,
        org_id: &Id,
        target_owner_id: Id,
        target_public_key_id: Id,
        target_public_key: &[u8],
    ) -> Result<MembershipSet, LogicError> {
        let owner_id = self.session.auth_id().ok_or(LogicError::Unauthorized)?;
        let sections = self.client.keyrings().list(org_id).await?;
        if sections.is_empty() {
            return Ok(MembershipSet::default());
        }

        let own_key = self.own_encryption_key(org_id).await?;
        let trees = self.client.orgs().get_tree(org_id).await?;

        let mut set = MembershipSet::default();
        for section in &sections {
            // Only keyrings this session can read produce memberships.
            let mek = match self.unwrap_own_mek(section, &own_key, &trees) {
                Ok(mek) => mek,
                Err(LogicError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            let sealed = encrypt_member_key(mek.borrow(), target_public_key, &own_key.secret)?;
            let member = Envelope {
                id: Id::new_mutable(ObjectType::KeyringMember),
                version: section.keyring.version,
                body: KeyringMember {
                    org_id: *org_id,
                    keyring_id: section.keyring.id,
                    owner_id: target_owner_id,
                    public_key_id: target_public_key_id,
                    encrypting_key_id: own_key.public_id,
                    key: sealed,
                    created_by: owner_id,
                    created: OffsetDateTime::now_utc(),
                },
            };

            if section.is_v1() {
                set.v1.push(member);
            } else {
                set.v2.push(member);
            }
        }

        Ok(set)
    }

    /// Upload a membership set, honoring the v1 batch / v2 per-keyring
    /// posting split. A failed member upload fails the whole flow.
    pub(crate) async fn post_memberships(&self, set: &MembershipSet) -> Result<(), LogicError> {
        if !set.v1.is_empty() {
            self.client.keyrings().post_members_batch(&set.v1).await?;
        }
        for member in &set.v2 {
            self.client
                .keyrings()
                .post_member(&member.body.keyring_id, member)
                .await?;
        }
        Ok(())
    }

    /// Create a keyring for a fresh credential path: generate a MEK and
    /// wrap it to every org principal with a claimed encryption key.
    pub(crate) async fn create_keyring(
        &self,
        org_id: &Id,
        pathexp: &PathExp,
    ) -> Result<KeyringSection, LogicError> {
        let owner_id = self.session.auth_id().ok_or(LogicError::Unauthorized)?;
        let own_key = self.own_encryption_key(org_id).await?;
        let trees = self.client.orgs().get_tree(org_id).await?;

        let mut mek = [0u8; 32];
        getrandom::getrandom(&mut mek)
            .map_err(|_| LogicError::Internal("rng failure".to_string()))?;
        let mek = zeroize::Zeroizing::new(mek);

        let keyring = Envelope {
            id: Id::new_mutable(ObjectType::Keyring),
            version: 2,
            body: Keyring {
                org_id: *org_id,
                pathexp: pathexp.clone(),
                previous: None,
                created_by: owner_id,
                created: OffsetDateTime::now_utc(),
            },
        };

        let mut members = Vec::new();
        for tree in trees {
            for segment in &tree.public_keys {
                let public = &segment.public_key;
                if public.body.key_type != KeyType::Encryption {
                    continue;
                }

                let sealed =
                    encrypt_member_key(mek.as_ref(), &public.body.value, &own_key.secret)?;
                members.push(Envelope {
                    id: Id::new_mutable(ObjectType::KeyringMember),
                    version: keyring.version,
                    body: KeyringMember {
                        org_id: *org_id,
                        keyring_id: keyring.id,
                        owner_id: public.body.owner_id,
                        public_key_id: public.id,
                        encrypting_key_id: own_key.public_id,
                        key: sealed,
                        created_by: owner_id,
                        created: OffsetDateTime::now_utc(),
                    },
                });
            }
        }

        let section = KeyringSection { keyring, members };
        Ok(self.client.keyrings().create(&section).await?)
    }
}

/// New member records split by keyring layout version.
#[derive(Debug, Default)]
pub(crate) struct MembershipSet {
    pub v1: Vec<Envelope<KeyringMember>>,
    pub v2: Vec<Envelope<KeyringMember>>,
}

impl MembershipSet {
    pub fn len(&self) -> usize {
        self.v1.len() + self.v2.len()
    }
}

fn find_public_key<'a>(trees: &'a [ClaimTree], key_id: &Id) -> Option<&'a [u8]> {
    trees.iter().find_map(|tree| {
        tree.public_keys
            .iter()
            .find(|segment| segment.public_key.id == *key_id)
            .map(|segment| &*segment.public_key.body.value)
    })
}
