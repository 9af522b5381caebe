//! Org keypair generation for the session principal.

use time::OffsetDateTime;

use common::identity::Id;
use common::primitive::Claim;

use crate::crypto;
use crate::registry::{ClaimedKeyPair, PublicKeySegment};

use super::{Engine, LogicError};

/// Generate, package, and self-claim a signing + encryption keypair for
/// `owner_id` in `org_id`, using the given crypto engine. Machine creation
/// calls this with an engine over the ephemeral machine session.
pub(crate) fn package_claimed_keypairs(
    engine: &crypto::Engine,
    org_id: Id,
    owner_id: Id,
) -> Result<Vec<ClaimedKeyPair>, LogicError> {
    let pairs = engine.generate_keypairs()?;
    let (public_sig, private_sig) = engine.package_signing_keypair(org_id, owner_id, &pairs)?;
    let (public_enc, private_enc) =
        engine.package_encryption_keypair(org_id, owner_id, &pairs, public_sig.id)?;

    let sig_claim = engine.signed_claim(
        Claim::self_signature(org_id, owner_id, public_sig.id, OffsetDateTime::now_utc()),
        public_sig.id,
        &pairs.signing,
    )?;
    let enc_claim = engine.signed_claim(
        Claim::self_signature(org_id, owner_id, public_enc.id, OffsetDateTime::now_utc()),
        public_sig.id,
        &pairs.signing,
    )?;

    Ok(vec![
        ClaimedKeyPair {
            public: PublicKeySegment {
                public_key: public_sig,
                claims: vec![sig_claim],
            },
            private_key: private_sig,
        },
        ClaimedKeyPair {
            public: PublicKeySegment {
                public_key: public_enc,
                claims: vec![enc_claim],
            },
            private_key: private_enc,
        },
    ])
}

impl Engine {
    /// Generate and upload org keypairs for the current session principal.
    pub async fn generate_org_keypairs(
        &self,
        org_id: Id,
    ) -> Result<Vec<ClaimedKeyPair>, LogicError> {
        let owner_id = self.session.auth_id().ok_or(LogicError::Unauthorized)?;

        let crypto = self.crypto.clone();
        let keypairs = tokio::task::spawn_blocking(move || {
            package_claimed_keypairs(&crypto, org_id, owner_id)
        })
        .await??;

        for keypair in &keypairs {
            self.client.keypairs().post(keypair).await?;
        }
        tracing::info!(%org_id, "org keypairs generated");
        Ok(keypairs)
    }
}
