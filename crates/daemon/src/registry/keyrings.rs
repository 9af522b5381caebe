use http::Method;
use serde::{Deserialize, Serialize};

use common::envelope::Envelope;
use common::identity::Id;
use common::primitive::{Keyring, KeyringMember};

use super::{RegistryClient, RegistryError};

pub struct Keyrings<'a> {
    pub(crate) client: &'a RegistryClient,
}

/// A keyring with its member records.
///
/// V1 keyrings (envelope version 1) store members inline and accept new
/// members as a batch; v2 keyrings keep an append-only member log and accept
/// one member at a time on the per-keyring endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyringSection {
    pub keyring: Envelope<Keyring>,
    pub members: Vec<Envelope<KeyringMember>>,
}

impl KeyringSection {
    pub fn is_v1(&self) -> bool {
        self.keyring.version <= 1
    }

    /// The member record granting `owner_id` access, if any.
    pub fn member_for(&self, owner_id: &Id) -> Option<&Envelope<KeyringMember>> {
        self.members
            .iter()
            .find(|member| member.body.owner_id == *owner_id)
    }
}

impl Keyrings<'_> {
    /// List every keyring section in the org that the session principal can
    /// read.
    pub async fn list(&self, org_id: &Id) -> Result<Vec<KeyringSection>, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, "/keyrings")?
            .query(&[("org_id", org_id.to_string())]);
        self.client.send_json(builder).await
    }

    pub async fn get(&self, id: &Id) -> Result<KeyringSection, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, &format!("/keyrings/{id}"))?;
        self.client.send_json(builder).await
    }

    /// Create a keyring together with its initial member records.
    pub async fn create(
        &self,
        section: &KeyringSection,
    ) -> Result<KeyringSection, RegistryError> {
        let builder = self.client.request(Method::POST, "/keyrings")?.json(section);
        self.client.send_json(builder).await
    }

    /// Post a batch of members to v1 keyrings.
    pub async fn post_members_batch(
        &self,
        members: &[Envelope<KeyringMember>],
    ) -> Result<(), RegistryError> {
        let builder = self
            .client
            .request(Method::POST, "/keyring-members")?
            .json(members);
        self.client.send_empty(builder).await
    }

    /// Post a single member to a v2 keyring's member log.
    pub async fn post_member(
        &self,
        keyring_id: &Id,
        member: &Envelope<KeyringMember>,
    ) -> Result<(), RegistryError> {
        let builder = self
            .client
            .request(Method::POST, &format!("/keyrings/{keyring_id}/members"))?
            .json(member);
        self.client.send_empty(builder).await
    }
}
