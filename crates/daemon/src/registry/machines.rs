use http::Method;
use serde::{Deserialize, Serialize};

use common::envelope::Envelope;
use common::identity::Id;
use common::primitive::{Machine, MachineState, MachineToken};

use super::{ClaimedKeyPair, RegistryClient, RegistryError};

pub struct Machines<'a> {
    pub(crate) client: &'a RegistryClient,
}

/// A machine with its tokens, as the registry returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSegment {
    pub machine: Envelope<Machine>,
    pub tokens: Vec<Envelope<MachineToken>>,
}

/// Everything a machine needs to exist, posted atomically: the machine, its
/// first token, and the token's claimed keypairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineCreationSegment {
    pub machine: Envelope<Machine>,
    pub token: Envelope<MachineToken>,
    pub keypairs: Vec<ClaimedKeyPair>,
}

impl Machines<'_> {
    pub async fn list(
        &self,
        org_id: &Id,
        state: Option<MachineState>,
        name: Option<&str>,
        team_id: Option<&Id>,
    ) -> Result<Vec<MachineSegment>, RegistryError> {
        let mut query: Vec<(&str, String)> = vec![("org_id", org_id.to_string())];
        if let Some(state) = state {
            let state = match state {
                MachineState::Active => "active",
                MachineState::Destroyed => "destroyed",
            };
            query.push(("state", state.to_string()));
        }
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }
        if let Some(team_id) = team_id {
            query.push(("team_id", team_id.to_string()));
        }

        let builder = self.client.request(Method::GET, "/machines")?.query(&query);
        self.client.send_json(builder).await
    }

    pub async fn get(&self, id: &Id) -> Result<MachineSegment, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, &format!("/machines/{id}"))?;
        self.client.send_json(builder).await
    }

    /// Atomically create the machine, its token, and the token's keypairs.
    pub async fn create(
        &self,
        segment: &MachineCreationSegment,
    ) -> Result<MachineSegment, RegistryError> {
        let builder = self.client.request(Method::POST, "/machines")?.json(segment);
        self.client.send_json(builder).await
    }

    pub async fn destroy(&self, id: &Id) -> Result<(), RegistryError> {
        let builder = self
            .client
            .request(Method::DELETE, &format!("/machines/{id}"))?;
        self.client.send_empty(builder).await
    }

    /// Look up a machine token envelope by id (machine login).
    pub async fn get_token(&self, token_id: &Id) -> Result<Envelope<MachineToken>, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, &format!("/machine-tokens/{token_id}"))?;
        let envelope: Envelope<MachineToken> = self.client.send_json(builder).await?;
        Ok(envelope.checked()?)
    }
}
