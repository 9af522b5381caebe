use http::Method;

use common::envelope::Envelope;
use common::identity::Id;
use common::primitive::Credential;

use super::{RegistryClient, RegistryError};

pub struct Credentials<'a> {
    pub(crate) client: &'a RegistryClient,
}

impl Credentials<'_> {
    /// List credential envelopes matching a path expression, optionally
    /// restricted to the given teams.
    pub async fn search(
        &self,
        pathexp: &str,
        team_ids: &[Id],
    ) -> Result<Vec<Envelope<Credential>>, RegistryError> {
        let mut query: Vec<(&str, String)> = vec![("pathexp", pathexp.to_string())];
        for team_id in team_ids {
            query.push(("team_id", team_id.to_string()));
        }
        self.list(&query).await
    }

    /// List credential envelopes at an exact path.
    pub async fn get(&self, path: &str) -> Result<Vec<Envelope<Credential>>, RegistryError> {
        self.list(&[("path", path.to_string())]).await
    }

    async fn list(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<Envelope<Credential>>, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, "/credentials")?
            .query(query);
        let credentials: Vec<Envelope<Credential>> = self.client.send_json(builder).await?;
        credentials
            .into_iter()
            .map(|credential| credential.checked().map_err(RegistryError::from))
            .collect()
    }

    /// Post a batch of freshly encrypted credentials.
    pub async fn create(
        &self,
        credentials: &[Envelope<Credential>],
    ) -> Result<Vec<Envelope<Credential>>, RegistryError> {
        let builder = self
            .client
            .request(Method::POST, "/credentials")?
            .json(credentials);
        self.client.send_json(builder).await
    }
}
