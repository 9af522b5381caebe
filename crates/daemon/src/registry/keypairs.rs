use http::Method;

use common::identity::Id;

use super::{ClaimedKeyPair, RegistryClient, RegistryError};

pub struct Keypairs<'a> {
    pub(crate) client: &'a RegistryClient,
}

impl Keypairs<'_> {
    /// List the session principal's keypairs in an org.
    pub async fn list(&self, org_id: &Id) -> Result<Vec<ClaimedKeyPair>, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, "/keypairs")?
            .query(&[("org_id", org_id.to_string())]);
        self.client.send_json(builder).await
    }

    pub async fn post(&self, keypair: &ClaimedKeyPair) -> Result<ClaimedKeyPair, RegistryError> {
        let builder = self.client.request(Method::POST, "/keypairs")?.json(keypair);
        self.client.send_json(builder).await
    }
}
