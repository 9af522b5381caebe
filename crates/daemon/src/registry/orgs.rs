use http::Method;
use serde::{Deserialize, Serialize};

use common::envelope::Envelope;
use common::identity::Id;
use common::primitive::Org;

use super::{PublicKeySegment, RegistryClient, RegistryError};

pub struct Orgs<'a> {
    pub(crate) client: &'a RegistryClient,
}

/// The claim tree for one org: every public key claimed by each owner,
/// chained back to the org root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTree {
    pub org_id: Id,
    pub public_keys: Vec<PublicKeySegment>,
}

#[derive(Serialize)]
struct CreateOrg<'a> {
    name: &'a str,
}

impl Orgs<'_> {
    pub async fn get(&self, id: &Id) -> Result<Envelope<Org>, RegistryError> {
        let builder = self.client.request(Method::GET, &format!("/orgs/{id}"))?;
        let envelope: Envelope<Org> = self.client.send_json(builder).await?;
        Ok(envelope.checked()?)
    }

    pub async fn list(&self, name: Option<&str>) -> Result<Vec<Envelope<Org>>, RegistryError> {
        let mut builder = self.client.request(Method::GET, "/orgs")?;
        if let Some(name) = name {
            builder = builder.query(&[("name", name)]);
        }
        let orgs: Vec<Envelope<Org>> = self.client.send_json(builder).await?;
        orgs.into_iter()
            .map(|org| org.checked().map_err(RegistryError::from))
            .collect()
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Envelope<Org>>, RegistryError> {
        Ok(self.list(Some(name)).await?.into_iter().next())
    }

    pub async fn create(&self, name: &str) -> Result<Envelope<Org>, RegistryError> {
        let builder = self
            .client
            .request(Method::POST, "/orgs")?
            .json(&CreateOrg { name });
        let envelope: Envelope<Org> = self.client.send_json(builder).await?;
        Ok(envelope.checked()?)
    }

    /// Fetch the org's claim trees, one entry per org the filter matches.
    pub async fn get_tree(&self, org_id: &Id) -> Result<Vec<ClaimTree>, RegistryError> {
        let builder = self
            .client
            .request(Method::GET, "/claimtree")?
            .query(&[("org_id", org_id.to_string())]);
        self.client.send_json(builder).await
    }
}
