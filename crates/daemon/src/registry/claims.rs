use http::Method;

use common::envelope::Signed;
use common::primitive::Claim;

use super::{RegistryClient, RegistryError};

pub struct Claims<'a> {
    pub(crate) client: &'a RegistryClient,
}

impl Claims<'_> {
    pub async fn post(&self, claim: &Signed<Claim>) -> Result<Signed<Claim>, RegistryError> {
        let builder = self.client.request(Method::POST, "/claims")?.json(claim);
        let signed: Signed<Claim> = self.client.send_json(builder).await?;
        Ok(signed.checked()?)
    }
}
