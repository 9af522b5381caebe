use http::Method;

use common::envelope::Envelope;
use common::primitive::User;

use super::{RegistryClient, RegistryError};

pub struct Users<'a> {
    pub(crate) client: &'a RegistryClient,
}

impl Users<'_> {
    /// Fetch the authenticated principal's self envelope. The auth token is
    /// passed explicitly because the session is not yet populated during
    /// login.
    pub async fn get_self(&self, auth_token: &str) -> Result<Envelope<User>, RegistryError> {
        let builder = self
            .client
            .request_with_token(Method::GET, "/users/self", auth_token)?;
        let envelope: Envelope<User> = self.client.send_json(builder).await?;
        Ok(envelope.checked()?)
    }
}
