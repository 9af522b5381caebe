//! Token exchange: login handshake and auth token lifecycle.

use http::Method;
use serde::{Deserialize, Serialize};

use common::encoding::Base64Url;

use super::{RegistryClient, RegistryError};

pub struct Tokens<'a> {
    pub(crate) client: &'a RegistryClient,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    email: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    salt: Base64Url,
    login_token: String,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    login_token_hmac: &'a Base64Url,
}

#[derive(Deserialize)]
struct AuthResponse {
    auth_token: String,
}

impl Tokens<'_> {
    /// Begin a login handshake: the registry returns the principal's login
    /// salt and a short-lived login token to prove possession against.
    pub async fn post_login(&self, email: &str) -> Result<(Base64Url, String), RegistryError> {
        let builder = self
            .client
            .request(Method::POST, "/tokens")?
            .json(&LoginRequest {
                kind: "login",
                email,
            });
        let response: LoginResponse = self.client.send_json(builder).await?;
        Ok((response.salt, response.login_token))
    }

    /// Exchange a proven login token for an auth token.
    pub async fn post_auth(
        &self,
        login_token: &str,
        hmac: &Base64Url,
    ) -> Result<String, RegistryError> {
        let builder = self
            .client
            .request_with_token(Method::POST, "/tokens", login_token)?
            .json(&AuthRequest {
                kind: "auth",
                login_token_hmac: hmac,
            });
        let response: AuthResponse = self.client.send_json(builder).await?;
        Ok(response.auth_token)
    }

    /// Revoke an auth token.
    pub async fn delete(&self, auth_token: &str) -> Result<(), RegistryError> {
        let builder = self.client.request_with_token(
            Method::DELETE,
            &format!("/tokens/{auth_token}"),
            auth_token,
        )?;
        self.client.send_empty(builder).await
    }
}
