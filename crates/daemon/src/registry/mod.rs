//! Typed registry client
//!
//! One resource client per registry collection, all sharing a single
//! `reqwest` client. The bearer token is attached from the session store
//! whenever it is populated; login-flow requests that authenticate with a
//! different token attach it explicitly.

use http::Method;
use reqwest::{header::HeaderMap, header::HeaderValue, Certificate, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

mod claims;
mod credentials;
mod keypairs;
mod keyrings;
mod machines;
mod orgs;
mod teams;
mod tokens;
mod users;

pub use claims::Claims;
pub use credentials::Credentials;
pub use keypairs::Keypairs;
pub use keyrings::{KeyringSection, Keyrings};
pub use machines::{MachineCreationSegment, MachineSegment, Machines};
pub use orgs::{ClaimTree, Orgs};
pub use teams::{TeamFilter, Teams};
pub use tokens::Tokens;
pub use users::Users;

use common::envelope::{Envelope, EnvelopeError, Signed};
use common::primitive::{Claim, PrivateKey, PublicKey};

use crate::session::SessionStore;

/// Structured body carried by registry 4xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub trigger: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("registry URL error: {0}")]
    Url(#[from] url::ParseError),
    #[error("registry returned {status}: {}", .body.message.as_deref().unwrap_or("no detail"))]
    Api {
        status: StatusCode,
        body: RemoteErrorBody,
    },
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl RegistryError {
    /// Whether the caller may retry without risking duplicate effects.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Network(_) => true,
            RegistryError::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RegistryError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A public key along with the claims chained to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeySegment {
    pub public_key: Signed<PublicKey>,
    pub claims: Vec<Signed<Claim>>,
}

/// A full keypair as uploaded to and returned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedKeyPair {
    #[serde(flatten)]
    pub public: PublicKeySegment,
    pub private_key: Envelope<PrivateKey>,
}

/// Client for the remote registry, the daemon's sole remote collaborator.
#[derive(Clone)]
pub struct RegistryClient {
    base: Url,
    api_version: String,
    client: reqwest::Client,
    session: SessionStore,
}

impl RegistryClient {
    pub fn new(
        registry_uri: &Url,
        api_version: &str,
        daemon_version: &str,
        session: SessionStore,
        ca_bundle: Option<&[u8]>,
    ) -> Result<Self, RegistryError> {
        let mut base = registry_uri.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(default_headers)
            .user_agent(format!("torusd/{daemon_version}"));

        // SNI and host come from the parsed URL; certificate pinning is the
        // only extra transport configuration.
        if let Some(pem) = ca_bundle {
            for certificate in Certificate::from_pem_bundle(pem)? {
                builder = builder.add_root_certificate(certificate);
            }
        }

        Ok(RegistryClient {
            base,
            api_version: api_version.to_string(),
            client: builder.build()?,
            session,
        })
    }

    pub fn tokens(&self) -> Tokens<'_> {
        Tokens { client: self }
    }

    pub fn users(&self) -> Users<'_> {
        Users { client: self }
    }

    pub fn orgs(&self) -> Orgs<'_> {
        Orgs { client: self }
    }

    pub fn teams(&self) -> Teams<'_> {
        Teams { client: self }
    }

    pub fn machines(&self) -> Machines<'_> {
        Machines { client: self }
    }

    pub fn keypairs(&self) -> Keypairs<'_> {
        Keypairs { client: self }
    }

    pub fn claims(&self) -> Claims<'_> {
        Claims { client: self }
    }

    pub fn keyrings(&self) -> Keyrings<'_> {
        Keyrings { client: self }
    }

    pub fn credentials(&self) -> Credentials<'_> {
        Credentials { client: self }
    }

    /// The registry URL for a versioned path, for the proxy's transparent
    /// forwarding as well as the typed clients.
    pub fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        let path = path.strip_prefix('/').unwrap_or(path);
        Ok(self.base.join(&format!("{}/{}", self.api_version, path))?)
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Build a request with the session's bearer token attached, when one
    /// exists.
    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<RequestBuilder, RegistryError> {
        let mut builder = self.client.request(method, self.endpoint(path)?);
        if let Some(token) = self.session.auth_token() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Build a request authenticated by an explicit token (login flows).
    pub(crate) fn request_with_token(
        &self,
        method: Method,
        path: &str,
        token: &str,
    ) -> Result<RequestBuilder, RegistryError> {
        Ok(self
            .client
            .request(method, self.endpoint(path)?)
            .bearer_auth(token))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, RegistryError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::error_from(status, response).await)
        }
    }

    pub(crate) async fn send_empty(&self, builder: RequestBuilder) -> Result<(), RegistryError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::error_from(status, response).await)
        }
    }

    async fn error_from(status: StatusCode, response: reqwest::Response) -> RegistryError {
        let body = response
            .json::<RemoteErrorBody>()
            .await
            .unwrap_or_default();
        RegistryError::Api { status, body }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::SessionStore;

    fn client() -> RegistryClient {
        RegistryClient::new(
            &Url::parse("https://registry.torus.example").unwrap(),
            "v1",
            "0.1.0",
            SessionStore::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_version_prefix() {
        let client = client();
        assert_eq!(
            client.endpoint("/tokens").unwrap().as_str(),
            "https://registry.torus.example/v1/tokens"
        );
        assert_eq!(
            client.endpoint("machines").unwrap().as_str(),
            "https://registry.torus.example/v1/machines"
        );
    }

    #[test]
    fn test_endpoint_preserves_base_path() {
        let base = Url::parse("https://gateway.example/registry").unwrap();
        let client = RegistryClient::new(&base, "v1", "0.1.0", SessionStore::new(), None).unwrap();
        assert_eq!(
            client.endpoint("/orgs").unwrap().as_str(),
            "https://gateway.example/registry/v1/orgs"
        );
    }

    #[test]
    fn test_ipv6_literal_host_parses() {
        // Hosts are handled by the URL parser, not string splitting.
        let base = Url::parse("https://[::1]:8443").unwrap();
        let client = RegistryClient::new(&base, "v1", "0.1.0", SessionStore::new(), None).unwrap();
        let endpoint = client.endpoint("/tokens").unwrap();
        assert_eq!(endpoint.host_str(), Some("[::1]"));
        assert_eq!(endpoint.port(), Some(8443));
    }
}
