//! Session lifecycle operations: login, logout, status.

use serde::Serialize;
use zeroize::Zeroizing;

use common::encoding::Base64Url;
use common::identity::Id;

use crate::crypto::{derive_login_keypair, login_hmac, unwrap_master_key};
use crate::registry::RegistryError;

use super::{Engine, LogicError};

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub token: bool,
    pub passphrase: bool,
}

impl Engine {
    /// Log in as a user with email and passphrase.
    ///
    /// On any step's failure the session is left empty and intermediate
    /// secrets are wiped.
    pub async fn user_login(&self, email: &str, passphrase: &str) -> Result<(), LogicError> {
        if email.is_empty() || passphrase.is_empty() {
            return Err(LogicError::InvalidInput(
                "email and passphrase required".to_string(),
            ));
        }
        if self.session.has_secret() {
            return Err(LogicError::AlreadyAuthenticated);
        }

        let (salt, login_token) = self
            .retry_once(|| async move { self.client.tokens().post_login(email).await })
            .await?;

        // scrypt is deliberately slow; keep it off the runtime workers
        let secret = Zeroizing::new(passphrase.as_bytes().to_vec());
        let derived = secret.clone();
        let keypair = tokio::task::spawn_blocking(move || {
            derive_login_keypair(&derived, &salt)
        })
        .await??;
        let hmac = login_hmac(&keypair, &login_token)?;

        let auth_token = self.client.tokens().post_auth(&login_token, &hmac).await?;
        let identity = self.client.users().get_self(&auth_token).await?;

        self.db.put(&identity).await?;

        let mut secret = secret;
        let passphrase = self.guard.import(&mut secret)?;
        self.session
            .populate_user(identity, passphrase, auth_token)?;

        tracing::info!(email, "user session established");
        Ok(())
    }

    /// Log in as a machine with a token id and token secret.
    pub async fn machine_login(
        &self,
        token_id: Id,
        secret: &Base64Url,
    ) -> Result<(), LogicError> {
        if self.session.has_secret() {
            return Err(LogicError::AlreadyAuthenticated);
        }

        let token = self.client.machines().get_token(&token_id).await?;
        let segment = self.client.machines().get(&token.body.machine_id).await?;

        // Prove possession: the login keypair derived from the secret must
        // match the public key recorded in the token.
        let secret_bytes = Zeroizing::new(secret.to_vec());
        let salt = token.body.public_key.salt.clone();
        let derived = secret_bytes.clone();
        let keypair =
            tokio::task::spawn_blocking(move || derive_login_keypair(&derived, &salt)).await??;
        if keypair.public_key() != token.body.public_key.value {
            return Err(LogicError::Crypto(crate::crypto::CryptoError::Failure(
                "token secret does not match",
            )));
        }

        let (_, login_token) = self
            .retry_once(|| async move {
                self.client.tokens().post_login(&token_id.to_string()).await
            })
            .await?;
        let hmac = login_hmac(&keypair, &login_token)?;
        let auth_token = self.client.tokens().post_auth(&login_token, &hmac).await?;

        // Recover the master key before committing the session; a wrong
        // secret must fail here, not at first use.
        let guard = self.guard.clone();
        let master = token.body.master.clone();
        let unwrap_secret = secret_bytes.clone();
        let master_key = tokio::task::spawn_blocking(move || {
            unwrap_master_key(&guard, &unwrap_secret, &master)
        })
        .await??;

        let mut secret_bytes = secret_bytes;
        let secret_handle = self.guard.import(&mut secret_bytes)?;
        self.session.populate_machine(
            segment.machine,
            token,
            secret_handle,
            auth_token,
        )?;
        self.session
            .cache_master_key(std::sync::Arc::new(master_key))?;

        tracing::info!(%token_id, "machine session established");
        Ok(())
    }

    /// Log out, revoking the auth token at the registry.
    ///
    /// A 4xx from the registry means the token is already gone there; the
    /// local session is cleared and the logout reported successful. A 5xx
    /// or network failure keeps the session so the user may retry.
    pub async fn logout(&self) -> Result<(), LogicError> {
        let token = self
            .session
            .auth_token()
            .ok_or_else(|| LogicError::NotFound("session".to_string()))?;

        match self.client.tokens().delete(&token).await {
            Ok(()) => {
                self.session.logout();
                Ok(())
            }
            Err(RegistryError::Api { status, .. }) if status.is_client_error() => {
                tracing::info!("registry no longer knows the auth token; clearing session");
                self.session.logout();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn session_status(&self) -> SessionStatus {
        SessionStatus {
            token: self.session.has_token(),
            passphrase: self.session.has_secret(),
        }
    }
}
