//! Business logic engine
//!
//! Operations composed from the crypto engine and the registry client:
//! login flows, machine-token creation, keyring-membership derivation, and
//! credential set/get. The engine owns no session state of its own; it
//! reads and populates the shared [`SessionStore`].

mod credentials;
mod keypairs;
mod keyring;
mod machine;
mod session_ops;

pub use credentials::{CredentialRequest, PlainCredential};
pub use machine::CreatedMachine;
pub use session_ops::SessionStatus;

use crate::crypto::{self, CryptoError};
use crate::database::{Database, DatabaseError};
use crate::observer::ObserverError;
use crate::registry::{RegistryClient, RegistryError};
use crate::secure::{Guard, SecureError};
use crate::session::{SessionError, SessionStore};

/// The daemon's operation error taxonomy. The proxy maps each kind onto a
/// wire status.
#[derive(Debug, thiserror::Error)]
pub enum LogicError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not logged in")]
    Unauthorized,
    #[error("a session is already active")]
    AlreadyAuthenticated,
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for LogicError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyAuthenticated => LogicError::AlreadyAuthenticated,
            SessionError::NotAuthenticated => LogicError::Unauthorized,
        }
    }
}

impl From<ObserverError> for LogicError {
    fn from(_: ObserverError) -> Self {
        LogicError::Cancelled
    }
}

impl From<SecureError> for LogicError {
    fn from(err: SecureError) -> Self {
        LogicError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LogicError {
    fn from(err: tokio::task::JoinError) -> Self {
        LogicError::Internal(format!("background task failed: {err}"))
    }
}

/// The logic engine. Clones share the same stores and clients.
#[derive(Clone)]
pub struct Engine {
    session: SessionStore,
    db: Database,
    crypto: crypto::Engine,
    client: RegistryClient,
    guard: Guard,
}

impl Engine {
    pub fn new(
        session: SessionStore,
        db: Database,
        crypto: crypto::Engine,
        client: RegistryClient,
        guard: Guard,
    ) -> Self {
        Engine {
            session,
            db,
            crypto,
            client,
            guard,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Retry a registry call once when the failure is transient and the
    /// operation is idempotent.
    pub(crate) async fn retry_once<T, F, Fut>(&self, call: F) -> Result<T, RegistryError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RegistryError>>,
    {
        match call().await {
            Err(err) if err.is_retryable() => {
                tracing::debug!("retrying transient registry failure: {err}");
                call().await
            }
            result => result,
        }
    }
}
