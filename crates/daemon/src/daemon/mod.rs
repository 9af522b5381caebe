//! Daemon lifecycle
//!
//! The torus coprocess: holds session secrets, performs all cryptographic
//! operations, and proxies authenticated requests to the registry. One
//! instance per torus root, enforced by the PID lockfile.

use tokio::sync::watch;

use common::encoding::Base64Url;
use common::identity::Id;

use crate::config::Config;
use crate::crypto;
use crate::database::{Database, DatabaseError};
use crate::http_server::{AuthProxy, ProxyError, ProxyState};
use crate::logic;
use crate::process::lockfile::{LockfileError, PidLock};
use crate::registry::{RegistryClient, RegistryError};
use crate::secure::Guard;
use crate::session::SessionStore;
use crate::updates::{UpdatesEngine, UpdatesError};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Lockfile(#[from] LockfileError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("unable to build registry transport: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Updates(#[from] UpdatesError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("auto-login failed: {0}")]
    AutoLogin(#[from] logic::LogicError),
    #[error("invalid TORUS_TOKEN_ID: {0}")]
    TokenId(#[from] common::identity::IdentityError),
    #[error("invalid TORUS_TOKEN_SECRET")]
    TokenSecret,
}

pub struct Daemon {
    lock: PidLock,
    db: Database,
    session: SessionStore,
    guard: Guard,
    logic: logic::Engine,
    updates: UpdatesEngine,
    proxy: Option<AuthProxy>,
}

impl Daemon {
    pub async fn new(config: &Config) -> Result<Self, DaemonError> {
        let lock = PidLock::acquire(config.pid_path.clone(), config.group_shared)?;
        let db = Database::open(&config.db_path).await?;

        let guard = Guard::new();
        let session = SessionStore::new();
        let crypto_engine = crypto::Engine::new(session.clone(), guard.clone());
        let client = RegistryClient::new(
            &config.registry_uri,
            config.api_version,
            config.version,
            session.clone(),
            config.ca_bundle.as_deref(),
        )?;
        let logic = logic::Engine::new(
            session.clone(),
            db.clone(),
            crypto_engine,
            client,
            guard.clone(),
        );

        let updates = UpdatesEngine::new(config.manifest_uri.clone(), config.version, config.version)?;

        let proxy = AuthProxy::bind(
            config,
            ProxyState {
                logic: logic.clone(),
                session: session.clone(),
                updates: updates.clone(),
                version: config.version,
            },
        )?;

        Ok(Daemon {
            lock,
            db,
            session,
            guard,
            logic,
            updates,
            proxy: Some(proxy),
        })
    }

    /// The domain socket the daemon is listening on.
    pub fn addr(&self) -> Option<&std::path::Path> {
        self.proxy.as_ref().map(AuthProxy::addr)
    }

    /// Run the daemon main loop: environment-driven auto-login, the updates
    /// worker, then the proxy until shutdown.
    pub async fn run(mut self, shutdown_rx: watch::Receiver<()>) -> Result<(), DaemonError> {
        self.auto_login().await?;
        self.updates.start();

        let proxy = self.proxy.take().expect("proxy present until run");
        let result = proxy.listen(shutdown_rx).await;

        self.shutdown().await;
        Ok(result?)
    }

    /// Log in from the environment when a full credential pair is present.
    async fn auto_login(&self) -> Result<(), DaemonError> {
        let email = std::env::var("TORUS_EMAIL").ok();
        let password = std::env::var("TORUS_PASSWORD").ok();
        if let (Some(email), Some(password)) = (email, password) {
            tracing::info!(email, "attempting environment login as user");
            self.logic.user_login(&email, &password).await?;
        }

        let token_id = std::env::var("TORUS_TOKEN_ID").ok();
        let token_secret = std::env::var("TORUS_TOKEN_SECRET").ok();
        if let (Some(token_id), Some(token_secret)) = (token_id, token_secret) {
            tracing::info!(token_id, "attempting environment login as machine");
            let id: Id = token_id.parse()?;
            let secret = data_encoding::BASE64
                .decode(token_secret.as_bytes())
                .map_err(|_| DaemonError::TokenSecret)?;
            self.logic.machine_login(id, &Base64Url::new(secret)).await?;
        }

        Ok(())
    }

    /// Graceful shutdown: stop the updates worker, close the db, release
    /// the lock, and drain the guard pool. The proxy listener has already
    /// stopped by the time this runs.
    async fn shutdown(&mut self) {
        self.updates.stop();
        self.db.close().await;
        self.session.logout();
        if let Err(err) = self.lock.release() {
            tracing::warn!("could not release lockfile: {err}");
        }
        self.guard.drain();
    }
}
