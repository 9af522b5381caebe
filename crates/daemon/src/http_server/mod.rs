//! Auth proxy
//!
//! A local HTTP server on a user-owned unix domain socket. Internal routes
//! drive the logic engine; any other recognized path is forwarded to the
//! registry with the session's bearer token attached. The proxy owns its
//! accept loop so peer credentials are inspected before the HTTP machinery
//! reads a single byte: connections from other uids are dropped on sight.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{unix::UCred, UnixListener};
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;

pub mod api;
mod error;

pub use error::{ApiError, WireError};

use crate::config::Config;
use crate::logic::{Engine, LogicError};
use crate::observer::{Event, EventKind, Notifier};
use crate::session::SessionStore;
use crate::updates::UpdatesEngine;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("unable to bind the daemon socket: {0}")]
    Bind(std::io::Error),
    #[error("an error occurred running the proxy: {0}")]
    ServingFailed(#[from] std::io::Error),
}

/// Shared handler state.
#[derive(Clone)]
pub struct ProxyState {
    pub logic: Engine,
    pub session: SessionStore,
    pub updates: UpdatesEngine,
    pub version: &'static str,
}

/// Which peers may talk to the socket.
#[derive(Debug, Clone, Copy)]
struct PeerPolicy {
    uid: u32,
    group_shared: Option<u32>,
}

impl PeerPolicy {
    fn allows(&self, cred: &UCred) -> bool {
        self.allows_ids(cred.uid(), cred.gid())
    }

    fn allows_ids(&self, uid: u32, gid: u32) -> bool {
        if uid == self.uid {
            return true;
        }
        match self.group_shared {
            Some(shared_gid) => gid == shared_gid,
            None => false,
        }
    }
}

pub struct AuthProxy {
    listener: UnixListener,
    router: Router,
    socket_path: PathBuf,
    policy: PeerPolicy,
}

impl AuthProxy {
    /// Bind the domain socket (mode 0600, or 0640 in group-shared mode).
    pub fn bind(config: &Config, state: ProxyState) -> Result<Self, ProxyError> {
        let socket_path = config.socket_path.clone();
        if socket_path.exists() {
            fs::remove_file(&socket_path).map_err(ProxyError::Bind)?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(ProxyError::Bind)?;
        let mode = if config.group_shared { 0o640 } else { 0o600 };
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(mode))
            .map_err(ProxyError::Bind)?;

        // SAFETY: getuid/getgid cannot fail.
        let policy = PeerPolicy {
            uid: unsafe { libc::getuid() },
            group_shared: config.group_shared.then(|| unsafe { libc::getgid() }),
        };

        let router = api::router(state).layer(TraceLayer::new_for_http());

        Ok(AuthProxy {
            listener,
            router,
            socket_path,
            policy,
        })
    }

    pub fn addr(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Accept connections until shutdown. One task per connection; handlers
    /// within a connection run serially, connections in parallel.
    pub async fn listen(self, mut shutdown_rx: watch::Receiver<()>) -> Result<(), ProxyError> {
        tracing::info!(socket = %self.socket_path.display(), "proxy listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted?;

                    let cred = match stream.peer_cred() {
                        Ok(cred) => cred,
                        Err(err) => {
                            tracing::warn!("unable to read peer credentials: {err}");
                            continue;
                        }
                    };
                    if !self.policy.allows(&cred) {
                        tracing::warn!(uid = cred.uid(), "dropping connection from foreign peer");
                        continue;
                    }

                    let service = TowerToHyperService::new(self.router.clone());
                    tokio::spawn(async move {
                        let result = hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                        if let Err(err) = result {
                            tracing::debug!("connection ended with error: {err}");
                        }
                    });
                }
            }
        }

        tracing::info!("proxy shutting down");
        let _ = fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Run a long operation, streaming its progress events as newline-delimited
/// JSON. The final chunk is the operation's result tagged
/// `{"type": "finished", ...}`, or `{"type": "error", ...}` on failure.
/// Dropping the response body cancels the operation at its next checkpoint.
pub(crate) fn progress_response<F, Fut>(op: F) -> Response
where
    F: FnOnce(Notifier) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<serde_json::Value, LogicError>> + Send + 'static,
{
    let (chunk_tx, chunk_rx) = mpsc::channel::<serde_json::Value>(16);
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(16);

    let forward_tx = chunk_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let value = serde_json::to_value(&event).expect("events serialize");
            if forward_tx.send(value).await.is_err() {
                // Client went away; closing the event channel cancels the
                // producer at its next notification.
                break;
            }
        }
    });

    let notifier = Notifier::new(event_tx);
    let probe = notifier.clone();
    tokio::spawn(async move {
        let chunk = match op(notifier).await {
            Ok(mut value) => {
                value["type"] = serde_json::to_value(EventKind::Finished).expect("kind");
                value
            }
            Err(err) => {
                let api: ApiError = err.into();
                serde_json::json!({
                    "type": EventKind::Error,
                    "message": api.body.error,
                    "completed": probe.completed(),
                    "total": probe.total(),
                })
            }
        };
        let _ = chunk_tx.send(chunk).await;
    });

    let stream = futures::stream::unfold(chunk_rx, |mut chunk_rx| async move {
        let value = chunk_rx.recv().await?;
        let mut line = serde_json::to_vec(&value).expect("chunks serialize");
        line.push(b'\n');
        Some((Ok::<_, std::convert::Infallible>(Bytes::from(line)), chunk_rx))
    });

    Response::builder()
        .header(CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .expect("static response parts are valid")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_owner_only_policy() {
        let policy = PeerPolicy {
            uid: 1000,
            group_shared: None,
        };
        assert!(policy.allows_ids(1000, 1000));
        assert!(!policy.allows_ids(1001, 1000));
        // matching gid is not enough outside group-shared mode
        assert!(!policy.allows_ids(1001, 100));
    }

    #[test]
    fn test_group_shared_policy() {
        let policy = PeerPolicy {
            uid: 1000,
            group_shared: Some(100),
        };
        assert!(policy.allows_ids(1000, 1000));
        assert!(policy.allows_ids(1001, 100));
        assert!(!policy.allows_ids(1001, 101));
    }
}
