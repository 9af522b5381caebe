//! Release update checker
//!
//! Polls the release manifest on an interval and remembers the newest
//! version seen. `/v1/updates` serves the latest-known answer; the daemon
//! never updates itself.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use url::Url;

const CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum UpdatesError {
    #[error("unable to build manifest transport: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct Manifest {
    version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub needs_update: bool,
    pub current: &'static str,
    pub latest: Option<String>,
}

struct Inner {
    manifest_uri: Url,
    client: reqwest::Client,
    current: &'static str,
    latest: Mutex<Option<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Background version checker.
#[derive(Clone)]
pub struct UpdatesEngine {
    inner: Arc<Inner>,
}

impl UpdatesEngine {
    pub fn new(
        manifest_uri: Url,
        current: &'static str,
        daemon_version: &str,
    ) -> Result<Self, UpdatesError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("torusd/{daemon_version}"))
            .build()?;

        Ok(UpdatesEngine {
            inner: Arc::new(Inner {
                manifest_uri,
                client,
                current,
                latest: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        })
    }

    /// Start the polling worker. Idempotent.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().expect("updates lock poisoned");
        if worker.is_some() {
            return;
        }

        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                match fetch_manifest(&inner).await {
                    Ok(version) => {
                        tracing::debug!(%version, "release manifest checked");
                        *inner.latest.lock().expect("updates lock poisoned") = Some(version);
                    }
                    Err(err) => {
                        tracing::warn!("release manifest check failed: {err}");
                    }
                }
            }
        }));
    }

    /// Stop the polling worker. Idempotent.
    pub fn stop(&self) {
        if let Some(worker) = self
            .inner
            .worker
            .lock()
            .expect("updates lock poisoned")
            .take()
        {
            worker.abort();
        }
    }

    pub fn status(&self) -> UpdateStatus {
        let latest = self.inner.latest.lock().expect("updates lock poisoned").clone();
        let needs_update = latest
            .as_deref()
            .map(|latest| version_newer(latest, self.inner.current))
            .unwrap_or(false);

        UpdateStatus {
            needs_update,
            current: self.inner.current,
            latest,
        }
    }
}

async fn fetch_manifest(inner: &Inner) -> Result<String, reqwest::Error> {
    let manifest: Manifest = inner
        .client
        .get(inner.manifest_uri.clone())
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(manifest.version)
}

/// Numeric dotted-version comparison; unparseable parts compare as zero.
fn version_newer(candidate: &str, current: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    parse(candidate) > parse(current)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(version_newer("0.2.0", "0.1.9"));
        assert!(version_newer("1.0.0", "0.9.9"));
        assert!(version_newer("v0.1.1", "0.1.0"));
        assert!(!version_newer("0.1.0", "0.1.0"));
        assert!(!version_newer("0.0.9", "0.1.0"));
    }

    #[tokio::test]
    async fn test_status_before_first_check() {
        let engine = UpdatesEngine::new(
            Url::parse("https://get.torus.example/manifest.json").unwrap(),
            "0.1.0",
            "0.1.0",
        )
        .unwrap();

        let status = engine.status();
        assert!(!status.needs_update);
        assert!(status.latest.is_none());
        assert_eq!(status.current, "0.1.0");
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let engine = UpdatesEngine::new(
            Url::parse("https://get.torus.example/manifest.json").unwrap(),
            "0.1.0",
            "0.1.0",
        )
        .unwrap();

        engine.start();
        engine.start();
        engine.stop();
        engine.stop();
    }
}
