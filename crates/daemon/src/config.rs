//! Daemon configuration
//!
//! Paths under the torus root directory, the registry and release-manifest
//! URIs, and the transport trust settings. Environment overrides:
//! `TORUS_ROOT`, `TORUS_REGISTRY_URI`, `TORUS_MANIFEST_URI`,
//! `TORUS_CA_BUNDLE_FILE`. The daemon is restarted, not reloaded, on change.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use url::Url;

pub const API_VERSION: &str = "v1";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_REGISTRY_URI: &str = "https://registry.torus.sh";
const DEFAULT_MANIFEST_URI: &str = "https://get.torus.sh/manifest.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no torus root given and $HOME is not set")]
    MissingHome,
    #[error("unable to prepare the torus root directory: {0}")]
    Root(std::io::Error),
    #[error("invalid registry URI: {0}")]
    InvalidUri(#[from] url::ParseError),
    #[error("unable to read CA bundle: {0}")]
    CaBundle(std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for daemon state (default `~/.torus`, mode 0700)
    pub torus_root: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub db_path: PathBuf,

    pub registry_uri: Url,
    pub manifest_uri: Url,
    /// PEM bundle contents to pin the registry transport to
    pub ca_bundle: Option<Vec<u8>>,

    pub api_version: &'static str,
    pub version: &'static str,

    /// Socket/lockfile mode 0640 instead of 0600, for group-shared installs
    pub group_shared: bool,

    pub log_level: tracing::Level,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(
        root: Option<PathBuf>,
        registry_uri: Option<Url>,
        group_shared: bool,
        log_level: tracing::Level,
        log_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let torus_root = match root.or_else(|| std::env::var_os("TORUS_ROOT").map(PathBuf::from)) {
            Some(root) => root,
            None => std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".torus"))
                .ok_or(ConfigError::MissingHome)?,
        };

        fs::create_dir_all(&torus_root).map_err(ConfigError::Root)?;
        let mode = if group_shared { 0o750 } else { 0o700 };
        fs::set_permissions(&torus_root, fs::Permissions::from_mode(mode))
            .map_err(ConfigError::Root)?;

        let registry_uri = match registry_uri {
            Some(uri) => uri,
            None => parse_env_url("TORUS_REGISTRY_URI", DEFAULT_REGISTRY_URI)?,
        };
        let manifest_uri = parse_env_url("TORUS_MANIFEST_URI", DEFAULT_MANIFEST_URI)?;

        let ca_bundle = match std::env::var_os("TORUS_CA_BUNDLE_FILE") {
            Some(path) => Some(fs::read(path).map_err(ConfigError::CaBundle)?),
            None => None,
        };

        Ok(Config {
            socket_path: torus_root.join("daemon.socket"),
            pid_path: torus_root.join("daemon.pid"),
            db_path: torus_root.join("daemon.db"),
            torus_root,
            registry_uri,
            manifest_uri,
            ca_bundle,
            api_version: API_VERSION,
            version: VERSION,
            group_shared,
            log_level,
            log_dir,
        })
    }
}

fn parse_env_url(var: &str, default: &str) -> Result<Url, url::ParseError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Url::parse(&value),
        _ => Url::parse(default),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn load_with_root(root: PathBuf) -> Config {
        Config::load(Some(root), None, false, tracing::Level::INFO, None).unwrap()
    }

    #[test]
    fn test_paths_live_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with_root(dir.path().join("state"));

        assert_eq!(config.socket_path, dir.path().join("state/daemon.socket"));
        assert_eq!(config.pid_path, dir.path().join("state/daemon.pid"));
        assert_eq!(config.db_path, dir.path().join("state/daemon.db"));
        assert!(config.torus_root.is_dir());
    }

    #[test]
    fn test_root_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with_root(dir.path().join("state"));

        let mode = fs::metadata(&config.torus_root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_explicit_registry_uri_wins() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::parse("https://registry.example:8443").unwrap();
        let config = Config::load(
            Some(dir.path().join("state")),
            Some(uri.clone()),
            false,
            tracing::Level::INFO,
            None,
        )
        .unwrap();
        assert_eq!(config.registry_uri, uri);
    }
}
