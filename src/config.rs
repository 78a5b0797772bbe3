use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub recipients: RecipientsConfig,
    #[serde(default)]
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Path to the local keypair file; created on first use if absent.
    #[serde(default = "default_identity_path")]
    pub path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            path: default_identity_path(),
        }
    }
}

fn default_identity_path() -> PathBuf {
    home_join(".notefeed/secret")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PeerConfig {
    /// Base URL of the local replication daemon.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8008".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecipientsConfig {
    /// Path to a JSON array of recipient public-key strings,
    /// e.g. `["@AbCdEf...=.ed25519"]`.
    #[serde(default = "default_recipients_path")]
    pub path: PathBuf,
}

impl Default for RecipientsConfig {
    fn default() -> Self {
        Self {
            path: default_recipients_path(),
        }
    }
}

fn default_recipients_path() -> PathBuf {
    home_join(".notefeed/recipients.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobsConfig {
    /// Interval between blob-availability polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts before a blob write is declared timed out.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_poll_max_attempts() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Cap on concurrent image fetches during HTML ingestion.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_max_concurrent_fetches() -> usize {
    4
}
fn default_fetch_timeout_secs() -> u64 {
    20
}

fn home_join(rel: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(rel)
}

/// Load configuration from `path`.
///
/// When `explicit` is false (the user did not pass `--config`) a missing file
/// falls back to [`Config::default`]; an unreadable explicit path is an error
/// either way.
pub fn load_config(path: &Path, explicit: bool) -> Result<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read config file: {}", path.display()));
        }
    };

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.peer.connect_timeout_secs == 0 {
        anyhow::bail!("peer.connect_timeout_secs must be > 0");
    }

    if config.blobs.poll_max_attempts == 0 {
        anyhow::bail!("blobs.poll_max_attempts must be > 0");
    }

    if config.ingest.max_concurrent_fetches == 0 {
        anyhow::bail!("ingest.max_concurrent_fetches must be > 0");
    }

    if !config.peer.base_url.starts_with("http://") && !config.peer.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "peer.base_url must be an http(s) URL, got '{}'",
            config.peer.base_url
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_default_path_missing() {
        let cfg = load_config(Path::new("/nonexistent/notefeed.toml"), false).unwrap();
        assert_eq!(cfg.peer.base_url, "http://127.0.0.1:8008");
        assert_eq!(cfg.blobs.poll_max_attempts, 50);
        assert_eq!(cfg.ingest.max_concurrent_fetches, 4);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        assert!(load_config(Path::new("/nonexistent/notefeed.toml"), true).is_err());
    }

    #[test]
    fn parses_partial_config_with_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[peer]\nbase_url = \"http://localhost:9999\"\n\n[blobs]\npoll_max_attempts = 3\n"
        )
        .unwrap();
        let cfg = load_config(f.path(), true).unwrap();
        assert_eq!(cfg.peer.base_url, "http://localhost:9999");
        assert_eq!(cfg.blobs.poll_max_attempts, 3);
        assert_eq!(cfg.peer.connect_timeout_secs, 5);
    }

    #[test]
    fn rejects_zero_fetch_concurrency() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[ingest]\nmax_concurrent_fetches = 0\n").unwrap();
        assert!(load_config(f.path(), true).is_err());
    }
}
