//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::metadata::Network;

/// Every variable [`Settings::from_env`] reads.
pub const ENV_KEYS: [&str; 10] = [
    "STORE_ROOT",
    "BIND_HTTP",
    "DEBOUNCE_MS",
    "CONTENT_SCHEME",
    "GATEWAY",
    "NETWORK",
    "PRECRYPT_PROXY",
    "CHARTER",
    "WALLET",
    "VERBOSE",
];

pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_SCHEME: &str = "ipfs";
pub const DEFAULT_GATEWAY: &str = "https://ipfs.io/ipfs/";
pub const DEFAULT_PRECRYPT_PROXY: &str = "https://api.precrypt.org";
/// Charter of the testnet marketplace.
pub const DEFAULT_CHARTER: &str = "8iKjJx3hUNB2mtzMXnoghYiGy73GZXUW8vu8h1ASQDTR";

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for the ledger and the content store.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Quiet period before a draft is persisted.
    pub debounce: Duration,
    /// Scheme prefixed to identifiers in listing URIs.
    pub content_scheme: String,
    /// Base URL uploaded files are served from.
    pub gateway: String,
    pub network: Network,
    pub precrypt_proxy: String,
    pub charter: String,
    /// Signer public key; write paths are disabled without one.
    pub wallet: Option<String>,
    /// Log every HTTP request.
    pub verbose: bool,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP")?;
        let debounce = match non_empty("DEBOUNCE_MS") {
            Some(ms) => ms
                .parse()
                .with_context(|| format!("DEBOUNCE_MS is not a number: {ms}"))?,
            None => DEFAULT_DEBOUNCE_MS,
        };
        let content_scheme = non_empty("CONTENT_SCHEME").unwrap_or_else(|| DEFAULT_SCHEME.into());
        let gateway = non_empty("GATEWAY").unwrap_or_else(|| DEFAULT_GATEWAY.into());
        let network = match non_empty("NETWORK") {
            Some(n) => Network::parse(&n).ok_or_else(|| anyhow!("unknown NETWORK: {n}"))?,
            None => Network::Testnet,
        };
        let precrypt_proxy =
            non_empty("PRECRYPT_PROXY").unwrap_or_else(|| DEFAULT_PRECRYPT_PROXY.into());
        check_http_url("PRECRYPT_PROXY", &precrypt_proxy)?;
        let charter = non_empty("CHARTER").unwrap_or_else(|| DEFAULT_CHARTER.into());
        let wallet = non_empty("WALLET");
        let verbose = env::var("VERBOSE").unwrap_or_else(|_| "0".into()) == "1";
        Ok(Self {
            store_root,
            bind_http,
            debounce: Duration::from_millis(debounce),
            content_scheme,
            gateway,
            network,
            precrypt_proxy,
            charter,
            wallet,
            verbose,
        })
    }

    /// Directory holding listing accounts and the transaction log.
    pub fn ledger_root(&self) -> PathBuf {
        self.store_root.join("ledger")
    }

    /// Directory holding stored blobs and the put log.
    pub fn content_root(&self) -> PathBuf {
        self.store_root.join("content")
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn check_http_url(key: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{key} is not a URL: {value}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{key} must be an http(s) URL: {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{clear_env, ENV_MUTEX};
    use std::fs;
    use tempfile::tempdir;

    fn load(content: &str) -> Result<Settings> {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, content).unwrap();
        Settings::from_env(env_path.to_str().unwrap())
    }

    #[test]
    fn loads_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let cfg = load(concat!(
            "STORE_ROOT=/tmp\n",
            "BIND_HTTP=127.0.0.1:8080\n",
            "DEBOUNCE_MS=250\n",
            "CONTENT_SCHEME=ar\n",
            "GATEWAY=https://gw.example/\n",
            "NETWORK=mainnet-beta\n",
            "PRECRYPT_PROXY=http://localhost:9000\n",
            "CHARTER=abc\n",
            "WALLET=alice\n",
            "VERBOSE=1\n",
        ))
        .unwrap();
        assert_eq!(cfg.bind_http, "127.0.0.1:8080");
        assert_eq!(cfg.store_root, PathBuf::from("/tmp"));
        assert_eq!(cfg.debounce, Duration::from_millis(250));
        assert_eq!(cfg.content_scheme, "ar");
        assert_eq!(cfg.gateway, "https://gw.example/");
        assert_eq!(cfg.network, Network::MainnetBeta);
        assert_eq!(cfg.precrypt_proxy, "http://localhost:9000");
        assert_eq!(cfg.charter, "abc");
        assert_eq!(cfg.wallet.as_deref(), Some("alice"));
        assert!(cfg.verbose);
        assert_eq!(cfg.ledger_root(), PathBuf::from("/tmp/ledger"));
        assert_eq!(cfg.content_root(), PathBuf::from("/tmp/content"));
    }

    #[test]
    fn defaults_when_optional_absent() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let cfg = load("STORE_ROOT=/tmp\nBIND_HTTP=127.0.0.1:8080\nWALLET=\n").unwrap();
        assert_eq!(cfg.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(cfg.content_scheme, "ipfs");
        assert_eq!(cfg.gateway, DEFAULT_GATEWAY);
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.precrypt_proxy, DEFAULT_PRECRYPT_PROXY);
        assert_eq!(cfg.charter, DEFAULT_CHARTER);
        assert!(cfg.wallet.is_none());
        assert!(!cfg.verbose);
    }

    #[test]
    fn missing_required_fields_error() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(load("BIND_HTTP=127.0.0.1:8080\n").is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let _g = ENV_MUTEX.lock().unwrap();
        for extra in [
            "NETWORK=devnet\n",
            "DEBOUNCE_MS=soon\n",
            "PRECRYPT_PROXY=ftp://proxy\n",
            "PRECRYPT_PROXY=not a url\n",
        ] {
            clear_env();
            let content = format!("STORE_ROOT=/tmp\nBIND_HTTP=127.0.0.1:8080\n{extra}");
            assert!(load(&content).is_err(), "{extra}");
        }
    }
}
