//! Context object owning the collaborators shared by editors, the CLI and the
//! HTTP surface.

use std::{sync::Arc, time::Duration};

use crate::{
    cache::ListingCache,
    chain::{LedgerProgram, ProgramClient, Wallet},
    config::{
        Settings, DEFAULT_CHARTER, DEFAULT_DEBOUNCE_MS, DEFAULT_GATEWAY, DEFAULT_PRECRYPT_PROXY,
        DEFAULT_SCHEME,
    },
    content::{ContentStore, FileContentStore},
    error::{MarketError, MarketResult},
    metadata::Network,
    notify::Notifier,
};

/// Settings the publish pipeline and editors depend on.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scheme: String,
    pub gateway: String,
    pub charter: String,
    pub network: Network,
    pub precrypt_proxy: String,
    pub debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.into(),
            gateway: DEFAULT_GATEWAY.into(),
            charter: DEFAULT_CHARTER.into(),
            network: Network::Testnet,
            precrypt_proxy: DEFAULT_PRECRYPT_PROXY.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl From<&Settings> for SessionConfig {
    fn from(cfg: &Settings) -> Self {
        Self {
            scheme: cfg.content_scheme.clone(),
            gateway: cfg.gateway.clone(),
            charter: cfg.charter.clone(),
            network: cfg.network,
            precrypt_proxy: cfg.precrypt_proxy.clone(),
            debounce: cfg.debounce,
        }
    }
}

/// Program client, content store, wallet, notifier and the listing cache.
/// Clones share the cache.
pub struct Session<P, C> {
    pub(crate) program: Arc<P>,
    pub(crate) content: Arc<C>,
    cache: ListingCache<P, C>,
    wallet: Option<Wallet>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: SessionConfig,
}

impl<P, C> Clone for Session<P, C> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            content: self.content.clone(),
            cache: self.cache.clone(),
            wallet: self.wallet.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
        }
    }
}

/// Session over the on-disk ledger and content store.
pub type LocalSession = Session<LedgerProgram, FileContentStore>;

impl<P: ProgramClient, C: ContentStore> Session<P, C> {
    pub fn new(
        program: Arc<P>,
        content: Arc<C>,
        wallet: Option<Wallet>,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
    ) -> Self {
        let cache = ListingCache::new(program.clone(), content.clone());
        Self {
            program,
            content,
            cache,
            wallet,
            notifier,
            config,
        }
    }

    /// Listing cache shared by every clone of this session.
    pub fn cache(&self) -> &ListingCache<P, C> {
        &self.cache
    }

    /// Content store documents and uploads go to.
    pub fn content(&self) -> &Arc<C> {
        &self.content
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The connected signer, or [`MarketError::WalletDisconnected`].
    pub fn wallet(&self) -> MarketResult<&Wallet> {
        self.wallet.as_ref().ok_or(MarketError::WalletDisconnected)
    }
}

impl LocalSession {
    /// Open the stores under `STORE_ROOT`, creating their directories.
    pub fn open(cfg: &Settings, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let program = LedgerProgram::new(cfg.ledger_root());
        program.init()?;
        let content = FileContentStore::new(cfg.content_root());
        content.init()?;
        Ok(Self::new(
            Arc::new(program),
            Arc::new(content),
            cfg.wallet.clone().map(Wallet::new),
            notifier,
            SessionConfig::from(cfg),
        ))
    }
}
