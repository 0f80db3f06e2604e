//! Shared fixtures and instrumented collaborators for unit tests.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use tempfile::TempDir;

use crate::{
    chain::{
        Confirmation, InitListingParams, LedgerProgram, ListingAccount, ProgramClient,
        SetUriParams, Transaction, Wallet,
    },
    content::{put_document, scheme_uri, ContentStore, FileContentStore},
    metadata::ListingMetadata,
};

/// Serializes tests that touch process environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Remove every variable read by `Settings::from_env`.
pub fn clear_env() {
    for v in crate::config::ENV_KEYS {
        std::env::remove_var(v);
    }
}

/// Ledger and content store in a temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub program: Arc<LedgerProgram>,
    pub content: Arc<FileContentStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let program = LedgerProgram::new(dir.path().join("ledger"));
        program.init().unwrap();
        let content = FileContentStore::new(dir.path().join("content"));
        content.init().unwrap();
        Self {
            dir,
            program: Arc::new(program),
            content: Arc::new(content),
        }
    }

    /// Store `metadata` and create a listing pointing at it.
    pub async fn seed_listing(&self, authority: &str, metadata: &ListingMetadata) -> String {
        let cid = put_document(&*self.content, metadata).await.unwrap();
        self.seed_account(authority, &scheme_uri("ipfs", &cid)).await
    }

    /// Create a listing account with an arbitrary URI.
    pub async fn seed_account(&self, authority: &str, uri: &str) -> String {
        let init = self.program.build_init_listing(InitListingParams {
            signer: authority.into(),
            uri: uri.into(),
            price: 1_000_000_000,
            currency: "So11111111111111111111111111111111111111112".into(),
            cashier_split: 0.1,
            is_available: true,
            is_consumable: false,
            is_refundable: false,
            charter: "charter".into(),
        });
        Wallet::new(authority)
            .send(&*self.program, init.instructions, init.signers)
            .await
            .unwrap();
        init.listing
    }

    /// Store `metadata` and repoint an existing listing at it.
    pub async fn point_listing(&self, authority: &str, id: &str, metadata: &ListingMetadata) {
        let cid = put_document(&*self.content, metadata).await.unwrap();
        let ixs = self.program.build_set_uri(SetUriParams {
            listing: id.into(),
            signer: authority.into(),
            uri: scheme_uri("ipfs", &cid),
        });
        Wallet::new(authority)
            .send(&*self.program, ixs, vec![])
            .await
            .unwrap();
    }
}

/// Content store wrapper that counts calls and can fail or stall puts.
pub struct CountingStore<C> {
    inner: Arc<C>,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub fail: AtomicBool,
    pub last_put: Mutex<Option<Vec<u8>>>,
    delays: Mutex<VecDeque<Duration>>,
}

impl<C> CountingStore<C> {
    pub fn new(inner: Arc<C>) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            last_put: Mutex::new(None),
            delays: Mutex::new(VecDeque::new()),
        }
    }

    /// Delay applied to the next put before it resolves, one per call.
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }

    pub fn last_put_json(&self) -> Option<serde_json::Value> {
        let bytes = self.last_put.lock().unwrap().clone()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl<C: ContentStore> ContentStore for CountingStore<C> {
    fn put(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String>> + Send {
        self.puts.fetch_add(1, Ordering::SeqCst);
        *self.last_put.lock().unwrap() = Some(bytes.clone());
        let fail = self.fail.load(Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().pop_front();
        let inner = self.inner.clone();
        let content_type = content_type.to_string();
        async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if fail {
                bail!("content store offline");
            }
            inner.put(bytes, &content_type).await
        }
    }

    fn get(&self, cid: &str) -> impl Future<Output = Result<Vec<u8>>> + Send {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let cid = cid.to_string();
        async move { inner.get(&cid).await }
    }
}

/// Program client wrapper that counts calls and can reject submissions.
pub struct CountingProgram<P> {
    inner: Arc<P>,
    pub fetches: AtomicUsize,
    pub submits: AtomicUsize,
    pub fail_submit: AtomicBool,
}

impl<P> CountingProgram<P> {
    pub fn new(inner: Arc<P>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            fail_submit: AtomicBool::new(false),
        }
    }
}

impl<P: ProgramClient> ProgramClient for CountingProgram<P> {
    fn fetch_listing_account(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ListingAccount>>> + Send {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let id = id.to_string();
        async move { inner.fetch_listing_account(&id).await }
    }

    fn submit_transaction(
        &self,
        tx: Transaction,
    ) -> impl Future<Output = Result<Confirmation>> + Send {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_submit.load(Ordering::SeqCst);
        let inner = self.inner.clone();
        async move {
            if fail {
                bail!("transaction rejected");
            }
            inner.submit_transaction(tx).await
        }
    }
}
