//! Keyed cache of listing accounts with their resolved metadata.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    chain::{ListingAccount, ProgramClient},
    content::{get_document, normalize_cid, ContentStore},
    error::{MarketError, MarketResult},
    metadata::ListingMetadata,
};

/// Cached view of one listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub public_key: String,
    pub account: ListingAccount,
    pub metadata: ListingMetadata,
}

/// Listing records keyed by account address. Clones share entries.
pub struct ListingCache<P, C> {
    program: Arc<P>,
    content: Arc<C>,
    entries: Arc<RwLock<HashMap<String, ListingRecord>>>,
    updates: broadcast::Sender<String>,
}

impl<P, C> Clone for ListingCache<P, C> {
    fn clone(&self) -> Self {
        Self {
            program: self.program.clone(),
            content: self.content.clone(),
            entries: self.entries.clone(),
            updates: self.updates.clone(),
        }
    }
}

impl<P: ProgramClient, C: ContentStore> ListingCache<P, C> {
    /// Empty cache over the given collaborators.
    pub fn new(program: Arc<P>, content: Arc<C>) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            program,
            content,
            entries: Arc::new(RwLock::new(HashMap::new())),
            updates,
        }
    }

    /// Load the account and its metadata document and overwrite the entry.
    ///
    /// Concurrent calls for one key are not coalesced; the last to finish
    /// wins.
    pub async fn fetch(&self, id: &str) -> MarketResult<ListingRecord> {
        let account = self
            .program
            .fetch_listing_account(id)
            .await
            .map_err(MarketError::chain)?
            .ok_or_else(|| MarketError::NotFound(id.to_string()))?;
        let metadata: ListingMetadata = get_document(&*self.content, normalize_cid(&account.uri))
            .await
            .map_err(MarketError::storage)?;
        let record = ListingRecord {
            public_key: id.to_string(),
            account,
            metadata,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), record.clone());
        // no receivers is fine
        let _ = self.updates.send(id.to_string());
        Ok(record)
    }

    /// Re-run [`fetch`](Self::fetch) after a write so the entry matches the
    /// chain.
    pub async fn refetch(&self, id: &str) -> MarketResult<ListingRecord> {
        self.fetch(id).await
    }

    /// `None` means not loaded yet, not an error.
    pub fn get(&self, id: &str) -> Option<ListingRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Keys of entries as they are written.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }
}

/// A consumer of one listing. Fetches on mount and on key change only.
pub struct ListingView<P, C> {
    cache: ListingCache<P, C>,
    key: String,
    pending: Option<JoinHandle<MarketResult<ListingRecord>>>,
}

impl<P: ProgramClient, C: ContentStore> ListingView<P, C> {
    /// Start watching `key` and fetch it in the background.
    pub fn mount(cache: ListingCache<P, C>, key: impl Into<String>) -> Self {
        let mut view = Self {
            cache,
            key: String::new(),
            pending: None,
        };
        view.set_key(key);
        view
    }

    /// Point the view at `key`. Fetches only when the key differs.
    pub fn set_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if key != self.key {
            self.key = key;
            self.issue();
        }
    }

    /// Cached entry for the current key, `None` until loaded.
    pub fn listing(&self) -> Option<ListingRecord> {
        self.cache.get(&self.key)
    }

    /// Wait for the most recently issued fetch and return its outcome.
    /// Without an outstanding fetch this reports the cached entry.
    pub async fn settled(&mut self) -> MarketResult<ListingRecord> {
        if let Some(handle) = self.pending.take() {
            if let Ok(result) = handle.await {
                return result;
            }
        }
        self.listing()
            .ok_or_else(|| MarketError::NotFound(self.key.clone()))
    }

    fn issue(&mut self) {
        let cache = self.cache.clone();
        let key = self.key.clone();
        self.pending = Some(tokio::spawn(async move {
            let result = cache.fetch(&key).await;
            if let Err(e) = &result {
                eprintln!("[cache] fetch error ({key}): {e}");
            }
            result
        }));
    }
}
