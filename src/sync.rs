//! Debounced persistence of the draft and the dirty/loading flags shown while
//! editing.
//!
//! Every draft mutation recomputes the merged document against the loaded
//! listing. A quiet period after the last mutation, the merged document is
//! written to the content store; if the resulting identifier is the one the
//! listing already points at, nothing changed.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    cache::ListingRecord,
    content::{put_document, same_content, ContentStore},
    draft::DraftStore,
    metadata::{Draft, ListingMetadata},
};

/// Pending call created by [`schedule_after`].
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Drop the call if it has not fired yet. Work it already started keeps
    /// running.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Fired or cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `f` once `delay` has elapsed unless cancelled first.
pub fn schedule_after<F>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    TimerHandle {
        task: tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Clean,
    Dirty,
    Persisting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Draft differs from the loaded metadata.
    pub dirty: bool,
    /// Set on a dirty edit, cleared when the latest write settles.
    pub loading: bool,
    /// A write is in flight.
    pub persisting: bool,
    /// Identifier of the last stored draft that differs from the listing.
    pub cid: Option<String>,
    pub last_error: Option<String>,
    /// URI of the listing the status is computed against.
    pub baseline_uri: Option<String>,
}

impl SyncStatus {
    /// Collapse the flags into one state for display.
    pub fn phase(&self) -> SyncPhase {
        if self.persisting {
            SyncPhase::Persisting
        } else if self.dirty {
            SyncPhase::Dirty
        } else {
            SyncPhase::Clean
        }
    }
}

#[derive(Clone)]
struct Baseline {
    metadata: ListingMetadata,
    uri: String,
}

struct SyncInner<C> {
    content: Arc<C>,
    quiet: Duration,
    baseline: Mutex<Option<Baseline>>,
    timer: Mutex<Option<TimerHandle>>,
    /// Generation of the most recently started write.
    started: AtomicU64,
    status: watch::Sender<SyncStatus>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<C> Drop for SyncInner<C> {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = timer.take() {
            timer.cancel();
        }
        let watcher = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = watcher.take() {
            watcher.abort();
        }
    }
}

/// Watches a [`DraftStore`] and keeps a [`SyncStatus`] for it. Clones share
/// state.
pub struct DraftSync<C> {
    inner: Arc<SyncInner<C>>,
    draft: DraftStore,
}

impl<C> Clone for DraftSync<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            draft: self.draft.clone(),
        }
    }
}

impl<C> DraftSync<C> {
    /// Drop the scheduled write, if any. A write already started still
    /// finishes.
    pub fn cancel_pending(&self) {
        self.inner.cancel_timer();
    }
}

impl<C> SyncInner<C> {
    fn cancel_timer(&self) {
        let prev = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(prev) = prev {
            prev.cancel();
        }
    }
}

impl<C: ContentStore> DraftSync<C> {
    /// Start watching `draft`; writes happen after `quiet` without edits.
    pub fn spawn(content: Arc<C>, draft: DraftStore, quiet: Duration) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let inner = Arc::new(SyncInner {
            content,
            quiet,
            baseline: Mutex::new(None),
            timer: Mutex::new(None),
            started: AtomicU64::new(0),
            status,
            watcher: Mutex::new(None),
        });
        let weak: Weak<SyncInner<C>> = Arc::downgrade(&inner);
        let mut rx = draft.subscribe();
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_mutation(&snapshot);
            }
        });
        *inner.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Self { inner, draft }
    }

    /// Compare against `record` from now on (first load or refetch).
    ///
    /// Writes still in flight against the previous baseline are ignored when
    /// they finish.
    pub fn rebase(&self, record: &ListingRecord) {
        let mut baseline = self
            .inner
            .baseline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *baseline = Some(Baseline {
            metadata: record.metadata.clone(),
            uri: record.account.uri.clone(),
        });
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_timer();
        self.inner.status.send_replace(SyncStatus {
            baseline_uri: Some(record.account.uri.clone()),
            ..SyncStatus::default()
        });
        drop(baseline);
        self.recompute();
    }

    /// Recompute against the current draft now instead of when the watcher
    /// next runs.
    pub fn recompute(&self) {
        self.inner.on_mutation(&self.draft.snapshot());
    }

    /// Current flags.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }
}

impl<C: ContentStore> SyncInner<C> {
    fn on_mutation(self: &Arc<Self>, draft: &Draft) {
        // held until the timer is armed; a rebase cannot land in between
        let baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(base) = baseline.as_ref() else {
            return;
        };
        let merged = base.metadata.overlay(draft.metadata_patch());
        let dirty = merged != base.metadata;
        self.status.send_modify(|s| {
            s.dirty = dirty;
            if dirty {
                s.loading = true;
            }
        });

        self.cancel_timer();
        let uri = base.uri.clone();
        let weak = Arc::downgrade(self);
        let handle = schedule_after(self.quiet, move || {
            if let Some(inner) = weak.upgrade() {
                inner.launch(merged, uri);
            }
        });
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn launch(self: Arc<Self>, doc: ListingMetadata, uri: String) {
        let generation = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.send_modify(|s| s.persisting = true);
        tokio::spawn(async move {
            let result = put_document(&*self.content, &doc).await;
            self.finish(generation, &uri, result);
        });
    }

    fn finish(&self, generation: u64, uri: &str, result: anyhow::Result<String>) {
        let _baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        if self.started.load(Ordering::SeqCst) != generation {
            // superseded by a later write or a rebase
            return;
        }
        let more_pending = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished());
        self.status.send_modify(|s| {
            s.persisting = false;
            s.loading = more_pending;
            match result {
                Ok(key) if same_content(&key, uri) => {
                    s.dirty = false;
                    s.cid = None;
                    s.last_error = None;
                }
                Ok(key) => {
                    s.cid = Some(key);
                    s.last_error = None;
                }
                Err(e) => {
                    eprintln!("[sync] persist error: {e:#}");
                    s.last_error = Some(format!("{e:#}"));
                }
            }
        });
    }
}
