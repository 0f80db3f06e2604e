//! Editing session for one listing: the draft, its sync status and the
//! mounted view of the cached record.

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    cache::{ListingRecord, ListingView},
    chain::ProgramClient,
    content::ContentStore,
    draft::{metadata_change, DraftStore},
    error::MarketResult,
    metadata::{Direction, Draft, MetadataPatch},
    publish::{PrecryptUpload, PublishReceipt},
    session::Session,
    sync::{DraftSync, SyncStatus},
};

/// Draft, sync and view wired to one listing. Every write of the listing's
/// cache entry rebases the sync status and fills draft fields not yet edited.
///
/// `createdAt` and `updatedAt` are the exception: they are overwritten from
/// the stored document on every load, even when the draft already set them.
pub struct ListingEditor<P, C> {
    session: Session<P, C>,
    listing: String,
    draft: DraftStore,
    sync: DraftSync<C>,
    view: ListingView<P, C>,
    loader: JoinHandle<()>,
}

impl<P, C> Drop for ListingEditor<P, C> {
    fn drop(&mut self) {
        self.loader.abort();
        self.sync.cancel_pending();
    }
}

fn load<C: ContentStore>(draft: &DraftStore, sync: &DraftSync<C>, record: &ListingRecord) {
    draft.absorb(&record.metadata);
    // timestamps always follow the stored document
    draft.change(|_| {
        metadata_change(MetadataPatch {
            created_at: Some(record.metadata.created_at),
            updated_at: Some(record.metadata.updated_at),
            ..Default::default()
        })
    });
    sync.rebase(record);
}

impl<P: ProgramClient, C: ContentStore> ListingEditor<P, C> {
    /// Start editing `listing`; its record is fetched in the background.
    pub fn open(session: Session<P, C>, listing: impl Into<String>) -> Self {
        let listing = listing.into();
        let draft = DraftStore::new();
        let sync = DraftSync::spawn(
            session.content().clone(),
            draft.clone(),
            session.config().debounce,
        );

        let mut updates = session.cache().subscribe();
        if let Some(record) = session.cache().get(&listing) {
            load(&draft, &sync, &record);
        }
        let loader = {
            let cache = session.cache().clone();
            let draft = draft.clone();
            let sync = sync.clone();
            let key = listing.clone();
            tokio::spawn(async move {
                loop {
                    match updates.recv().await {
                        Ok(written) if written == key => {}
                        Ok(_) => continue,
                        // missed keys; reread ours
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    }
                    if let Some(record) = cache.get(&key) {
                        load(&draft, &sync, &record);
                    }
                }
            })
        };
        let view = ListingView::mount(session.cache().clone(), listing.clone());
        Self {
            session,
            listing,
            draft,
            sync,
            view,
            loader,
        }
    }

    /// Wait until the listing is loaded and the draft is synced against it.
    pub async fn ready(&mut self) -> MarketResult<ListingRecord> {
        let record = self.view.settled().await?;
        let synced = self.sync.status().baseline_uri.as_deref() == Some(record.account.uri.as_str());
        if !synced {
            load(&self.draft, &self.sync, &record);
        }
        Ok(record)
    }

    /// Cached record, `None` until the first fetch lands.
    pub fn listing(&self) -> Option<ListingRecord> {
        self.view.listing()
    }

    /// Current draft.
    pub fn draft(&self) -> Draft {
        self.draft.snapshot()
    }

    /// Shallow-merge `partial` into the draft.
    pub fn change(&self, partial: Draft) {
        self.draft.change(|_| partial);
        self.sync.recompute();
    }

    /// Move one image up or down in the draft's gallery.
    pub fn move_image(&self, index: usize, direction: Direction) {
        self.draft.move_image(index, direction);
        self.sync.recompute();
    }

    /// Dirty/loading flags against the loaded listing.
    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Reload the listing; the editor rebases once the cache entry changes.
    pub async fn refetch(&self) -> MarketResult<ListingRecord> {
        self.session.cache().refetch(&self.listing).await
    }

    /// Publish the draft as the listing's document.
    pub async fn publish(&self) -> MarketResult<PublishReceipt> {
        self.session
            .publish_update(&self.listing, &self.draft.snapshot())
            .await
    }

    /// Attach an encrypted file and carry the new channel into the draft, so a
    /// later publish keeps it.
    pub async fn attach_precrypt(&self, upload: PrecryptUpload) -> MarketResult<PublishReceipt> {
        let receipt = self.session.attach_precrypt(&self.listing, upload.clone()).await?;
        let (key_cid, file_cid) = upload.cids()?;
        let channel = self.session.precrypt_channel(key_cid, file_cid);
        self.change(metadata_change(MetadataPatch {
            channels: Some(vec![channel]),
            ..Default::default()
        }));
        Ok(receipt)
    }
}
