//! In-memory draft of listing edits shared by form fields.

use std::sync::Arc;

use tokio::sync::watch;

use crate::metadata::{reorder_images, Direction, Draft, ListingMetadata, MetadataPatch};

/// Observable draft cell. Clones share the same draft.
#[derive(Clone)]
pub struct DraftStore {
    tx: Arc<watch::Sender<Draft>>,
}

impl Default for DraftStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Draft::default());
        Self { tx: Arc::new(tx) }
    }

    /// Apply `updater` and shallow-merge the partial draft it returns. Fields
    /// the partial leaves out keep their current value.
    pub fn change(&self, updater: impl FnOnce(&Draft) -> Draft) {
        self.tx.send_modify(|draft| {
            let partial = updater(draft);
            draft.merge(partial);
        });
    }

    /// Replace the whole draft with the value `updater` returns.
    pub fn set(&self, updater: impl FnOnce(&Draft) -> Draft) {
        self.tx.send_modify(|draft| {
            *draft = updater(draft);
        });
    }

    /// Overlay freshly fetched metadata underneath the current edits.
    pub fn absorb(&self, fetched: &ListingMetadata) {
        self.tx.send_modify(|draft| draft.absorb(fetched));
    }

    /// Reorder one of the draft's images.
    pub fn move_image(&self, index: usize, direction: Direction) {
        self.change(|draft| {
            let images = draft.metadata.images.as_deref().unwrap_or_default();
            Draft {
                metadata: MetadataPatch {
                    images: Some(reorder_images(images, index, direction)),
                    ..Default::default()
                },
                ..Default::default()
            }
        });
    }

    /// Current draft, including every completed change.
    pub fn snapshot(&self) -> Draft {
        self.tx.borrow().clone()
    }

    /// Receiver woken after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Draft> {
        self.tx.subscribe()
    }
}

/// Partial draft setting only the metadata fields in `patch`.
pub fn metadata_change(patch: MetadataPatch) -> Draft {
    Draft {
        metadata: patch,
        ..Default::default()
    }
}
