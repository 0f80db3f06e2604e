//! Write paths: publishing edits, creating listings, attaching encrypted
//! files and uploading raw files.
//!
//! Each operation validates before touching the content store or the program,
//! and nothing is written on-chain unless the transaction confirms. Outcomes
//! are reported through the session's notifier.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    chain::{InitListingParams, ProgramClient, SetUriParams},
    content::{normalize_cid, put_document, scheme_uri, ContentStore},
    error::{MarketError, MarketResult},
    metadata::{
        now_unix, to_minor_units, Channel, Draft, FileRef, ListingMetadata, PrecryptRule,
        PRICE_DECIMALS,
    },
    notify::Level,
    session::Session,
};

/// Rule granting decryption to holders of the listing's token.
pub const OWNERSHIP_RULE: &str = "owns.spl_token";
/// Scheme of key and file URIs handed to the precrypt proxy.
pub const PRECRYPT_SCHEME: &str = "ipfs";
pub const OCTET_STREAM: &str = "application/octet-stream";
/// Wait between attaching a file and reloading the listing.
pub const ATTACH_REFETCH_DELAY: Duration = Duration::from_millis(100);

/// Result of a confirmed listing write.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub listing: String,
    pub uri: String,
    pub cid: String,
    pub signature: String,
}

/// Identifiers of an encrypted file and its key, both already stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecryptUpload {
    pub key_cid: String,
    pub file_cid: String,
}

impl PrecryptUpload {
    /// Key and file identifiers with any scheme prefix removed.
    pub fn cids(&self) -> MarketResult<(&str, &str)> {
        let key_cid = normalize_cid(self.key_cid.trim());
        let file_cid = normalize_cid(self.file_cid.trim());
        if key_cid.is_empty() || file_cid.is_empty() {
            return Err(MarketError::validation("both a key and a file are required"));
        }
        Ok((key_cid, file_cid))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Stored file and the gateway reference to it.
pub struct Upload {
    pub cid: String,
    pub file: FileRef,
}

impl<P: ProgramClient, C: ContentStore> Session<P, C> {
    /// Store the draft as the listing's new document and point the listing
    /// at it.
    pub async fn publish_update(&self, listing: &str, draft: &Draft) -> MarketResult<PublishReceipt> {
        let result = self.try_publish_update(listing, draft).await;
        self.report(&result, "Listing updated.");
        result
    }

    async fn try_publish_update(&self, listing: &str, draft: &Draft) -> MarketResult<PublishReceipt> {
        draft.validate_for_publish()?;
        let wallet = self.wallet()?;
        let mut doc = ListingMetadata::blank().overlay(draft.metadata_patch());
        doc.updated_at = now_unix();
        let (cid, uri) = self.store_document(&doc).await?;
        let instructions = self.program.build_set_uri(SetUriParams {
            listing: listing.to_string(),
            signer: wallet.public_key().to_string(),
            uri: uri.clone(),
        });
        let confirmation = wallet
            .send(&*self.program, instructions, vec![])
            .await
            .map_err(MarketError::chain)?;
        self.reload(listing).await;
        Ok(PublishReceipt {
            listing: listing.to_string(),
            uri,
            cid,
            signature: confirmation.signature,
        })
    }

    /// Create a listing account for the draft's document and on-chain fields.
    pub async fn create_listing(&self, draft: &Draft) -> MarketResult<PublishReceipt> {
        let result = self.try_create_listing(draft).await;
        self.report(&result, "Listing created.");
        result
    }

    async fn try_create_listing(&self, draft: &Draft) -> MarketResult<PublishReceipt> {
        draft.validate_for_publish()?;
        let on_chain = draft
            .on_chain_account_data
            .as_ref()
            .ok_or_else(|| MarketError::validation("price and currency are required"))?;
        on_chain.validate()?;
        let price = to_minor_units(on_chain.price, PRICE_DECIMALS)?;
        let wallet = self.wallet()?;

        let doc = ListingMetadata::blank().overlay(draft.metadata_patch());
        let (cid, uri) = self.store_document(&doc).await?;
        let init = self.program.build_init_listing(InitListingParams {
            signer: wallet.public_key().to_string(),
            uri: uri.clone(),
            price,
            currency: on_chain.currency_public_key.clone(),
            cashier_split: on_chain.cashier_split,
            is_available: true,
            is_consumable: false,
            is_refundable: false,
            charter: self.config.charter.clone(),
        });
        let confirmation = wallet
            .send(&*self.program, init.instructions, init.signers)
            .await
            .map_err(MarketError::chain)?;
        self.reload(&init.listing).await;
        Ok(PublishReceipt {
            listing: init.listing,
            uri,
            cid,
            signature: confirmation.signature,
        })
    }

    /// Deliver an encrypted file to every token holder through the precrypt
    /// proxy. A listing carries at most one such channel.
    pub async fn attach_precrypt(
        &self,
        listing: &str,
        upload: PrecryptUpload,
    ) -> MarketResult<PublishReceipt> {
        let result = self.try_attach_precrypt(listing, upload).await;
        self.report(&result, "Saved.");
        result
    }

    async fn try_attach_precrypt(
        &self,
        listing: &str,
        upload: PrecryptUpload,
    ) -> MarketResult<PublishReceipt> {
        let (key_cid, file_cid) = upload.cids()?;
        let wallet = self.wallet()?;
        let record = match self.cache().get(listing) {
            Some(record) => record,
            None => self.cache().fetch(listing).await?,
        };
        if !record.metadata.channels.is_empty() {
            return Err(MarketError::validation("a file is already attached to this listing"));
        }

        let mut doc = record.metadata;
        doc.channels = vec![self.precrypt_channel(key_cid, file_cid)];
        doc.updated_at = now_unix();

        let (cid, uri) = self.store_document(&doc).await?;
        let instructions = self.program.build_set_uri(SetUriParams {
            listing: listing.to_string(),
            signer: wallet.public_key().to_string(),
            uri: uri.clone(),
        });
        let confirmation = wallet
            .send(&*self.program, instructions, vec![])
            .await
            .map_err(MarketError::chain)?;
        tokio::time::sleep(ATTACH_REFETCH_DELAY).await;
        self.reload(listing).await;
        Ok(PublishReceipt {
            listing: listing.to_string(),
            uri,
            cid,
            signature: confirmation.signature,
        })
    }

    /// Wildcard channel granting token holders the file through the
    /// configured proxy.
    pub(crate) fn precrypt_channel(&self, key_cid: &str, file_cid: &str) -> Channel {
        Channel::wildcard(vec![PrecryptRule {
            file: FileRef {
                uri: scheme_uri(PRECRYPT_SCHEME, file_cid),
                content_type: OCTET_STREAM.into(),
            },
            key: FileRef {
                uri: scheme_uri(PRECRYPT_SCHEME, key_cid),
                content_type: OCTET_STREAM.into(),
            },
            proxy: self.config.precrypt_proxy.clone(),
            rule: OWNERSHIP_RULE.into(),
            arguments: self.config.network.rule_arguments(),
        }])
    }

    /// Store raw file bytes; the returned reference points at the gateway.
    pub async fn upload_file(&self, bytes: Vec<u8>, content_type: &str) -> MarketResult<Upload> {
        let result = self
            .content
            .put(bytes, content_type)
            .await
            .map_err(MarketError::storage)
            .map(|cid| Upload {
                file: FileRef {
                    uri: format!("{}/{cid}", self.config.gateway.trim_end_matches('/')),
                    content_type: content_type.to_string(),
                },
                cid,
            });
        if let Err(e) = &result {
            self.notifier.notify(Level::Error, &e.to_string());
        }
        result
    }

    async fn store_document(&self, doc: &ListingMetadata) -> MarketResult<(String, String)> {
        let cid = put_document(&*self.content, doc)
            .await
            .map_err(MarketError::storage)?;
        let uri = scheme_uri(&self.config.scheme, &cid);
        Ok((cid, uri))
    }

    /// Refresh the cache after a confirmed write. The write stands even if
    /// this fails.
    async fn reload(&self, listing: &str) {
        if let Err(e) = self.cache().refetch(listing).await {
            eprintln!("[cache] refetch error ({listing}): {e}");
        }
    }

    fn report<T>(&self, result: &MarketResult<T>, success: &str) {
        match result {
            Ok(_) => self.notifier.notify(Level::Success, success),
            Err(e) => self.notifier.notify(Level::Error, &e.to_string()),
        }
    }
}
