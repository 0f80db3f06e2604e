//! Listing metadata document and the sparse draft overlay edited before publish.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Decimal places used when converting a price into minor units.
pub const PRICE_DECIMALS: u32 = 9;

/// Reference to a stored file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FileRef {
    pub uri: String,
    pub content_type: String,
}

/// Image shown on a listing, e.g. the cover or a screenshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageRef {
    /// Screen-reader text.
    pub alt: String,
    pub width: u32,
    pub height: u32,
    pub src: FileRef,
}

impl ImageRef {
    /// An image counts as present once it points at a file.
    pub fn is_populated(&self) -> bool {
        !self.src.uri.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoRef {
    pub width: u32,
    pub height: u32,
    pub src: FileRef,
}

/// Social link such as `{"type": "twitter", "url": "https://..."}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SocialLink {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Creator {
    pub bio: String,
    pub links: Vec<SocialLink>,
    pub name: String,
    pub primary_image: ImageRef,
}

/// Encrypted file delivery: the encrypted file, its key, and the proxy that
/// re-encrypts the key for buyers satisfying `rule`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrecryptRule {
    pub file: FileRef,
    pub key: FileRef,
    pub proxy: String,
    pub rule: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Channel {
    pub name: String,
    pub precrypts: Vec<PrecryptRule>,
}

impl Channel {
    /// Channel matching every buyer.
    pub fn wildcard(precrypts: Vec<PrecryptRule>) -> Self {
        Self {
            name: "*".into(),
            precrypts,
        }
    }
}

/// Cluster a listing lives on; decides the arguments of token-ownership rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    MainnetBeta,
    Testnet,
}

impl Network {
    /// Parse a `NETWORK` value: `mainnet-beta` or `testnet`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "mainnet-beta" => Some(Self::MainnetBeta),
            "testnet" => Some(Self::Testnet),
            _ => None,
        }
    }

    /// Arguments of the token-ownership rule on this network.
    pub fn rule_arguments(self) -> Vec<String> {
        match self {
            Self::MainnetBeta => vec!["mainnet".into()],
            Self::Testnet => vec!["testnet".into()],
        }
    }
}

/// Off-chain descriptive record stored in the content store.
///
/// Every field has a default so partial documents load, and empty fields
/// serialize as empty containers rather than missing keys:
///
/// ```json
/// {
///   "name": "Game",
///   "description": "",
///   "primaryImage": {"alt": "", "width": 0, "height": 0,
///                    "src": {"uri": "", "contentType": ""}},
///   "createdAt": 1700000000,
///   "updatedAt": 1700000000,
///   "creators": [], "images": [], "links": [],
///   "tags": [], "videos": [], "channels": []
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ListingMetadata {
    pub name: String,
    pub description: String,
    pub primary_image: ImageRef,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub updated_at: u64,
    pub creators: Vec<Creator>,
    /// Display order is array order.
    pub images: Vec<ImageRef>,
    pub links: Vec<SocialLink>,
    pub tags: Vec<String>,
    pub videos: Vec<VideoRef>,
    pub channels: Vec<Channel>,
}

impl ListingMetadata {
    /// Blank document stamped with the current time.
    pub fn blank() -> Self {
        let now = now_unix();
        Self {
            created_at: now,
            updated_at: now,
            ..Self::default()
        }
    }

    /// Copy of `self` where every field present in `patch` replaces ours.
    pub fn overlay(&self, patch: &MetadataPatch) -> Self {
        Self {
            name: pick(&patch.name, &self.name),
            description: pick(&patch.description, &self.description),
            primary_image: pick(&patch.primary_image, &self.primary_image),
            created_at: patch.created_at.unwrap_or(self.created_at),
            updated_at: patch.updated_at.unwrap_or(self.updated_at),
            creators: pick(&patch.creators, &self.creators),
            images: pick(&patch.images, &self.images),
            links: pick(&patch.links, &self.links),
            tags: pick(&patch.tags, &self.tags),
            videos: pick(&patch.videos, &self.videos),
            channels: pick(&patch.channels, &self.channels),
        }
    }
}

fn pick<T: Clone>(patch: &Option<T>, base: &T) -> T {
    patch.as_ref().unwrap_or(base).clone()
}

/// Sparse view of [`ListingMetadata`]; only present fields serialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_image: Option<ImageRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creators: Option<Vec<Creator>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<SocialLink>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<VideoRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<Channel>>,
}

impl MetadataPatch {
    /// Shallow merge: fields present in `other` replace ours.
    fn merge(&mut self, other: MetadataPatch) {
        replace_some(&mut self.name, other.name);
        replace_some(&mut self.description, other.description);
        replace_some(&mut self.primary_image, other.primary_image);
        replace_some(&mut self.created_at, other.created_at);
        replace_some(&mut self.updated_at, other.updated_at);
        replace_some(&mut self.creators, other.creators);
        replace_some(&mut self.images, other.images);
        replace_some(&mut self.links, other.links);
        replace_some(&mut self.tags, other.tags);
        replace_some(&mut self.videos, other.videos);
        replace_some(&mut self.channels, other.channels);
    }

    /// Fill the fields we do not have from `fetched`; ours win.
    fn absorb(&mut self, fetched: &ListingMetadata) {
        self.name.get_or_insert_with(|| fetched.name.clone());
        self.description
            .get_or_insert_with(|| fetched.description.clone());
        self.primary_image
            .get_or_insert_with(|| fetched.primary_image.clone());
        self.created_at.get_or_insert(fetched.created_at);
        self.updated_at.get_or_insert(fetched.updated_at);
        self.creators.get_or_insert_with(|| fetched.creators.clone());
        self.images.get_or_insert_with(|| fetched.images.clone());
        self.links.get_or_insert_with(|| fetched.links.clone());
        self.tags.get_or_insert_with(|| fetched.tags.clone());
        self.videos.get_or_insert_with(|| fetched.videos.clone());
        self.channels.get_or_insert_with(|| fetched.channels.clone());
    }
}

fn replace_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl From<ListingMetadata> for MetadataPatch {
    fn from(m: ListingMetadata) -> Self {
        Self {
            name: Some(m.name),
            description: Some(m.description),
            primary_image: Some(m.primary_image),
            created_at: Some(m.created_at),
            updated_at: Some(m.updated_at),
            creators: Some(m.creators),
            images: Some(m.images),
            links: Some(m.links),
            tags: Some(m.tags),
            videos: Some(m.videos),
            channels: Some(m.channels),
        }
    }
}

/// Fields bound for the listing account rather than the stored document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OnChainAccountData {
    /// Price in major units, e.g. `1.5` SOL.
    pub price: f64,
    pub currency_public_key: String,
    /// Share of each sale paid to the marketplace that made it, `0..=1`.
    #[serde(rename = "bounty", alias = "cashierSplit")]
    pub cashier_split: f64,
}

impl OnChainAccountData {
    /// Reject missing currency and prices or splits outside their range.
    pub fn validate(&self) -> MarketResult<()> {
        if self.currency_public_key.trim().is_empty() {
            return Err(MarketError::validation("currency is required"));
        }
        if !(0.0..=1.0).contains(&self.cashier_split) {
            return Err(MarketError::validation(format!(
                "marketplace share must be between 0 and 1, got {}",
                self.cashier_split
            )));
        }
        to_minor_units(self.price, PRICE_DECIMALS).map(|_| ())
    }
}

/// Convert a decimal price into integer minor units (`price * 10^decimals`).
pub fn to_minor_units(price: f64, decimals: u32) -> MarketResult<u64> {
    if !price.is_finite() || price < 0.0 {
        return Err(MarketError::validation(format!("invalid price: {price}")));
    }
    let scaled = (price * 10f64.powi(decimals as i32)).round();
    if scaled >= u64::MAX as f64 {
        return Err(MarketError::validation(format!("price too large: {price}")));
    }
    Ok(scaled as u64)
}

/// Unsaved edits: a sparse metadata overlay plus on-chain fields.
///
/// Serialized flat, with on-chain fields nested under `onChainAccountData`:
/// `{"name": "Game", "onChainAccountData": {"price": 1.0, ...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Draft {
    #[serde(flatten)]
    pub metadata: MetadataPatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_chain_account_data: Option<OnChainAccountData>,
}

/// Direction for reordering an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Draft {
    /// Shallow merge of a partial draft; absent fields are preserved and
    /// arrays are replaced whole.
    pub fn merge(&mut self, partial: Draft) {
        self.metadata.merge(partial.metadata);
        replace_some(
            &mut self.on_chain_account_data,
            partial.on_chain_account_data,
        );
    }

    /// Overlay `fetched` underneath the draft without clobbering edits.
    pub fn absorb(&mut self, fetched: &ListingMetadata) {
        self.metadata.absorb(fetched);
    }

    /// The draft as it would be stored, without on-chain fields.
    pub fn metadata_patch(&self) -> &MetadataPatch {
        &self.metadata
    }

    /// A publishable draft needs a title and a primary image.
    pub fn validate_for_publish(&self) -> MarketResult<()> {
        let has_name = self
            .metadata
            .name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        if !has_name {
            return Err(MarketError::validation("a title is required"));
        }
        let has_image = self
            .metadata
            .primary_image
            .as_ref()
            .is_some_and(ImageRef::is_populated);
        if !has_image {
            return Err(MarketError::validation("please select an image"));
        }
        Ok(())
    }
}

/// Move the image at `index` one slot in `direction`; out-of-range moves leave
/// the order unchanged.
pub fn reorder_images(images: &[ImageRef], index: usize, direction: Direction) -> Vec<ImageRef> {
    let mut out = images.to_vec();
    let target = match direction {
        Direction::Up => index.checked_sub(1),
        Direction::Down => index.checked_add(1),
    };
    if let Some(target) = target {
        if index < out.len() && target < out.len() {
            out.swap(index, target);
        }
    }
    out
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
