//! Content-addressed storage for listing documents and uploaded files.

use std::{
    fs,
    future::Future,
    io::Write,
    path::PathBuf,
};

use anyhow::{anyhow, bail, Context, Result};
use rand::{seq::SliceRandom, thread_rng};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Store addressing blobs by a deterministic function of their bytes.
///
/// Putting identical bytes twice yields the same identifier.
pub trait ContentStore: Send + Sync + 'static {
    fn put(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn get(&self, cid: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Serialize `doc` as JSON and store it.
pub async fn put_document<C: ContentStore, T: Serialize>(store: &C, doc: &T) -> Result<String> {
    let bytes = serde_json::to_vec(doc)?;
    store.put(bytes, JSON_CONTENT_TYPE).await
}

/// Load and decode a JSON document.
pub async fn get_document<C: ContentStore, T: DeserializeOwned>(store: &C, cid: &str) -> Result<T> {
    let bytes = store.get(cid).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("decoding document {cid}"))
}

/// Strip a `scheme://` prefix, e.g. `ipfs://abc` -> `abc`.
pub fn normalize_cid(uri: &str) -> &str {
    uri.split_once("://").map_or(uri, |(_, rest)| rest)
}

/// Build `scheme://cid`.
pub fn scheme_uri(scheme: &str, cid: &str) -> String {
    format!("{scheme}://{}", normalize_cid(cid))
}

/// Blob store on the local filesystem rooted at `root`.
///
/// Layout:
/// - `blobs/ab/cd/<cid>` holds the bytes for identifier `abcd...`
/// - `log/puts.ndjson` records every new blob
#[derive(Clone)]
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    /// Store rooted at `root`; call [`init`](Self::init) before use.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        for d in ["blobs", "log"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Write `bytes` under their identifier unless already present.
    pub fn put_blob(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        let cid = content_id(bytes);
        let path = self.blob_path(&cid)?;
        if path.exists() {
            return Ok(cid);
        }
        let parent_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path)?;

        let log_dir = self.root.join("log");
        fs::create_dir_all(&log_dir)?;
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("puts.ndjson"))?;
        let entry = json!({ "cid": cid, "size": bytes.len(), "contentType": content_type });
        serde_json::to_writer(&mut log_file, &entry)?;
        log_file.write_all(b"\n")?;
        Ok(cid)
    }

    /// Read the bytes stored under `cid`. A scheme prefix is ignored.
    pub fn get_blob(&self, cid: &str) -> Result<Vec<u8>> {
        let cid = normalize_cid(cid);
        let path = self.blob_path(cid)?;
        fs::read(&path).with_context(|| format!("content {cid} not found"))
    }

    /// Rehash a random sample of stored blobs; fails on the first mismatch.
    pub fn verify_sample(&self, sample: usize) -> Result<usize> {
        let mut paths = vec![];
        let blobs = self.root.join("blobs");
        if blobs.exists() {
            for entry in walkdir::WalkDir::new(blobs) {
                let entry = entry?;
                if entry.file_type().is_file() {
                    paths.push(entry.into_path());
                }
            }
        }
        let mut rng = thread_rng();
        paths.shuffle(&mut rng);
        let take = sample.min(paths.len());
        for p in paths.iter().take(take) {
            let expected = p
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("bad blob name: {}", p.display()))?;
            let actual = content_id(&fs::read(p)?);
            if actual != expected {
                bail!("content mismatch for {expected}: hashes to {actual}");
            }
        }
        Ok(take)
    }

    /// Canonical path for an identifier; rejects anything that is not one.
    fn blob_path(&self, cid: &str) -> Result<PathBuf> {
        validate_cid(cid)?;
        Ok(self.root.join("blobs").join(&cid[0..2]).join(&cid[2..4]).join(cid))
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl ContentStore for FileContentStore {
    fn put(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String>> + Send {
        let result = self.put_blob(&bytes, content_type);
        async move { result }
    }

    fn get(&self, cid: &str) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let result = self.get_blob(cid);
        async move { result }
    }
}

/// Hex SHA-256 of the bytes.
pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn validate_cid(cid: &str) -> Result<()> {
    if cid.len() != 64 || !cid.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid content identifier: {cid}");
    }
    Ok(())
}

/// True when two URIs name the same content once scheme prefixes are removed.
pub fn same_content(a: &str, b: &str) -> bool {
    normalize_cid(a) == normalize_cid(b)
}
