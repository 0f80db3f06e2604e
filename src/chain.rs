//! Listing program client: account reads, instruction builders and
//! transaction submission, plus a file-backed ledger implementing them.

use std::{
    collections::BTreeMap,
    fs,
    future::Future,
    io::Write,
    path::PathBuf,
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::content::content_id;

/// On-chain listing account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingAccount {
    /// Pointer to the metadata document, e.g. `ipfs://<cid>`.
    pub uri: String,
    /// Price in minor units of `currency`.
    pub price: u64,
    pub currency: String,
    pub cashier_split: f64,
    pub is_available: bool,
    pub is_consumable: bool,
    pub is_refundable: bool,
    pub charter: String,
    /// Key allowed to modify the listing.
    pub authority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitListingParams {
    pub signer: String,
    pub uri: String,
    pub price: u64,
    pub currency: String,
    pub cashier_split: f64,
    pub is_available: bool,
    pub is_consumable: bool,
    pub is_refundable: bool,
    pub charter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetUriParams {
    pub listing: String,
    pub signer: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Instruction {
    InitListing {
        listing: String,
        params: InitListingParams,
    },
    SetListingUri(SetUriParams),
}

/// Output of [`ProgramClient::build_init_listing`]; `signers` holds the new
/// listing address, which must co-sign the transaction.
#[derive(Debug, Clone)]
pub struct ListingInit {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<String>,
    pub listing: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub fee_payer: String,
    pub instructions: Vec<Instruction>,
    pub signers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Confirmation {
    pub signature: String,
}

/// Narrow contract with the listing program.
pub trait ProgramClient: Send + Sync + 'static {
    /// `Ok(None)` when no account exists at `id`.
    fn fetch_listing_account(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ListingAccount>>> + Send;

    fn submit_transaction(&self, tx: Transaction)
        -> impl Future<Output = Result<Confirmation>> + Send;

    fn build_init_listing(&self, params: InitListingParams) -> ListingInit {
        let listing = new_address();
        ListingInit {
            instructions: vec![Instruction::InitListing {
                listing: listing.clone(),
                params,
            }],
            signers: vec![listing.clone()],
            listing,
        }
    }

    fn build_set_uri(&self, params: SetUriParams) -> Vec<Instruction> {
        vec![Instruction::SetListingUri(params)]
    }
}

/// Fresh random account address.
pub fn new_address() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Connected signer.
#[derive(Debug, Clone)]
pub struct Wallet {
    signer: String,
}

impl Wallet {
    pub fn new(signer: impl Into<String>) -> Self {
        Self {
            signer: signer.into(),
        }
    }

    /// Address that signs and pays for transactions.
    pub fn public_key(&self) -> &str {
        &self.signer
    }

    /// Sign as fee payer and submit `instructions` with extra `signers`.
    pub async fn send<P: ProgramClient>(
        &self,
        program: &P,
        instructions: Vec<Instruction>,
        signers: Vec<String>,
    ) -> Result<Confirmation> {
        let tx = Transaction {
            fee_payer: self.signer.clone(),
            instructions,
            signers,
        };
        program.submit_transaction(tx).await
    }
}

/// Local ledger persisting listing accounts under `root`.
///
/// Layout:
/// - `accounts/<address>.json` holds one [`ListingAccount`]
/// - `log/transactions.ndjson` records every confirmed transaction
#[derive(Clone)]
pub struct LedgerProgram {
    root: PathBuf,
}

impl LedgerProgram {
    /// Ledger rooted at `root`; call [`init`](Self::init) before use.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        for d in ["accounts", "log"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Read an account file; `None` if the listing does not exist.
    pub fn load_account(&self, id: &str) -> Result<Option<ListingAccount>> {
        let Some(path) = self.account_path(id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let account = serde_json::from_str(&data).with_context(|| format!("decoding account {id}"))?;
        Ok(Some(account))
    }

    /// Validate every instruction against current state, then write the
    /// touched accounts and log the transaction.
    pub fn apply(&self, tx: &Transaction) -> Result<Confirmation> {
        if tx.fee_payer.is_empty() {
            bail!("transaction has no fee payer");
        }
        if tx.instructions.is_empty() {
            bail!("transaction has no instructions");
        }
        let mut staged: BTreeMap<String, ListingAccount> = BTreeMap::new();
        for ix in &tx.instructions {
            match ix {
                Instruction::InitListing { listing, params } => {
                    if self.account_path(listing).is_none() {
                        bail!("invalid listing address: {listing}");
                    }
                    if !tx.signers.iter().any(|s| s == listing) {
                        bail!("listing {listing} did not sign");
                    }
                    if params.signer != tx.fee_payer {
                        bail!("listing authority {} did not sign", params.signer);
                    }
                    if staged.contains_key(listing) || self.load_account(listing)?.is_some() {
                        bail!("listing {listing} already exists");
                    }
                    let account = ListingAccount {
                        uri: params.uri.clone(),
                        price: params.price,
                        currency: params.currency.clone(),
                        cashier_split: params.cashier_split,
                        is_available: params.is_available,
                        is_consumable: params.is_consumable,
                        is_refundable: params.is_refundable,
                        charter: params.charter.clone(),
                        authority: params.signer.clone(),
                    };
                    staged.insert(listing.clone(), account);
                }
                Instruction::SetListingUri(p) => {
                    let mut account = match staged.remove(&p.listing) {
                        Some(a) => a,
                        None => self
                            .load_account(&p.listing)?
                            .ok_or_else(|| anyhow!("listing {} does not exist", p.listing))?,
                    };
                    if p.signer != account.authority || p.signer != tx.fee_payer {
                        bail!("{} is not the authority of {}", p.signer, p.listing);
                    }
                    account.uri = p.uri.clone();
                    staged.insert(p.listing.clone(), account);
                }
            }
        }

        let mut salted = serde_json::to_vec(tx)?;
        salted.extend_from_slice(&rand::random::<[u8; 16]>());
        let signature = content_id(&salted);

        for (address, account) in &staged {
            let path = self
                .account_path(address)
                .ok_or_else(|| anyhow!("invalid listing address: {address}"))?;
            let parent = path
                .parent()
                .ok_or_else(|| anyhow!("missing parent directory for account"))?;
            fs::create_dir_all(parent)?;
            let tmp = tempfile::NamedTempFile::new_in(parent)?;
            serde_json::to_writer(&tmp, account)?;
            tmp.persist(&path)?;
        }

        let log_dir = self.root.join("log");
        fs::create_dir_all(&log_dir)?;
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("transactions.ndjson"))?;
        let entry = serde_json::json!({ "signature": signature, "transaction": tx });
        serde_json::to_writer(&mut log_file, &entry)?;
        log_file.write_all(b"\n")?;

        Ok(Confirmation { signature })
    }

    /// Path for an address, or `None` when the address is not well formed.
    fn account_path(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(self.root.join("accounts").join(format!("{id}.json")))
    }
}

impl ProgramClient for LedgerProgram {
    fn fetch_listing_account(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ListingAccount>>> + Send {
        let result = self.load_account(id);
        async move { result }
    }

    fn submit_transaction(
        &self,
        tx: Transaction,
    ) -> impl Future<Output = Result<Confirmation>> + Send {
        let result = self.apply(&tx);
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(signer: &str, uri: &str) -> InitListingParams {
        InitListingParams {
            signer: signer.into(),
            uri: uri.into(),
            price: 1_000_000_000,
            currency: "So11111111111111111111111111111111111111112".into(),
            cashier_split: 0.1,
            is_available: true,
            is_consumable: false,
            is_refundable: false,
            charter: "charter".into(),
        }
    }

    fn ledger(dir: &TempDir) -> LedgerProgram {
        let ledger = LedgerProgram::new(dir.path().to_path_buf());
        ledger.init().unwrap();
        ledger
    }

    #[tokio::test]
    async fn init_then_set_uri() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let wallet = Wallet::new("alice");
        let init = ledger.build_init_listing(params("alice", "ipfs://one"));
        assert_eq!(init.signers, vec![init.listing.clone()]);
        wallet
            .send(&ledger, init.instructions, init.signers)
            .await
            .unwrap();
        let account = ledger
            .fetch_listing_account(&init.listing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.uri, "ipfs://one");
        assert_eq!(account.authority, "alice");

        let ixs = ledger.build_set_uri(SetUriParams {
            listing: init.listing.clone(),
            signer: "alice".into(),
            uri: "ipfs://two".into(),
        });
        let conf = wallet.send(&ledger, ixs, vec![]).await.unwrap();
        assert_eq!(conf.signature.len(), 64);
        let account = ledger.load_account(&init.listing).unwrap().unwrap();
        assert_eq!(account.uri, "ipfs://two");
        let log = fs::read_to_string(dir.path().join("log/transactions.ndjson")).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[tokio::test]
    async fn set_uri_requires_authority() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let init = ledger.build_init_listing(params("alice", "ipfs://one"));
        Wallet::new("alice")
            .send(&ledger, init.instructions, init.signers)
            .await
            .unwrap();
        let ixs = ledger.build_set_uri(SetUriParams {
            listing: init.listing.clone(),
            signer: "mallory".into(),
            uri: "ipfs://evil".into(),
        });
        assert!(Wallet::new("mallory").send(&ledger, ixs, vec![]).await.is_err());
        let account = ledger.load_account(&init.listing).unwrap().unwrap();
        assert_eq!(account.uri, "ipfs://one");
    }

    #[test]
    fn init_requires_listing_signature() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let init = ledger.build_init_listing(params("alice", "ipfs://one"));
        let tx = Transaction {
            fee_payer: "alice".into(),
            instructions: init.instructions,
            signers: vec![],
        };
        assert!(ledger.apply(&tx).is_err());
        assert!(ledger.load_account(&init.listing).unwrap().is_none());
    }

    #[test]
    fn failed_instruction_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let init = ledger.build_init_listing(params("alice", "ipfs://one"));
        let mut instructions = init.instructions.clone();
        instructions.push(Instruction::SetListingUri(SetUriParams {
            listing: "missing".into(),
            signer: "alice".into(),
            uri: "ipfs://two".into(),
        }));
        let tx = Transaction {
            fee_payer: "alice".into(),
            instructions,
            signers: init.signers,
        };
        assert!(ledger.apply(&tx).is_err());
        assert!(ledger.load_account(&init.listing).unwrap().is_none());
        assert!(!dir.path().join("log/transactions.ndjson").exists());
    }

    #[test]
    fn unknown_and_malformed_addresses_are_absent() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        assert!(ledger.load_account("X").unwrap().is_none());
        assert!(ledger.load_account("../secret").unwrap().is_none());
        assert!(ledger.load_account("").unwrap().is_none());
    }

    #[test]
    fn instruction_wire_shape() {
        let ix = Instruction::SetListingUri(SetUriParams {
            listing: "l".into(),
            signer: "s".into(),
            uri: "ipfs://x".into(),
        });
        let val = serde_json::to_value(&ix).unwrap();
        assert_eq!(val["type"], "setListingUri");
        assert_eq!(val["data"]["uri"], "ipfs://x");
    }
}
