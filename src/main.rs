//! Command line interface for the listing editor. Supports initialization,
//! file uploads, creating, inspecting and updating listings, attaching
//! encrypted files, content verification and the HTTP service.

mod cache;
mod chain;
mod config;
mod content;
mod draft;
mod editor;
mod error;
mod metadata;
mod notify;
mod publish;
mod server;
mod session;
mod sync;
#[cfg(test)]
mod testkit;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Settings;
use serde::Serialize;

use crate::{
    chain::LedgerProgram,
    content::FileContentStore,
    metadata::Draft,
    notify::{LogNotifier, MemoryNotifier},
    publish::PrecryptUpload,
    session::LocalSession,
};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "storefront",
    author,
    version,
    about = "Listing editor for a blockchain-backed digital goods marketplace"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger and content store under `STORE_ROOT`.
    Init,
    /// Store a file and print its identifier and gateway URL.
    Upload {
        file: PathBuf,
        /// Overrides the type guessed from the file extension.
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Create a listing from a draft JSON file.
    Create { draft: PathBuf },
    /// Fetch a listing and print its account and metadata.
    Show { listing: String },
    /// Publish a draft JSON file over an existing listing.
    Update { listing: String, draft: PathBuf },
    /// Attach an encrypted file delivered to token holders.
    Attach {
        listing: String,
        /// Identifier of the stored decryption key.
        #[arg(long)]
        key: String,
        /// Identifier of the stored encrypted file.
        #[arg(long)]
        file: String,
    },
    /// Rehash a random sample of stored content.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
    },
    /// Launch the HTTP service.
    Serve,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Init => {
            LedgerProgram::new(cfg.ledger_root()).init()?;
            FileContentStore::new(cfg.content_root()).init()?;
        }
        Commands::Verify { sample } => {
            let checked = FileContentStore::new(cfg.content_root()).verify_sample(sample)?;
            println!("verified {checked} blobs");
        }
        Commands::Serve => {
            let inbox = MemoryNotifier::default();
            let session = LocalSession::open(&cfg, Arc::new(inbox.clone()))?;
            let http_addr: SocketAddr = cfg.bind_http.as_str().parse()?;
            server::serve_http(http_addr, session, inbox, cfg.verbose, std::future::pending())
                .await?;
        }
        command => {
            let session = LocalSession::open(&cfg, Arc::new(LogNotifier))?;
            match command {
                Commands::Upload { file, content_type } => {
                    let bytes =
                        fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
                    let content_type = content_type.unwrap_or_else(|| guess_content_type(&file).into());
                    let upload = session.upload_file(bytes, &content_type).await?;
                    print_json(&upload)?;
                }
                Commands::Create { draft } => {
                    let draft = read_draft(&draft)?;
                    print_json(&session.create_listing(&draft).await?)?;
                }
                Commands::Show { listing } => {
                    print_json(&session.cache().fetch(&listing).await?)?;
                }
                Commands::Update { listing, draft } => {
                    // fields missing from the file keep their published values
                    let mut draft = read_draft(&draft)?;
                    let record = session.cache().fetch(&listing).await?;
                    draft.absorb(&record.metadata);
                    print_json(&session.publish_update(&listing, &draft).await?)?;
                }
                Commands::Attach { listing, key, file } => {
                    let upload = PrecryptUpload {
                        key_cid: key,
                        file_cid: file,
                    };
                    print_json(&session.attach_precrypt(&listing, upload).await?)?;
                }
                Commands::Init | Commands::Verify { .. } | Commands::Serve => unreachable!(),
            }
        }
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("storefront-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", store_root.to_string_lossy()));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str(&format!("DEBOUNCE_MS={}\n", config::DEFAULT_DEBOUNCE_MS));
    content.push_str(&format!("CONTENT_SCHEME={}\n", config::DEFAULT_SCHEME));
    content.push_str(&format!("GATEWAY={}\n", config::DEFAULT_GATEWAY));
    content.push_str("NETWORK=testnet\n");
    content.push_str(&format!("PRECRYPT_PROXY={}\n", config::DEFAULT_PRECRYPT_PROXY));
    content.push_str(&format!("CHARTER={}\n", config::DEFAULT_CHARTER));
    content.push_str("WALLET=\n");
    content.push_str("VERBOSE=0\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn read_draft(path: &Path) -> anyhow::Result<Draft> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing draft {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => publish::OCTET_STREAM,
    }
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::ProgramClient,
        testkit::{clear_env, ENV_MUTEX},
    };
    use std::{fs, time::Duration};
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};

    fn write_env(dir: &TempDir, extra: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\n{}",
            dir.path().to_str().unwrap(),
            extra
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    /// Addresses of every listing account in the ledger.
    fn listing_ids(dir: &TempDir) -> Vec<String> {
        fs::read_dir(dir.path().join("ledger/accounts"))
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .file_stem()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[tokio::test]
    async fn run_create_show_update_attach_verify() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "WALLET=alice\n");

        run(Cli {
            env: env_file.clone(),
            command: Commands::Init,
        })
        .await
        .unwrap();
        assert!(dir.path().join("content/blobs").exists());
        assert!(dir.path().join("ledger/accounts").exists());

        let image = dir.path().join("cover.png");
        fs::write(&image, b"not really a png").unwrap();
        run(Cli {
            env: env_file.clone(),
            command: Commands::Upload {
                file: image,
                content_type: None,
            },
        })
        .await
        .unwrap();

        let draft_path = dir.path().join("draft.json");
        let draft = serde_json::json!({
            "name": "Game",
            "primaryImage": {"src": {"uri": "https://ipfs.io/ipfs/cover", "contentType": "image/png"}},
            "onChainAccountData": {"price": 1, "currencyPublicKey": "So11111111111111111111111111111111111111112", "bounty": 0.1}
        });
        fs::write(&draft_path, draft.to_string()).unwrap();
        run(Cli {
            env: env_file.clone(),
            command: Commands::Create { draft: draft_path },
        })
        .await
        .unwrap();
        let ids = listing_ids(&dir);
        assert_eq!(ids.len(), 1);
        let id = ids[0].clone();

        run(Cli {
            env: env_file.clone(),
            command: Commands::Show {
                listing: id.clone(),
            },
        })
        .await
        .unwrap();

        let update_path = dir.path().join("update.json");
        fs::write(&update_path, r#"{"description": "Now with levels"}"#).unwrap();
        run(Cli {
            env: env_file.clone(),
            command: Commands::Update {
                listing: id.clone(),
                draft: update_path,
            },
        })
        .await
        .unwrap();

        run(Cli {
            env: env_file.clone(),
            command: Commands::Attach {
                listing: id.clone(),
                key: "keycid".into(),
                file: "filecid".into(),
            },
        })
        .await
        .unwrap();

        let program = LedgerProgram::new(dir.path().join("ledger"));
        let account = program.fetch_listing_account(&id).await.unwrap().unwrap();
        let store = FileContentStore::new(dir.path().join("content"));
        let stored: serde_json::Value = content::get_document(&store, &account.uri).await.unwrap();
        assert_eq!(stored["name"], "Game");
        assert_eq!(stored["description"], "Now with levels");
        assert_eq!(stored["channels"][0]["precrypts"][0]["key"]["uri"], "ipfs://keycid");

        run(Cli {
            env: env_file,
            command: Commands::Verify { sample: 10 },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn create_needs_complete_draft_and_wallet() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "");
        let draft_path = dir.path().join("draft.json");

        fs::write(&draft_path, r#"{"name": "Game"}"#).unwrap();
        let err = run(Cli {
            env: env_file.clone(),
            command: Commands::Create {
                draft: draft_path.clone(),
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("please select an image"));

        let draft = serde_json::json!({
            "name": "Game",
            "primaryImage": {"src": {"uri": "https://ipfs.io/ipfs/cover"}},
            "onChainAccountData": {"price": 1, "currencyPublicKey": "USDC"}
        });
        fs::write(&draft_path, draft.to_string()).unwrap();
        let err = run(Cli {
            env: env_file,
            command: Commands::Create { draft: draft_path },
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "no wallet connected");
        assert!(listing_ids(&dir).is_empty());
    }

    #[tokio::test]
    async fn init_creates_default_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Init,
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        let expected_root = dir.path().join("storefront-data");
        assert!(data.contains(&format!("STORE_ROOT={}", expected_root.to_string_lossy())));
        assert!(data.contains("BIND_HTTP=127.0.0.1:7777"));
        assert!(data.contains("NETWORK=testnet"));
        assert!(data.contains("WALLET=\n"));
        assert!(expected_root.join("ledger/accounts").exists());
        assert!(expected_root.join("content/blobs").exists());
    }

    #[tokio::test]
    async fn run_serve_starts_http() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_port = http_listener.local_addr().unwrap().port();
        drop(http_listener);
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:{}\n",
            dir.path().to_str().unwrap(),
            http_port,
        );
        fs::write(&env_path, content).unwrap();
        let env_str = env_path.to_str().unwrap().to_string();

        let handle = task::spawn(run(Cli {
            env: env_str,
            command: Commands::Serve,
        }));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let url = format!("http://127.0.0.1:{}/healthz", http_port);
        let resp = reqwest::get(url).await.unwrap();
        assert!(resp.status().is_success());
        handle.abort();
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(guess_content_type(Path::new("a/cover.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("clip.webm")), "video/webm");
        assert_eq!(guess_content_type(Path::new("game.zip")), "application/octet-stream");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }
}
