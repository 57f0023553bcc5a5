//! adapterkv CLI
//!
//! Operator tool for inspecting and editing a log store's checkpoint
//! directory. Every mutating command ends with a checkpoint. Opening the
//! directory removes temp directories left by an interrupted checkpoint.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::{fmt, EnvFilter};

use adapterkv::checkpoint::CheckpointManager;
use adapterkv::{
    CompressionLevel, KvStore, KvStoreExt, LocalCheckpointManager, LogStore, Result, StoreConfig,
    StoreError,
};

/// adapterkv CLI
#[derive(Parser, Debug)]
#[command(name = "adapterkv-cli")]
#[command(about = "Inspect and edit an adapterkv checkpoint directory")]
#[command(version)]
struct Args {
    /// Checkpoint directory
    #[arg(short, long, default_value = "./adapterkv_data")]
    dir: String,

    /// Compression for values written by this invocation
    #[arg(short, long, default_value = "none")]
    compression: CompressionLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List live keys
    Keys {
        /// Only list keys under this prefix (printed without it)
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Print engine statistics as JSON
    Stats,

    /// Validate the latest checkpoint and replay its log. Writes no new
    /// checkpoint.
    Verify,
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,adapterkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("adapterkv CLI v{}", adapterkv::VERSION);

    if let Err(e) = run(args).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if matches!(args.command, Commands::Verify) {
        inspect_checkpoint(&args.dir)?;
    }

    let config = StoreConfig::builder()
        .storage_location(&args.dir)
        .compression_level(args.compression)
        .build();
    let store = LogStore::open(config).await?;
    tracing::debug!(location = ?store.checkpoint_location(), "Store opened");

    match args.command {
        Commands::Get { key } => match store.read(key.as_bytes()).await? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            store.write(key.as_bytes(), value.as_bytes()).await?;
            store.take_checkpoint().await?;
            println!("OK");
        }
        Commands::Del { key } => {
            let existed = store.delete(key.as_bytes()).await?;
            store.take_checkpoint().await?;
            println!("{}", if existed { "1" } else { "0" });
        }
        Commands::Keys { prefix } => {
            let mut keys = match &prefix {
                Some(prefix) => {
                    let scoped = store.create_scoped(prefix.as_bytes());
                    let keys: Vec<Result<String>> = scoped.keys_str().collect().await;
                    keys
                }
                None => store.keys_str().collect::<Vec<_>>().await,
            };
            keys.sort_by(|a, b| match (a, b) {
                (Ok(a), Ok(b)) => a.cmp(b),
                _ => std::cmp::Ordering::Equal,
            });
            for key in keys {
                println!("{}", key?);
            }
        }
        Commands::Stats => {
            let stats = store.stats();
            let json = serde_json::to_string_pretty(&stats).map_err(|e| {
                StoreError::Serialization(format!("Failed to encode stats: {}", e))
            })?;
            println!("{}", json);
        }
        // Opening the store replayed and cross-checked the checkpoint
        Commands::Verify => println!("replay ok: {} live keys", store.stats().live_keys),
    }

    store.close().await;
    Ok(())
}

/// Load and validate the latest checkpoint's artifacts
fn inspect_checkpoint(dir: &str) -> Result<()> {
    let manager = LocalCheckpointManager::open(dir, 1)?;
    match manager.load_latest()? {
        Some(checkpoint) => {
            let meta = &checkpoint.metadata;
            println!(
                "checkpoint {} ok: {} live keys, index {} bytes, log {} bytes, last seq {}",
                checkpoint.token, meta.live_keys, meta.index_len, meta.log_len, meta.last_seq
            );
        }
        None => println!("no checkpoint in {}", manager.describe()),
    }
    Ok(())
}
