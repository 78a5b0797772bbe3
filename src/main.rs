//! # notefeed CLI (`nfd`)
//!
//! One-shot commands for synchronizing notes over a peer-replicated,
//! selectively-encrypted append-only log. Each invocation opens one
//! connection to the local replication daemon, performs one operation, and
//! exits; an external scheduler drives repeated tailing with advancing
//! checkpoints.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nfd publish` | Publish one note (JSON on stdin) to the local feed |
//! | `nfd tail <feed_id> <gt>` | Emit the next matching note from a peer's feed |
//! | `nfd whoami` | Print the local public identity |
//! | `nfd ingest <html\|-> [title] [url]` | Convert an HTML snapshot to markdown, blobbing images |
//!
//! stdout carries exactly the machine-readable contract of each command;
//! diagnostics go to stderr (`RUST_LOG` controls verbosity).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use notefeed::{config, ingest, publish, tail, whoami};
use notefeed::ingest::IngestOptions;
use notefeed::peer::PeerClient;

/// notefeed — peer-replicated note synchronization.
#[derive(Parser)]
#[command(
    name = "nfd",
    about = "Publish, tail, and ingest notes on a peer-replicated append-only log",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `~/.notefeed/config.toml`; if the default file does not
    /// exist, built-in defaults apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one note to the local identity's feed.
    ///
    /// Reads a note JSON object from stdin (or `--file`). Private notes
    /// (`is_public = false`) are boxed for every key in the recipient file
    /// plus self before leaving the process. On success, prints one JSON
    /// receipt line.
    Publish {
        /// Read the note from a file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Store a non-empty `annotations` field (an HTML snapshot) as a
        /// content-addressed blob and carry its ref in `comments`.
        #[arg(long)]
        ingest_annotations: bool,
    },

    /// Scan a peer's feed for the next note, starting after a checkpoint.
    ///
    /// Prints one JSON line for the first matching entry and exits 0, or
    /// exits 0 with no output when the batch holds no match.
    Tail {
        /// Feed id of the peer to sync from (`@...=.ed25519`).
        feed_id: String,

        /// Exclusive lower-bound sequence number to resume from.
        gt: i64,
    },

    /// Print the local public identity, creating it on first use.
    Whoami,

    /// Convert an HTML snapshot to markdown, replicating embedded images
    /// as content-addressed blobs.
    Ingest {
        /// HTML string, or `-` to read from stdin.
        html: String,

        /// Title for the generated markdown heading.
        #[arg(default_value = "untitled snippet")]
        title: String,

        /// Source URL for the trailer line.
        #[arg(default_value = "")]
        url: String,

        /// Blank the src of unreachable images instead of keeping it.
        #[arg(long)]
        ignore_broken_img_links: bool,

        /// Store the markdown itself as a blob and print the blob ref.
        #[arg(long)]
        as_blob: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (config_path, explicit) = match cli.config {
        Some(path) => (path, true),
        None => (
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".notefeed/config.toml"),
            false,
        ),
    };
    let cfg = config::load_config(&config_path, explicit)?;

    match cli.command {
        Commands::Publish {
            file,
            ingest_annotations,
        } => {
            let receipt = publish::run_publish(&cfg, file, ingest_annotations).await?;
            println!("{}", receipt);
        }
        Commands::Tail { feed_id, gt } => {
            if let Some(found) = tail::run_tail(&cfg, &feed_id, gt).await? {
                println!("{}", serde_json::to_string(&found)?);
            }
            // No match: exit 0 with no stdout output.
        }
        Commands::Whoami => {
            println!("{}", whoami::run_whoami(&cfg)?);
        }
        Commands::Ingest {
            html,
            title,
            url,
            ignore_broken_img_links,
            as_blob,
        } => {
            let html = if html == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                html
            };
            let client = PeerClient::connect(&cfg).await?;
            let opts = IngestOptions {
                title,
                url,
                ignore_broken_img_links,
                as_blob,
            };
            let markdown = ingest::ingest(&client, &cfg, &html, &opts).await?;
            println!("{}", serde_json::to_string(&markdown)?);
        }
    }

    Ok(())
}
