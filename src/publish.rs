//! FeedPublisher: write one note to the local identity's feed.
//!
//! Reads the note from stdin (or a file), encodes it, publishes it through
//! the peer connector, and emits a single JSON receipt line on stdout. Any
//! failure aborts the run before anything is written to stdout — there is no
//! partial commit and no retry queue.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::encode;
use crate::ingest::{self, IngestOptions};
use crate::keystore;
use crate::models::{FeedNote, Note};
use crate::peer::PeerClient;

/// Load the recipient key set: a JSON array of feed ids.
pub fn load_recipients(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read recipient key file: {}", path.display()))?;
    let recipients: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed recipient key file: {}", path.display()))?;
    Ok(recipients)
}

pub async fn run_publish(
    config: &Config,
    file: Option<PathBuf>,
    ingest_annotations: bool,
) -> Result<String> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read note file: {}", path.display()))?,
        None => std::io::read_to_string(std::io::stdin())
            .context("Failed to read note from stdin")?,
    };
    let mut note: Note = serde_json::from_str(&raw).context("Malformed note JSON")?;

    let identity = keystore::load_or_create(&config.identity.path)?;

    // The recipient set is only needed for private notes; encode() enforces
    // that it is non-empty in that case.
    let recipients = if note.is_public {
        Vec::new()
    } else {
        load_recipients(&config.recipients.path)?
    };

    let client = PeerClient::connect(config).await?;

    // Large annotation bodies (HTML snapshots) travel as a blob; the entry
    // carries only the content address.
    if ingest_annotations && !note.annotations.trim().is_empty() {
        let opts = IngestOptions {
            title: note.title.clone(),
            url: note.url.clone(),
            ignore_broken_img_links: true,
            as_blob: true,
        };
        let blob_ref = ingest::ingest(&client, config, &note.annotations, &opts).await?;
        info!(%blob_ref, "annotations stored as blob");
        note.comments = blob_ref;
        note.annotations = String::new();
    }

    let message = encode::encode(&note, &recipients)?;
    let entry = client.publish(&identity, &message).await?;
    info!(
        key = %entry.key,
        seq = entry.value.sequence,
        is_public = note.is_public,
        "published note"
    );

    let receipt = FeedNote {
        note_title: note.title,
        note_url: note.url,
        note_tags: note.tags,
        note_description: note.description,
        note_comments: note.comments,
        note_annotations: note.annotations,
        note_created_at: note.created_at,
        author: entry.value.author,
        ts: entry.value.timestamp,
        key: entry.key,
        prev: entry.value.previous,
        seq: entry.value.sequence,
        is_public: note.is_public,
    };

    Ok(serde_json::to_string(&receipt)?)
}
