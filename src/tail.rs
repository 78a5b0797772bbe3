//! FeedTailer: scan a peer's feed for the next note addressed to us.
//!
//! One-shot: entries arrive in ascending sequence order and the scan stops
//! at the first match, so an external scheduler re-invokes with an advanced
//! checkpoint after each hit. Ciphertext entries that fail to unbox were
//! simply not addressed to this identity and are skipped silently.

use anyhow::Result;
use tracing::debug;

use crate::boxing;
use crate::config::Config;
use crate::keystore::{self, Identity};
use crate::models::{EntryContent, FeedEntry, FeedNote};
use crate::peer::PeerClient;

/// Scan `feed_id` for the first notefeed post with sequence > `gt`.
///
/// `None` means the batch held no matching entry; the caller decides how to
/// terminate. Dropping out early leaves the rest of the feed unread.
pub async fn run_tail(config: &Config, feed_id: &str, gt: i64) -> Result<Option<FeedNote>> {
    let identity = keystore::load_or_create(&config.identity.path)?;
    let client = PeerClient::connect(config).await?;

    let mut stream = client.read_feed(feed_id, gt).await?;
    while let Some(entry) = stream.next_entry().await? {
        debug!(seq = entry.value.sequence, key = %entry.key, "scanning entry");
        if let Some(found) = match_entry(&entry, &identity) {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

/// Decide whether one feed entry is a note for us.
///
/// Public entries arrive as cleartext post objects; private ones must unbox
/// with our secret key. `is_public` on the result records which path it was.
pub fn match_entry(entry: &FeedEntry, identity: &Identity) -> Option<FeedNote> {
    match &entry.value.content {
        EntryContent::Encrypted(ciphertext) => {
            let plain = boxing::open(ciphertext, identity.signing_key())?;
            let content: serde_json::Value = serde_json::from_slice(&plain).ok()?;
            to_feed_note(&content, entry, false)
        }
        EntryContent::Plain(content) => to_feed_note(content, entry, true),
    }
}

fn to_feed_note(
    content: &serde_json::Value,
    entry: &FeedEntry,
    is_public: bool,
) -> Option<FeedNote> {
    if content.get("type").and_then(|v| v.as_str()) != Some("post") {
        return None;
    }
    let localnative = content.get("localnative")?;
    if localnative.is_null() {
        return None;
    }

    let note = localnative.get("note").cloned().unwrap_or_default();
    let field = |key: &str| {
        note.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };

    Some(FeedNote {
        note_title: field("title"),
        note_url: field("url"),
        note_tags: field("tags"),
        note_description: field("description"),
        note_comments: field("comments"),
        note_annotations: field("annotations"),
        note_created_at: field("created_at"),
        author: entry.value.author.clone(),
        ts: entry.value.timestamp,
        key: entry.key.clone(),
        prev: entry.value.previous.clone(),
        seq: entry.value.sequence,
        is_public,
    })
}
