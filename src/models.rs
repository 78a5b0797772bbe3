//! Core data models used throughout notefeed.
//!
//! These types represent the notes, wire messages, and feed entries that flow
//! between the local storage layer, the message encoder, and the replication
//! daemon.

use serde::{Deserialize, Serialize};

/// A domain note as handed to us by the UI clients.
///
/// `rowid` and `is_public` are local-only: they are stripped before the note
/// is embedded in a wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub rowid: i64,
    pub title: String,
    pub url: String,
    /// Comma-separated tag string, e.g. `"rust,sync"`.
    pub tags: String,
    pub description: String,
    pub comments: String,
    pub annotations: String,
    pub created_at: String,
    pub is_public: bool,
}

/// The note as embedded in a wire message: every [`Note`] field except
/// `rowid` and `is_public`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotePayload {
    pub title: String,
    pub url: String,
    pub tags: String,
    pub description: String,
    pub comments: String,
    pub annotations: String,
    pub created_at: String,
}

impl From<&Note> for NotePayload {
    fn from(note: &Note) -> Self {
        NotePayload {
            title: note.title.clone(),
            url: note.url.clone(),
            tags: note.tags.clone(),
            description: note.description.clone(),
            comments: note.comments.clone(),
            annotations: note.annotations.clone(),
            created_at: note.created_at.clone(),
        }
    }
}

/// A hashtag-style structured reference embedded in a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub link: String,
}

/// Wrapper around the embedded note payload, keyed `localnative` on the wire
/// so peers can discover notefeed posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalNative {
    pub note: NotePayload,
}

/// The log-entry payload produced by the message encoder.
///
/// With `recps` set, the peer connector seals the message for every listed
/// recipient (plus self) before it leaves the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub mentions: Vec<Mention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recps: Option<Vec<String>>,
    pub localnative: LocalNative,
}

/// Entry content as it comes back from a feed read: either a cleartext post
/// object or an opaque ciphertext string addressed to some recipient set.
///
/// The variant is decided at deserialization time; nothing downstream sniffs
/// value shapes. `Encrypted` must be listed first so JSON strings are never
/// swallowed by the catch-all `Plain` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryContent {
    Encrypted(String),
    Plain(serde_json::Value),
}

/// The signed portion of a feed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntryValue {
    pub author: String,
    /// Strictly increasing per-author counter.
    pub sequence: i64,
    /// Key of the prior entry; `None` only for the first entry of a feed.
    pub previous: Option<String>,
    pub timestamp: i64,
    pub content: EntryContent,
}

/// One append-only log entry, as returned by publish and feed reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Content-hash id of the entry.
    pub key: String,
    pub value: FeedEntryValue,
}

/// The flat JSON record both `publish` and `tail` emit on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedNote {
    pub note_title: String,
    pub note_url: String,
    pub note_tags: String,
    pub note_description: String,
    pub note_comments: String,
    pub note_annotations: String,
    pub note_created_at: String,
    pub author: String,
    pub ts: i64,
    pub key: String,
    pub prev: Option<String>,
    pub seq: i64,
    pub is_public: bool,
}
