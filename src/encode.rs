//! Pure transform from a domain note to a log-entry payload.
//!
//! No I/O and no clock: identical inputs always produce an identical
//! [`Message`], so publish receipts differ only in the metadata the daemon
//! assigns at append time.

use thiserror::Error;

use crate::models::{LocalNative, Mention, Message, Note, NotePayload};

/// Markdown marker prepended to public posts so peers can see at a glance
/// the entry came from this application.
pub const BRANDING: &str =
    "![localnative.app](&b+Z2zC84VsUj41QsXnSVoIwkAtYrK0YoQwVajGaUC8A=.sha256)";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("a private note requires at least one recipient")]
    NoRecipients,
}

/// Encode `note` into a wire message.
///
/// `recipients` is consulted only when the note is private; a private note
/// with an empty recipient set is an [`EncodeError::NoRecipients`].
/// Duplicate tags are preserved: `"a,b,a"` yields three mentions.
pub fn encode(note: &Note, recipients: &[String]) -> Result<Message, EncodeError> {
    if !note.is_public && recipients.is_empty() {
        return Err(EncodeError::NoRecipients);
    }

    let tags: Vec<&str> = note
        .tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    let mentions: Vec<Mention> = tags
        .iter()
        .map(|t| Mention {
            link: format!("#{}", t),
        })
        .collect();

    let tags_text = tags
        .iter()
        .map(|t| format!("#{}", t))
        .collect::<Vec<_>>()
        .join(" ");

    // created_at first, then every non-empty line in fixed order.
    let mut text = note.created_at.clone();
    for line in [
        tags_text.as_str(),
        &format!("**{}**", note.title),
        note.url.as_str(),
        note.description.as_str(),
        note.comments.as_str(),
        note.annotations.as_str(),
    ] {
        if !line.is_empty() {
            text.push('\n');
            text.push_str(line);
        }
    }

    let (text, recps) = if note.is_public {
        (format!("{} {}", BRANDING, text), None)
    } else {
        (text, Some(recipients.to_vec()))
    };

    Ok(Message {
        kind: "post".to_string(),
        text,
        mentions,
        recps,
        localnative: LocalNative {
            note: NotePayload::from(note),
        },
    })
}
