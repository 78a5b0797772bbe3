//! Client for the locally running replication daemon.
//!
//! The daemon owns the gossip transport, feed signing, and chain
//! verification; this module only speaks its local HTTP surface:
//!
//! - `GET  /whoami` — connection handshake, returns `{"id": "@...=.ed25519"}`
//! - `POST /feed` — append `{"content": <object|string>}` to our own feed
//! - `GET  /feed?author=<id>&gt=<seq>` — ndjson stream of entries, ascending
//! - `POST /blobs` — store raw bytes under their content address
//! - `GET  /blobs/has?ref=<blobref>` — 200 once the blob is retrievable
//!
//! Private messages are sealed *before* they reach the daemon: if a message
//! carries `recps`, [`PeerClient::publish`] boxes the JSON for every listed
//! recipient plus self and posts only the ciphertext string.

use std::pin::Pin;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::boxing::{self, BoxError};
use crate::config::{BlobsConfig, Config};
use crate::keystore::{self, Identity};
use crate::models::{FeedEntry, Message};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("replication daemon unreachable at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("transport failure: {0}")]
    Http(#[from] reqwest::Error),
    #[error("daemon returned {status}: {body}")]
    Daemon { status: u16, body: String },
    #[error("failed to decode daemon response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid recipient key '{id}': {reason}")]
    BadRecipient { id: String, reason: String },
    #[error(transparent)]
    Box(#[from] BoxError),
    #[error("blob {blob_ref} not retrievable after {attempts} attempts")]
    BlobTimeout { blob_ref: String, attempts: u32 },
}

/// Content address of a byte string: `&<base64(sha256)>.sha256`.
pub fn blob_ref(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("&{}.sha256", BASE64.encode(digest))
}

/// A connected client. The underlying connection pool is released on drop,
/// which covers every exit path of the one-shot commands.
#[derive(Debug)]
pub struct PeerClient {
    http: reqwest::Client,
    base_url: String,
    blobs: BlobsConfig,
}

#[derive(serde::Deserialize)]
struct WhoamiResponse {
    id: String,
}

impl PeerClient {
    /// Open a connection to the daemon and perform the `/whoami` handshake.
    ///
    /// Fails fast with [`PeerError::Connect`] when the daemon is not
    /// reachable within `peer.connect_timeout_secs`; there is no backoff.
    pub async fn connect(config: &Config) -> Result<PeerClient, PeerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.peer.connect_timeout_secs))
            .timeout(Duration::from_secs(config.peer.request_timeout_secs))
            .build()?;

        let client = PeerClient {
            http,
            base_url: config.peer.base_url.trim_end_matches('/').to_string(),
            blobs: config.blobs.clone(),
        };

        match client.whoami().await {
            Ok(id) => {
                debug!(daemon_id = %id, "connected to replication daemon");
                Ok(client)
            }
            Err(PeerError::Http(source)) => Err(PeerError::Connect {
                url: client.base_url.clone(),
                source,
            }),
            Err(other) => Err(other),
        }
    }

    /// The daemon's own feed id.
    pub async fn whoami(&self) -> Result<String, PeerError> {
        let resp = self
            .http
            .get(format!("{}/whoami", self.base_url))
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.json::<WhoamiResponse>().await?.id)
    }

    /// Append one entry to the local identity's feed.
    ///
    /// Cleartext for public messages; for private messages the content is
    /// sealed for all listed recipients plus `identity` before it crosses
    /// the process boundary.
    pub async fn publish(
        &self,
        identity: &Identity,
        message: &Message,
    ) -> Result<FeedEntry, PeerError> {
        let body = match &message.recps {
            Some(recps) => {
                let mut keys = Vec::with_capacity(recps.len() + 1);
                for id in recps {
                    let key =
                        keystore::parse_feed_id(id).map_err(|e| PeerError::BadRecipient {
                            id: id.clone(),
                            reason: e.to_string(),
                        })?;
                    keys.push(key);
                }
                let own = identity.verifying_key();
                if !keys.contains(&own) {
                    keys.push(own);
                }
                let plain = serde_json::to_vec(message)?;
                let boxed = boxing::seal(&plain, &keys)?;
                debug!(recipients = keys.len(), "sealed private message");
                serde_json::json!({ "content": boxed })
            }
            None => serde_json::json!({ "content": message }),
        };

        let resp = self
            .http
            .post(format!("{}/feed", self.base_url))
            .json(&body)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.json::<FeedEntry>().await?)
    }

    /// Begin an incremental scan of `author`'s feed, entries with sequence
    /// strictly greater than `gt`, in ascending order.
    ///
    /// Entries are decoded line by line as they arrive; dropping the stream
    /// terminates the scan early without draining the rest of the feed.
    pub async fn read_feed(&self, author: &str, gt: i64) -> Result<FeedStream, PeerError> {
        let resp = self
            .http
            .get(format!("{}/feed", self.base_url))
            .query(&[("author", author)])
            .query(&[("gt", gt)])
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(FeedStream {
            stream: Box::pin(resp.bytes_stream().map(|r| r.map(|b| b.to_vec()))),
            buffer: Vec::new(),
            done: false,
        })
    }

    /// Store `bytes` in the daemon's blob store; returns the content address.
    ///
    /// The write is asynchronous relative to the upload: the returned ref is
    /// only valid once [`PeerClient::wait_for_blob`] confirms it.
    pub async fn blob_add(&self, bytes: Vec<u8>) -> Result<String, PeerError> {
        let blob_ref = blob_ref(&bytes);
        let resp = self
            .http
            .post(format!("{}/blobs", self.base_url))
            .body(bytes)
            .send()
            .await?;
        check(resp).await?;
        debug!(%blob_ref, "uploaded blob");
        Ok(blob_ref)
    }

    /// Whether the blob is retrievable from the store right now.
    pub async fn blob_has(&self, blob_ref: &str) -> Result<bool, PeerError> {
        let resp = self
            .http
            .get(format!("{}/blobs/has", self.base_url))
            .query(&[("ref", blob_ref)])
            .send()
            .await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(PeerError::Daemon {
                status,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Poll until the blob is retrievable, bounded by
    /// `blobs.poll_max_attempts` at `blobs.poll_interval_ms` intervals.
    pub async fn wait_for_blob(&self, blob_ref: &str) -> Result<(), PeerError> {
        let interval = Duration::from_millis(self.blobs.poll_interval_ms);
        for attempt in 1..=self.blobs.poll_max_attempts {
            if self.blob_has(blob_ref).await? {
                debug!(%blob_ref, attempt, "blob confirmed retrievable");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        Err(PeerError::BlobTimeout {
            blob_ref: blob_ref.to_string(),
            attempts: self.blobs.poll_max_attempts,
        })
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PeerError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(PeerError::Daemon {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }
}

/// Lazily decoded ndjson feed scan. See [`PeerClient::read_feed`].
pub struct FeedStream {
    stream: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    done: bool,
}

impl FeedStream {
    /// Next entry in ascending sequence order, or `None` at end of feed.
    pub async fn next_entry(&mut self) -> Result<Option<FeedEntry>, PeerError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if let Some(entry) = parse_line(&line)? {
                    return Ok(Some(entry));
                }
                continue;
            }

            if self.done {
                let rest = std::mem::take(&mut self.buffer);
                return parse_line(&rest);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(PeerError::Http(e)),
                None => self.done = true,
            }
        }
    }
}

fn parse_line(line: &[u8]) -> Result<Option<FeedEntry>, PeerError> {
    let text = std::str::from_utf8(line).unwrap_or("").trim();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str::<FeedEntry>(text)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ref_matches_known_sha256_vector() {
        // sha256 of the empty string
        assert_eq!(
            blob_ref(b""),
            "&47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=.sha256"
        );
    }

    #[test]
    fn blob_ref_is_content_addressed() {
        assert_eq!(blob_ref(b"abc"), blob_ref(b"abc"));
        assert_ne!(blob_ref(b"abc"), blob_ref(b"abd"));
        assert!(blob_ref(b"abc").starts_with('&'));
        assert!(blob_ref(b"abc").ends_with(".sha256"));
    }

    #[test]
    fn parse_line_skips_blank_lines() {
        assert!(parse_line(b"\n").unwrap().is_none());
        assert!(parse_line(b"   ").unwrap().is_none());
        assert!(parse_line(b"").unwrap().is_none());
    }

    #[test]
    fn parse_line_decodes_entries() {
        let json = r#"{"key":"%k1","value":{"author":"@a.ed25519","sequence":3,"previous":"%k0","timestamp":1700000000000,"content":"abc.box"}}"#;
        let entry = parse_line(json.as_bytes()).unwrap().unwrap();
        assert_eq!(entry.key, "%k1");
        assert_eq!(entry.value.sequence, 3);
    }
}
