//! # notefeed
//!
//! Peer-replicated note synchronization over a selectively-encrypted
//! append-only log.
//!
//! UI clients hand notes to the `nfd` binary; this crate deterministically
//! encodes them into log entries, delivers them in cleartext (public) or
//! boxed for a named recipient set (private), replicates embedded media as
//! content-addressed blobs, and recovers notes from remote peers' feeds via
//! incremental, checkpointed scanning.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────────┐
//! │   Note   │──▶│  encoder   │──▶│ peer connector │──▶ replication daemon
//! │  (JSON)  │   │ + boxing  │   │ (HTTP, local) │      (gossip, opaque)
//! └──────────┘   └───────────┘   └──────┬────────┘
//!                                       │
//!                  ┌────────────────────┤
//!                  ▼                    ▼
//!            ┌──────────┐        ┌──────────┐
//!            │   tail   │        │  blobs   │
//!            │ (scan)   │        │ (ingest) │
//!            └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Notes, wire messages, feed entries |
//! | [`keystore`] | Local identity keypair |
//! | [`boxing`] | Multi-recipient seal/open |
//! | [`encode`] | Note → log-entry payload |
//! | [`peer`] | Replication-daemon client, blob store, feed scan |
//! | [`ingest`] | HTML snapshot → markdown with blobbed images |
//! | [`publish`] | One-shot note publisher |
//! | [`tail`] | One-shot feed scanner |
//! | [`whoami`] | Identity printer |

pub mod boxing;
pub mod config;
pub mod encode;
pub mod ingest;
pub mod keystore;
pub mod models;
pub mod peer;
pub mod publish;
pub mod tail;
pub mod whoami;
