//! Local identity keypair: loaded once per run, created on first use.
//!
//! The secret file is commented JSON in the shape peers' tooling expects:
//! `#`-prefixed warning lines around a `{curve, public, private, id}` object,
//! where `private` is the 64-byte keypair (seed ‖ public key) in base64.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

const KEY_SUFFIX: &str = ".ed25519";

/// The local identity: an ed25519 keypair plus its derived feed id.
///
/// Immutable for the process lifetime.
pub struct Identity {
    signing: SigningKey,
    id: String,
}

impl Identity {
    /// Feed id string, `@<base64 public key>.ed25519`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

#[derive(Serialize, Deserialize)]
struct SecretFile {
    curve: String,
    public: String,
    private: String,
    id: String,
}

/// Render a verifying key as a feed id.
pub fn feed_id(key: &VerifyingKey) -> String {
    format!("@{}{}", BASE64.encode(key.as_bytes()), KEY_SUFFIX)
}

/// Parse a feed id (`@...=.ed25519`) back into a verifying key.
pub fn parse_feed_id(id: &str) -> Result<VerifyingKey> {
    let body = id
        .strip_prefix('@')
        .and_then(|s| s.strip_suffix(KEY_SUFFIX))
        .with_context(|| format!("Malformed feed id: '{}'", id))?;
    let bytes = BASE64
        .decode(body)
        .with_context(|| format!("Feed id is not valid base64: '{}'", id))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Feed id public key must be 32 bytes: '{}'", id))?;
    VerifyingKey::from_bytes(&arr).with_context(|| format!("Invalid ed25519 key in '{}'", id))
}

/// Load the identity from `path`, generating and persisting a fresh keypair
/// if the file does not exist. Filesystem errors are fatal; identity loading
/// is a precondition, not a recoverable step.
pub fn load_or_create(path: &Path) -> Result<Identity> {
    if path.exists() {
        load(path)
    } else {
        create(path)
    }
}

fn load(path: &Path) -> Result<Identity> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read identity file: {}", path.display()))?;
    // ssb-keys convention: comment lines start with '#'
    let json: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    let file: SecretFile = serde_json::from_str(&json)
        .with_context(|| format!("Malformed identity file: {}", path.display()))?;

    if file.curve != "ed25519" {
        bail!(
            "Unsupported identity curve '{}' in {}",
            file.curve,
            path.display()
        );
    }

    let private_b64 = file
        .private
        .strip_suffix(KEY_SUFFIX)
        .unwrap_or(&file.private);
    let keypair = BASE64
        .decode(private_b64)
        .with_context(|| "Identity private key is not valid base64")?;
    if keypair.len() != 64 {
        bail!(
            "Identity private key must be 64 bytes (seed + public), got {}",
            keypair.len()
        );
    }
    let seed: [u8; 32] = keypair[..32].try_into().expect("length checked above");
    let signing = SigningKey::from_bytes(&seed);
    let id = feed_id(&signing.verifying_key());

    if file.id != id {
        bail!(
            "Identity file {} is inconsistent: stored id {} does not match key {}",
            path.display(),
            file.id,
            id
        );
    }

    Ok(Identity { signing, id })
}

fn create(path: &Path) -> Result<Identity> {
    let signing = SigningKey::generate(&mut OsRng);
    let public_b64 = BASE64.encode(signing.verifying_key().as_bytes());
    let id = feed_id(&signing.verifying_key());

    let file = SecretFile {
        curve: "ed25519".to_string(),
        public: format!("{}{}", public_b64, KEY_SUFFIX),
        private: format!("{}{}", BASE64.encode(signing.to_keypair_bytes()), KEY_SUFFIX),
        id: id.clone(),
    };

    let body = serde_json::to_string_pretty(&file)?;
    let content = format!(
        "# WARNING: this is your SECRET identity file.\n\
         # Anyone with this file can read your private notes and publish as you.\n\
         # Keep it safe and never share it.\n\
         {}\n",
        body
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write identity file: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }

    Ok(Identity { signing, id })
}
