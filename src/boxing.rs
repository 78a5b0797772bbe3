//! Multi-recipient asymmetric boxing for private log entries.
//!
//! A sealed message can be opened by any one of up to [`MAX_RECIPIENTS`]
//! named recipients. Layout of the binary blob (rendered as `base64.box`):
//!
//! ```text
//! nonce(24) ‖ ephemeral x25519 pk(32) ‖ header(49) × recipients ‖ body
//! ```
//!
//! Each header slot is an XChaCha20-Poly1305 seal of
//! `recipient_count(1) ‖ body_key(32)` under a key derived (HKDF-SHA256,
//! salted by the nonce) from the X25519 shared secret between the ephemeral
//! key and that recipient. The body is the message JSON sealed under the
//! random body key. Recipients are not listed in the ciphertext; opening is
//! trial decryption of the header slots, and failure only means the message
//! was not addressed to us.
//!
//! Identity keys are ed25519; they are mapped to x25519 via the Montgomery
//! form of the public key and the expanded secret scalar.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::hazmat::ExpandedSecretKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Upper bound on recipients per sealed message; the one-byte count in each
/// header slot also tells an opener where the body starts.
pub const MAX_RECIPIENTS: usize = 7;

const NONCE_LEN: usize = 24;
const PK_LEN: usize = 32;
/// count(1) + body_key(32) + poly1305 tag(16)
const HEADER_LEN: usize = 49;
const TAG_LEN: usize = 16;
const BOX_SUFFIX: &str = ".box";
const HKDF_INFO: &[u8] = b"notefeed-box-v1";

#[derive(Debug, Error)]
pub enum BoxError {
    #[error("cannot seal for an empty recipient set")]
    NoRecipients,
    #[error("too many recipients: {0} (max {MAX_RECIPIENTS})")]
    TooManyRecipients(usize),
    #[error("crypto failure: {0}")]
    Crypto(String),
}

/// Seal `plaintext` so that each of `recipients` can open it.
pub fn seal(plaintext: &[u8], recipients: &[VerifyingKey]) -> Result<String, BoxError> {
    if recipients.is_empty() {
        return Err(BoxError::NoRecipients);
    }
    if recipients.len() > MAX_RECIPIENTS {
        return Err(BoxError::TooManyRecipients(recipients.len()));
    }

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let mut ephemeral = [0u8; 32];
    OsRng.fill_bytes(&mut ephemeral);
    let mut body_key = [0u8; 32];
    OsRng.fill_bytes(&mut body_key);

    let ephemeral_pk = MontgomeryPoint::mul_base_clamped(ephemeral);

    let mut header_plain = [0u8; 33];
    header_plain[0] = recipients.len() as u8;
    header_plain[1..].copy_from_slice(&body_key);

    let mut out = Vec::with_capacity(
        NONCE_LEN + PK_LEN + recipients.len() * HEADER_LEN + plaintext.len() + TAG_LEN,
    );
    out.extend_from_slice(&nonce);
    out.extend_from_slice(ephemeral_pk.as_bytes());

    for recipient in recipients {
        let shared = recipient.to_montgomery().mul_clamped(ephemeral);
        let mut slot_key = derive_key(shared.as_bytes(), &nonce);
        let aead = XChaCha20Poly1305::new(Key::from_slice(&slot_key));
        let slot = aead
            .encrypt(XNonce::from_slice(&nonce), &header_plain[..])
            .map_err(|e| BoxError::Crypto(format!("header seal failed: {:?}", e)))?;
        slot_key.zeroize();
        out.extend_from_slice(&slot);
    }

    let body_aead = XChaCha20Poly1305::new(Key::from_slice(&body_key));
    let body = body_aead
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| BoxError::Crypto(format!("body seal failed: {:?}", e)))?;
    out.extend_from_slice(&body);

    ephemeral.zeroize();
    body_key.zeroize();
    header_plain.zeroize();

    Ok(format!("{}{}", BASE64.encode(out), BOX_SUFFIX))
}

/// Attempt to open a sealed message with our secret key.
///
/// `None` means the ciphertext was not addressed to this identity (or is not
/// a well-formed box at all) — expected for most foreign entries and never
/// surfaced as an error.
pub fn open(boxed: &str, signing: &SigningKey) -> Option<Vec<u8>> {
    let b64 = boxed.strip_suffix(BOX_SUFFIX)?;
    let blob = BASE64.decode(b64).ok()?;
    if blob.len() < NONCE_LEN + PK_LEN + HEADER_LEN + TAG_LEN {
        return None;
    }

    let nonce: [u8; NONCE_LEN] = blob[..NONCE_LEN].try_into().ok()?;
    let ephemeral_pk = MontgomeryPoint(blob[NONCE_LEN..NONCE_LEN + PK_LEN].try_into().ok()?);

    let scalar = ExpandedSecretKey::from(&signing.to_bytes()).scalar;
    let shared = ephemeral_pk * scalar;
    let mut slot_key = derive_key(shared.as_bytes(), &nonce);
    let slot_aead = XChaCha20Poly1305::new(Key::from_slice(&slot_key));
    slot_key.zeroize();

    let headers = &blob[NONCE_LEN + PK_LEN..];
    let max_slots = MAX_RECIPIENTS.min(headers.len() / HEADER_LEN);

    for i in 0..max_slots {
        let slot = &headers[i * HEADER_LEN..(i + 1) * HEADER_LEN];
        let Ok(mut header_plain) = slot_aead.decrypt(XNonce::from_slice(&nonce), slot) else {
            continue;
        };
        if header_plain.len() != 33 {
            continue;
        }
        let count = header_plain[0] as usize;
        if count == 0 || count > MAX_RECIPIENTS || i >= count {
            continue;
        }
        let body_off = NONCE_LEN + PK_LEN + count * HEADER_LEN;
        if body_off + TAG_LEN > blob.len() {
            continue;
        }
        let body_aead = XChaCha20Poly1305::new(Key::from_slice(&header_plain[1..33]));
        let plain = body_aead
            .decrypt(XNonce::from_slice(&nonce), &blob[body_off..])
            .ok();
        header_plain.zeroize();
        if plain.is_some() {
            return plain;
        }
    }

    None
}

fn derive_key(shared: &[u8], nonce: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(nonce), shared);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}
