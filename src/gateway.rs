//! Encryption gateway: per-client session keys, the built-in x25519/HKDF
//! key agreement, and the AES-256-GCM outbound transform.
//!
//! Key derivation: HKDF-SHA256(salt, x25519 shared secret, info) -> 256-bit key
//! Frame encryption: AES-256-GCM with random 12-byte nonce
//! Wire format: nonce (12 bytes) || ciphertext (includes GCM tag), hex-encoded

use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use dashmap::DashMap;
use futures_util::FutureExt;
use hkdf::Hkdf;
use rand::Rng;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::Error;
use crate::hooks::{HandshakeFn, HandshakeOutcome, HookError, TransformFn};
use crate::ws::Frame;

/// Salt for HKDF session-key derivation (domain separation)
const HKDF_SALT: &[u8] = b"hivewire-session-key-v1";

/// Info string for HKDF session-key derivation (purpose binding)
const HKDF_INFO: &[u8] = b"hivewire-client-transport";

/// Event name carrying an encrypted payload to the client.
pub const ENCRYPTED_EVENT: &str = "#encrypted";

/// Events that must remain inspectable by clients that have not (or not
/// yet) established a key; the transform declines these.
const INSPECTABLE_EVENTS: &[&str] = &["error", "unauthenticated"];

/// Session-key store. One key per encrypted client, destroyed on disconnect.
#[derive(Debug, Clone)]
pub struct EncryptionGateway {
    keys: Arc<DashMap<String, [u8; 32]>>,
}

impl EncryptionGateway {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
        }
    }

    pub fn install_key(&self, client_id: &str, key: [u8; 32]) {
        self.keys.insert(client_id.to_string(), key);
    }

    pub fn remove_key(&self, client_id: &str) {
        self.keys.remove(client_id);
    }

    pub fn has_key(&self, client_id: &str) -> bool {
        self.keys.contains_key(client_id)
    }

    fn key_of(&self, client_id: &str) -> Option<[u8; 32]> {
        self.keys.get(client_id).map(|k| *k)
    }

    /// A [`HandshakeFn`] backed by [`x25519_handshake`], for hosts that
    /// do not bring their own exchange scheme.
    pub fn x25519_hook() -> HandshakeFn {
        Arc::new(|_client_id, _user_id, payload| {
            async move { x25519_handshake(&payload) }.boxed()
        })
    }

    /// A [`TransformFn`] that AES-256-GCM-encrypts outbound frames for
    /// clients holding a session key. Declines (send unmodified) for
    /// inspectable system frames and for clients without a key yet.
    pub fn transform_hook(&self) -> TransformFn {
        let gateway = self.clone();
        Arc::new(move |client, frame| {
            let gateway = gateway.clone();
            async move {
                if INSPECTABLE_EVENTS.contains(&frame.event.as_str()) {
                    return Ok(None);
                }
                match gateway.key_of(&client.id) {
                    Some(key) => Ok(Some(encrypt_frame(&key, &frame))),
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }
}

impl Default for EncryptionGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in key agreement. The client's `authenticate` (or `encrypt`)
/// payload carries `public_key`: its hex-encoded 32-byte x25519 public key.
/// Returns the server's public key as the reply material and the derived
/// session key, or `Ok(None)` when the material is absent.
pub fn x25519_handshake(payload: &Value) -> Result<Option<HandshakeOutcome>, HookError> {
    let Some(material) = payload.get("public_key").and_then(Value::as_str) else {
        return Ok(None);
    };

    let bytes = hex::decode(material)
        .map_err(|e| Error::KeyMaterial(format!("bad public key hex: {e}")))?;
    let client_public: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::KeyMaterial("public key must be 32 bytes".to_string()))?;

    // Build the ephemeral secret from raw random bytes
    // (avoids rand_core version conflict with x25519-dalek's own RNG bound).
    let secret_bytes: [u8; 32] = rand::rng().random();
    let secret = x25519_dalek::StaticSecret::from(secret_bytes);
    let server_public = x25519_dalek::PublicKey::from(&secret);

    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(client_public));

    Ok(Some(HandshakeOutcome {
        reply: json!({ "public_key": hex::encode(server_public.as_bytes()) }),
        session_key: derive_session_key(shared.as_bytes()),
    }))
}

/// Expand a raw x25519 shared secret into a 256-bit session key.
pub fn derive_session_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("HKDF expand should not fail for 32-byte output");
    okm
}

/// Encrypt a frame under a session key. The entire serialized frame is the
/// plaintext, so the original event name is not visible on the wire.
pub fn encrypt_frame(key: &[u8; 32], frame: &Frame) -> Frame {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce_bytes: [u8; 12] = rand::rng().random();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = serde_json::to_vec(frame).unwrap_or_default();
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .expect("AES-256-GCM encryption should not fail");

    let mut payload = Vec::with_capacity(12 + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);

    Frame::new(ENCRYPTED_EVENT, json!({ "payload": hex::encode(payload) }))
}

/// Decrypt a frame produced by [`encrypt_frame`]. Returns None for frames
/// that are not well-formed ciphertext under this key.
pub fn decrypt_frame(key: &[u8; 32], frame: &Frame) -> Option<Frame> {
    if frame.event != ENCRYPTED_EVENT {
        return None;
    }
    let payload = hex::decode(frame.data.get("payload")?.as_str()?).ok()?;
    if payload.len() < 12 {
        return None;
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let (nonce_bytes, ciphertext) = payload.split_at(12);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .ok()?;

    serde_json::from_slice(&plaintext).ok()
}
