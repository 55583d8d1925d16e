// =============================================================================
// Envelope Encryption — PBKDF2-derived AES-256-GCM
// =============================================================================
//
// Encrypts UTF-8 JSON with a passphrase into a compact binary envelope safe
// for opaque storage on the sync service:
//
//   bytes  0..15   salt (16, random per encryption)
//   bytes 16..27   iv   (12, random per operation)
//   bytes 28..     ciphertext || tag (AES-GCM output, tag = last 16 bytes)
//
// The envelope travels base64-encoded. The passphrase is never persisted;
// the optional "remember key" flow stores only [`MasterKey`] material (salt +
// derived key), which decrypts exactly the envelopes produced under that
// salt.
// =============================================================================

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
/// GCM IV length in bytes.
pub const IV_LEN: usize = 12;
/// Minimum envelope length: salt + iv (an empty ciphertext still carries the
/// 16-byte tag, but the malformed check is on the fixed prefix).
pub const MIN_ENVELOPE_LEN: usize = SALT_LEN + IV_LEN;
/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Failure modes of [`decrypt`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Auth tag verification failed — wrong passphrase or tampered data.
    #[error("WRONG_KEY: authentication tag mismatch")]
    WrongKey,
    /// Envelope shorter than the fixed prefix, not valid base64, or the
    /// plaintext was not UTF-8.
    #[error("MALFORMED: {0}")]
    Malformed(&'static str),
}

/// Derived key material for the "remember key" flow. Persisting this (hex)
/// instead of the passphrase keeps the passphrase off disk while letting the
/// client reopen envelopes produced under the same salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKey {
    pub salt: [u8; SALT_LEN],
    pub key: [u8; 32],
}

impl MasterKey {
    /// Derive a fresh master key (random salt) from `passphrase`.
    pub fn derive(passphrase: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            key: derive_key(passphrase, &salt),
            salt,
        }
    }

    /// Re-derive the key for an existing `salt` (e.g. the salt of a received
    /// envelope).
    pub fn derive_with_salt(passphrase: &str, salt: [u8; SALT_LEN]) -> Self {
        Self {
            key: derive_key(passphrase, &salt),
            salt,
        }
    }

    /// Hex encoding of `salt || key` for storage under `sync_master_key`.
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(SALT_LEN + 32);
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.key);
        hex::encode(bytes)
    }

    /// Parse the hex form produced by [`MasterKey::to_hex`].
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != SALT_LEN + 32 {
            return None;
        }
        let mut salt = [0u8; SALT_LEN];
        let mut key = [0u8; 32];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        key.copy_from_slice(&bytes[SALT_LEN..]);
        Some(Self { salt, key })
    }
}

/// PBKDF2-HMAC-SHA256 key derivation.
fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

// =============================================================================
// Passphrase API
// =============================================================================

/// Encrypt `plaintext` under `passphrase` with a fresh random salt and IV.
/// Returns the base64-encoded envelope.
pub fn encrypt(plaintext: &str, passphrase: &str) -> String {
    let master = MasterKey::derive(passphrase);
    encrypt_with_master(plaintext, &master)
}

/// Decrypt a base64 envelope with `passphrase`. The key is re-derived from
/// the envelope's embedded salt.
pub fn decrypt(envelope: &str, passphrase: &str) -> Result<String, CryptoError> {
    let raw = decode_envelope(envelope)?;
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&raw[..SALT_LEN]);
    let master = MasterKey::derive_with_salt(passphrase, salt);
    open_raw(&raw, &master)
}

// =============================================================================
// Remembered-key API
// =============================================================================

/// Encrypt under a remembered [`MasterKey`]. The envelope carries the master
/// key's salt; the IV is fresh per operation.
pub fn encrypt_with_master(plaintext: &str, master: &MasterKey) -> String {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master.key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .expect("AES-GCM encryption is infallible for in-memory buffers");

    let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    out.extend_from_slice(&master.salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    BASE64.encode(out)
}

/// Decrypt under a remembered [`MasterKey`]. An envelope produced under a
/// different salt fails tag verification and surfaces as [`CryptoError::WrongKey`]
/// — the caller should then ask for the passphrase.
pub fn decrypt_with_master(envelope: &str, master: &MasterKey) -> Result<String, CryptoError> {
    let raw = decode_envelope(envelope)?;
    open_raw(&raw, master)
}

// =============================================================================
// Internals
// =============================================================================

fn decode_envelope(envelope: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = BASE64
        .decode(envelope.trim())
        .map_err(|_| CryptoError::Malformed("not base64"))?;
    if raw.len() < MIN_ENVELOPE_LEN {
        return Err(CryptoError::Malformed("envelope shorter than salt + iv"));
    }
    Ok(raw)
}

fn open_raw(raw: &[u8], master: &MasterKey) -> Result<String, CryptoError> {
    let iv = &raw[SALT_LEN..SALT_LEN + IV_LEN];
    let ciphertext = &raw[SALT_LEN + IV_LEN..];

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master.key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::WrongKey)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed("plaintext is not UTF-8"))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_passphrase() {
        let plaintext = r#"{"version":2,"platforms":{}}"#;
        let envelope = encrypt(plaintext, "correct horse");
        assert_eq!(decrypt(&envelope, "correct horse").unwrap(), plaintext);
    }

    #[test]
    fn wrong_passphrase_is_wrong_key() {
        let envelope = encrypt("secret", "alpha");
        assert_eq!(decrypt(&envelope, "beta"), Err(CryptoError::WrongKey));
    }

    #[test]
    fn salts_and_ivs_are_fresh_per_encryption() {
        let a = encrypt("same payload", "pass");
        let b = encrypt("same payload", "pass");
        assert_ne!(a, b);
    }

    #[test]
    fn short_envelope_is_malformed() {
        let short = BASE64.encode([0u8; 10]);
        assert!(matches!(
            decrypt(&short, "pass"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn non_base64_is_malformed() {
        assert!(matches!(
            decrypt("!!! not base64 !!!", "pass"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn master_key_roundtrip_and_hex() {
        let master = MasterKey::derive("pass");
        let envelope = encrypt_with_master("payload", &master);
        assert_eq!(decrypt_with_master(&envelope, &master).unwrap(), "payload");

        let restored = MasterKey::from_hex(&master.to_hex()).unwrap();
        assert_eq!(restored, master);
        assert_eq!(decrypt_with_master(&envelope, &restored).unwrap(), "payload");
    }

    #[test]
    fn master_key_from_other_salt_fails_closed() {
        let master_a = MasterKey::derive("pass");
        let master_b = MasterKey::derive("pass");
        let envelope = encrypt_with_master("payload", &master_a);
        // Same passphrase, different salt — remembered material cannot open it.
        assert_eq!(
            decrypt_with_master(&envelope, &master_b),
            Err(CryptoError::WrongKey)
        );
    }

    #[test]
    fn passphrase_decrypts_master_encrypted_envelope() {
        let master = MasterKey::derive("pass");
        let envelope = encrypt_with_master("payload", &master);
        // The envelope carries the salt, so the passphrase path re-derives it.
        assert_eq!(decrypt(&envelope, "pass").unwrap(), "payload");
    }
}
