/// Credential vault: AES-256-CBC encryption of credential payloads at rest
///
/// Stored format is `hex(iv) + ":" + hex(ciphertext)` with a fresh random 16-byte
/// IV per call, so two encryptions of the same payload never produce the same blob.
/// The key is injected at construction and is never serialized.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the CBC initialization vector in bytes
pub const IV_SIZE: usize = 16;

/// Errors raised by the vault
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("invalid encryption key: expected 32 raw bytes or 64 hex characters")]
    InvalidKey,
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,
    #[error("decrypted payload is not a JSON object")]
    NotAnObject,
    #[error("failed to serialize credential payload: {0}")]
    Serialize(String),
}

/// Process-wide symmetric key
#[derive(Clone)]
pub struct VaultKey([u8; KEY_SIZE]);

impl VaultKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a configured key: 64 hex characters, or exactly 32 raw bytes
    ///
    /// Raw keys are taken byte for byte, surrounding whitespace included.
    pub fn parse(raw: &str) -> Result<Self, VaultError> {
        let bytes = if raw.len() == KEY_SIZE * 2 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(raw).map_err(|_| VaultError::InvalidKey)?
        } else {
            raw.as_bytes().to_vec()
        };
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| VaultError::InvalidKey)?;
        Ok(Self(key))
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

/// Decrypted credential fields
///
/// Lives only for the duration of a request build. `Debug` never prints values.
pub struct SecretFields(Map<String, Value>);

impl SecretFields {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

}

impl fmt::Debug for SecretFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretFields")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Encrypts and decrypts credential payloads with a single injected key
#[derive(Debug, Clone)]
pub struct CredentialVault {
    key: VaultKey,
}

impl CredentialVault {
    pub fn new(key: VaultKey) -> Self {
        Self { key }
    }

    /// Encrypt a plain mapping into `<ivHex>:<ciphertextHex>`
    pub fn encrypt(&self, plain: &Map<String, Value>) -> Result<String, VaultError> {
        let json = serde_json::to_vec(plain).map_err(|e| VaultError::Serialize(e.to_string()))?;
        let iv: [u8; IV_SIZE] = rand::random();

        let cipher = Aes256CbcEnc::new_from_slices(&self.key.0, &iv).map_err(|_| VaultError::InvalidKey)?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&json);

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    /// Decrypt a blob produced by [`CredentialVault::encrypt`]
    ///
    /// Fails on a missing separator, bad hex, wrong IV length, wrong key or a
    /// payload that is not a JSON object. Never returns a partial mapping.
    pub fn decrypt(&self, blob: &str) -> Result<SecretFields, VaultError> {
        let (iv_hex, ciphertext_hex) = blob
            .split_once(':')
            .ok_or_else(|| VaultError::Malformed("missing ':' separator".to_string()))?;

        let iv = hex::decode(iv_hex).map_err(|e| VaultError::Malformed(format!("iv: {e}")))?;
        if iv.len() != IV_SIZE {
            return Err(VaultError::Malformed(format!(
                "iv must be {IV_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext =
            hex::decode(ciphertext_hex).map_err(|e| VaultError::Malformed(format!("ciphertext: {e}")))?;
        if ciphertext.is_empty() {
            return Err(VaultError::Malformed("empty ciphertext".to_string()));
        }

        let cipher = Aes256CbcDec::new_from_slices(&self.key.0, &iv).map_err(|_| VaultError::InvalidKey)?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)?;

        match serde_json::from_slice::<Value>(&plaintext) {
            Ok(Value::Object(map)) => Ok(SecretFields(map)),
            Ok(_) => Err(VaultError::NotAnObject),
            Err(_) => Err(VaultError::DecryptionFailed),
        }
    }
}
