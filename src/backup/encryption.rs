//! Encryption layer: chunked AES-256-GCM envelopes keyed by a recipient key
//!
//! Payloads are sealed with the STREAM construction in 64 KiB chunks, so
//! neither direction holds more than two chunks in memory. Envelope layout:
//!
//! ```text
//! version (1 byte) || nonce prefix (7 bytes) || frame* || last frame
//! frame = ciphertext of one 64 KiB chunk + tag (16 bytes)
//! ```
//!
//! The final frame is sealed with the "last" flag, so truncating an envelope at
//! a frame boundary fails decryption.

use super::errors::{BackupError, BackupResult};
use super::models::{ArtifactType, EncryptionMode};
use aes_gcm::{
    aead::{
        generic_array::GenericArray,
        stream::{DecryptorBE32, EncryptorBE32},
        KeyInit,
    },
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const ENVELOPE_VERSION: u8 = 1;
const PREFIX_LEN: usize = 7;
const HEADER_LEN: usize = 1 + PREFIX_LEN;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Plaintext bytes per frame
pub const CHUNK_LEN: usize = 64 * 1024;

/// Errors from the encryption primitive
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid recipient key: {0}")]
    InvalidKey(String),

    #[error("envelope is truncated ({0} bytes)")]
    Truncated(usize),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed: wrong key or tampered ciphertext")]
    DecryptFailed,

    #[error("envelope I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl From<CryptoError> for BackupError {
    fn from(err: CryptoError) -> Self {
        BackupError::encryption(err.to_string())
    }
}

/// 256-bit recipient key, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecipientKey {
    bytes: [u8; KEY_LEN],
}

impl RecipientKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Parse a key encoded as 64 hex characters or standard base64
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let encoded = encoded.trim();
        let decoded = Zeroizing::new(if encoded.len() == KEY_LEN * 2 {
            hex::decode(encoded).map_err(|e| CryptoError::InvalidKey(format!("bad hex: {}", e)))?
        } else {
            BASE64
                .decode(encoded)
                .map_err(|e| CryptoError::InvalidKey(format!("bad base64: {}", e)))?
        });

        if decoded.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                decoded.len()
            )));
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }

    /// Read and parse a key file
    pub fn from_file(path: &Path) -> Result<Self, CryptoError> {
        let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            CryptoError::InvalidKey(format!("cannot read {}: {}", path.display(), e))
        })?);
        Self::parse(&content)
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Hex encoding of the key, for writing key files
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes))
    }

    /// Short non-secret identifier for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..4])
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipientKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Fixed-size envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub version: u8,
    pub nonce_prefix: [u8; PREFIX_LEN],
}

impl EnvelopeHeader {
    fn random() -> Self {
        let mut nonce_prefix = [0u8; PREFIX_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_prefix);
        Self {
            version: ENVELOPE_VERSION,
            nonce_prefix,
        }
    }

    /// Parse the leading bytes of an envelope
    pub fn parse(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < HEADER_LEN {
            return Err(CryptoError::Truncated(data.len()));
        }
        if data[0] != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(data[0]));
        }
        let mut nonce_prefix = [0u8; PREFIX_LEN];
        nonce_prefix.copy_from_slice(&data[1..HEADER_LEN]);
        Ok(Self {
            version: data[0],
            nonce_prefix,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1..].copy_from_slice(&self.nonce_prefix);
        out
    }
}

/// Pluggable encryption primitive
///
/// Both directions stream from `input` into `sink` and return the number of
/// bytes written. On error the sink holds partial output; callers write into a
/// temporary sink and discard it unless the call succeeds.
pub trait EncryptionProvider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext` for `key` into `sink`
    fn encrypt(
        &self,
        plaintext: &mut dyn Read,
        sink: &mut dyn Write,
        key: &RecipientKey,
    ) -> Result<u64, CryptoError>;

    /// Decrypt an envelope produced by [`EncryptionProvider::encrypt`]
    fn decrypt(
        &self,
        envelope: &mut dyn Read,
        sink: &mut dyn Write,
        key: &RecipientKey,
    ) -> Result<u64, CryptoError>;
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// AES-256-GCM STREAM provider with a random nonce prefix per envelope
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmProvider;

impl AesGcmProvider {
    fn cipher(key: &RecipientKey) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl EncryptionProvider for AesGcmProvider {
    fn name(&self) -> &'static str {
        "aes-256-gcm-stream"
    }

    fn encrypt(
        &self,
        plaintext: &mut dyn Read,
        sink: &mut dyn Write,
        key: &RecipientKey,
    ) -> Result<u64, CryptoError> {
        let header = EnvelopeHeader::random();
        let mut encryptor = EncryptorBE32::from_aead(
            Self::cipher(key)?,
            GenericArray::from_slice(&header.nonce_prefix),
        );
        sink.write_all(&header.to_bytes())?;
        let mut written = HEADER_LEN as u64;

        // A full chunk is only sealed once the next read shows more input follows
        let mut current = Zeroizing::new(vec![0u8; CHUNK_LEN]);
        let mut next = Zeroizing::new(vec![0u8; CHUNK_LEN]);
        let mut filled = read_full(plaintext, &mut current)?;
        loop {
            let next_filled = if filled == CHUNK_LEN {
                read_full(plaintext, &mut next)?
            } else {
                0
            };
            if next_filled == 0 {
                let frame = encryptor
                    .encrypt_last(&current[..filled])
                    .map_err(|_| CryptoError::EncryptFailed)?;
                sink.write_all(&frame)?;
                written += frame.len() as u64;
                break;
            }

            let frame = encryptor
                .encrypt_next(&current[..])
                .map_err(|_| CryptoError::EncryptFailed)?;
            sink.write_all(&frame)?;
            written += frame.len() as u64;
            std::mem::swap(&mut current, &mut next);
            filled = next_filled;
        }

        sink.flush()?;
        Ok(written)
    }

    fn decrypt(
        &self,
        envelope: &mut dyn Read,
        sink: &mut dyn Write,
        key: &RecipientKey,
    ) -> Result<u64, CryptoError> {
        let mut raw_header = [0u8; HEADER_LEN];
        let got = read_full(envelope, &mut raw_header)?;
        let header = EnvelopeHeader::parse(&raw_header[..got])?;
        let mut decryptor = DecryptorBE32::from_aead(
            Self::cipher(key)?,
            GenericArray::from_slice(&header.nonce_prefix),
        );

        let frame_len = CHUNK_LEN + TAG_LEN;
        let mut current = vec![0u8; frame_len];
        let mut next = vec![0u8; frame_len];
        let mut filled = read_full(envelope, &mut current)?;
        if filled < TAG_LEN {
            return Err(CryptoError::Truncated(HEADER_LEN + filled));
        }

        let mut written = 0u64;
        loop {
            let next_filled = if filled == frame_len {
                read_full(envelope, &mut next)?
            } else {
                0
            };
            if next_filled == 0 {
                let plain = Zeroizing::new(
                    decryptor
                        .decrypt_last(&current[..filled])
                        .map_err(|_| CryptoError::DecryptFailed)?,
                );
                sink.write_all(&plain)?;
                written += plain.len() as u64;
                break;
            }

            let plain = Zeroizing::new(
                decryptor
                    .decrypt_next(&current[..])
                    .map_err(|_| CryptoError::DecryptFailed)?,
            );
            sink.write_all(&plain)?;
            written += plain.len() as u64;
            std::mem::swap(&mut current, &mut next);
            filled = next_filled;
        }

        sink.flush()?;
        Ok(written)
    }
}

/// Decide whether an artifact of `artifact_type` is encrypted under `mode`
///
/// Secrets are always encrypted: a soft opt-out is overridden with a warning and
/// a forced opt-out is refused.
pub fn resolve_encryption(artifact_type: ArtifactType, mode: EncryptionMode) -> BackupResult<bool> {
    if !artifact_type.requires_encryption() {
        return Ok(mode == EncryptionMode::Enabled);
    }

    match mode {
        EncryptionMode::Enabled => Ok(true),
        EncryptionMode::Disabled => {
            warn!(
                artifact_type = %artifact_type,
                "encryption opt-out ignored: {} artifacts are always encrypted",
                artifact_type
            );
            Ok(true)
        }
        EncryptionMode::ForceDisabled => Err(BackupError::policy(format!(
            "{} artifacts must be encrypted; --no-encrypt is not allowed",
            artifact_type
        ))),
    }
}

/// Error for an encryption-required artifact without a configured key
pub(crate) fn missing_key_error(artifact_type: ArtifactType) -> BackupError {
    let target = if artifact_type.requires_encryption() {
        "Secrets".to_string()
    } else {
        artifact_type.to_string()
    };
    BackupError::encryption(format!(
        "no recipient key configured for {} encryption (set BRK_RECIPIENT_KEY or BRK_RECIPIENT_KEY_FILE)",
        target
    ))
}
