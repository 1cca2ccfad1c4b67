//! AES-GCM decryption of model files at rest
//!
//! # Ciphertext format
//!
//! ```text
//! nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! The cipher width follows the key: 16-byte keys use AES-128-GCM, 32-byte
//! keys use AES-256-GCM.

use crate::error::DecryptErrorKind;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Suffix marking a file as ciphertext
pub const ENCRYPTION_SUFFIX: &str = ".aes";
/// Nonce size (96 bits for GCM)
pub const NONCE_SIZE: usize = 12;
/// Tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Symmetric key released by a key broker.
///
/// The buffer is zeroed on drop and never printed or copied.
pub struct DecryptionKey(Zeroizing<Vec<u8>>);

impl DecryptionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decrypt one `nonce || ciphertext || tag` buffer
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, DecryptErrorKind> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DecryptErrorKind::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce);

        let result = match self.0.len() {
            16 => Aes128Gcm::new_from_slice(self.0.as_slice())
                .map_err(|_| DecryptErrorKind::InvalidKeyLength(16))?
                .decrypt(nonce, ciphertext),
            32 => Aes256Gcm::new_from_slice(self.0.as_slice())
                .map_err(|_| DecryptErrorKind::InvalidKeyLength(32))?
                .decrypt(nonce, ciphertext),
            other => return Err(DecryptErrorKind::InvalidKeyLength(other)),
        };

        result.map_err(|_| DecryptErrorKind::Authentication)
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecryptionKey([REDACTED; {} bytes])", self.0.len())
    }
}

/// Plaintext file name for an encrypted entry: basename minus `.aes`
pub fn output_file_name(input: &Path) -> Option<OsString> {
    let name = input.file_name()?;
    match name.to_str().and_then(|n| n.strip_suffix(ENCRYPTION_SUFFIX)) {
        Some(stripped) if !stripped.is_empty() => Some(OsString::from(stripped)),
        Some(_) => None,
        None => Some(name.to_os_string()),
    }
}

/// Decrypt `input` into `output`.
///
/// The plaintext is written next to `output` with a `.partial` suffix and
/// renamed into place once complete.
pub fn decrypt_file(
    key: &DecryptionKey,
    input: &Path,
    output: &Path,
    overwrite: bool,
) -> Result<(), DecryptErrorKind> {
    if !overwrite && output.exists() {
        return Err(DecryptErrorKind::OutputExists(output.to_path_buf()));
    }

    let sealed = std::fs::read(input).map_err(|source| DecryptErrorKind::Io {
        context: "reading ciphertext",
        source,
    })?;
    let plaintext = key.open(&sealed)?;

    let partial = partial_path(output);
    if let Err(source) = std::fs::write(&partial, &plaintext) {
        let _ = std::fs::remove_file(&partial);
        return Err(DecryptErrorKind::Io {
            context: "writing plaintext",
            source,
        });
    }
    std::fs::rename(&partial, output).map_err(|source| {
        let _ = std::fs::remove_file(&partial);
        DecryptErrorKind::Io {
            context: "moving plaintext into place",
            source,
        }
    })
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// Seal plaintext in the on-disk format (test fixtures only)
#[cfg(test)]
pub(crate) fn seal(key: &[u8], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let ciphertext = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .unwrap()
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .unwrap(),
        _ => Aes256Gcm::new_from_slice(key)
            .unwrap()
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .unwrap(),
    };
    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    sealed
}
