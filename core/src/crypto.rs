use crate::{Error, Result};
use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use rand::rngs::OsRng;
use std::path::Path;
use tracing::info;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const BLOCK_SIZE: usize = 16;
pub const KEY_LENGTH: usize = 32;

/// Appends padding bytes whose value equals the total padding length.
/// Input that already fills a whole number of blocks gets one full extra
/// block, so the padding length is never zero and removal is unambiguous.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let padding_length = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + padding_length);
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding_length, padding_length as u8);
    padded
}

/// Strips padding produced by [`pad`], validating that every trailing byte
/// equals the indicated padding length. Invalid padding is an integrity
/// failure, never silently accepted.
pub fn unpad(data: &[u8]) -> Result<&[u8]> {
    let padding_length = *data
        .last()
        .ok_or_else(|| Error::Integrity("empty plaintext has no padding".into()))?
        as usize;
    if padding_length == 0 || padding_length > BLOCK_SIZE || padding_length > data.len() {
        return Err(Error::Integrity(format!(
            "invalid padding length {padding_length}"
        )));
    }
    let (body, padding) = data.split_at(data.len() - padding_length);
    if padding.iter().any(|&b| b as usize != padding_length) {
        return Err(Error::Integrity("inconsistent padding bytes".into()));
    }
    Ok(body)
}

/// Symmetric encryption of payloads and of remote object names.
///
/// AES-256 in CBC mode with a fresh random IV per call, prepended to the
/// ciphertext. The key lives only on the local machine.
pub struct CryptoEngine {
    key: [u8; KEY_LENGTH],
}

impl CryptoEngine {
    pub fn from_key(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Loads the key from `path`, or generates a fresh random key and
    /// persists it there before first use.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let key: [u8; KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Config(format!(
                        "key file {} holds {} bytes, expected {KEY_LENGTH}",
                        path.display(),
                        bytes.len()
                    ))
                })?;
                Ok(Self { key })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut key = [0u8; KEY_LENGTH];
                OsRng.fill_bytes(&mut key);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, key)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
                }
                info!(path = %path.display(), "generated new key file");
                Ok(Self { key })
            }
            Err(e) => Err(Error::Config(format!(
                "cannot read key file {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let body = cipher.encrypt_padded_vec_mut::<NoPadding>(&pad(plaintext));
        let mut out = iv.to_vec();
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 2 * BLOCK_SIZE || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::Crypto(format!(
                "ciphertext length {} is not a block multiple with IV",
                ciphertext.len()
            )));
        }
        let (iv, body) = ciphertext.split_at(BLOCK_SIZE);
        let cipher = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let padded = cipher
            .decrypt_padded_vec_mut::<NoPadding>(body)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(unpad(&padded)?.to_vec())
    }

    /// Encrypts a UTF-8 string into a URL-safe base64 token usable as a
    /// remote object name.
    pub fn encrypt_name(&self, name: &str) -> Result<String> {
        Ok(URL_SAFE.encode(self.encrypt(name.as_bytes())?))
    }

    pub fn decrypt_name(&self, token: &str) -> Result<String> {
        let ciphertext = URL_SAFE
            .decode(token)
            .map_err(|e| Error::Crypto(format!("invalid name token: {e}")))?;
        String::from_utf8(self.decrypt(&ciphertext)?)
            .map_err(|e| Error::Crypto(format!("decrypted name is not UTF-8: {e}")))
    }
}
