//! Password-based encryption of the stored bearer token.
//!
//! - key: scrypt(password, fixed salt, N=2^14, r=8, p=1) → 32 bytes
//! - cipher: AES-256-CBC with PKCS#7 padding and a fresh random IV per call
//! - encoding: lowercase hex for both IV and ciphertext
//!
//! The salt is a constant shared by every installation so that session files
//! written by earlier clients stay readable. This makes the derivation weaker
//! than a per-user salt would.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::CliError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const KEY_SALT: &[u8] = b"salt";
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Derived symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Hex-encoded IV and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: String,
    pub content: String,
}

/// Derive the key for `password`. Same password, same key.
pub fn create_key(password: &str) -> Result<Key, CliError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| CliError::Auth(format!("key derivation parameters: {e}")))?;
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), KEY_SALT, &params, &mut key)
        .map_err(|e| CliError::Auth(format!("key derivation: {e}")))?;
    Ok(Key(key))
}

/// [`create_key`] on the blocking pool; scrypt is deliberately slow.
pub async fn create_key_blocking(password: String) -> Result<Key, CliError> {
    tokio::task::spawn_blocking(move || create_key(&password))
        .await
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?
}

pub fn encrypt(plaintext: &str, key: &Key) -> Sealed {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(&key.0.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Sealed {
        iv: hex::encode(iv),
        content: hex::encode(ciphertext),
    }
}

/// Recover the plaintext, or `None` when the key is wrong or the record is damaged.
pub fn decrypt(sealed: &Sealed, key: &Key) -> Option<String> {
    let iv: [u8; IV_LEN] = hex::decode(&sealed.iv).ok()?.try_into().ok()?;
    let ciphertext = hex::decode(&sealed.content).ok()?;
    let plaintext = Aes256CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .ok()?;
    String::from_utf8(plaintext).ok()
}
