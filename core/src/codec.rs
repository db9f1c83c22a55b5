//! Payload codec shared by locked files and the configuration store.
//!
//! Container layout (byte-compatible with the DMA2 counterpart):
//!
//! ```text
//! magic "DMA2" (4) | salt (16) | nonce (12) | ciphertext (N) | tag (16)
//! ```
//!
//! The ciphertext is AES-256-GCM over a zlib stream of the plaintext
//! (`0x78 0x9C`, DEFLATE, Adler-32).
//! The key is PBKDF2-HMAC-SHA256 over the password and the salt slot; how
//! many rounds and where the salt comes from is decided by a [`KdfPolicy`].

use std::io::{Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use flate2::{read::DeflateDecoder, write::ZlibEncoder, Compression};
use log::debug;
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{LockerError, Result};

pub const MAGIC: [u8; 4] = *b"DMA2";
pub const SALT_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12; // AES-GCM 96-bit nonce
pub const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
pub const HEADER_SIZE: usize = MAGIC.len() + SALT_SIZE + NONCE_SIZE;
pub const MIN_CONTAINER_SIZE: usize = HEADER_SIZE + TAG_SIZE;

// zlib CMF/FLG for deflate, 32K window, default level. Readers skip these
// two bytes and inflate; any Adler-32 trailer after the stream is ignored.
const ZLIB_HEADER: [u8; 2] = [0x78, 0x9C];

const CONFIG_SALT: [u8; SALT_SIZE] = *b"FolderLockerSalt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltSource {
    /// Fresh OS randomness for every container.
    Random,
    /// Embedded application constant.
    Fixed([u8; SALT_SIZE]),
}

/// Key-derivation parameters for one kind of container.
///
/// Locked files use [`KdfPolicy::PER_FILE`]. The configuration store uses
/// [`KdfPolicy::CONFIG_STORE`]: fewer rounds and a fixed salt, so the key is
/// reproducible from the OS account name alone and the store opens without
/// prompting. That store therefore only resists casual local inspection,
/// not an attacker who knows the account name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfPolicy {
    pub iterations: u32,
    pub salt: SaltSource,
}

impl KdfPolicy {
    pub const PER_FILE: KdfPolicy = KdfPolicy {
        iterations: 200_000,
        salt: SaltSource::Random,
    };

    pub const CONFIG_STORE: KdfPolicy = KdfPolicy {
        iterations: 100_000,
        salt: SaltSource::Fixed(CONFIG_SALT),
    };

    fn salt(&self) -> [u8; SALT_SIZE] {
        match self.salt {
            SaltSource::Random => random_bytes(),
            SaltSource::Fixed(salt) => salt,
        }
    }
}

/// Parsed fixed-size prefix of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    /// Length of the ciphertext without the trailing tag.
    pub ciphertext_len: usize,
}

/// Validates length and magic and splits out salt and nonce. Never touches
/// the key derivation, so junk input is rejected cheaply.
pub fn inspect(blob: &[u8]) -> Result<ContainerHeader> {
    if blob.len() < MIN_CONTAINER_SIZE {
        return Err(LockerError::Format("too short"));
    }
    if blob[..MAGIC.len()] != MAGIC {
        return Err(LockerError::Format("bad header"));
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&blob[MAGIC.len()..MAGIC.len() + SALT_SIZE]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&blob[MAGIC.len() + SALT_SIZE..HEADER_SIZE]);

    Ok(ContainerHeader {
        salt,
        nonce,
        ciphertext_len: blob.len() - MIN_CONTAINER_SIZE,
    })
}

/// Compresses and encrypts `plaintext` under the per-file policy.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>> {
    encrypt_with(plaintext, password, &KdfPolicy::PER_FILE)
}

/// Decrypts and inflates a container produced under the per-file policy.
pub fn decrypt(blob: &[u8], password: &str) -> Result<Vec<u8>> {
    decrypt_with(blob, password, &KdfPolicy::PER_FILE)
}

pub fn encrypt_with(plaintext: &[u8], password: &str, policy: &KdfPolicy) -> Result<Vec<u8>> {
    let salt = policy.salt();
    let nonce: [u8; NONCE_SIZE] = random_bytes();
    let key = derive_key(password, &salt, policy.iterations);

    // Compression always precedes encryption.
    let compressed = compress(plaintext)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), compressed.as_ref())
        .map_err(|_| LockerError::Encrypt)?;
    debug!(
        "Sealed {} plaintext bytes into {} ciphertext bytes",
        plaintext.len(),
        sealed.len() - TAG_SIZE
    );

    let mut blob = Vec::with_capacity(HEADER_SIZE + sealed.len());
    blob.extend_from_slice(&MAGIC);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed); // ciphertext || tag
    Ok(blob)
}

/// Salt is always read from the container; `policy` only supplies the
/// iteration count.
pub fn decrypt_with(blob: &[u8], password: &str, policy: &KdfPolicy) -> Result<Vec<u8>> {
    let header = inspect(blob)?;
    let key = derive_key(password, &header.salt, policy.iterations);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
    let compressed = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&header.nonce), &blob[HEADER_SIZE..])
            .map_err(|_| LockerError::Authentication)?,
    );

    decompress(&compressed)
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let out = Vec::with_capacity(data.len() / 2 + ZLIB_HEADER.len());
    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let deflated = body
        .get(ZLIB_HEADER.len()..)
        .ok_or(LockerError::Format("compressed body too short"))?;
    let mut out = Vec::new();
    DeflateDecoder::new(deflated)
        .read_to_end(&mut out)
        .map_err(|_| LockerError::Format("corrupt compressed body"))?;
    Ok(out)
}
