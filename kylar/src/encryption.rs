use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;

use crate::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Algorithm id stored in `fs_chunk_encryption`.
pub const ENCRYPTION_ALGORITHM_ID: &str = "AES256";

/// Packed size of the per-chunk salt and IV.
pub const ENCRYPTION_DATA_SIZE: usize = 24;

const SALT_SIZE: usize = 8;
const IV_SIZE: usize = 16;
const PBKDF2_ROUNDS: u32 = 4096;
const DERIVED_KEY_SIZE: usize = 64;
const AES_KEY_SIZE: usize = 32;

/// Per-chunk encryption parameters: an 8 byte PBKDF2 salt followed by a
/// 16 byte AES IV, stored as one 24 byte blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionData {
    salt: [u8; SALT_SIZE],
    iv: [u8; IV_SIZE],
}

impl EncryptionData {
    /// Draw a fresh random salt and IV.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);
        Self { salt, iv }
    }
    /// Pack into the on-disk blob layout, salt first.
    pub fn pack(&self) -> [u8; ENCRYPTION_DATA_SIZE] {
        let mut packed = [0u8; ENCRYPTION_DATA_SIZE];
        packed[..SALT_SIZE].copy_from_slice(&self.salt);
        packed[SALT_SIZE..].copy_from_slice(&self.iv);
        packed
    }
    pub fn unpack(data: &[u8]) -> Result<Self, Error> {
        if data.len() != ENCRYPTION_DATA_SIZE {
            return Err(Error::StorageCorrupted(format!(
                "expected {} bytes of encryption data, got {}",
                ENCRYPTION_DATA_SIZE,
                data.len()
            )));
        }
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        salt.copy_from_slice(&data[..SALT_SIZE]);
        iv.copy_from_slice(&data[SALT_SIZE..]);
        Ok(Self { salt, iv })
    }
}

/// PBKDF2-HMAC-SHA1, 4096 rounds, 64 bytes of output of which the first 32
/// become the AES key.
fn derive_key(passphrase: &str, salt: &[u8; SALT_SIZE]) -> [u8; AES_KEY_SIZE] {
    let mut derived = [0u8; DERIVED_KEY_SIZE];
    pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut derived);
    let mut key = [0u8; AES_KEY_SIZE];
    key.copy_from_slice(&derived[..AES_KEY_SIZE]);
    key
}

/// Decrypts chunk data with a passphrase-derived key.
pub struct Decryptor {
    passphrase: String,
}

impl Decryptor {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.to_owned(),
        }
    }
    pub fn decrypt(&self, input: &[u8], data: &EncryptionData) -> Result<Vec<u8>, Error> {
        let key = derive_key(&self.passphrase, &data.salt);
        let cipher = Aes256CbcDec::new_from_slices(&key, &data.iv)
            .map_err(|e| Error::StorageCorrupted(e.to_string()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(input)
            .map_err(|_| Error::StorageCorrupted("chunk decryption failed".into()))
    }
}

/// Encrypts chunk data at build time, drawing a fresh salt and IV per chunk.
pub struct Encryptor {
    passphrase: String,
}

impl Encryptor {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.to_owned(),
        }
    }
    pub fn encrypt(&self, input: &[u8]) -> Result<(EncryptionData, Vec<u8>), Error> {
        let data = EncryptionData::generate();
        let key = derive_key(&self.passphrase, &data.salt);
        let cipher = Aes256CbcEnc::new_from_slices(&key, &data.iv)
            .map_err(|e| Error::StorageCorrupted(e.to_string()))?;
        Ok((data, cipher.encrypt_padded_vec_mut::<Pkcs7>(input)))
    }
}
