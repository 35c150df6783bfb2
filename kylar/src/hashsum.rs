use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::Error;

/// Size of a SHA-256 digest in bytes.
pub const HASH_SIZE: usize = 32;

/// Buffer size used when digesting files.
const FILE_READ_BUFFER_SIZE: usize = 1 << 20;

/// A SHA-256 hash sum identifying a content or a stored chunk.
///
/// Compares and orders purely byte-wise. The textual form is 64 lowercase
/// hexadecimal characters.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashSum([u8; HASH_SIZE]);

impl HashSum {
    /// Digest the given data in one shot.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }
    /// Digest everything the reader yields, in buffered steps.
    pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<Self, std::io::Error> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; FILE_READ_BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(hasher.finalize().into()))
    }
    /// Digest a file's contents.
    pub fn sha256_file(path: &Path) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(path)?;
        Self::sha256_reader(&mut file)
    }
    /// Create a hash sum from raw digest bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
    /// Create a hash sum from a slice, which must be exactly 32 bytes.
    pub fn from_slice(s: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; HASH_SIZE] = s.try_into().map_err(|_| {
            Error::StorageCorrupted(format!("expected a 32 byte digest, got {} bytes", s.len()))
        })?;
        Ok(Self(bytes))
    }
    /// Parse the 64-character lowercase hex form.
    pub fn parse_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s)
            .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid digest", s)))?;
        Self::from_slice(&bytes)
            .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid digest", s)))
    }
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; HASH_SIZE]> for HashSum {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for HashSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for HashSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(
            HashSum::sha256(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            HashSum::sha256(b"hello").to_string(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn reader_matches_one_shot() {
        let data: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|v| v as u8).collect();
        let mut cursor = std::io::Cursor::new(&data);
        assert_eq!(
            HashSum::sha256_reader(&mut cursor).unwrap(),
            HashSum::sha256(&data)
        );
    }

    #[test]
    fn hex_round_trip() {
        let sum = HashSum::sha256(b"round trip");
        assert_eq!(HashSum::parse_hex(&sum.to_string()).unwrap(), sum);
    }

    #[test]
    fn slice_must_be_32_bytes() {
        assert!(HashSum::from_slice(&[0u8; 16]).is_err());
        assert!(HashSum::from_slice(&[0u8; 32]).is_ok());
    }
}
