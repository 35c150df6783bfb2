//! Package file structure.
//!
//! | Offset | Size | Description                                  |
//! |--------|------|----------------------------------------------|
//! |      0 |    8 | Package file magic (KYLAPKG\0).              |
//! |      8 |    8 | Format version (u64 le), currently 2.0.      |
//! |     16 |   48 | Reserved, zero.                              |
//! |     64 |    n | Chunks, concatenated in chunk-row order.     |
//!
//! Chunks carry no framing of their own; offsets and sizes live in the
//! index.

use std::fs::File;
use std::path::Path;

use crate::file_io;
use crate::Error;

/// Package file magic.
pub const PACKAGE_MAGIC: &[u8; 8] = b"KYLAPKG\0";

/// Format version 2.0: major in the top 16 bits, minor in the next 16.
pub const PACKAGE_VERSION: u64 = 0x0002_0000_0000_0000;

/// Total header size; chunk data starts here.
pub const PACKAGE_HEADER_SIZE: usize = 64;

/// Build the fixed 64 byte package header.
pub fn build_header() -> [u8; PACKAGE_HEADER_SIZE] {
    let mut header = [0u8; PACKAGE_HEADER_SIZE];
    header[..PACKAGE_MAGIC.len()].copy_from_slice(PACKAGE_MAGIC);
    header[8..16].copy_from_slice(&PACKAGE_VERSION.to_le_bytes());
    header
}

/// Check magic and version of a package header.
pub fn verify_header(header: &[u8]) -> Result<(), Error> {
    if header.len() < PACKAGE_HEADER_SIZE || &header[..PACKAGE_MAGIC.len()] != PACKAGE_MAGIC {
        return Err(Error::StorageCorrupted("not a package file".into()));
    }
    let version = u64::from_le_bytes(header[8..16].try_into().unwrap());
    if version != PACKAGE_VERSION {
        return Err(Error::StorageCorrupted(format!(
            "unsupported package version {:#018x}",
            version
        )));
    }
    Ok(())
}

/// Read-only random access into one package. Offsets are absolute within
/// the package file; a short read is an error.
pub trait PackageFile: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Error>;
}

/// A package stored as a local file.
pub struct LocalPackageFile {
    file: File,
}

impl LocalPackageFile {
    /// Open a package and verify its header.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut file = file_io::open_read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("missing package file '{}'", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        let mut header = [0u8; PACKAGE_HEADER_SIZE];
        file_io::read_exact_at(&mut file, 0, &mut header).map_err(|_| {
            Error::StorageCorrupted(format!("'{}' is not a package file", path.display()))
        })?;
        verify_header(&header)?;
        Ok(Self { file })
    }
}

impl PackageFile for LocalPackageFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        file_io::read_exact_at(&mut self.file, offset, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn header_round_trip() {
        let header = build_header();
        assert_eq!(header.len(), PACKAGE_HEADER_SIZE);
        verify_header(&header).unwrap();
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut header = build_header();
        header[0] = b'X';
        assert!(verify_header(&header).is_err());
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut header = build_header();
        header[8..16].copy_from_slice(&1u64.to_le_bytes());
        assert!(verify_header(&header).is_err());
    }

    #[test]
    fn local_package_reads_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.kypkg");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(&build_header()).unwrap();
            file.write_all(b"chunk data").unwrap();
        }
        let mut package = LocalPackageFile::open(&path).unwrap();
        let mut buf = [0u8; 5];
        package
            .read_at(PACKAGE_HEADER_SIZE as u64, &mut buf)
            .unwrap();
        assert_eq!(&buf, b"chunk");
    }

    #[test]
    fn missing_package_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match LocalPackageFile::open(&dir.path().join("nope.kypkg")) {
            Err(Error::NotFound(_)) => {}
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }
}
