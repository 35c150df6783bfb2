use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Create a file, creating missing parent directories first.
pub fn create_with_parents(path: &Path) -> Result<File, std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    File::create(path)
}

/// Create a file of the given size, creating missing parent directories.
pub fn create_sized(path: &Path, size: u64) -> Result<File, std::io::Error> {
    let file = create_with_parents(path)?;
    file.set_len(size)?;
    Ok(file)
}

pub fn open_read(path: &Path) -> Result<File, std::io::Error> {
    File::open(path)
}

pub fn open_write(path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Read exactly `buf.len()` bytes at the given absolute offset.
pub fn read_exact_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<(), std::io::Error> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Map a file read-only. The file must not be empty; callers special-case
/// zero-size contents instead of mapping them.
pub fn map_read(file: &File) -> Result<Mmap, std::io::Error> {
    // Safety: the repository exclusively owns its files while an operation
    // is running; mappings never outlive the file handle they came from.
    unsafe { Mmap::map(file) }
}

/// Map a file read-write, as used by the repair path to place decoded bytes
/// at their content offset.
pub fn map_write(file: &File) -> Result<MmapMut, std::io::Error> {
    // Safety: see map_read.
    unsafe { MmapMut::map_mut(file) }
}

/// Place one run of a content's bytes at its offset. The first run (offset
/// zero) creates the file at its full size; later runs write through a
/// mapping into the existing file.
pub fn write_content_bytes(
    path: &Path,
    data: &[u8],
    offset: u64,
    total: u64,
) -> Result<(), std::io::Error> {
    let file = if offset == 0 {
        create_sized(path, total)?
    } else {
        open_write(path)?
    };
    if total == 0 {
        return Ok(());
    }
    let mut map = map_write(&file)?;
    let start = offset as usize;
    map[start..start + data.len()].copy_from_slice(data);
    map.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn create_with_parents_builds_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.bin");
        let mut file = create_with_parents(&path).unwrap();
        file.write_all(b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn sized_create_and_positional_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sized.bin");
        {
            let mut file = create_sized(&path, 16).unwrap();
            file.seek(SeekFrom::Start(8)).unwrap();
            file.write_all(&[0xau8; 4]).unwrap();
        }
        let mut file = open_read(&path).unwrap();
        let mut buf = [0u8; 4];
        read_exact_at(&mut file, 8, &mut buf).unwrap();
        assert_eq!(buf, [0xau8; 4]);
        assert_eq!(file.metadata().unwrap().len(), 16);
    }

    #[test]
    fn write_mapping_is_visible_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapped.bin");
        {
            let file = create_sized(&path, 8).unwrap();
            let mut map = map_write(&file).unwrap();
            map[4..].copy_from_slice(&[1, 2, 3, 4]);
            map.flush().unwrap();
        }
        let file = open_read(&path).unwrap();
        let map = map_read(&file).unwrap();
        assert_eq!(&map[..], &[0, 0, 0, 0, 1, 2, 3, 4]);
    }
}
