//! Disk-backed spill stores
//!
//! Chunk stores and row heaps that write their records to files under a
//! spill directory, bounding memory use independent of input size. Every
//! record carries a CRC32 trailer validated on read; any mismatch is
//! surfaced as corruption and aborts the operation.
//!
//! Spill files are uuid-named, private to one store instance, and removed
//! when the store is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StoreError, StoreResult};
use super::mem::MemMap;
use super::{ChunkStore, KvMap, RowHeap, StoreFactory};

const CRC_LEN: u64 = 4;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// One spill file with independent write and read handles.
///
/// A pad byte is written at creation so no record lands at offset zero.
struct SpillFile {
    path: PathBuf,
    writer: BufWriter<File>,
    reader: File,
    write_at: u64,
    dirty: bool,
}

impl SpillFile {
    fn create(dir: &Path, kind: &str) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-{}.spill", kind, uuid::Uuid::new_v4()));

        let mut writer = BufWriter::new(
            OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)?,
        );
        writer.write_all(&[0])?;
        writer.flush()?;
        let reader = File::open(&path)?;

        tracing::debug!(path = %path.display(), "spill file created");
        Ok(Self {
            path,
            writer,
            reader,
            write_at: 1,
            dirty: false,
        })
    }

    /// Appends `bytes` plus a CRC32 trailer; returns the record address.
    fn append(&mut self, bytes: &[u8]) -> StoreResult<(u64, u64)> {
        let offset = self.write_at;
        self.writer.write_all(bytes)?;
        self.writer.write_all(&checksum(bytes).to_le_bytes())?;
        let size = bytes.len() as u64 + CRC_LEN;
        self.write_at += size;
        self.dirty = true;
        Ok((offset, size))
    }

    /// Reads a record, validating its checksum, into `buf` (without the
    /// trailer).
    fn read(&mut self, offset: u64, size: u64, buf: &mut Vec<u8>) -> StoreResult<()> {
        if size < CRC_LEN || offset + size > self.write_at {
            return Err(StoreError::OutOfBounds {
                offset,
                size,
                len: self.write_at,
            });
        }
        if self.dirty {
            self.writer.flush()?;
            self.dirty = false;
        }

        buf.clear();
        buf.resize(size as usize, 0);
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;

        let data_len = (size - CRC_LEN) as usize;
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&buf[data_len..]);
        if checksum(&buf[..data_len]) != u32::from_le_bytes(stored) {
            return Err(StoreError::Corruption(offset));
        }
        buf.truncate(data_len);
        Ok(())
    }

    fn truncate(&mut self) -> StoreResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(1)?;
        self.writer.seek(SeekFrom::Start(1))?;
        self.write_at = 1;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Disk-backed chunk store.
pub struct SpillChunks {
    file: SpillFile,
}

impl SpillChunks {
    /// Creates a chunk store spilling under `dir`.
    pub fn create(dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            file: SpillFile::create(dir, "chunks")?,
        })
    }
}

impl ChunkStore for SpillChunks {
    fn append(&mut self, bytes: &[u8]) -> StoreResult<(u64, u64)> {
        self.file.append(bytes)
    }

    fn read(&mut self, offset: u64, size: u64, buf: &mut Vec<u8>) -> StoreResult<()> {
        self.file.read(offset, size, buf)
    }

    fn truncate(&mut self) -> StoreResult<()> {
        self.file.truncate()
    }
}

/// Disk-backed row heap; record extents stay in memory, payloads on disk.
pub struct SpillHeap {
    file: SpillFile,
    extents: Vec<(u64, u64)>,
    tag: u64,
}

impl SpillHeap {
    /// Creates a heap spilling under `dir`.
    pub fn create(dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            file: SpillFile::create(dir, "heap")?,
            extents: Vec::new(),
            tag: 0,
        })
    }
}

impl RowHeap for SpillHeap {
    fn push(&mut self, bytes: &[u8]) -> StoreResult<()> {
        let extent = self.file.append(bytes)?;
        self.extents.push(extent);
        Ok(())
    }

    fn get(&mut self, i: usize, buf: &mut Vec<u8>) -> StoreResult<()> {
        let (offset, size) = self.extents.get(i).copied().ok_or({
            StoreError::OutOfBounds {
                offset: i as u64,
                size: 0,
                len: self.extents.len() as u64,
            }
        })?;
        self.file.read(offset, size, buf)
    }

    fn len(&self) -> usize {
        self.extents.len()
    }

    fn reset(&mut self) -> StoreResult<()> {
        self.extents.clear();
        self.file.truncate()
    }

    fn tag(&self) -> u64 {
        self.tag
    }

    fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }
}

/// Factory producing disk-backed chunk stores and heaps under one spill
/// directory. Maps stay in memory; only their chain/row payloads spill.
pub struct SpillStoreFactory {
    dir: PathBuf,
}

impl SpillStoreFactory {
    /// Creates a factory spilling under `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl StoreFactory for SpillStoreFactory {
    fn alloc_map(&self) -> StoreResult<Box<dyn KvMap>> {
        Ok(Box::<MemMap>::default())
    }

    fn recycle_map(&self, _map: Box<dyn KvMap>) {}

    fn alloc_chunks(&self) -> StoreResult<Box<dyn ChunkStore>> {
        Ok(Box::new(SpillChunks::create(&self.dir)?))
    }

    fn recycle_chunks(&self, _chunks: Box<dyn ChunkStore>) {}

    fn alloc_heap(&self) -> StoreResult<Box<dyn RowHeap>> {
        Ok(Box::new(SpillHeap::create(&self.dir)?))
    }

    fn recycle_heap(&self, _heap: Box<dyn RowHeap>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_chunks_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut chunks = SpillChunks::create(dir.path()).unwrap();

        let (off1, size1) = chunks.append(b"first record").unwrap();
        let (off2, size2) = chunks.append(b"second").unwrap();
        assert_ne!(off1, 0);

        let mut buf = Vec::new();
        chunks.read(off2, size2, &mut buf).unwrap();
        assert_eq!(buf, b"second");
        chunks.read(off1, size1, &mut buf).unwrap();
        assert_eq!(buf, b"first record");
    }

    #[test]
    fn test_chunks_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let mut chunks = SpillChunks::create(dir.path()).unwrap();
        let (off, size) = chunks.append(b"payload").unwrap();

        // Force the write out, then damage one payload byte on disk.
        let mut buf = Vec::new();
        chunks.read(off, size, &mut buf).unwrap();
        let path = dir
            .path()
            .read_dir()
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(off)).unwrap();
            file.write_all(&[0xFF]).unwrap();
        }

        let result = chunks.read(off, size, &mut buf);
        assert!(matches!(result, Err(StoreError::Corruption(_))));
    }

    #[test]
    fn test_heap_roundtrip_and_reset() {
        let dir = TempDir::new().unwrap();
        let mut heap = SpillHeap::create(dir.path()).unwrap();

        heap.push(b"r0").unwrap();
        heap.push(b"r1").unwrap();
        heap.set_tag(3);

        let mut buf = Vec::new();
        heap.get(0, &mut buf).unwrap();
        assert_eq!(buf, b"r0");
        heap.get(1, &mut buf).unwrap();
        assert_eq!(buf, b"r1");

        heap.reset().unwrap();
        assert_eq!(heap.len(), 0);
        assert_eq!(heap.tag(), 3);
        heap.push(b"r2").unwrap();
        heap.get(0, &mut buf).unwrap();
        assert_eq!(buf, b"r2");
    }

    #[test]
    fn test_spill_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let mut heap = SpillHeap::create(dir.path()).unwrap();
            heap.push(b"data").unwrap();
            assert_eq!(dir.path().read_dir().unwrap().count(), 1);
        }
        assert_eq!(dir.path().read_dir().unwrap().count(), 0);
    }

    #[test]
    fn test_factory_allocates_under_dir() {
        let dir = TempDir::new().unwrap();
        let factory = SpillStoreFactory::new(dir.path().join("spill")).unwrap();
        let mut chunks = factory.alloc_chunks().unwrap();
        chunks.append(b"x").unwrap();
        assert!(dir.path().join("spill").exists());
        factory.recycle_chunks(chunks);
    }
}
