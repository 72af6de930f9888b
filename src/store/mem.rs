//! In-memory store implementations
//!
//! The reference implementations of the storage ports. The factory pools
//! recycled stores behind a lock, so repeated operator activations reuse
//! their backing allocations.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::errors::StoreResult;
use super::{ChunkStore, KvMap, RowHeap, StoreFactory};

/// Hash-map backed key/value map.
#[derive(Debug, Default)]
pub struct MemMap {
    entries: HashMap<Vec<u8>, Vec<u8>>,
}

impl KvMap for MemMap {
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<&mut [u8]>> {
        Ok(self.entries.get_mut(key).map(|v| v.as_mut_slice()))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn visit(
        &mut self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> StoreResult<bool>,
    ) -> StoreResult<()> {
        for (key, value) in &self.entries {
            if !visit(key, value)? {
                break;
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn reset(&mut self) -> StoreResult<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Single-buffer chunk store; an append's offset is the buffer position.
///
/// One pad byte is reserved at the front so no real chunk ever lands at
/// offset zero, keeping `(0, 0)` free as a caller-side terminator.
#[derive(Debug)]
pub struct MemChunks {
    bytes: Vec<u8>,
}

impl Default for MemChunks {
    fn default() -> Self {
        Self { bytes: vec![0] }
    }
}

impl ChunkStore for MemChunks {
    fn append(&mut self, bytes: &[u8]) -> StoreResult<(u64, u64)> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(bytes);
        Ok((offset, bytes.len() as u64))
    }

    fn read(&mut self, offset: u64, size: u64, buf: &mut Vec<u8>) -> StoreResult<()> {
        let end = offset.checked_add(size).unwrap_or(u64::MAX);
        if end > self.bytes.len() as u64 {
            return Err(super::StoreError::OutOfBounds {
                offset,
                size,
                len: self.bytes.len() as u64,
            });
        }
        buf.clear();
        buf.extend_from_slice(&self.bytes[offset as usize..end as usize]);
        Ok(())
    }

    fn truncate(&mut self) -> StoreResult<()> {
        self.bytes.clear();
        self.bytes.push(0);
        Ok(())
    }
}

/// Arena-backed row heap: one byte buffer plus per-record extents.
#[derive(Debug, Default)]
pub struct MemHeap {
    bytes: Vec<u8>,
    extents: Vec<(usize, usize)>,
    tag: u64,
}

impl RowHeap for MemHeap {
    fn push(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.extents.push((self.bytes.len(), bytes.len()));
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn get(&mut self, i: usize, buf: &mut Vec<u8>) -> StoreResult<()> {
        let (at, len) = self.extents.get(i).copied().ok_or({
            super::StoreError::OutOfBounds {
                offset: i as u64,
                size: 0,
                len: self.extents.len() as u64,
            }
        })?;
        buf.clear();
        buf.extend_from_slice(&self.bytes[at..at + len]);
        Ok(())
    }

    fn len(&self) -> usize {
        self.extents.len()
    }

    fn reset(&mut self) -> StoreResult<()> {
        self.bytes.clear();
        self.extents.clear();
        Ok(())
    }

    fn tag(&self) -> u64 {
        self.tag
    }

    fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }
}

/// Factory producing in-memory stores, pooling recycled instances.
#[derive(Default)]
pub struct MemStoreFactory {
    maps: Mutex<Vec<Box<dyn KvMap>>>,
    chunks: Mutex<Vec<Box<dyn ChunkStore>>>,
    heaps: Mutex<Vec<Box<dyn RowHeap>>>,
}

impl MemStoreFactory {
    /// Creates a factory with empty pools.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreFactory for MemStoreFactory {
    fn alloc_map(&self) -> StoreResult<Box<dyn KvMap>> {
        Ok(self
            .maps
            .lock()
            .pop()
            .unwrap_or_else(|| Box::<MemMap>::default()))
    }

    fn recycle_map(&self, mut map: Box<dyn KvMap>) {
        if map.reset().is_ok() {
            self.maps.lock().push(map);
        }
    }

    fn alloc_chunks(&self) -> StoreResult<Box<dyn ChunkStore>> {
        Ok(self
            .chunks
            .lock()
            .pop()
            .unwrap_or_else(|| Box::<MemChunks>::default()))
    }

    fn recycle_chunks(&self, mut chunks: Box<dyn ChunkStore>) {
        if chunks.truncate().is_ok() {
            self.chunks.lock().push(chunks);
        }
    }

    fn alloc_heap(&self) -> StoreResult<Box<dyn RowHeap>> {
        Ok(self
            .heaps
            .lock()
            .pop()
            .unwrap_or_else(|| Box::<MemHeap>::default()))
    }

    fn recycle_heap(&self, mut heap: Box<dyn RowHeap>) {
        if heap.reset().is_ok() {
            heap.set_tag(0);
            self.heaps.lock().push(heap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_in_place_mutation() {
        let mut map = MemMap::default();
        map.set(b"k", &[1, 2, 3, 4]).unwrap();

        let slot = map.get(b"k").unwrap().unwrap();
        slot[0] = 9;

        let again = map.get(b"k").unwrap().unwrap();
        assert_eq!(again, &[9, 2, 3, 4]);
    }

    #[test]
    fn test_map_visit_sees_all_entries() {
        let mut map = MemMap::default();
        map.set(b"a", b"1").unwrap();
        map.set(b"b", b"2").unwrap();

        let mut seen = Vec::new();
        map.visit(&mut |k, v| {
            seen.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })
        .unwrap();
        seen.sort();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (b"a".to_vec(), b"1".to_vec()));
    }

    #[test]
    fn test_chunks_offsets_stable_and_nonzero() {
        let mut chunks = MemChunks::default();
        let (off1, size1) = chunks.append(b"hello").unwrap();
        let (off2, size2) = chunks.append(b"world!").unwrap();
        assert_ne!(off1, 0);
        assert_ne!(off2, off1);

        let mut buf = Vec::new();
        chunks.read(off1, size1, &mut buf).unwrap();
        assert_eq!(buf, b"hello");
        chunks.read(off2, size2, &mut buf).unwrap();
        assert_eq!(buf, b"world!");
    }

    #[test]
    fn test_chunks_out_of_bounds() {
        let mut chunks = MemChunks::default();
        let mut buf = Vec::new();
        assert!(chunks.read(100, 10, &mut buf).is_err());
    }

    #[test]
    fn test_heap_indexed_access_and_tag() {
        let mut heap = MemHeap::default();
        heap.push(b"r0").unwrap();
        heap.push(b"r1").unwrap();
        heap.set_tag(7);

        let mut buf = Vec::new();
        heap.get(1, &mut buf).unwrap();
        assert_eq!(buf, b"r1");
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.tag(), 7);

        heap.reset().unwrap();
        assert_eq!(heap.len(), 0);
        assert_eq!(heap.tag(), 7);
    }

    #[test]
    fn test_factory_pools_recycled_stores() {
        let factory = MemStoreFactory::new();
        let mut map = factory.alloc_map().unwrap();
        map.set(b"k", b"v").unwrap();
        factory.recycle_map(map);

        let map = factory.alloc_map().unwrap();
        assert_eq!(map.len(), 0);
    }
}
