//! External storage ports
//!
//! The engine's spillable state lives behind three narrow interfaces: a
//! key/value map, an append-only byte-chunk store, and an indexable
//! append-only row heap. Implementations may keep data in memory or on disk;
//! the engine only relies on the contracts here.
//!
//! Stores are obtained from a [`StoreFactory`] carried in the execution
//! context and must be returned through the matching `recycle_*` call on
//! every exit path, so implementations can reset-and-pool or close
//! deterministically.

pub mod errors;
pub mod mem;
pub mod spill;

pub use errors::{StoreError, StoreResult};
pub use mem::MemStoreFactory;
pub use spill::SpillStoreFactory;

/// Key/value map with in-place value mutation.
pub trait KvMap: Send {
    /// Looks up a key, returning a mutable view of the stored value.
    ///
    /// Writes through the returned slice are size-stable updates: they
    /// persist without a `set` call. Growing a value requires `set`.
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<&mut [u8]>>;

    /// Inserts or replaces a value.
    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Visits every entry in the map's native (unordered) order.
    ///
    /// The callback returns `false` to stop early.
    fn visit(
        &mut self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> StoreResult<bool>,
    ) -> StoreResult<()>;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether the map holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all entries, keeping the map reusable.
    fn reset(&mut self) -> StoreResult<()>;
}

/// Append-only byte-chunk store with stable offsets.
pub trait ChunkStore: Send {
    /// Appends a chunk, returning its `(offset, size)` address.
    ///
    /// The returned size is the store's own accounting and must be passed
    /// back verbatim to `read`; the pair `(0, 0)` is never returned and is
    /// free for callers to use as a terminator.
    fn append(&mut self, bytes: &[u8]) -> StoreResult<(u64, u64)>;

    /// Reads the chunk at an address previously returned by `append`,
    /// replacing `buf`'s contents with the chunk bytes.
    fn read(&mut self, offset: u64, size: u64, buf: &mut Vec<u8>) -> StoreResult<()>;

    /// Discards all chunks; previously returned addresses become invalid.
    fn truncate(&mut self) -> StoreResult<()>;
}

/// Indexable append-only sequence of byte records.
///
/// Used as an ordered log, not a priority structure. The `tag` is one
/// caller-owned bookkeeping field (window partitioning stamps a partition id
/// in it).
pub trait RowHeap: Send {
    /// Appends one record.
    fn push(&mut self, bytes: &[u8]) -> StoreResult<()>;

    /// Reads record `i`, replacing `buf`'s contents.
    fn get(&mut self, i: usize, buf: &mut Vec<u8>) -> StoreResult<()>;

    /// Number of records.
    fn len(&self) -> usize;

    /// Whether the heap holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all records, keeping the heap reusable. The tag is preserved.
    fn reset(&mut self) -> StoreResult<()>;

    /// Caller bookkeeping field.
    fn tag(&self) -> u64;

    /// Sets the caller bookkeeping field.
    fn set_tag(&mut self, tag: u64);
}

/// Allocator/recycler for the three store kinds.
///
/// Allocation may fail; recycling must tolerate a store in any state an
/// operator exit path can leave it in.
pub trait StoreFactory: Send + Sync {
    /// Allocates a key/value map.
    fn alloc_map(&self) -> StoreResult<Box<dyn KvMap>>;
    /// Returns a map for reset-and-pool or close.
    fn recycle_map(&self, map: Box<dyn KvMap>);

    /// Allocates a chunk store.
    fn alloc_chunks(&self) -> StoreResult<Box<dyn ChunkStore>>;
    /// Returns a chunk store for reset-and-pool or close.
    fn recycle_chunks(&self, chunks: Box<dyn ChunkStore>);

    /// Allocates a row heap.
    fn alloc_heap(&self) -> StoreResult<Box<dyn RowHeap>>;
    /// Returns a heap for reset-and-pool or close.
    fn recycle_heap(&self, heap: Box<dyn RowHeap>);
}
