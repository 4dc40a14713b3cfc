//! Undo records and the version arena.
//!
//! Every tuple slot carries a singly linked chain of undo records, newest
//! first, terminated at the committed base image stored in the block. A
//! record's timestamp word holds the owning transaction's tag (start
//! timestamp with the high bit set) until commit stamps it with the commit
//! timestamp.
//!
//! Records live in a chunked arena and are addressed by dense
//! [`VersionIdx`] keys; the chain-head word in the block encodes an index,
//! never an address. Arena slots hold `Arc`s, so a reader that resolved an
//! index before GC freed the slot keeps a valid record; the GC's
//! two-invocation protocol additionally guarantees a slot is not recycled
//! while any transaction that could still hold its index is active.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use terrier_storage::ProjectedRow;
use terrier_types::{Timestamp, TupleSlot};

/// High bit of a timestamp word: set while the owning transaction is in
/// flight.
pub const UNCOMMITTED_MASK: u64 = 1 << 63;

/// Tag installed in version timestamp words by a running transaction.
#[inline]
#[must_use]
pub const fn txn_tag(start_ts: Timestamp) -> u64 {
    start_ts.get() | UNCOMMITTED_MASK
}

#[inline]
#[must_use]
pub const fn is_uncommitted(ts_word: u64) -> bool {
    ts_word & UNCOMMITTED_MASK != 0
}

/// Number of version slots per arena chunk.
const ARENA_CHUNK: usize = 4096;

/// Index into a [`VersionArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionIdx {
    chunk: u32,
    offset: u32,
}

impl VersionIdx {
    #[inline]
    const fn new(chunk: u32, offset: u32) -> Self {
        Self { chunk, offset }
    }

    /// Encode for storage in a chain-head word. Zero is reserved for "no
    /// version", so the raw value is shifted by one.
    #[inline]
    #[must_use]
    pub const fn encode(self) -> u64 {
        (((self.chunk as u64) << 32) | self.offset as u64) + 1
    }

    /// Decode a nonzero chain word.
    #[inline]
    #[must_use]
    pub const fn decode(word: u64) -> Option<Self> {
        if word == 0 {
            return None;
        }
        let raw = word - 1;
        Some(Self::new((raw >> 32) as u32, raw as u32))
    }
}

/// The delta a version would undo.
#[derive(Debug)]
pub enum UndoPayload {
    /// Undoing an insert hides the tuple.
    Insert,
    /// Before-image of the columns the writer modified.
    Update(ProjectedRow),
    /// Full before-image; undoing a delete resurrects the tuple.
    Delete(ProjectedRow),
}

/// One version in a tuple slot's chain.
#[derive(Debug)]
pub struct UndoRecord {
    slot: TupleSlot,
    /// Owner tag while in flight; commit timestamp once committed.
    ts: AtomicU64,
    /// Encoded index of the next-older version, or zero.
    prev: AtomicU64,
    aborted: AtomicBool,
    payload: UndoPayload,
}

impl UndoRecord {
    #[must_use]
    pub fn new(slot: TupleSlot, owner_tag: u64, prev_word: u64, payload: UndoPayload) -> Self {
        Self {
            slot,
            ts: AtomicU64::new(owner_tag),
            prev: AtomicU64::new(prev_word),
            aborted: AtomicBool::new(false),
            payload,
        }
    }

    #[inline]
    #[must_use]
    pub const fn slot(&self) -> TupleSlot {
        self.slot
    }

    #[inline]
    #[must_use]
    pub fn ts_word(&self) -> u64 {
        self.ts.load(Ordering::Acquire)
    }

    /// Stamp the version with its commit timestamp.
    pub fn set_committed(&self, commit_ts: Timestamp) {
        self.ts.store(commit_ts.get(), Ordering::Release);
    }

    /// Restore the in-flight tag (commit backed out before publication).
    pub fn set_owner_tag(&self, tag: u64) {
        self.ts.store(tag, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn prev_word(&self) -> u64 {
        self.prev.load(Ordering::Acquire)
    }

    pub fn set_prev_word(&self, word: u64) {
        self.prev.store(word, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn set_aborted(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub const fn payload(&self) -> &UndoPayload {
        &self.payload
    }

    /// Whether this version's write is visible to a reader.
    ///
    /// A reader sees its own writes, and otherwise only versions whose
    /// commit timestamp is strictly less than its start timestamp
    /// (committed-before semantics). Aborted versions are visible to no one.
    #[must_use]
    pub fn visible_to(&self, start_ts: Timestamp, reader_tag: u64) -> bool {
        if self.is_aborted() {
            return false;
        }
        let ts = self.ts_word();
        if ts == reader_tag {
            return true;
        }
        !is_uncommitted(ts) && ts < start_ts.get()
    }
}

/// Chunked arena of undo records with a free list.
///
/// Single allocation site per table; readers resolve indices with a shared
/// lock and clone the `Arc` out.
pub struct VersionArena {
    slab: RwLock<Slab>,
}

struct Slab {
    chunks: Vec<Vec<Option<Arc<UndoRecord>>>>,
    free: Vec<VersionIdx>,
}

impl VersionArena {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slab: RwLock::new(Slab {
                chunks: vec![Vec::with_capacity(ARENA_CHUNK)],
                free: Vec::new(),
            }),
        }
    }

    /// Allocate a slot for `record`, returning its index.
    pub fn alloc(&self, record: Arc<UndoRecord>) -> VersionIdx {
        let mut slab = self.slab.write();
        if let Some(idx) = slab.free.pop() {
            slab.chunks[idx.chunk as usize][idx.offset as usize] = Some(record);
            return idx;
        }
        if slab.chunks.last().map_or(true, |c| c.len() >= ARENA_CHUNK) {
            slab.chunks.push(Vec::with_capacity(ARENA_CHUNK));
        }
        let chunk = slab.chunks.len() - 1;
        let offset = slab.chunks[chunk].len();
        slab.chunks[chunk].push(Some(record));
        VersionIdx::new(chunk as u32, offset as u32)
    }

    /// Resolve an index. `None` once the slot has been freed; chains only
    /// shed records old enough to be visible to every active reader, so a
    /// missing record always terminates traversal at a committed base.
    #[must_use]
    pub fn get(&self, idx: VersionIdx) -> Option<Arc<UndoRecord>> {
        let slab = self.slab.read();
        slab.chunks
            .get(idx.chunk as usize)?
            .get(idx.offset as usize)?
            .clone()
    }

    /// Release a slot for reuse.
    ///
    /// # Panics
    ///
    /// Asserts the slot is occupied (catches double-free).
    pub fn free(&self, idx: VersionIdx) {
        let mut slab = self.slab.write();
        let slot = &mut slab.chunks[idx.chunk as usize][idx.offset as usize];
        assert!(slot.is_some(), "version arena double-free of {idx:?}");
        *slot = None;
        slab.free.push(idx);
    }
}

impl Default for VersionArena {
    fn default() -> Self {
        Self::new()
    }
}
