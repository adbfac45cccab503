//! Generation-checked buffer pooling.
//!
//! The pool hands out reusable byte buffers sized to whole blocks (default
//! 2048 bytes) so the read path does not allocate per message. Requests of
//! similar size share a bucket keyed by block count.
//!
//! Every slot carries a generation counter. A checked-out [`PooledBuffer`]
//! records the generation it was issued with, and a return is honored only
//! while that generation still matches — a stale handle returned after the
//! slot moved on is a no-op (or an error in strict mode) instead of
//! corrupting a buffer already issued to a new borrower.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Default block size for payload buffers.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Errors raised by strict-mode pool returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The handle's generation no longer matches its slot: the buffer was
    /// already returned, or the slot has since been recycled.
    #[error("stale pooled-buffer handle for bucket {blocks} slot {slot}")]
    StaleHandle {
        /// Bucket (block count) of the slot.
        blocks: usize,
        /// Slot index within the bucket.
        slot: usize,
    },
}

/// Pool counters, for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers newly allocated because no free slot fit.
    pub allocated: u64,
    /// Checkouts served from a free slot.
    pub reused: u64,
    /// Successful returns.
    pub returned: u64,
    /// Returns rejected by the generation check.
    pub rejected: u64,
}

struct Slot {
    value: Option<Vec<u8>>,
    generation: u64,
}

#[derive(Default)]
struct Bucket {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

#[derive(Default)]
struct PoolInner {
    buckets: HashMap<usize, Bucket>,
}

struct PoolShared {
    block_size: usize,
    strict: bool,
    inner: Mutex<PoolInner>,
    allocated: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    rejected: AtomicU64,
}

/// A bucketed pool of block-sized byte buffers.
///
/// Cloning is cheap and shares the underlying slots; every connection of a
/// server clones the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool with the given block size.
    pub fn new(block_size: usize) -> Self {
        Self::with_options(block_size, false)
    }

    /// Create a pool, optionally in strict mode.
    ///
    /// In strict mode an explicit [`PooledBuffer::release`] of a stale
    /// handle reports [`PoolError::StaleHandle`] instead of silently doing
    /// nothing.
    pub fn with_options(block_size: usize, strict: bool) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                block_size: block_size.max(1),
                strict,
                inner: Mutex::new(PoolInner::default()),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                returned: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Check out a buffer of at least `size` bytes.
    ///
    /// The request rounds up to a whole number of blocks; the returned
    /// handle exposes exactly `size` bytes.
    pub fn get(&self, size: usize) -> PooledBuffer {
        let block_size = self.shared.block_size;
        let blocks = size.div_ceil(block_size).max(1);

        let (data, slot, generation) = {
            let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
            let bucket = inner.buckets.entry(blocks).or_default();

            if let Some(slot) = bucket.free.pop() {
                let entry = &mut bucket.slots[slot];
                let data = entry.value.take().unwrap_or_else(|| {
                    // A free slot always holds its buffer; recover by
                    // allocating rather than poisoning the caller.
                    vec![0u8; blocks * block_size]
                });
                self.shared.reused.fetch_add(1, Ordering::Relaxed);
                (data, slot, entry.generation)
            } else {
                bucket.slots.push(Slot {
                    value: None,
                    generation: 0,
                });
                self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                (
                    vec![0u8; blocks * block_size],
                    bucket.slots.len() - 1,
                    0,
                )
            }
        };

        PooledBuffer {
            data: Some(data),
            len: size,
            blocks,
            slot,
            generation,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            returned: self.shared.returned.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }

    /// The configured block size.
    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("block_size", &self.shared.block_size)
            .field("strict", &self.shared.strict)
            .finish()
    }
}

enum ReturnOutcome {
    Returned,
    AlreadyReturned,
    Stale { blocks: usize, slot: usize },
}

/// A checked-out pool buffer.
///
/// Exposes exactly the requested length; the underlying allocation is the
/// bucket's block-rounded size. Returns to the pool on drop, or explicitly
/// via [`release`](Self::release) / [`replace_release`](Self::replace_release).
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    len: usize,
    blocks: usize,
    slot: usize,
    generation: u64,
    shared: Arc<PoolShared>,
}

impl PooledBuffer {
    /// The buffer contents, sized to the original request.
    pub fn as_slice(&self) -> &[u8] {
        match &self.data {
            Some(data) => &data[..self.len],
            None => &[],
        }
    }

    /// Mutable view of the buffer contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.data {
            Some(data) => &mut data[..self.len],
            None => &mut [],
        }
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the requested length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the buffer to its slot.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`PoolError::StaleHandle`] when the slot's
    /// generation has moved on; otherwise a stale return is a no-op.
    pub fn release(mut self) -> Result<(), PoolError> {
        match self.give_back(None) {
            ReturnOutcome::Stale { blocks, slot } if self.shared.strict => {
                Err(PoolError::StaleHandle { blocks, slot })
            }
            _ => Ok(()),
        }
    }

    /// Return a replacement buffer to the slot instead of the original
    /// (e.g. after the caller swapped the allocation out). The replacement
    /// is resized to the bucket's capacity; the same generation discipline
    /// applies.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`PoolError::StaleHandle`] when the slot's
    /// generation has moved on.
    pub fn replace_release(mut self, replacement: Vec<u8>) -> Result<(), PoolError> {
        match self.give_back(Some(replacement)) {
            ReturnOutcome::Stale { blocks, slot } if self.shared.strict => {
                Err(PoolError::StaleHandle { blocks, slot })
            }
            _ => Ok(()),
        }
    }

    fn give_back(&mut self, replacement: Option<Vec<u8>>) -> ReturnOutcome {
        let Some(original) = self.data.take() else {
            return ReturnOutcome::AlreadyReturned;
        };
        let mut value = replacement.unwrap_or(original);
        value.resize(self.blocks * self.shared.block_size, 0);

        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(bucket) = inner.buckets.get_mut(&self.blocks) else {
            return ReturnOutcome::Stale {
                blocks: self.blocks,
                slot: self.slot,
            };
        };
        let entry = &mut bucket.slots[self.slot];

        if entry.generation != self.generation || entry.value.is_some() {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return ReturnOutcome::Stale {
                blocks: self.blocks,
                slot: self.slot,
            };
        }

        entry.value = Some(value);
        entry.generation = entry.generation.wrapping_add(1);
        bucket.free.push(self.slot);
        self.shared.returned.fetch_add(1, Ordering::Relaxed);
        ReturnOutcome::Returned
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let ReturnOutcome::Stale { blocks, slot } = self.give_back(None) {
            if self.shared.strict {
                tracing::warn!(blocks, slot, "stale pooled-buffer handle dropped");
            }
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("blocks", &self.blocks)
            .field("generation", &self.generation)
            .finish()
    }
}
