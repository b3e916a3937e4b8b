//! Fixed-size block pools for bulk allocations.
//!
//! The engine pre-allocates all large buffers (script heaps, work stacks,
//! LED frame buffers, UDP packet buffers) at startup and lends them out as
//! [`MemoryBlock`]s. A block returns to its pool when dropped; if the pool
//! has been destroyed by then, or the pool's capacity cap has been lowered
//! below the number of blocks outstanding, the memory is released instead
//! of being reinserted.
//!
//! Pools are process-wide and shared behind `Arc`; each block carries only
//! a `Weak` back-edge so a dying pool never keeps blocks alive (and vice
//! versa).

use std::sync::{Arc, Mutex, Weak};

use bitflags::bitflags;
use thiserror::Error;
use tracing::{error, trace};

bitflags! {
    /// Allocator capability hints for a pool.
    ///
    /// On the target these select which heap region backs the pool
    /// (external PSRAM vs. internal, DMA-capable, byte-accessible). On the
    /// host they are carried for logging and to size test budgets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PoolCaps: u32 {
        const INTERNAL = 0x01;
        const SPIRAM   = 0x02;
        const DMA      = 0x04;
        const BYTE_ACCESS = 0x08;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The backing allocator refused to provide another block.
    #[error("unable to allocate block with size {block_size} caps {caps:#010x} ({index} of {requested})")]
    AllocFailed {
        block_size: usize,
        caps: u32,
        index: usize,
        requested: usize,
    },
}

struct PoolInner {
    free: Vec<Box<[u8]>>,
    /// Blocks currently lent out.
    used: usize,
    /// Capacity cap: `free.len() + used` may temporarily exceed this after
    /// the cap is lowered; returning blocks above the cap are dropped.
    capacity: usize,
    /// Bytes currently held (free + lent out), checked against the budget.
    held_bytes: usize,
}

/// A pool of equally sized byte blocks.
pub struct MemoryPool {
    block_size: usize,
    caps: PoolCaps,
    /// Optional byte budget modelling the platform allocator's limit;
    /// growth beyond it fails with [`PoolError::AllocFailed`].
    byte_budget: Option<usize>,
    inner: Mutex<PoolInner>,
}

impl MemoryPool {
    pub fn new(block_size: usize, caps: PoolCaps) -> Arc<Self> {
        assert!(block_size > 0, "pool block size must be non-zero");
        Arc::new(Self {
            block_size,
            caps,
            byte_budget: None,
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                used: 0,
                capacity: 0,
                held_bytes: 0,
            }),
        })
    }

    /// Like [`MemoryPool::new`] but with an allocation budget in bytes.
    pub fn with_budget(block_size: usize, caps: PoolCaps, byte_budget: usize) -> Arc<Self> {
        assert!(block_size > 0, "pool block size must be non-zero");
        Arc::new(Self {
            block_size,
            caps,
            byte_budget: Some(byte_budget),
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                used: 0,
                capacity: 0,
                held_bytes: 0,
            }),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn caps(&self) -> PoolCaps {
        self.caps
    }

    /// Grow or shrink the capacity cap to `count` blocks.
    ///
    /// Growing allocates immediately; a refusal from the allocator leaves
    /// the blocks obtained so far in place and reports the failure.
    /// Shrinking drops free blocks now and lowers the cap; blocks still
    /// lent out are dropped as they come back, in [`MemoryBlock`]'s `Drop`.
    pub fn resize(&self, count: usize) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");

        while inner.capacity < count {
            if let Some(budget) = self.byte_budget
                && inner.held_bytes + self.block_size > budget
            {
                error!(
                    target: "pool",
                    block_size = self.block_size,
                    caps = self.caps.bits(),
                    index = inner.capacity + 1,
                    requested = count,
                    "block allocation refused"
                );
                return Err(PoolError::AllocFailed {
                    block_size: self.block_size,
                    caps: self.caps.bits(),
                    index: inner.capacity + 1,
                    requested: count,
                });
            }

            inner.free.push(vec![0u8; self.block_size].into_boxed_slice());
            inner.held_bytes += self.block_size;
            inner.capacity += 1;
        }

        while inner.capacity > count {
            if inner.free.pop().is_some() {
                inner.held_bytes -= self.block_size;
            }
            inner.capacity -= 1;
        }

        let total = inner.free.len() + inner.used;
        trace!(
            target: "pool",
            blocks = total,
            block_size = self.block_size,
            caps = self.caps.bits(),
            "pool resized"
        );

        Ok(())
    }

    /// Borrow a block, zeroed. Returns `None` when the free list is empty.
    pub fn allocate(self: &Arc<Self>) -> Option<MemoryBlock> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");

        let mut data = inner.free.pop()?;
        inner.used += 1;
        data.fill(0);

        Some(MemoryBlock {
            pool: Arc::downgrade(self),
            data: Some(data),
        })
    }

    /// Free blocks currently available without allocating.
    pub fn available(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").free.len()
    }

    /// Blocks currently lent out.
    pub fn in_use(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").used
    }

    fn restore(&self, data: Box<[u8]>) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");

        if inner.free.len() + inner.used <= inner.capacity {
            inner.free.push(data);
        } else {
            inner.held_bytes -= self.block_size;
        }

        inner.used -= 1;
    }
}

/// A fixed-size byte buffer borrowed from a [`MemoryPool`].
///
/// Dropping the block returns it to its pool if the pool is still alive
/// and under its capacity cap; otherwise the memory is simply freed.
pub struct MemoryBlock {
    pool: Weak<MemoryPool>,
    data: Option<Box<[u8]>>,
}

impl MemoryBlock {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().expect("block data taken")
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().expect("block data taken")
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        let data = self.data.take().expect("block data taken");

        if let Some(pool) = self.pool.upgrade() {
            pool.restore(data);
        }
        // Pool already gone: the boxed slice is freed here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_none_when_empty() {
        let pool = MemoryPool::new(16, PoolCaps::INTERNAL);
        assert!(pool.allocate().is_none());

        pool.resize(1).unwrap();
        let block = pool.allocate().expect("one block available");
        assert!(pool.allocate().is_none());
        drop(block);
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn blocks_are_zeroed_on_allocate() {
        let pool = MemoryPool::new(8, PoolCaps::INTERNAL);
        pool.resize(1).unwrap();

        let mut block = pool.allocate().unwrap();
        block.as_mut_slice().fill(0xAA);
        drop(block);

        let block = pool.allocate().unwrap();
        assert_eq!(block.as_slice(), &[0u8; 8]);
    }

    #[test]
    fn drop_returns_block_to_live_pool() {
        let pool = MemoryPool::new(32, PoolCaps::SPIRAM | PoolCaps::BYTE_ACCESS);
        pool.resize(2).unwrap();
        assert_eq!(pool.available(), 2);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.in_use(), 2);

        drop(a);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_use(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn drop_after_pool_destroyed_frees_memory() {
        let pool = MemoryPool::new(32, PoolCaps::INTERNAL);
        pool.resize(1).unwrap();
        let block = pool.allocate().unwrap();

        drop(pool);
        // Must not panic or leak; nothing to return to.
        drop(block);
    }

    #[test]
    fn lowering_cap_drops_blocks_returned_above_it() {
        let pool = MemoryPool::new(16, PoolCaps::INTERNAL);
        pool.resize(3).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        pool.resize(1).unwrap();

        drop(a);
        drop(b);
        assert_eq!(pool.available(), 0, "returns above the cap are dropped");
        drop(c);
        assert_eq!(pool.available(), 1, "cap admits the final return");
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn shrink_drops_free_blocks() {
        let pool = MemoryPool::new(16, PoolCaps::INTERNAL);
        pool.resize(4).unwrap();
        pool.resize(1).unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn budget_refusal_keeps_earlier_blocks() {
        let pool = MemoryPool::with_budget(64, PoolCaps::INTERNAL, 128);

        let err = pool.resize(3).unwrap_err();
        assert_eq!(
            err,
            PoolError::AllocFailed {
                block_size: 64,
                caps: PoolCaps::INTERNAL.bits(),
                index: 3,
                requested: 3,
            }
        );
        assert_eq!(pool.available(), 2, "blocks allocated before the refusal remain");
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn budget_frees_up_when_over_cap_blocks_drop() {
        let pool = MemoryPool::with_budget(64, PoolCaps::INTERNAL, 128);
        pool.resize(2).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.resize(1).unwrap();
        drop(a); // over cap: released, budget reclaimed
        drop(b); // under cap: reinserted

        pool.resize(2).unwrap();
        assert_eq!(pool.available(), 2);
    }
}
