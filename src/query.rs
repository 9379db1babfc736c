//! Pooled occlusion query allocation.
//!
//! Query slots come from native query pools held in an arena; each pool
//! keeps an intrusive free-index stack (slot `i` stores the next free
//! index, or a sentinel). When every pool is exhausted a new one of
//! double the last capacity is appended. Handles are
//! `{pool index, query index}` pairs resolved through the arena at use
//! time.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::GpuError;

pub(crate) const INITIAL_QUERY_POOL_SIZE: u32 = 8;

const FREE_END: i32 = -1;

/// Handle to one acquired query slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle {
    pub(crate) pool: u32,
    pub(crate) index: u32,
}

pub(crate) struct QueryPool {
    pub handle: vk::QueryPool,
    pub capacity: u32,
    /// `free[i]` is the index of the next free slot after `i`.
    free: Vec<i32>,
    free_head: i32,
}

impl QueryPool {
    fn new(handle: vk::QueryPool, capacity: u32) -> Self {
        let mut free: Vec<i32> = (1..capacity as i32).collect();
        free.push(FREE_END);
        Self {
            handle,
            capacity,
            free,
            free_head: 0,
        }
    }

    fn acquire(&mut self) -> Option<u32> {
        if self.free_head == FREE_END {
            return None;
        }
        let index = self.free_head as u32;
        self.free_head = self.free[index as usize];
        Some(index)
    }

    fn release(&mut self, index: u32) {
        self.free[index as usize] = self.free_head;
        self.free_head = index as i32;
    }
}

/// Arena of linked query pools.
#[derive(Default)]
pub(crate) struct QueryAllocator {
    pools: Vec<QueryPool>,
}

impl QueryAllocator {
    /// Acquire a free query slot, appending a pool of double the last
    /// capacity if every existing pool is exhausted. Freshly created
    /// pools are reset on the given command buffer before first use.
    pub fn acquire<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        reset_cb: vk::CommandBuffer,
    ) -> Result<QueryHandle, GpuError> {
        for (pool_index, pool) in self.pools.iter_mut().enumerate() {
            if let Some(index) = pool.acquire() {
                return Ok(QueryHandle {
                    pool: pool_index as u32,
                    index,
                });
            }
        }

        let capacity = self
            .pools
            .last()
            .map(|pool| pool.capacity * 2)
            .unwrap_or(INITIAL_QUERY_POOL_SIZE);
        let handle = backend.create_query_pool(capacity)?;
        backend.cmd_reset_query_pool(reset_cb, handle, 0, capacity);

        let mut pool = QueryPool::new(handle, capacity);
        let index = pool
            .acquire()
            .expect("freshly created query pool has a free slot");
        self.pools.push(pool);
        Ok(QueryHandle {
            pool: (self.pools.len() - 1) as u32,
            index,
        })
    }

    /// Push a query slot back onto its pool's free stack (LIFO).
    pub fn release(&mut self, handle: QueryHandle) -> Result<(), GpuError> {
        let pool = self
            .pools
            .get_mut(handle.pool as usize)
            .ok_or(GpuError::UnknownQuery {
                pool: handle.pool,
                index: handle.index,
            })?;
        pool.release(handle.index);
        Ok(())
    }

    pub fn resolve(&self, handle: QueryHandle) -> Result<&QueryPool, GpuError> {
        self.pools
            .get(handle.pool as usize)
            .ok_or(GpuError::UnknownQuery {
                pool: handle.pool,
                index: handle.index,
            })
    }

    pub fn destroy_all<B: GpuBackend>(&mut self, backend: &mut B) {
        for pool in self.pools.drain(..) {
            backend.destroy_query_pool(pool.handle);
        }
    }
}
