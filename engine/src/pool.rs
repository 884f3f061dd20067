//! Size-classed buffer pools.
//!
//! Each pool hands out buffers of one fixed size. A checked-out buffer goes
//! back to the pool it came from when the guard drops; buffers are never
//! passed between workers. The free list is a bounded channel, so returning
//! a buffer to a full pool simply drops it.

use std::ops::{Deref, DerefMut};

use crossbeam_channel::{bounded, Receiver, Sender};

/// A pool of equally sized byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
}

impl BufferPool {
    /// Create a pool of `buffer_size` buffers keeping at most `retain` idle ones.
    pub fn new(buffer_size: usize, retain: usize) -> Self {
        let (free_tx, free_rx) = bounded(retain.max(1));
        BufferPool {
            buffer_size,
            free_tx,
            free_rx,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Take a buffer, reusing an idle one when available.
    pub fn checkout(&self) -> PooledBuffer<'_> {
        let buf = self
            .free_rx
            .try_recv()
            .unwrap_or_else(|_| vec![0u8; self.buffer_size]);
        PooledBuffer { pool: self, buf }
    }

    /// Idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free_rx.len()
    }

    fn give_back(&self, buf: Vec<u8>) {
        if buf.len() == self.buffer_size {
            let _ = self.free_tx.try_send(buf);
        }
    }
}

/// A buffer on loan from a `BufferPool`.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
