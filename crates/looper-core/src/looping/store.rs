//! Chunked sample storage backed by the buffer pool
//!
//! A channel's audio lives in a list of pool [`Buffer`]s. Growing the store
//! only ever appends whole buffers; sample `i` lives in buffer
//! `i / buffer_size` at offset `i % buffer_size`.
//!
//! The buffer list is reserved up front. The process thread grows a store
//! only with the `*_within_reserve` variants, which stop at the reserved
//! length instead of reallocating the list.

use std::sync::Arc;

use crate::engine::pool::{Buffer, BufferPool};
use crate::types::Sample;

/// Buffers reserved by [`ChunkedStore::new`]
const RESERVED_CHUNKS: usize = 256;

#[derive(Debug)]
pub struct ChunkedStore {
    buffers: Vec<Buffer>,
    buffer_size: usize,
}

impl ChunkedStore {
    pub fn new(buffer_size: usize) -> Self {
        Self::with_reserved(buffer_size, RESERVED_CHUNKS * buffer_size.max(1))
    }

    /// Store that can hold `reserved_samples` without reallocating
    pub fn with_reserved(buffer_size: usize, reserved_samples: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            buffers: Vec::with_capacity(reserved_samples.div_ceil(buffer_size).max(1)),
            buffer_size,
        }
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn n_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Samples that fit without growing
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffers.len() * self.buffer_size
    }

    /// Samples the reserved buffer list can address
    #[inline]
    pub fn reserved(&self) -> usize {
        self.buffers.capacity() * self.buffer_size
    }

    /// Grow until `n_samples` fit; returns true if buffers were added
    ///
    /// May reallocate the buffer list, so not for the process thread.
    pub fn ensure_available(&mut self, n_samples: usize, pool: &BufferPool) -> bool {
        let mut grew = false;
        while self.capacity() < n_samples {
            self.buffers.push(pool.acquire());
            grew = true;
        }
        grew
    }

    /// Grow towards `n_samples` without reallocating the buffer list
    ///
    /// Returns false if the reservation ran out first.
    pub fn grow_within_reserve(&mut self, n_samples: usize, pool: &BufferPool) -> bool {
        while self.capacity() < n_samples {
            if self.buffers.len() == self.buffers.capacity() {
                return false;
            }
            self.buffers.push(pool.acquire());
        }
        true
    }

    /// Samples left in the buffer that holds `position`
    #[inline]
    pub fn space_in_buffer(&self, position: usize) -> usize {
        self.buffer_size - position % self.buffer_size
    }

    /// Contiguous slice starting at `position`, up to the end of its buffer
    pub fn slice_at(&self, position: usize, len: usize) -> Option<&[Sample]> {
        let buf = self.buffers.get(position / self.buffer_size)?;
        let start = position % self.buffer_size;
        buf.get(start..start + len)
    }

    pub fn slice_at_mut(&mut self, position: usize, len: usize) -> Option<&mut [Sample]> {
        let buf = self.buffers.get_mut(position / self.buffer_size)?;
        let start = position % self.buffer_size;
        buf.get_mut(start..start + len)
    }

    pub fn at(&self, position: usize) -> Option<Sample> {
        self.slice_at(position, 1).map(|s| s[0])
    }

    /// Copy `src` into the store at `position`, growing as needed
    pub fn write(&mut self, position: usize, src: &[Sample], pool: &BufferPool) {
        self.ensure_available(position + src.len(), pool);
        self.copy_in(position, src);
    }

    /// [`write`](Self::write) bounded by the reservation
    ///
    /// Returns how many samples were stored; the rest is dropped.
    pub fn write_within_reserve(&mut self, position: usize, src: &[Sample], pool: &BufferPool) -> usize {
        self.grow_within_reserve(position + src.len(), pool);
        let n = self.capacity().saturating_sub(position).min(src.len());
        self.copy_in(position, &src[..n]);
        n
    }

    fn copy_in(&mut self, position: usize, src: &[Sample]) {
        let mut done = 0;
        while done < src.len() {
            let pos = position + done;
            let n = self.space_in_buffer(pos).min(src.len() - done);
            if let Some(dst) = self.slice_at_mut(pos, n) {
                dst.copy_from_slice(&src[done..done + n]);
            }
            done += n;
        }
    }

    /// Copy `dst.len()` samples starting at `position` out of the store
    ///
    /// Samples past the stored buffers read as silence.
    pub fn read(&self, position: usize, dst: &mut [Sample]) {
        let mut done = 0;
        while done < dst.len() {
            let pos = position + done;
            let n = self.space_in_buffer(pos).min(dst.len() - done);
            match self.slice_at(pos, n) {
                Some(src) => dst[done..done + n].copy_from_slice(src),
                None => dst[done..done + n].fill(0.0),
            }
            done += n;
        }
    }

    /// Flat copy of the first `len` samples
    pub fn to_vec(&self, len: usize) -> Vec<Sample> {
        let mut out = vec![0.0; len];
        self.read(0, &mut out);
        out
    }

    /// Swap contents with another store of the same buffer size
    pub fn swap(&mut self, other: &mut ChunkedStore) {
        std::mem::swap(&mut self.buffers, &mut other.buffers);
        std::mem::swap(&mut self.buffer_size, &mut other.buffer_size);
    }

    /// Take all buffers out, leaving the store empty
    pub fn take_buffers(&mut self) -> std::vec::Drain<'_, Buffer> {
        self.buffers.drain(..)
    }

    /// Replace contents with `buffers`, handing the old ones back to `pool`
    pub fn replace_buffers(&mut self, buffers: impl IntoIterator<Item = Buffer>, pool: &BufferPool) {
        self.release_all(pool);
        self.buffers.extend(buffers);
    }

    /// Return every buffer to `pool`
    pub fn release_all(&mut self, pool: &BufferPool) {
        for buffer in self.buffers.drain(..) {
            pool.release(buffer);
        }
    }
}

/// Build a store holding a copy of `samples`
///
/// The store reserves room for at least `reserved_samples`.
pub fn store_from_slice(samples: &[Sample], reserved_samples: usize, pool: &Arc<BufferPool>) -> ChunkedStore {
    let mut store = ChunkedStore::with_reserved(pool.buffer_size(), reserved_samples.max(samples.len()));
    store.write(0, samples, pool);
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_across_buffers() {
        let pool = BufferPool::new(4, 8, 0);
        let mut store = ChunkedStore::new(4);
        let data: Vec<Sample> = (1..=10).map(|i| i as Sample).collect();
        store.write(1, &data, &pool);
        assert_eq!(store.n_buffers(), 3);
        assert_eq!(store.at(0), Some(0.0));
        assert_eq!(store.at(4), Some(4.0));
        assert_eq!(store.to_vec(11), [&[0.0][..], &data[..]].concat());
    }

    #[test]
    fn test_bounded_write_stops_at_reservation() {
        let pool = BufferPool::new(4, 8, 0);
        let mut store = ChunkedStore::with_reserved(4, 8);
        assert_eq!(store.reserved(), 8);

        let data: Vec<Sample> = (1..=6).map(|i| i as Sample).collect();
        assert_eq!(store.write_within_reserve(0, &data, &pool), 6);
        assert_eq!(store.write_within_reserve(6, &data, &pool), 2);
        assert_eq!(store.write_within_reserve(8, &data, &pool), 0);
        assert!(!store.grow_within_reserve(12, &pool));

        // The buffer list was never reallocated
        assert_eq!(store.reserved(), 8);
        assert_eq!(store.n_buffers(), 2);
        assert_eq!(
            store.to_vec(10),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 1.0, 2.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_read_past_end_is_silent() {
        let pool = BufferPool::new(4, 2, 0);
        let store = store_from_slice(&[1.0, 2.0], 0, &pool);
        let mut out = [9.0; 6];
        store.read(2, &mut out);
        assert_eq!(out, [0.0; 6]);
    }

    #[test]
    fn test_release_returns_to_pool() {
        let pool = BufferPool::new(4, 4, 0);
        let mut store = store_from_slice(&[1.0; 12], 0, &pool);
        assert_eq!(pool.stats().available, 1);
        store.release_all(&pool);
        assert_eq!(store.n_buffers(), 0);
        assert_eq!(pool.stats().available, 4);
    }
}
