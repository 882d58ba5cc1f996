//! Growable in-memory sort buffer
//!
//! Records are copied into pre-allocated slots of fixed-capacity chunks. When
//! the current chunk is full the next one is allocated (or reused from an
//! earlier pass) with a geometrically larger capacity, up to a maximum chunk
//! count. Each chunk is sorted on its own; reading back merges the chunk heads.

use crate::error::{SortError, SortResult};
use crate::key::ComparisonKey;
use crate::record::{Record, Schema};
use log::debug;
use std::sync::Arc;

/// Chunk capacity grows by `GROWTH_NUMERATOR / GROWTH_DENOMINATOR`
const GROWTH_NUMERATOR: usize = 16;
const GROWTH_DENOMINATOR: usize = 10;
/// Grown capacities are rounded to a multiple of this many records
const CAPACITY_ALIGNMENT: usize = 32;

/// Default record capacity of the first chunk
pub const DEFAULT_BUFFER_CAPACITY: usize = 2000;
/// Default number of chunks a buffer may grow to
pub const DEFAULT_MAX_CHUNKS: usize = 8;

/// Capacity of the chunk that follows one of `previous` records
pub fn grown_capacity(previous: usize) -> usize {
    ((previous * GROWTH_NUMERATOR / GROWTH_DENOMINATOR) / CAPACITY_ALIGNMENT + 1) * CAPACITY_ALIGNMENT
}

/// Fixed-capacity slot array with fill and read counters.
///
/// Slots past `fill` keep their last contents so their string and byte
/// buffers can be reused by the next pass.
#[derive(Debug)]
struct Chunk {
    slots: Vec<Record>,
    capacity: usize,
    fill: usize,
    cursor: usize,
}

impl Chunk {
    fn allocate(capacity: usize) -> SortResult<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| SortError::OutOfMemory {
                requested: capacity,
            })?;
        Ok(Self {
            slots,
            capacity,
            fill: 0,
            cursor: 0,
        })
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.fill >= self.capacity
    }

    fn put(&mut self, record: &Record) -> SortResult<bool> {
        if self.is_full() {
            return Ok(false);
        }
        if self.fill < self.slots.len() {
            self.slots[self.fill].copy_from(record)?;
        } else {
            self.slots.push(record.clone());
        }
        self.fill += 1;
        Ok(true)
    }

    fn sort(&mut self, key: &ComparisonKey) {
        self.slots[..self.fill].sort_unstable_by(|a, b| key.compare_total(a, b));
    }

    #[inline]
    fn peek(&self) -> Option<&Record> {
        if self.cursor < self.fill {
            Some(&self.slots[self.cursor])
        } else {
            None
        }
    }

    #[inline]
    fn next(&mut self) -> Option<&Record> {
        if self.cursor < self.fill {
            self.cursor += 1;
            Some(&self.slots[self.cursor - 1])
        } else {
            None
        }
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn reset(&mut self) {
        self.fill = 0;
        self.cursor = 0;
    }
}

/// In-memory pool of sortable record chunks
#[derive(Debug)]
pub struct ChunkedSortBuffer {
    schema: Arc<Schema>,
    chunks: Vec<Chunk>,
    current: usize,
    initial_capacity: usize,
    max_chunks: usize,
    len: usize,
    /// First chunk that may still hold unread records
    first_live: usize,
}

impl ChunkedSortBuffer {
    /// Create a buffer whose first chunk holds `initial_capacity` records
    pub fn new(schema: Arc<Schema>, initial_capacity: usize, max_chunks: usize) -> SortResult<Self> {
        if initial_capacity == 0 {
            return Err(SortError::invalid_config("buffer capacity must be positive"));
        }
        if max_chunks == 0 {
            return Err(SortError::invalid_config("maximum chunk count must be positive"));
        }
        Ok(Self {
            schema,
            chunks: Vec::new(),
            current: 0,
            initial_capacity,
            max_chunks,
            len: 0,
            first_live: 0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of records stored in this pass
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks allocated so far
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total record capacity of the allocated chunks
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(|c| c.capacity).sum()
    }

    /// Copy `record` into the buffer.
    ///
    /// Returns `Ok(false)`, leaving the buffer untouched, once the last
    /// allowed chunk is full.
    pub fn put(&mut self, record: &Record) -> SortResult<bool> {
        if !Arc::ptr_eq(&self.schema, record.schema()) {
            return Err(SortError::SchemaMismatch {
                expected: self.schema.name().to_string(),
                found: record.schema().name().to_string(),
            });
        }
        if self.chunks.is_empty() {
            self.chunks.push(Chunk::allocate(self.initial_capacity)?);
            self.current = 0;
        }
        if self.chunks[self.current].put(record)? {
            self.len += 1;
            return Ok(true);
        }
        if !self.secure_space()? {
            return Ok(false);
        }
        if !self.chunks[self.current].put(record)? {
            return Err(SortError::internal(
                "can't store record in newly allocated chunk",
            ));
        }
        self.len += 1;
        Ok(true)
    }

    /// Move to the next chunk, allocating it if this is its first use
    fn secure_space(&mut self) -> SortResult<bool> {
        if self.current + 1 >= self.max_chunks {
            return Ok(false);
        }
        self.current += 1;
        if self.current >= self.chunks.len() {
            let capacity = grown_capacity(self.chunks[self.current - 1].capacity);
            debug!(
                "allocating sort chunk {} with capacity {} records",
                self.current, capacity
            );
            self.chunks.push(Chunk::allocate(capacity)?);
        }
        Ok(true)
    }

    /// Sort every chunk and position it for reading from the start.
    ///
    /// Sorting and reading back both tie nulls so that they see one total order.
    pub fn sort_all(&mut self, key: &ComparisonKey) {
        for chunk in &mut self.chunks {
            chunk.sort(key);
            chunk.rewind();
        }
        self.first_live = 0;
    }

    /// Next record in key order, or `None` when every chunk is drained
    pub fn next_sorted(&mut self, key: &ComparisonKey) -> Option<&Record> {
        if self.chunks.len() == 1 {
            return self.chunks[0].next();
        }
        let index = self.select_lowest(key)?;
        self.chunks[index].next()
    }

    /// Index of the chunk holding the lowest head record; first chunk wins ties
    fn select_lowest(&mut self, key: &ComparisonKey) -> Option<usize> {
        let first = (self.first_live..self.chunks.len()).find(|&i| self.chunks[i].peek().is_some())?;
        self.first_live = first;

        let mut lowest = first;
        for i in first + 1..self.chunks.len() {
            if let (Some(candidate), Some(best)) = (self.chunks[i].peek(), self.chunks[lowest].peek()) {
                if key.compare_total(best, candidate).is_gt() {
                    lowest = i;
                }
            }
        }
        Some(lowest)
    }

    /// Restart reading from the first sorted record
    pub fn rewind(&mut self) {
        for chunk in &mut self.chunks {
            chunk.rewind();
        }
        self.first_live = 0;
    }

    /// Empty every chunk, keeping the allocated slots for the next pass
    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.reset();
        }
        self.current = 0;
        self.len = 0;
        self.first_live = 0;
    }

    /// Release all chunk storage
    pub fn free(&mut self) {
        self.chunks = Vec::new();
        self.current = 0;
        self.len = 0;
        self.first_live = 0;
    }
}
