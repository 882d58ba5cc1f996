//! External sorting of record streams larger than memory
//!
//! Records go into a [`ChunkedSortBuffer`] until it refuses one. The buffer
//! is then sorted and written out as one run on the next tape of a carousel,
//! emptied, and filling resumes. When ingestion ends, either the buffer is
//! read back directly (nothing was spilled) or the runs are merged by a
//! [`MergeEngine`].

use crate::cancel::CancellationToken;
use crate::carousel::TapeCarousel;
use crate::chunk_buffer::ChunkedSortBuffer;
use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use crate::key::ComparisonKey;
use crate::merge::MergeEngine;
use crate::record::{Record, Schema};
use crate::tape::{FileTapeFactory, Tape, TapeFactory};
use log::{debug, info, warn};
use std::sync::Arc;

/// Where the sorter is in its put / sort / get protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    /// Accepting records, nothing written to tapes yet
    Filling,
    /// Accepting records, at least one run is on tape
    Spilling,
    /// Inside `sort`, merging runs
    Merging,
    /// Sorted records can be read with `get`
    Draining,
}

/// Counters for one sort pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub records_in: u64,
    pub records_out: u64,
    /// Runs written while filling
    pub spills: usize,
    pub merge_rounds: usize,
}

/// Sorts records in memory, spilling sorted runs to tapes when the buffer is full
pub struct ExternalSorter<F: TapeFactory = FileTapeFactory> {
    schema: Arc<Schema>,
    key: ComparisonKey,
    buffer: ChunkedSortBuffer,
    factory: F,
    number_of_tapes: usize,
    max_record_size: usize,
    carousel: Option<TapeCarousel<F::Tape>>,
    merge: Option<MergeEngine<F::Tape>>,
    phase: SortPhase,
    cancel: CancellationToken,
    scratch: Vec<u8>,
    stats: SortStats,
}

impl ExternalSorter<FileTapeFactory> {
    /// Sorter whose tapes are temporary files in `config.temp_dirs`
    pub fn new(schema: Arc<Schema>, config: &SortConfig) -> SortResult<Self> {
        let factory = FileTapeFactory::new(config.temp_dirs.clone(), config.max_record_size);
        Self::with_tape_factory(schema, config, factory)
    }
}

impl<F: TapeFactory> ExternalSorter<F> {
    pub fn with_tape_factory(schema: Arc<Schema>, config: &SortConfig, factory: F) -> SortResult<Self> {
        config.validate()?;
        let key = config.build_key(&schema)?;
        let buffer = ChunkedSortBuffer::new(schema.clone(), config.buffer_capacity, config.max_chunks)?;
        Ok(Self {
            schema,
            key,
            buffer,
            factory,
            number_of_tapes: config.number_of_tapes,
            max_record_size: config.max_record_size,
            carousel: None,
            merge: None,
            phase: SortPhase::Filling,
            cancel: CancellationToken::new(),
            scratch: Vec::new(),
            stats: SortStats::default(),
        })
    }

    /// Observe `token` at every merged and emitted record
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn key(&self) -> &ComparisonKey {
        &self.key
    }

    pub fn phase(&self) -> SortPhase {
        self.phase
    }

    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Whether any run has been written to a tape in this pass
    pub fn spilled(&self) -> bool {
        self.stats.spills > 0
    }

    /// Add a copy of `record` to the sort
    pub fn put(&mut self, record: &Record) -> SortResult<()> {
        if !matches!(self.phase, SortPhase::Filling | SortPhase::Spilling) {
            return Err(SortError::invalid_state("records can't be added after sort; call reset first"));
        }
        if !self.buffer.put(record)? {
            self.spill()?;
            if !self.buffer.put(record)? {
                return Err(SortError::internal("can't store record in an emptied sort buffer"));
            }
        }
        self.stats.records_in += 1;
        Ok(())
    }

    /// Write the buffer's contents as one sorted run on the next tape
    fn spill(&mut self) -> SortResult<()> {
        let opening = self.carousel.is_none();
        if opening {
            info!(
                "sort buffer full after {} records, spilling to {} tapes",
                self.stats.records_in, self.number_of_tapes
            );
            self.carousel = Some(TapeCarousel::open(&self.factory, self.number_of_tapes)?);
            self.phase = SortPhase::Spilling;
        }
        let Some(carousel) = self.carousel.as_mut() else {
            return Err(SortError::internal("tape carousel missing while spilling"));
        };
        let tape = if opening {
            carousel.first_tape()
        } else {
            carousel.rotate()
        };

        tape.add_chunk()?;
        self.buffer.sort_all(&self.key);
        let mut written = 0u64;
        while let Some(record) = self.buffer.next_sorted(&self.key) {
            self.scratch.clear();
            record.serialize(&mut self.scratch, self.max_record_size)?;
            tape.put(&self.scratch)?;
            written += 1;
        }
        tape.flush(false)?;
        self.buffer.reset();
        self.stats.spills += 1;
        debug!("spilled run {} of {} records", self.stats.spills, written);
        Ok(())
    }

    /// End ingestion and order the records for reading with `get`
    pub fn sort(&mut self) -> SortResult<()> {
        match self.phase {
            SortPhase::Filling => {
                self.buffer.sort_all(&self.key);
                self.phase = SortPhase::Draining;
                info!("sorted {} records in memory", self.stats.records_in);
                Ok(())
            }
            SortPhase::Spilling => {
                if !self.buffer.is_empty() {
                    self.spill()?;
                }
                self.buffer.free();
                self.phase = SortPhase::Merging;

                let carousel = self
                    .carousel
                    .take()
                    .ok_or_else(|| SortError::internal("no tapes after spilling"))?;
                let mut engine = MergeEngine::new(carousel, &self.schema, self.max_record_size);
                if let Err(err) = engine.prepare(&self.factory, &self.key, &self.cancel) {
                    if let Err(release_err) = engine.release() {
                        warn!("failed to release merge tapes after error: {}", release_err);
                    }
                    return Err(err);
                }
                self.stats.merge_rounds = engine.rounds();
                self.merge = Some(engine);
                self.phase = SortPhase::Draining;
                info!(
                    "merged {} runs of {} records in {} rounds",
                    self.stats.spills, self.stats.records_in, self.stats.merge_rounds
                );
                Ok(())
            }
            SortPhase::Merging | SortPhase::Draining => {
                Err(SortError::invalid_state("sort already called; call reset first"))
            }
        }
    }

    /// Next record in key order, or `None` once all records were returned.
    ///
    /// The record is only borrowed until the next call.
    pub fn get(&mut self) -> SortResult<Option<&Record>> {
        if self.phase != SortPhase::Draining {
            return Err(SortError::invalid_state("sort must be called before reading records"));
        }
        let record = match self.merge.as_mut() {
            Some(engine) => engine.next(&self.key, &self.cancel)?,
            None => {
                self.cancel.check()?;
                self.buffer.next_sorted(&self.key)
            }
        };
        if record.is_some() {
            self.stats.records_out += 1;
        }
        Ok(record)
    }

    /// Copy the next record into `record`; `false` once all records were returned
    pub fn get_into(&mut self, record: &mut Record) -> SortResult<bool> {
        match self.get()? {
            Some(next) => {
                record.copy_from(next)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Append the next record's encoding to `buf`; `false` once all records were returned
    pub fn get_serialized(&mut self, buf: &mut Vec<u8>) -> SortResult<bool> {
        let limit = self.max_record_size;
        match self.get()? {
            Some(next) => {
                next.serialize(buf, limit)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn release_tapes(&mut self) -> SortResult<()> {
        if let Some(mut engine) = self.merge.take() {
            engine.release()?;
        }
        if let Some(carousel) = self.carousel.take() {
            carousel.free()?;
        }
        Ok(())
    }

    /// Drop all records and tapes, keeping buffer storage for the next pass
    pub fn reset(&mut self) -> SortResult<()> {
        self.release_tapes()?;
        self.buffer.reset();
        self.phase = SortPhase::Filling;
        self.stats = SortStats::default();
        Ok(())
    }

    /// Release buffer storage and tapes
    pub fn free(&mut self) -> SortResult<()> {
        self.release_tapes()?;
        self.buffer.free();
        self.phase = SortPhase::Filling;
        self.stats = SortStats::default();
        Ok(())
    }
}
