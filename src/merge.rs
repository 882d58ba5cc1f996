//! Multi-round k-way merge of sorted runs
//!
//! The source carousel holds the runs written while spilling. Each merge round
//! reads one "generation" of runs (the i-th run of every tape) at a time,
//! merges it into a single run on the next target tape, and continues until
//! every source run is consumed. Source and target then swap roles. Rounds
//! repeat until the first tape holds a single run, after which the final
//! merge streams records to the caller one `next` call at a time.

use crate::cancel::CancellationToken;
use crate::carousel::TapeCarousel;
use crate::error::SortResult;
use crate::key::ComparisonKey;
use crate::record::{Record, Schema};
use crate::tape::{Tape, TapeFactory};
use log::{debug, info};
use std::sync::Arc;

/// Merges the runs of a tape carousel into one ordered stream
pub struct MergeEngine<T: Tape> {
    source: Option<TapeCarousel<T>>,
    /// Current record of each source tape
    heads: Vec<Record>,
    /// Whether `heads[i]` holds an unconsumed record
    live: Vec<bool>,
    /// Tape whose head was handed out by the last `next` call
    pending_refill: Option<usize>,
    scratch: Vec<u8>,
    max_record_size: usize,
    rounds: usize,
}

impl<T: Tape> MergeEngine<T> {
    pub fn new(source: TapeCarousel<T>, schema: &Arc<Schema>, max_record_size: usize) -> Self {
        let width = source.tape_count();
        Self {
            source: Some(source),
            heads: (0..width).map(|_| Record::new(schema.clone())).collect(),
            live: vec![false; width],
            pending_refill: None,
            scratch: Vec::with_capacity(max_record_size),
            max_record_size,
            rounds: 0,
        }
    }

    /// Number of merge rounds performed before the final merge
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Run merge rounds until each source tape holds at most one run, then
    /// position the final merge.
    pub fn prepare<F>(&mut self, factory: &F, key: &ComparisonKey, cancel: &CancellationToken) -> SortResult<()>
    where
        F: TapeFactory<Tape = T>,
    {
        let Some(mut source) = self.source.take() else {
            return Ok(());
        };
        let result = self.merge_rounds(&mut source, factory, key, cancel);
        self.source = Some(source);
        result?;
        self.start_final()
    }

    fn merge_rounds<F>(
        &mut self,
        source: &mut TapeCarousel<T>,
        factory: &F,
        key: &ComparisonKey,
        cancel: &CancellationToken,
    ) -> SortResult<()>
    where
        F: TapeFactory<Tape = T>,
    {
        source.rewind()?;
        if source.first_tape().chunk_count() <= 1 {
            return Ok(());
        }

        let mut target = TapeCarousel::open(factory, source.tape_count())?;
        while source.first_tape().chunk_count() > 1 {
            info!(
                "merge round {}: {} runs on {} tapes",
                self.rounds + 1,
                source.total_chunks(),
                source.tape_count()
            );
            self.merge_generations(source, &mut target, key, cancel)?;
            target.rewind()?;
            source.clear()?;
            std::mem::swap(source, &mut target);
            self.rounds += 1;
            debug!("merge round {} left {} runs", self.rounds, source.total_chunks());
        }
        target.free()
    }

    /// Merge every generation of source runs into new runs on `target`
    fn merge_generations(
        &mut self,
        source: &mut TapeCarousel<T>,
        target: &mut TapeCarousel<T>,
        key: &ComparisonKey,
        cancel: &CancellationToken,
    ) -> SortResult<()> {
        target.first_tape();
        loop {
            self.load_frontier(source)?;
            if !self.live.iter().any(|&l| l) {
                break;
            }

            let tape = target.current_tape();
            tape.add_chunk()?;
            let mut written = 0u64;
            while let Some(index) = self.select(key) {
                cancel.check()?;
                self.scratch.clear();
                self.heads[index].serialize(&mut self.scratch, self.max_record_size)?;
                tape.put(&self.scratch)?;
                written += 1;
                self.live[index] = source.tape(index).get(&mut self.heads[index])?;
            }
            tape.flush(false)?;
            debug!("merged run of {} records onto target tape {}", written, target.current_index());
            target.rotate();

            if !source.next_chunk_all()? {
                break;
            }
        }
        Ok(())
    }

    /// Read the first record of the current run of every tape
    fn load_frontier(&mut self, source: &mut TapeCarousel<T>) -> SortResult<()> {
        for (index, head) in self.heads.iter_mut().enumerate() {
            self.live[index] = source.tape(index).get(head)?;
        }
        Ok(())
    }

    /// Live tape holding the lowest head record; the first index wins ties
    fn select(&self, key: &ComparisonKey) -> Option<usize> {
        let mut lowest = self.live.iter().position(|&l| l)?;
        for index in lowest + 1..self.heads.len() {
            if self.live[index] && key.compare_total(&self.heads[lowest], &self.heads[index]).is_gt() {
                lowest = index;
            }
        }
        Some(lowest)
    }

    fn start_final(&mut self) -> SortResult<()> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        source.rewind()?;
        for (index, head) in self.heads.iter_mut().enumerate() {
            self.live[index] = source.tape(index).get(head)?;
        }
        self.pending_refill = None;
        Ok(())
    }

    /// Next record of the final merge, or `None` once every tape is drained.
    ///
    /// The returned record stays valid until the following call, which first
    /// refills the tape it came from.
    pub fn next(&mut self, key: &ComparisonKey, cancel: &CancellationToken) -> SortResult<Option<&Record>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        if let Some(index) = self.pending_refill.take() {
            self.live[index] = source.tape(index).get(&mut self.heads[index])?;
        }
        match self.select(key) {
            Some(index) => {
                cancel.check()?;
                self.pending_refill = Some(index);
                Ok(Some(&self.heads[index]))
            }
            None => {
                self.release()?;
                Ok(None)
            }
        }
    }

    /// Drop the source carousel and its tapes
    pub fn release(&mut self) -> SortResult<()> {
        self.pending_refill = None;
        self.live.iter_mut().for_each(|l| *l = false);
        match self.source.take() {
            Some(source) => source.free(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_RECORD_SIZE;
    use crate::error::SortError;
    use crate::record::Value;
    use crate::tape::{FileTapeFactory, MemoryTape, MemoryTapeFactory};

    fn schema() -> Arc<Schema> {
        Schema::parse("ints", "n:long").expect("valid schema")
    }

    fn write_runs<T: Tape>(carousel: &mut TapeCarousel<T>, schema: &Arc<Schema>, runs: &[Vec<i64>]) {
        let mut record = Record::new(schema.clone());
        let mut buf = Vec::new();
        for (i, run) in runs.iter().enumerate() {
            let tape = if i == 0 { carousel.first_tape() } else { carousel.rotate() };
            tape.add_chunk().expect("add chunk");
            for &n in run {
                record.set(0, Value::Long(n)).expect("set");
                buf.clear();
                record.serialize(&mut buf, DEFAULT_MAX_RECORD_SIZE).expect("fits");
                tape.put(&buf).expect("put");
            }
            tape.flush(false).expect("flush");
        }
    }

    fn collect<T: Tape>(engine: &mut MergeEngine<T>, key: &ComparisonKey) -> Vec<i64> {
        let cancel = CancellationToken::new();
        let mut out = Vec::new();
        while let Some(record) = engine.next(key, &cancel).expect("next") {
            match record.field(0) {
                Value::Long(n) => out.push(*n),
                other => panic!("unexpected value {other:?}"),
            }
        }
        out
    }

    #[test]
    fn test_single_generation_final_merge() {
        let schema = schema();
        let key = ComparisonKey::ascending(&["n"], &schema).expect("resolves");
        let mut carousel = TapeCarousel::open(&MemoryTapeFactory, 3).expect("open");
        write_runs(&mut carousel, &schema, &[vec![1, 5, 9], vec![2, 6], vec![3, 4, 7, 8]]);

        let mut engine = MergeEngine::new(carousel, &schema, DEFAULT_MAX_RECORD_SIZE);
        engine
            .prepare(&MemoryTapeFactory, &key, &CancellationToken::new())
            .expect("prepare");
        assert_eq!(engine.rounds(), 0);
        assert_eq!(collect(&mut engine, &key), (1..=9).collect::<Vec<_>>());
        // exhausted engine keeps answering None
        assert!(engine.next(&key, &CancellationToken::new()).expect("next").is_none());
    }

    #[test]
    fn test_multiple_rounds() {
        let schema = schema();
        let key = ComparisonKey::ascending(&["n"], &schema).expect("resolves");
        let mut carousel: TapeCarousel<MemoryTape> =
            TapeCarousel::open(&MemoryTapeFactory, 2).expect("open");
        // 7 runs over 2 tapes: tape 0 gets runs 0,2,4,6
        let runs: Vec<Vec<i64>> = (0..7).map(|r| vec![r, r + 10, r + 20]).collect();
        write_runs(&mut carousel, &schema, &runs);

        let mut engine = MergeEngine::new(carousel, &schema, DEFAULT_MAX_RECORD_SIZE);
        engine
            .prepare(&MemoryTapeFactory, &key, &CancellationToken::new())
            .expect("prepare");
        assert!(engine.rounds() >= 2);

        let mut expected: Vec<i64> = runs.concat();
        expected.sort_unstable();
        assert_eq!(collect(&mut engine, &key), expected);
    }

    #[test]
    fn test_rounds_on_file_tapes() {
        let schema = schema();
        let key = ComparisonKey::ascending(&["n"], &schema).expect("resolves");
        let factory = FileTapeFactory::new(Vec::new(), DEFAULT_MAX_RECORD_SIZE);
        let mut carousel = TapeCarousel::open(&factory, 3).expect("open");
        let runs: Vec<Vec<i64>> = (0..10).map(|r| (0..5).map(|i| i * 10 + r).collect()).collect();
        write_runs(&mut carousel, &schema, &runs);

        let mut engine = MergeEngine::new(carousel, &schema, DEFAULT_MAX_RECORD_SIZE);
        engine
            .prepare(&factory, &key, &CancellationToken::new())
            .expect("prepare");
        assert_eq!(collect(&mut engine, &key), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancelled_merge_round() {
        let schema = schema();
        let key = ComparisonKey::ascending(&["n"], &schema).expect("resolves");
        let mut carousel = TapeCarousel::open(&MemoryTapeFactory, 2).expect("open");
        write_runs(&mut carousel, &schema, &[vec![1], vec![2], vec![3]]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut engine = MergeEngine::new(carousel, &schema, DEFAULT_MAX_RECORD_SIZE);
        let err = engine
            .prepare(&MemoryTapeFactory, &key, &cancel)
            .expect_err("cancelled");
        assert!(matches!(err, SortError::Cancelled));
        engine.release().expect("release");
    }

    #[test]
    fn test_descending_key() {
        let schema = schema();
        let key = ComparisonKey::resolve(&["n"], &[crate::key::Direction::Descending], &schema)
            .expect("resolves");
        let mut carousel = TapeCarousel::open(&MemoryTapeFactory, 2).expect("open");
        write_runs(&mut carousel, &schema, &[vec![9, 3], vec![8, 1], vec![7, 2]]);

        let mut engine = MergeEngine::new(carousel, &schema, DEFAULT_MAX_RECORD_SIZE);
        engine
            .prepare(&MemoryTapeFactory, &key, &CancellationToken::new())
            .expect("prepare");
        assert_eq!(collect(&mut engine, &key), vec![9, 8, 7, 3, 2, 1]);
    }
}
