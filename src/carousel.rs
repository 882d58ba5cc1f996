//! Fixed-size round-robin pool of tapes

use crate::error::{SortError, SortResult};
use crate::tape::{Tape, TapeFactory};

/// Tapes visited in turn when a new run must be written
#[derive(Debug)]
pub struct TapeCarousel<T: Tape> {
    tapes: Vec<T>,
    current: usize,
}

impl<T: Tape> TapeCarousel<T> {
    /// Create `count` tapes with `factory`
    pub fn open<F>(factory: &F, count: usize) -> SortResult<Self>
    where
        F: TapeFactory<Tape = T>,
    {
        if count == 0 {
            return Err(SortError::invalid_config("number of tapes must be positive"));
        }
        let tapes = (0..count)
            .map(|index| factory.create_tape(index))
            .collect::<SortResult<Vec<_>>>()?;
        Ok(Self { tapes, current: 0 })
    }

    /// Select and return the first tape
    pub fn first_tape(&mut self) -> &mut T {
        self.current = 0;
        &mut self.tapes[0]
    }

    /// Select and return the following tape, or `None` past the last one
    pub fn next_tape(&mut self) -> Option<&mut T> {
        if self.current + 1 < self.tapes.len() {
            self.current += 1;
            Some(&mut self.tapes[self.current])
        } else {
            None
        }
    }

    /// Select the following tape, wrapping to the first
    pub fn rotate(&mut self) -> &mut T {
        self.current = (self.current + 1) % self.tapes.len();
        &mut self.tapes[self.current]
    }

    /// Currently selected tape
    pub fn current_tape(&mut self) -> &mut T {
        &mut self.tapes[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn tape(&mut self, index: usize) -> &mut T {
        &mut self.tapes[index]
    }

    pub fn tape_count(&self) -> usize {
        self.tapes.len()
    }

    /// Runs stored across all tapes
    pub fn total_chunks(&self) -> usize {
        self.tapes.iter().map(Tape::chunk_count).sum()
    }

    /// Rewind every tape for reading
    pub fn rewind(&mut self) -> SortResult<()> {
        self.current = 0;
        self.tapes.iter_mut().try_for_each(Tape::rewind)
    }

    /// Drop the runs of every tape
    pub fn clear(&mut self) -> SortResult<()> {
        self.current = 0;
        self.tapes.iter_mut().try_for_each(Tape::clear)
    }

    /// Advance every tape to its next run; true if any tape has one
    pub fn next_chunk_all(&mut self) -> SortResult<bool> {
        let mut has_more = false;
        for tape in &mut self.tapes {
            if tape.next_chunk()? {
                has_more = true;
            }
        }
        Ok(has_more)
    }

    /// Release every tape
    pub fn free(mut self) -> SortResult<()> {
        self.tapes.iter_mut().try_for_each(Tape::free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::{MemoryTape, MemoryTapeFactory};

    #[test]
    fn test_round_robin_selection() {
        let mut carousel: TapeCarousel<MemoryTape> =
            TapeCarousel::open(&MemoryTapeFactory, 3).expect("open");
        carousel.first_tape();
        assert_eq!(carousel.current_index(), 0);
        assert!(carousel.next_tape().is_some());
        assert!(carousel.next_tape().is_some());
        assert_eq!(carousel.current_index(), 2);
        assert!(carousel.next_tape().is_none());

        carousel.rotate();
        assert_eq!(carousel.current_index(), 0);
        carousel.rotate();
        assert_eq!(carousel.current_index(), 1);
    }

    #[test]
    fn test_next_chunk_all_reports_any_remaining() {
        let mut carousel = TapeCarousel::open(&MemoryTapeFactory, 2).expect("open");
        for _ in 0..2 {
            carousel.first_tape().add_chunk().expect("add chunk");
        }
        carousel.tape(1).add_chunk().expect("add chunk");
        assert_eq!(carousel.total_chunks(), 3);

        carousel.rewind().expect("rewind");
        assert!(carousel.next_chunk_all().expect("advance"));
        assert!(!carousel.next_chunk_all().expect("advance"));

        carousel.clear().expect("clear");
        assert_eq!(carousel.total_chunks(), 0);
        carousel.free().expect("free");
    }

    #[test]
    fn test_zero_tapes_is_invalid() {
        assert!(TapeCarousel::open(&MemoryTapeFactory, 0).is_err());
    }
}
