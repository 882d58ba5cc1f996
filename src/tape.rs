//! Sorted-run storage ("tapes")
//!
//! A tape is an append-only sequence of runs ("chunks"), each an already sorted
//! sequence of serialized records. Runs are written one at a time with
//! `add_chunk` + `put`*, then read back after `rewind`, one run at a time,
//! moving between runs with `next_chunk`.

use crate::codec::read_frame;
use crate::error::{SortContext, SortError, SortResult};
use crate::record::Record;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Storage for sorted runs
pub trait Tape {
    /// Start a new run; following `put` calls append to it
    fn add_chunk(&mut self) -> SortResult<()>;

    /// Append one serialized record to the current run
    fn put(&mut self, data: &[u8]) -> SortResult<()>;

    /// Push buffered writes down; `final_flush` also syncs to stable storage
    fn flush(&mut self, final_flush: bool) -> SortResult<()>;

    /// Read the next record of the current run into `record`.
    ///
    /// Returns `Ok(false)` when the current run is exhausted.
    fn get(&mut self, record: &mut Record) -> SortResult<bool>;

    /// Move reading to the next run; `Ok(false)` when there is none
    fn next_chunk(&mut self) -> SortResult<bool>;

    /// Number of runs written since the last `clear`
    fn chunk_count(&self) -> usize;

    /// Position reading at the start of the first run
    fn rewind(&mut self) -> SortResult<()>;

    /// Drop all runs, keeping the tape usable for writing
    fn clear(&mut self) -> SortResult<()>;

    /// Release the tape's storage
    fn free(&mut self) -> SortResult<()>;
}

/// Creates the tapes of a carousel
pub trait TapeFactory {
    type Tape: Tape;

    fn create_tape(&self, index: usize) -> SortResult<Self::Tape>;
}

#[derive(Debug, Clone, Copy)]
struct RunInfo {
    offset: u64,
    records: u64,
}

enum Handle {
    Write(BufWriter<File>),
    Read(BufReader<File>),
}

/// Tape backed by an anonymous temporary file.
///
/// Records are framed as a little-endian `u32` length followed by the payload.
/// The file is unlinked at creation and disappears when the tape is dropped.
pub struct FileTape {
    handle: Option<Handle>,
    runs: Vec<RunInfo>,
    end: u64,
    read_run: usize,
    remaining: u64,
    scratch: Vec<u8>,
    max_record_size: usize,
    index: usize,
}

impl FileTape {
    /// Create a tape in `dir`, or in the system temporary directory
    pub fn create(dir: Option<&PathBuf>, index: usize, max_record_size: usize) -> SortResult<Self> {
        let file = match dir {
            Some(path) => tempfile::tempfile_in(path)
                .with_context(|| format!("creating tape {index} in {}", path.display()))?,
            None => tempfile::tempfile().with_context(|| format!("creating tape {index}"))?,
        };
        Ok(Self {
            handle: Some(Handle::Write(BufWriter::new(file))),
            runs: Vec::new(),
            end: 0,
            read_run: 0,
            remaining: 0,
            scratch: Vec::new(),
            max_record_size,
            index,
        })
    }

    fn take_file(&mut self) -> SortResult<File> {
        match self.handle.take() {
            Some(Handle::Write(writer)) => writer
                .into_inner()
                .map_err(|e| SortError::Io(e.into_error())),
            Some(Handle::Read(reader)) => Ok(reader.into_inner()),
            None => Err(SortError::invalid_state("tape has been freed")),
        }
    }

    fn writer(&mut self) -> SortResult<&mut BufWriter<File>> {
        if matches!(self.handle, Some(Handle::Read(_))) {
            let mut file = self.take_file()?;
            file.seek(SeekFrom::Start(self.end))?;
            self.handle = Some(Handle::Write(BufWriter::new(file)));
        }
        match &mut self.handle {
            Some(Handle::Write(writer)) => Ok(writer),
            Some(Handle::Read(_)) => Err(SortError::internal("tape stuck in read mode")),
            None => Err(SortError::invalid_state("tape has been freed")),
        }
    }

    fn reader(&mut self) -> SortResult<&mut BufReader<File>> {
        match &mut self.handle {
            Some(Handle::Read(reader)) => Ok(reader),
            Some(Handle::Write(_)) => Err(SortError::invalid_state("tape must be rewound before reading")),
            None => Err(SortError::invalid_state("tape has been freed")),
        }
    }

    fn seek_run(&mut self, run: usize) -> SortResult<()> {
        let info = self.runs[run];
        self.reader()?.seek(SeekFrom::Start(info.offset))?;
        self.read_run = run;
        self.remaining = info.records;
        Ok(())
    }
}

impl Tape for FileTape {
    fn add_chunk(&mut self) -> SortResult<()> {
        self.writer()?;
        self.runs.push(RunInfo {
            offset: self.end,
            records: 0,
        });
        Ok(())
    }

    fn put(&mut self, data: &[u8]) -> SortResult<()> {
        if self.runs.is_empty() {
            return Err(SortError::invalid_state("put on a tape with no open run"));
        }
        let len = u32::try_from(data.len()).map_err(|_| SortError::RecordTooLarge {
            size: data.len(),
            limit: self.max_record_size,
        })?;
        let index = self.index;
        let writer = self.writer()?;
        writer
            .write_u32::<LittleEndian>(len)
            .and_then(|_| writer.write_all(data))
            .with_context(|| format!("writing to tape {index}"))?;
        self.end += 4 + u64::from(len);
        if let Some(run) = self.runs.last_mut() {
            run.records += 1;
        }
        Ok(())
    }

    fn flush(&mut self, final_flush: bool) -> SortResult<()> {
        if let Some(Handle::Write(writer)) = &mut self.handle {
            writer.flush()?;
            if final_flush {
                writer.get_ref().sync_data()?;
            }
        }
        Ok(())
    }

    fn get(&mut self, record: &mut Record) -> SortResult<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        let reader = match &mut self.handle {
            Some(Handle::Read(reader)) => reader,
            _ => return Err(SortError::invalid_state("tape must be rewound before reading")),
        };
        let len = reader.read_u32::<LittleEndian>()? as usize;
        if len > self.max_record_size {
            return Err(SortError::corrupt_run(&format!(
                "record frame of {len} bytes on tape {} exceeds {}",
                self.index, self.max_record_size
            )));
        }
        read_frame(reader, &mut self.scratch, len)?;
        record.deserialize(&mut self.scratch.as_slice())?;
        self.remaining -= 1;
        Ok(true)
    }

    fn next_chunk(&mut self) -> SortResult<bool> {
        let next = self.read_run + 1;
        if next < self.runs.len() {
            self.seek_run(next)?;
            Ok(true)
        } else {
            self.read_run = self.runs.len();
            self.remaining = 0;
            Ok(false)
        }
    }

    fn chunk_count(&self) -> usize {
        self.runs.len()
    }

    fn rewind(&mut self) -> SortResult<()> {
        let file = self.take_file()?;
        self.handle = Some(Handle::Read(BufReader::new(file)));
        if self.runs.is_empty() {
            self.read_run = 0;
            self.remaining = 0;
            return Ok(());
        }
        self.seek_run(0)
    }

    fn clear(&mut self) -> SortResult<()> {
        let mut file = self.take_file()?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.handle = Some(Handle::Write(BufWriter::new(file)));
        debug!("cleared tape {} ({} runs, {} bytes)", self.index, self.runs.len(), self.end);
        self.runs.clear();
        self.end = 0;
        self.read_run = 0;
        self.remaining = 0;
        Ok(())
    }

    fn free(&mut self) -> SortResult<()> {
        self.handle = None;
        self.runs = Vec::new();
        self.scratch = Vec::new();
        self.end = 0;
        self.read_run = 0;
        self.remaining = 0;
        Ok(())
    }
}

/// Creates [`FileTape`]s, spreading them over the configured directories
#[derive(Debug, Clone)]
pub struct FileTapeFactory {
    temp_dirs: Vec<PathBuf>,
    max_record_size: usize,
}

impl FileTapeFactory {
    pub fn new(temp_dirs: Vec<PathBuf>, max_record_size: usize) -> Self {
        Self {
            temp_dirs,
            max_record_size,
        }
    }
}

impl TapeFactory for FileTapeFactory {
    type Tape = FileTape;

    fn create_tape(&self, index: usize) -> SortResult<FileTape> {
        let dir = if self.temp_dirs.is_empty() {
            None
        } else {
            Some(&self.temp_dirs[index % self.temp_dirs.len()])
        };
        FileTape::create(dir, index, self.max_record_size)
    }
}

/// Tape that keeps its runs in memory
#[derive(Debug, Default)]
pub struct MemoryTape {
    runs: Vec<Vec<Vec<u8>>>,
    read_run: usize,
    read_pos: usize,
    reading: bool,
}

impl MemoryTape {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tape for MemoryTape {
    fn add_chunk(&mut self) -> SortResult<()> {
        self.reading = false;
        self.runs.push(Vec::new());
        Ok(())
    }

    fn put(&mut self, data: &[u8]) -> SortResult<()> {
        match self.runs.last_mut() {
            Some(run) => {
                run.push(data.to_vec());
                Ok(())
            }
            None => Err(SortError::invalid_state("put on a tape with no open run")),
        }
    }

    fn flush(&mut self, _final_flush: bool) -> SortResult<()> {
        Ok(())
    }

    fn get(&mut self, record: &mut Record) -> SortResult<bool> {
        if !self.reading {
            return Err(SortError::invalid_state("tape must be rewound before reading"));
        }
        let Some(bytes) = self.runs.get(self.read_run).and_then(|run| run.get(self.read_pos)) else {
            return Ok(false);
        };
        record.deserialize(&mut bytes.as_slice())?;
        self.read_pos += 1;
        Ok(true)
    }

    fn next_chunk(&mut self) -> SortResult<bool> {
        self.read_run = (self.read_run + 1).min(self.runs.len());
        self.read_pos = 0;
        Ok(self.read_run < self.runs.len())
    }

    fn chunk_count(&self) -> usize {
        self.runs.len()
    }

    fn rewind(&mut self) -> SortResult<()> {
        self.reading = true;
        self.read_run = 0;
        self.read_pos = 0;
        Ok(())
    }

    fn clear(&mut self) -> SortResult<()> {
        self.runs.clear();
        self.reading = false;
        self.read_run = 0;
        self.read_pos = 0;
        Ok(())
    }

    fn free(&mut self) -> SortResult<()> {
        self.runs = Vec::new();
        self.clear()
    }
}

/// Creates [`MemoryTape`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTapeFactory;

impl TapeFactory for MemoryTapeFactory {
    type Tape = MemoryTape;

    fn create_tape(&self, _index: usize) -> SortResult<MemoryTape> {
        Ok(MemoryTape::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_RECORD_SIZE;
    use crate::record::{Schema, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn schema() -> Arc<Schema> {
        Schema::parse("kv", "k:long,v:string").expect("valid schema")
    }

    fn encode(schema: &Arc<Schema>, k: i64) -> Vec<u8> {
        let record = Record::with_values(schema.clone(), vec![Value::Long(k), Value::String(format!("v{k}"))])
            .expect("valid record");
        let mut buf = Vec::new();
        record.serialize(&mut buf, DEFAULT_MAX_RECORD_SIZE).expect("fits");
        buf
    }

    fn read_run<T: Tape>(tape: &mut T, schema: &Arc<Schema>) -> Vec<i64> {
        let mut record = Record::new(schema.clone());
        let mut keys = Vec::new();
        while tape.get(&mut record).expect("read") {
            match record.field(0) {
                Value::Long(k) => keys.push(*k),
                other => panic!("unexpected value {other:?}"),
            }
        }
        keys
    }

    fn exercise_runs<T: Tape>(tape: &mut T) {
        let schema = schema();
        for run in [vec![1, 4, 9], vec![2, 3], vec![7]] {
            tape.add_chunk().expect("add chunk");
            for k in run {
                tape.put(&encode(&schema, k)).expect("put");
            }
            tape.flush(false).expect("flush");
        }
        assert_eq!(tape.chunk_count(), 3);

        tape.rewind().expect("rewind");
        assert_eq!(read_run(tape, &schema), vec![1, 4, 9]);
        assert!(tape.next_chunk().expect("next"));
        assert_eq!(read_run(tape, &schema), vec![2, 3]);
        assert!(tape.next_chunk().expect("next"));
        assert_eq!(read_run(tape, &schema), vec![7]);
        assert!(!tape.next_chunk().expect("next"));
        assert!(read_run(tape, &schema).is_empty());

        // a second pass sees the same runs
        tape.rewind().expect("rewind");
        assert_eq!(read_run(tape, &schema), vec![1, 4, 9]);

        tape.clear().expect("clear");
        assert_eq!(tape.chunk_count(), 0);
        tape.add_chunk().expect("add chunk");
        tape.put(&encode(&schema, 42)).expect("put");
        tape.flush(true).expect("flush");
        tape.rewind().expect("rewind");
        assert_eq!(read_run(tape, &schema), vec![42]);
        assert!(!tape.next_chunk().expect("next"));
    }

    #[test]
    fn test_file_tape_runs() {
        let dir = TempDir::new().expect("temp dir");
        let mut tape = FileTape::create(Some(&dir.path().to_path_buf()), 0, DEFAULT_MAX_RECORD_SIZE)
            .expect("tape");
        exercise_runs(&mut tape);
    }

    #[test]
    fn test_memory_tape_runs() {
        let mut tape = MemoryTape::new();
        exercise_runs(&mut tape);
    }

    #[test]
    fn test_put_without_run_is_rejected() {
        let mut tape = MemoryTapeFactory.create_tape(0).expect("tape");
        assert!(matches!(tape.put(b"x"), Err(SortError::InvalidState { .. })));

        let factory = FileTapeFactory::new(Vec::new(), DEFAULT_MAX_RECORD_SIZE);
        let mut tape = factory.create_tape(1).expect("tape");
        assert!(matches!(tape.put(b"x"), Err(SortError::InvalidState { .. })));
    }

    #[test]
    fn test_file_tape_requires_rewind_before_read() {
        let schema = schema();
        let factory = FileTapeFactory::new(Vec::new(), DEFAULT_MAX_RECORD_SIZE);
        let mut tape = factory.create_tape(0).expect("tape");
        tape.add_chunk().expect("add chunk");
        tape.put(&encode(&schema, 1)).expect("put");

        let mut record = Record::new(schema);
        // nothing is positioned for reading yet
        assert!(!tape.get(&mut record).expect("get"));
        tape.rewind().expect("rewind");
        assert!(tape.get(&mut record).expect("get"));
    }

    #[test]
    fn test_oversized_frame_is_corrupt() {
        let schema = schema();
        let mut tape = FileTape::create(None, 0, 8).expect("tape");
        tape.add_chunk().expect("add chunk");
        tape.put(&encode(&schema, 123_456)).expect("put");
        tape.rewind().expect("rewind");
        let mut record = Record::new(schema);
        assert!(matches!(tape.get(&mut record), Err(SortError::CorruptRun { .. })));
    }

    #[test]
    fn test_free_releases_tape() {
        let mut tape = FileTape::create(None, 0, DEFAULT_MAX_RECORD_SIZE).expect("tape");
        tape.free().expect("free");
        assert!(matches!(tape.add_chunk(), Err(SortError::InvalidState { .. })));
    }
}
