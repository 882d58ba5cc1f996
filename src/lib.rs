//! External sorting of typed records
//!
//! Records are collected in a growable chunked buffer and sorted in memory.
//! When the buffer fills up, its sorted contents are written as a run to one
//! of several temporary tapes; after ingestion the runs are combined by a
//! multi-round k-way merge into a single ordered stream.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod error;
pub mod config;

pub mod record;
pub mod codec;
pub mod locale;
pub mod key;
pub mod chunk_buffer;
pub mod tape;
pub mod carousel;
pub mod cancel;
pub mod merge;
pub mod external_sort;
pub mod args;
pub mod delimited;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{KeySpec, SortConfig, SortConfigBuilder};
pub use error::{SortError, SortResult};
pub use external_sort::{ExternalSorter, SortPhase, SortStats};
pub use key::{ComparisonKey, Direction};
pub use record::{FieldMeta, FieldType, Record, Schema, Value};

use crate::args::SortArgs;
use crate::delimited::{DelimitedReader, DelimitedWriter};
use crate::error::SortContext;
use log::info;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};

/// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const SORT_FAILURE: i32 = 2;

fn open_input(name: &str) -> SortResult<Box<dyn BufRead>> {
    if name == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(name).with_file_context(name)?;
    Ok(Box::new(BufReader::new(file)))
}

/// Sort the delimited inputs named in `args` and write the result
pub fn sort(config: &SortConfig, args: &SortArgs) -> SortResult<i32> {
    let schema = Schema::parse("input", &args.schema)?;
    let mut sorter = ExternalSorter::new(schema.clone(), config)?;
    let separator = args.separator();

    let mut record = Record::new(schema.clone());
    for name in args.inputs() {
        let mut input = DelimitedReader::new(open_input(name)?, schema.clone(), separator);
        if args.header {
            input.skip_header()?;
        }
        while input.read_record(&mut record)? {
            sorter.put(&record)?;
        }
    }
    sorter.sort()?;

    // inputs are fully consumed, so the output may replace one of them
    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path).with_file_context(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut output = DelimitedWriter::new(BufWriter::new(sink), separator);
    if args.header {
        output.write_header(&schema)?;
    }
    while let Some(record) = sorter.get()? {
        output.write_record(record)?;
    }
    output.finish()?;

    let stats = sorter.stats();
    info!(
        "wrote {} of {} records ({} runs spilled, {} merge rounds)",
        stats.records_out, stats.records_in, stats.spills, stats.merge_rounds
    );
    sorter.free()?;
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sort_files_end_to_end() {
        let dir = TempDir::new().expect("temp dir");
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        let output = dir.path().join("out.csv");
        fs::write(&first, "id;name\n3;carol\n1;\n").expect("write input");
        fs::write(&second, "id;name\n2;bob\n1;alice\n").expect("write input");

        let config = SortConfigBuilder::new()
            .keys(KeySpec::parse_list("id(d),name").expect("keys"))
            .buffer_capacity(1)
            .max_chunks(1)
            .number_of_tapes(2)
            .temp_dir(dir.path())
            .build()
            .expect("valid config");
        let args = SortArgs {
            files: vec![
                first.to_string_lossy().into_owned(),
                second.to_string_lossy().into_owned(),
            ],
            output: Some(output.to_string_lossy().into_owned()),
            schema: "id:long,name:string".to_string(),
            field_separator: Some(';'),
            header: true,
        };

        assert_eq!(sort(&config, &args).expect("sort"), EXIT_SUCCESS);
        let written = fs::read_to_string(&output).expect("read output");
        assert_eq!(written, "id;name\n3;carol\n2;bob\n1;\n1;alice\n");
    }

    #[test]
    fn test_missing_input_is_file_error() {
        let config = SortConfig::new().add_key(KeySpec::new("id", Direction::Ascending));
        let args = SortArgs {
            files: vec!["/no/such/input.csv".to_string()],
            schema: "id:long".to_string(),
            ..Default::default()
        };
        let err = sort(&config, &args).expect_err("missing file");
        assert!(matches!(err, SortError::FileNotFound { .. }));
        assert_eq!(err.exit_code(), SORT_FAILURE);
    }
}
