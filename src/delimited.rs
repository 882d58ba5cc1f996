//! Delimited text input and output for the command line sorter
//!
//! One record per line, fields split on a single separator character. An
//! empty field is a null. Bytes fields are written and read as lowercase hex.

use crate::error::{SortError, SortResult};
use crate::record::{FieldType, Record, Schema, Value};
use itertools::Itertools;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// Parse `text` as a value of `field_type`; empty text is null
pub fn parse_value(text: &str, field_type: FieldType) -> SortResult<Value> {
    if text.is_empty() {
        return Ok(Value::Null);
    }
    let invalid = || SortError::parse_error(&format!("invalid {field_type} value: {text}"));
    let value = match field_type {
        FieldType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Boolean(true),
            "false" | "0" => Value::Boolean(false),
            _ => return Err(invalid()),
        },
        FieldType::Integer => Value::Integer(text.trim().parse().map_err(|_| invalid())?),
        FieldType::Long => Value::Long(text.trim().parse().map_err(|_| invalid())?),
        FieldType::Number => Value::Number(text.trim().parse().map_err(|_| invalid())?),
        FieldType::Date => Value::Date(text.trim().parse().map_err(|_| invalid())?),
        FieldType::String => Value::String(text.to_string()),
        FieldType::Bytes => Value::Bytes(decode_hex(text).ok_or_else(invalid)?),
    };
    Ok(value)
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// Reads records from delimited lines
pub struct DelimitedReader<R> {
    reader: R,
    schema: Arc<Schema>,
    separator: char,
    line: String,
    line_number: usize,
}

impl<R: BufRead> DelimitedReader<R> {
    pub fn new(reader: R, schema: Arc<Schema>, separator: char) -> Self {
        Self {
            reader,
            schema,
            separator,
            line: String::new(),
            line_number: 0,
        }
    }

    fn read_line(&mut self) -> SortResult<bool> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        let trimmed = self.line.trim_end_matches(['\n', '\r']).len();
        self.line.truncate(trimmed);
        Ok(true)
    }

    /// Consume the header line, returning it
    pub fn skip_header(&mut self) -> SortResult<Option<String>> {
        if self.read_line()? {
            Ok(Some(self.line.clone()))
        } else {
            Ok(None)
        }
    }

    /// Fill `record` from the next line; `false` at end of input
    pub fn read_record(&mut self, record: &mut Record) -> SortResult<bool> {
        if !self.read_line()? {
            return Ok(false);
        }
        let count = self.line.split(self.separator).count();
        if count != self.schema.len() {
            return Err(SortError::parse_error(&format!(
                "line {}: expected {} fields, found {}",
                self.line_number,
                self.schema.len(),
                count
            )));
        }
        for (position, (text, meta)) in self.line.split(self.separator).zip(self.schema.fields()).enumerate() {
            let value = parse_value(text, meta.field_type).map_err(|err| {
                SortError::parse_error(&format!("line {}, field '{}': {}", self.line_number, meta.name, err))
            })?;
            record.set(position, value)?;
        }
        Ok(true)
    }
}

/// Writes records as delimited lines
pub struct DelimitedWriter<W: Write> {
    writer: W,
    separator: String,
}

impl<W: Write> DelimitedWriter<W> {
    pub fn new(writer: W, separator: char) -> Self {
        Self {
            writer,
            separator: separator.to_string(),
        }
    }

    pub fn write_header(&mut self, schema: &Schema) -> SortResult<()> {
        let names = schema.fields().iter().map(|meta| meta.name.as_str()).join(&self.separator);
        writeln!(self.writer, "{names}")?;
        Ok(())
    }

    /// Write `record` as one line.
    ///
    /// Strings holding the separator or a line break can't be read back and
    /// are rejected before anything is written.
    pub fn write_record(&mut self, record: &Record) -> SortResult<()> {
        for (value, meta) in record.fields().iter().zip(record.schema().fields()) {
            if let Value::String(text) = value {
                if text.contains(self.separator.as_str()) || text.contains(['\n', '\r']) {
                    return Err(SortError::parse_error(&format!(
                        "field '{}' contains the separator or a line break: {:?}",
                        meta.name, text
                    )));
                }
            }
        }
        writeln!(self.writer, "{}", record.fields().iter().join(&self.separator))?;
        Ok(())
    }

    /// Flush buffered output
    pub fn finish(&mut self) -> SortResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn schema() -> Arc<Schema> {
        Schema::parse("people", "id:long,name:string,score:number,tag:bytes").expect("valid schema")
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(parse_value("", FieldType::Long).expect("null"), Value::Null);
        assert_eq!(parse_value("42", FieldType::Integer).expect("int"), Value::Integer(42));
        assert_eq!(parse_value("TRUE", FieldType::Boolean).expect("bool"), Value::Boolean(true));
        assert_eq!(parse_value("0aff", FieldType::Bytes).expect("hex"), Value::Bytes(vec![0x0a, 0xff]));
        assert!(parse_value("abc", FieldType::Long).is_err());
        assert!(parse_value("0af", FieldType::Bytes).is_err());
        assert!(parse_value("maybe", FieldType::Boolean).is_err());
    }

    #[test]
    fn test_read_records() {
        let input = "id,name,score,tag\n2,bob,1.5,\r\n1,,2,beef\n";
        let schema = schema();
        let mut reader = DelimitedReader::new(Cursor::new(input), schema.clone(), ',');
        assert_eq!(reader.skip_header().expect("header").as_deref(), Some("id,name,score,tag"));

        let mut record = Record::new(schema);
        assert!(reader.read_record(&mut record).expect("first"));
        assert_eq!(record.field(0), &Value::Long(2));
        assert_eq!(record.field(2), &Value::Number(1.5));
        assert!(record.field(3).is_null());

        assert!(reader.read_record(&mut record).expect("second"));
        assert!(record.field(1).is_null());
        assert_eq!(record.field(3), &Value::Bytes(vec![0xbe, 0xef]));

        assert!(!reader.read_record(&mut record).expect("end"));
    }

    #[test]
    fn test_wrong_field_count_names_line() {
        let schema = schema();
        let mut reader = DelimitedReader::new(Cursor::new("1,a,2,\n1,a\n"), schema.clone(), ',');
        let mut record = Record::new(schema);
        assert!(reader.read_record(&mut record).expect("four fields"));
        let err = reader.read_record(&mut record).expect_err("two fields");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_write_records() {
        let schema = schema();
        let mut out = Vec::new();
        {
            let mut writer = DelimitedWriter::new(&mut out, '\t');
            writer.write_header(&schema).expect("header");
            let record = Record::with_values(
                schema.clone(),
                vec![Value::Long(7), Value::Null, Value::Number(0.25), Value::Bytes(vec![1, 2])],
            )
            .expect("record");
            writer.write_record(&record).expect("record");
            writer.finish().expect("flush");
        }
        assert_eq!(String::from_utf8(out).expect("utf8"), "id\tname\tscore\ttag\n7\t\t0.25\t0102\n");
    }

    #[test]
    fn test_unwritable_strings_are_rejected() {
        let schema = schema();
        let mut out = Vec::new();
        let mut writer = DelimitedWriter::new(&mut out, ',');
        for name in ["smith, john", "two\nlines", "cr\r"] {
            let record = Record::with_values(
                schema.clone(),
                vec![Value::Long(1), Value::String(name.into()), Value::Null, Value::Null],
            )
            .expect("record");
            let err = writer.write_record(&record).expect_err("can't be read back");
            assert!(err.to_string().contains("'name'"));
        }
        writer.finish().expect("flush");
        assert!(out.is_empty());
    }
}
