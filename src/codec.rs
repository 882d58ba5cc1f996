//! Binary encoding of records for tape storage
//!
//! Each field is written as one presence byte (0 = null, 1 = value) followed
//! by the value in little-endian order. Strings and byte arrays carry a `u32`
//! length prefix. The field types come from the schema, so no type tags are
//! stored.

use crate::error::{SortError, SortResult};
use crate::record::{FieldType, Record, Value};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

/// Default upper bound for one serialized record
pub const DEFAULT_MAX_RECORD_SIZE: usize = 8192;

const NULL_MARKER: u8 = 0;
const VALUE_MARKER: u8 = 1;

impl Record {
    /// Append this record's encoding to `buf`.
    ///
    /// Fails with `RecordTooLarge` if the encoding is longer than `max_size`;
    /// `buf` is restored to its previous length in that case.
    pub fn serialize(&self, buf: &mut Vec<u8>, max_size: usize) -> SortResult<()> {
        let start = buf.len();
        for value in self.fields() {
            write_value(buf, value)?;
        }
        let size = buf.len() - start;
        if size > max_size {
            buf.truncate(start);
            return Err(SortError::RecordTooLarge {
                size,
                limit: max_size,
            });
        }
        Ok(())
    }

    /// Decode one record from the front of `input`, advancing it
    pub fn deserialize(&mut self, input: &mut &[u8]) -> SortResult<()> {
        let schema = self.schema().clone();
        for (meta, slot) in schema.fields().iter().zip(self.fields_mut()) {
            read_value(input, meta.field_type, slot).map_err(|err| match err {
                SortError::Io(io_err) => SortError::corrupt_run(&format!(
                    "field '{}' of schema '{}': {}",
                    meta.name,
                    schema.name(),
                    io_err
                )),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Length of this record's encoding in bytes
    pub fn serialized_size(&self) -> usize {
        self.fields().iter().map(encoded_len).sum()
    }
}

fn encoded_len(value: &Value) -> usize {
    1 + match value {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) => 4,
        Value::Long(_) | Value::Date(_) | Value::Number(_) => 8,
        Value::String(s) => 4 + s.len(),
        Value::Bytes(b) => 4 + b.len(),
    }
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> SortResult<()> {
    if value.is_null() {
        buf.write_u8(NULL_MARKER)?;
        return Ok(());
    }
    buf.write_u8(VALUE_MARKER)?;
    match value {
        Value::Null => {}
        Value::Boolean(v) => buf.write_u8(u8::from(*v))?,
        Value::Integer(v) => buf.write_i32::<LittleEndian>(*v)?,
        Value::Long(v) | Value::Date(v) => buf.write_i64::<LittleEndian>(*v)?,
        Value::Number(v) => buf.write_f64::<LittleEndian>(*v)?,
        Value::String(s) => write_blob(buf, s.as_bytes())?,
        Value::Bytes(b) => write_blob(buf, b)?,
    }
    Ok(())
}

fn write_blob(buf: &mut Vec<u8>, data: &[u8]) -> SortResult<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| SortError::invalid_config("field value longer than 4 GiB"))?;
    buf.write_u32::<LittleEndian>(len)?;
    buf.extend_from_slice(data);
    Ok(())
}

fn read_value(input: &mut &[u8], field_type: FieldType, slot: &mut Value) -> SortResult<()> {
    match input.read_u8()? {
        NULL_MARKER => {
            *slot = Value::Null;
            return Ok(());
        }
        VALUE_MARKER => {}
        marker => {
            return Err(SortError::corrupt_run(&format!(
                "invalid presence marker {marker}"
            )))
        }
    }
    match field_type {
        FieldType::Boolean => *slot = Value::Boolean(input.read_u8()? != 0),
        FieldType::Integer => *slot = Value::Integer(input.read_i32::<LittleEndian>()?),
        FieldType::Long => *slot = Value::Long(input.read_i64::<LittleEndian>()?),
        FieldType::Date => *slot = Value::Date(input.read_i64::<LittleEndian>()?),
        FieldType::Number => *slot = Value::Number(input.read_f64::<LittleEndian>()?),
        FieldType::String => {
            let data = read_blob(input)?;
            let text = std::str::from_utf8(data)
                .map_err(|e| SortError::corrupt_run(&format!("invalid UTF-8 in string: {e}")))?;
            match slot {
                Value::String(existing) => {
                    existing.clear();
                    existing.push_str(text);
                }
                other => *other = Value::String(text.to_string()),
            }
        }
        FieldType::Bytes => {
            let data = read_blob(input)?;
            match slot {
                Value::Bytes(existing) => {
                    existing.clear();
                    existing.extend_from_slice(data);
                }
                other => *other = Value::Bytes(data.to_vec()),
            }
        }
    }
    Ok(())
}

fn read_blob<'a>(input: &mut &'a [u8]) -> SortResult<&'a [u8]> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    if input.len() < len {
        return Err(SortError::corrupt_run(&format!(
            "value of {len} bytes truncated to {}",
            input.len()
        )));
    }
    let (data, rest) = input.split_at(len);
    *input = rest;
    Ok(data)
}

/// Read exactly `len` bytes from `reader` into `scratch`
pub(crate) fn read_frame<R: Read>(reader: &mut R, scratch: &mut Vec<u8>, len: usize) -> SortResult<()> {
    scratch.clear();
    scratch.resize(len, 0);
    reader.read_exact(scratch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Schema;

    fn sample() -> Record {
        let schema = Schema::parse(
            "all",
            "flag:boolean,small:integer,big:long,ratio:number,when:date,name:string,blob:bytes",
        )
        .expect("valid schema");
        Record::with_values(
            schema,
            vec![
                Value::Boolean(true),
                Value::Integer(-7),
                Value::Long(1 << 40),
                Value::Number(0.25),
                Value::Null,
                Value::String("žluťoučký".into()),
                Value::Bytes(vec![0, 1, 255]),
            ],
        )
        .expect("valid record")
    }

    #[test]
    fn test_encoding_restores_every_type() {
        let record = sample();
        let mut buf = Vec::new();
        record.serialize(&mut buf, DEFAULT_MAX_RECORD_SIZE).expect("fits");
        assert_eq!(buf.len(), record.serialized_size());

        let mut decoded = Record::new(record.schema().clone());
        let mut input = buf.as_slice();
        decoded.deserialize(&mut input).expect("decodes");
        assert!(input.is_empty());
        assert_eq!(decoded.fields(), record.fields());
    }

    #[test]
    fn test_oversized_record_is_rejected_and_buffer_restored() {
        let record = sample();
        let mut buf = vec![9u8; 3];
        let err = record.serialize(&mut buf, 10).expect_err("too large");
        assert!(matches!(err, SortError::RecordTooLarge { limit: 10, .. }));
        assert_eq!(buf, vec![9u8; 3]);
    }

    #[test]
    fn test_truncated_input_is_corrupt() {
        let record = sample();
        let mut buf = Vec::new();
        record.serialize(&mut buf, DEFAULT_MAX_RECORD_SIZE).expect("fits");
        buf.truncate(buf.len() - 2);

        let mut decoded = Record::new(record.schema().clone());
        let err = decoded.deserialize(&mut buf.as_slice()).expect_err("truncated");
        assert!(matches!(err, SortError::CorruptRun { .. }));
    }

    #[test]
    fn test_bad_presence_marker() {
        let schema = Schema::parse("one", "id:long").expect("valid schema");
        let mut decoded = Record::new(schema);
        let err = decoded.deserialize(&mut &[7u8][..]).expect_err("bad marker");
        assert!(matches!(err, SortError::CorruptRun { .. }));
    }
}
