//! Typed records and the schemas that describe their layout
//!
//! A [`Record`] is a fixed-length row of [`Value`] slots laid out by a shared
//! [`Schema`]. Two records belong to the same layout only when they point at
//! the same `Arc<Schema>` instance; structurally equal schemas built twice are
//! different layouts.

use crate::error::{SortError, SortResult};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Storage type of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Integer,
    Long,
    Number,
    /// Milliseconds since the Unix epoch
    Date,
    String,
    Bytes,
}

impl FromStr for FieldType {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "integer" | "int" => Ok(FieldType::Integer),
            "long" => Ok(FieldType::Long),
            "number" | "double" => Ok(FieldType::Number),
            "date" => Ok(FieldType::Date),
            "string" | "str" => Ok(FieldType::String),
            "bytes" | "byte" => Ok(FieldType::Bytes),
            _ => Err(SortError::parse_error(&format!("unknown field type: {s}"))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
        };
        write!(f, "{name}")
    }
}

/// Description of one field in a schema
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub name: String,
    pub field_type: FieldType,
    /// Locale used for collated comparison of string fields
    pub locale: Option<String>,
    /// Case sensitivity of collated comparison
    pub case_sensitive: bool,
}

impl FieldMeta {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            locale: None,
            case_sensitive: true,
        }
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// Ordered field layout shared by records
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<FieldMeta>,
    locale: Option<String>,
}

impl Schema {
    pub fn new(name: &str, fields: Vec<FieldMeta>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields,
            locale: None,
        })
    }

    /// Same as [`Schema::new`] with a locale applied to every string field
    pub fn with_locale(name: &str, fields: Vec<FieldMeta>, locale: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields,
            locale: Some(locale.to_string()),
        })
    }

    /// Parse a layout like `"id:long,name:string,born:date"`
    pub fn parse(name: &str, layout: &str) -> SortResult<Arc<Self>> {
        let mut fields = Vec::new();
        for item in layout.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (field_name, type_name) = item.split_once(':').ok_or_else(|| {
                SortError::parse_error(&format!("expected name:type, got '{item}'"))
            })?;
            let field_name = field_name.trim();
            if field_name.is_empty() {
                return Err(SortError::parse_error(&format!("missing field name in '{item}'")));
            }
            if fields.iter().any(|f: &FieldMeta| f.name == field_name) {
                return Err(SortError::parse_error(&format!(
                    "duplicate field name: {field_name}"
                )));
            }
            fields.push(FieldMeta::new(field_name, type_name.parse()?));
        }
        if fields.is_empty() {
            return Err(SortError::parse_error("schema has no fields"));
        }
        Ok(Self::new(name, fields))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn field(&self, position: usize) -> Option<&FieldMeta> {
        self.fields.get(position)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Position of the field called `name`
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single field value; `Null` is valid for every field type
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Number(f64),
    Date(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type carried by a non-null value
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(FieldType::Boolean),
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Long(_) => Some(FieldType::Long),
            Value::Number(_) => Some(FieldType::Number),
            Value::Date(_) => Some(FieldType::Date),
            Value::String(_) => Some(FieldType::String),
            Value::Bytes(_) => Some(FieldType::Bytes),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Overwrite this value with `other`, keeping string/byte buffers when possible
    pub fn assign_from(&mut self, other: &Value) {
        match (self, other) {
            (Value::String(dst), Value::String(src)) => dst.clone_from(src),
            (Value::Bytes(dst), Value::Bytes(src)) => dst.clone_from(src),
            (dst, src) => *dst = src.clone(),
        }
    }

    /// Natural ordering of field values.
    ///
    /// A null on the left is always `Less`, even against another null; a null
    /// on the right is `Greater`. Callers that want two nulls to tie handle that
    /// themselves (see `ComparisonKey`).
    pub fn compare_to(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    _ => a.type_rank().cmp(&b.type_rank()),
                },
            },
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::Long(v) | Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Long(_) | Value::Number(_) | Value::Date(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Long(v) | Value::Date(v) => write!(f, "{v}"),
            Value::Number(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Bytes(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// One row of typed fields
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    fields: Vec<Value>,
}

impl Record {
    /// Create a record with every field null
    pub fn new(schema: Arc<Schema>) -> Self {
        let fields = vec![Value::Null; schema.len()];
        Self { schema, fields }
    }

    /// Create a record from values, checking each against the schema
    pub fn with_values(schema: Arc<Schema>, values: Vec<Value>) -> SortResult<Self> {
        if values.len() != schema.len() {
            return Err(SortError::invalid_config(&format!(
                "schema '{}' has {} fields, got {} values",
                schema.name(),
                schema.len(),
                values.len()
            )));
        }
        let mut record = Self::new(schema);
        for (position, value) in values.into_iter().enumerate() {
            record.set(position, value)?;
        }
        Ok(record)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field value at `position`; panics when out of range like slice indexing
    pub fn field(&self, position: usize) -> &Value {
        &self.fields[position]
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Replace the value at `position` after checking it fits the field type
    pub fn set(&mut self, position: usize, value: Value) -> SortResult<()> {
        let meta = self.schema.field(position).ok_or_else(|| {
            SortError::unknown_field(&format!("#{position}"), self.schema.name())
        })?;
        if let Some(found) = value.field_type() {
            if found != meta.field_type {
                return Err(SortError::TypeMismatch {
                    field: meta.name.clone(),
                    expected: meta.field_type.to_string(),
                    found: found.to_string(),
                });
            }
        }
        self.fields[position] = value;
        Ok(())
    }

    pub fn set_null(&mut self, position: usize) -> SortResult<()> {
        let slot = self.fields.get_mut(position).ok_or_else(|| {
            SortError::unknown_field(&format!("#{position}"), self.schema.name())
        })?;
        *slot = Value::Null;
        Ok(())
    }

    /// Whether both records share the same schema instance
    pub fn same_layout(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
    }

    /// Copy all values from `other` into this record's existing slots
    pub fn copy_from(&mut self, other: &Record) -> SortResult<()> {
        if !self.same_layout(other) {
            return Err(SortError::SchemaMismatch {
                expected: self.schema.name().to_string(),
                found: other.schema.name().to_string(),
            });
        }
        for (dst, src) in self.fields.iter_mut().zip(&other.fields) {
            dst.assign_from(src);
        }
        Ok(())
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [Value] {
        &mut self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Arc<Schema> {
        Schema::parse("people", "id:long,name:string,score:number").expect("valid schema")
    }

    #[test]
    fn test_schema_parse_and_lookup() {
        let schema = people();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.field_position("name"), Some(1));
        assert_eq!(schema.field_position("missing"), None);
        assert_eq!(schema.field(2).map(|f| f.field_type), Some(FieldType::Number));
    }

    #[test]
    fn test_schema_parse_rejects_bad_specs() {
        assert!(Schema::parse("s", "").is_err());
        assert!(Schema::parse("s", "id").is_err());
        assert!(Schema::parse("s", "id:uuid").is_err());
        assert!(Schema::parse("s", "id:long,id:string").is_err());
    }

    #[test]
    fn test_set_checks_field_type() {
        let mut record = Record::new(people());
        assert!(record.set(0, Value::Long(7)).is_ok());
        assert!(record.set(1, Value::Null).is_ok());
        let err = record.set(0, Value::String("x".into())).expect_err("type mismatch");
        assert!(matches!(err, SortError::TypeMismatch { .. }));
        assert!(record.set(9, Value::Null).is_err());
    }

    #[test]
    fn test_set_null_checks_position() {
        let mut record = Record::with_values(
            people(),
            vec![Value::Long(1), Value::String("ann".into()), Value::Number(2.5)],
        )
        .expect("valid record");
        record.set_null(1).expect("in range");
        assert!(record.field(1).is_null());
        let err = record.set_null(3).expect_err("out of range");
        assert!(matches!(err, SortError::UnknownField { .. }));
    }

    #[test]
    fn test_copy_from_requires_same_schema_instance() {
        let schema = people();
        let src = Record::with_values(
            schema.clone(),
            vec![Value::Long(1), Value::String("ann".into()), Value::Number(2.5)],
        )
        .expect("valid record");

        let mut dst = Record::new(schema);
        dst.copy_from(&src).expect("same layout");
        assert_eq!(dst.fields(), src.fields());

        let mut foreign = Record::new(people());
        assert!(matches!(
            foreign.copy_from(&src),
            Err(SortError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_null_ordering_is_a_sentinel() {
        assert_eq!(Value::Null.compare_to(&Value::Long(1)), Ordering::Less);
        assert_eq!(Value::Long(1).compare_to(&Value::Null), Ordering::Greater);
        // two nulls never tie on their own
        assert_eq!(Value::Null.compare_to(&Value::Null), Ordering::Less);
    }

    #[test]
    fn test_mixed_numeric_comparison() {
        assert_eq!(Value::Integer(3).compare_to(&Value::Long(3)), Ordering::Equal);
        assert_eq!(Value::Integer(2).compare_to(&Value::Number(2.5)), Ordering::Less);
        assert_eq!(
            Value::String("b".into()).compare_to(&Value::String("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn test_assign_from_reuses_string_buffer() {
        let mut dst = Value::String(String::with_capacity(64));
        let ptr_before = match &dst {
            Value::String(s) => s.as_ptr(),
            _ => unreachable!(),
        };
        dst.assign_from(&Value::String("short".into()));
        match &dst {
            Value::String(s) => {
                assert_eq!(s, "short");
                assert_eq!(s.as_ptr(), ptr_before);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }
}
