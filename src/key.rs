//! Record comparison keys
//!
//! A [`ComparisonKey`] is resolved once against a schema and then used for
//! every comparison of the sort pass. Chunk sorting, chunk merge selection
//! and tape merging all go through [`ComparisonKey::compare_total`], which
//! always ties two nulls, so every path produces the same order whatever the
//! key's null policy. [`ComparisonKey::compare`] honours the policy.

use crate::error::{SortError, SortResult};
use crate::locale::{Collator, Strength};
use crate::record::{FieldType, Record, Schema, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Ordering direction of one key field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    #[inline]
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

impl FromStr for Direction {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a" | "asc" | "ascending" => Ok(Direction::Ascending),
            "d" | "desc" | "descending" => Ok(Direction::Descending),
            _ => Err(SortError::parse_error(&format!("unknown sort direction: {s}"))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ascending => write!(f, "a"),
            Direction::Descending => write!(f, "d"),
        }
    }
}

/// Names a key field either by name or by position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    Name(String),
    Position(usize),
}

impl From<&str> for KeySelector {
    fn from(name: &str) -> Self {
        KeySelector::Name(name.to_string())
    }
}

impl From<String> for KeySelector {
    fn from(name: String) -> Self {
        KeySelector::Name(name)
    }
}

impl From<usize> for KeySelector {
    fn from(position: usize) -> Self {
        KeySelector::Position(position)
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Name(name) => write!(f, "{name}"),
            KeySelector::Position(position) => write!(f, "#{position}"),
        }
    }
}

/// Resolved field positions, directions and null policy
#[derive(Debug, Clone)]
pub struct ComparisonKey {
    positions: Vec<usize>,
    directions: Vec<Direction>,
    null_equal: bool,
    collators: Vec<Option<Collator>>,
}

impl ComparisonKey {
    /// Resolve `selectors` against `schema`.
    ///
    /// `directions` must have one entry per selector.
    pub fn resolve<S>(selectors: &[S], directions: &[Direction], schema: &Schema) -> SortResult<Self>
    where
        S: Clone + Into<KeySelector>,
    {
        if selectors.len() != directions.len() {
            return Err(SortError::invalid_config(&format!(
                "{} key fields but {} sort directions",
                selectors.len(),
                directions.len()
            )));
        }
        if selectors.is_empty() {
            return Err(SortError::invalid_config("sort key has no fields"));
        }

        let positions = selectors
            .iter()
            .map(|selector| resolve_selector(selector.clone().into(), schema))
            .collect::<SortResult<Vec<_>>>()?;

        Ok(Self {
            collators: vec![None; positions.len()],
            positions,
            directions: directions.to_vec(),
            null_equal: false,
        })
    }

    /// Resolve an all-ascending key
    pub fn ascending<S>(selectors: &[S], schema: &Schema) -> SortResult<Self>
    where
        S: Clone + Into<KeySelector>,
    {
        Self::resolve(selectors, &vec![Direction::Ascending; selectors.len()], schema)
    }

    /// Treat two nulls at the same key position as a tie
    pub fn with_null_equal(mut self, null_equal: bool) -> Self {
        self.null_equal = null_equal;
        self
    }

    /// Use `collator` for every key position
    pub fn with_collator(mut self, collator: Collator) -> Self {
        self.collators = vec![Some(collator); self.positions.len()];
        self
    }

    /// Fill collators from locales declared on the schema or its fields.
    ///
    /// Positions that already carry a collator keep it.
    pub fn update_collators(mut self, schema: &Schema) -> SortResult<Self> {
        for (slot, &position) in self.collators.iter_mut().zip(&self.positions) {
            if slot.is_some() {
                continue;
            }
            let Some(meta) = schema.field(position) else {
                continue;
            };
            if meta.field_type != FieldType::String {
                continue;
            }
            let Some(locale) = meta.locale.as_deref().or(schema.locale()) else {
                continue;
            };
            let strength = if meta.case_sensitive {
                Strength::CaseSensitive
            } else {
                Strength::CaseInsensitive
            };
            *slot = Some(Collator::new(locale, strength)?);
        }
        Ok(self)
    }

    /// Copy of this key that ties nulls, giving a consistent total order
    pub fn total_order(&self) -> Self {
        self.clone().with_null_equal(true)
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    pub fn null_equal(&self) -> bool {
        self.null_equal
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Compare two records of the layout this key was resolved against
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.compare_records(a, b, self.null_equal)
    }

    /// Compare like [`ComparisonKey::total_order`] would, without copying the key
    pub fn compare_total(&self, a: &Record, b: &Record) -> Ordering {
        self.compare_records(a, b, true)
    }

    fn compare_records(&self, a: &Record, b: &Record, null_equal: bool) -> Ordering {
        if std::ptr::eq(a, b) {
            return Ordering::Equal;
        }
        debug_assert!(a.same_layout(b), "records of different layouts");
        for (i, &position) in self.positions.iter().enumerate() {
            let ordering = self.compare_field(i, a.field(position), b.field(position), null_equal);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compare `a` (positions from this key) with `b` (positions from `other`)
    pub fn compare_with(&self, other: &ComparisonKey, a: &Record, b: &Record) -> SortResult<Ordering> {
        if self.len() != other.len() {
            return Err(SortError::IncompatibleKey {
                left: self.len(),
                right: other.len(),
            });
        }
        for (i, (&pos_a, &pos_b)) in self.positions.iter().zip(&other.positions).enumerate() {
            let ordering = self.compare_field(i, a.field(pos_a), b.field(pos_b), self.null_equal);
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Direction-corrected comparison of key position `i`; `Equal` means
    /// "move on to the next position"
    #[inline]
    fn compare_field(&self, i: usize, a: &Value, b: &Value, null_equal: bool) -> Ordering {
        let ordering = match (&self.collators[i], a, b) {
            (Some(collator), Value::String(x), Value::String(y)) => collator.compare(x, y),
            _ => a.compare_to(b),
        };
        if ordering == Ordering::Equal || (null_equal && a.is_null() && b.is_null()) {
            return Ordering::Equal;
        }
        self.directions[i].apply(ordering)
    }
}

fn resolve_selector(selector: KeySelector, schema: &Schema) -> SortResult<usize> {
    match selector {
        KeySelector::Name(name) => schema
            .field_position(&name)
            .ok_or_else(|| SortError::unknown_field(&name, schema.name())),
        KeySelector::Position(position) if position < schema.len() => Ok(position),
        KeySelector::Position(position) => Err(SortError::unknown_field(
            &format!("#{position}"),
            schema.name(),
        )),
    }
}
