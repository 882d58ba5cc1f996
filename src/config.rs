//! Configuration management for sort operations

use crate::chunk_buffer::{DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_CHUNKS};
use crate::codec::DEFAULT_MAX_RECORD_SIZE;
use crate::error::{SortError, SortResult};
use crate::key::{ComparisonKey, Direction, KeySelector};
use crate::locale::{Collator, Strength};
use crate::record::Schema;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of tapes in a carousel
pub const DEFAULT_NUMBER_OF_TAPES: usize = 6;

/// One field of the sort key with its direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub selector: KeySelector,
    pub direction: Direction,
}

impl KeySpec {
    pub fn new(selector: impl Into<KeySelector>, direction: Direction) -> Self {
        Self {
            selector: selector.into(),
            direction,
        }
    }

    /// Parse a key field like "name", "name(d)" or "#2(a)".
    ///
    /// `#n` selects the field at zero-based position `n`.
    pub fn parse(keydef: &str) -> SortResult<Self> {
        let keydef = keydef.trim();
        let (field, direction) = match keydef.find('(') {
            Some(open) => {
                let Some(inner) = keydef[open + 1..].strip_suffix(')') else {
                    return Err(SortError::invalid_key_spec(keydef));
                };
                let direction = inner
                    .parse::<Direction>()
                    .map_err(|_| SortError::invalid_key_spec(keydef))?;
                (keydef[..open].trim(), direction)
            }
            None => (keydef, Direction::Ascending),
        };

        if field.is_empty() {
            return Err(SortError::invalid_key_spec(keydef));
        }
        let selector = match field.strip_prefix('#') {
            Some(position) => KeySelector::Position(
                position
                    .parse::<usize>()
                    .map_err(|_| SortError::invalid_key_spec(keydef))?,
            ),
            None => KeySelector::Name(field.to_string()),
        };
        Ok(Self { selector, direction })
    }

    /// Parse a list of key fields separated by ';' or ','
    pub fn parse_list(keydefs: &str) -> SortResult<Vec<Self>> {
        let keys = keydefs
            .split([';', ','])
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect::<SortResult<Vec<_>>>()?;
        if keys.is_empty() {
            return Err(SortError::invalid_key_spec(keydefs));
        }
        Ok(keys)
    }
}

impl FromStr for KeySpec {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.selector, self.direction)
    }
}

/// Main configuration structure for sort operations
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Sort key fields, most significant first
    pub keys: Vec<KeySpec>,
    /// Records held by the first in-memory chunk
    pub buffer_capacity: usize,
    /// Upper bound on in-memory chunks before spilling to tapes
    pub max_chunks: usize,
    /// Tapes per carousel
    pub number_of_tapes: usize,
    /// Directories for tape files, used round-robin
    pub temp_dirs: Vec<PathBuf>,
    /// Largest serialized record accepted on a tape
    pub max_record_size: usize,
    /// Null policy of the key returned by `ExternalSorter::key`; sort order
    /// always ties two nulls and lets the next field decide
    pub null_equal: bool,
    /// Collation locale applied to every string key field
    pub locale: Option<String>,
    pub case_sensitive: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_chunks: DEFAULT_MAX_CHUNKS,
            number_of_tapes: DEFAULT_NUMBER_OF_TAPES,
            temp_dirs: Vec::new(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            null_equal: true,
            locale: None,
            case_sensitive: true,
        }
    }
}

impl SortConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sort key field
    pub fn add_key(mut self, key: KeySpec) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn with_number_of_tapes(mut self, tapes: usize) -> Self {
        self.number_of_tapes = tapes;
        self
    }

    pub fn with_null_equal(mut self, null_equal: bool) -> Self {
        self.null_equal = null_equal;
        self
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> SortResult<()> {
        if self.keys.is_empty() {
            return Err(SortError::invalid_config("at least one sort key is required"));
        }
        if self.buffer_capacity == 0 {
            return Err(SortError::invalid_config("buffer capacity must be positive"));
        }
        if self.max_chunks == 0 {
            return Err(SortError::invalid_config("maximum number of chunks must be positive"));
        }
        // merge rounds only shrink the run count with two or more tapes
        if self.number_of_tapes < 2 {
            return Err(SortError::invalid_config("at least 2 tapes are required"));
        }
        if self.max_record_size == 0 {
            return Err(SortError::invalid_config("maximum record size must be positive"));
        }
        if let Some(dir) = self.temp_dirs.iter().find(|dir| !dir.is_dir()) {
            return Err(SortError::invalid_config(&format!(
                "temporary directory {} does not exist",
                dir.display()
            )));
        }
        Ok(())
    }

    /// Resolve the configured keys against `schema`
    pub fn build_key(&self, schema: &Schema) -> SortResult<ComparisonKey> {
        let selectors: Vec<KeySelector> = self.keys.iter().map(|k| k.selector.clone()).collect();
        let directions: Vec<Direction> = self.keys.iter().map(|k| k.direction).collect();
        let mut key = ComparisonKey::resolve(&selectors, &directions, schema)?.with_null_equal(self.null_equal);
        if let Some(locale) = &self.locale {
            key = key.with_collator(Collator::new(locale, self.strength())?);
        }
        key.update_collators(schema)
    }

    fn strength(&self) -> Strength {
        if self.case_sensitive {
            Strength::CaseSensitive
        } else {
            Strength::CaseInsensitive
        }
    }
}

/// Builder pattern for creating configurations
pub struct SortConfigBuilder {
    config: SortConfig,
}

impl SortConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: SortConfig::default(),
        }
    }

    /// Add a sort key field
    pub fn key(mut self, key: KeySpec) -> Self {
        self.config.keys.push(key);
        self
    }

    pub fn keys(mut self, keys: impl IntoIterator<Item = KeySpec>) -> Self {
        self.config.keys.extend(keys);
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    pub fn max_chunks(mut self, max_chunks: usize) -> Self {
        self.config.max_chunks = max_chunks;
        self
    }

    pub fn number_of_tapes(mut self, tapes: usize) -> Self {
        self.config.number_of_tapes = tapes;
        self
    }

    /// Add a directory for tape files
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dirs.push(dir.into());
        self
    }

    pub fn max_record_size(mut self, size: usize) -> Self {
        self.config.max_record_size = size;
        self
    }

    /// Order records with null key fields by the remaining key fields
    pub fn null_equal(mut self, null_equal: bool) -> Self {
        self.config.null_equal = null_equal;
        self
    }

    pub fn locale(mut self, locale: &str) -> Self {
        self.config.locale = Some(locale.to_string());
        self
    }

    /// Compare strings without regard to case
    pub fn ignore_case(mut self) -> Self {
        self.config.case_sensitive = false;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> SortResult<SortConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SortConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Preset configurations for common use cases
pub mod presets {
    use super::*;

    /// Room for roughly a million records before anything reaches disk
    pub fn in_memory() -> SortConfig {
        SortConfig::new()
            .with_buffer_capacity(65_536)
            .with_max_chunks(16)
    }

    /// Small chunks spilled early over few tapes
    pub fn low_memory() -> SortConfig {
        SortConfig::new()
            .with_buffer_capacity(256)
            .with_max_chunks(2)
            .with_number_of_tapes(4)
    }
}
