//! Compile and synthesis configuration.
//!
//! A [`SqlConfig`] is passed explicitly into every compile / synthesize call.
//! It can be built in code or read from TOML:
//!
//! ```toml
//! dialect = "postgres"
//! max_deal = 200
//! format = "pretty"
//!
//! [skip]
//! skip_empty_string = false
//! ```

use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use serde::Deserialize;
use std::path::Path;

/// Whether a field whose value is undefined / null / `""` is left out of a
/// generated statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SkipPolicy {
    pub skip_undefined: bool,
    pub skip_null: bool,
    pub skip_empty_string: bool,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            skip_undefined: true,
            skip_null: true,
            skip_empty_string: true,
        }
    }
}

impl SkipPolicy {
    /// Policy that lets every value through.
    pub fn keep_all() -> Self {
        Self {
            skip_undefined: false,
            skip_null: false,
            skip_empty_string: false,
        }
    }

    /// Skip properties absent from the record.
    pub fn with_skip_undefined(mut self, skip: bool) -> Self {
        self.skip_undefined = skip;
        self
    }

    /// Skip properties whose value is null.
    pub fn with_skip_null(mut self, skip: bool) -> Self {
        self.skip_null = skip;
        self
    }

    /// Skip properties whose value is an empty string.
    pub fn with_skip_empty_string(mut self, skip: bool) -> Self {
        self.skip_empty_string = skip;
        self
    }
}

/// Output layout of compiled SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatStyle {
    /// Single line, whitespace collapsed.
    #[default]
    Compact,
    /// Major clauses on their own lines.
    Pretty,
}

fn default_max_deal() -> usize {
    500
}

fn default_log_sql_max_len() -> usize {
    512
}

/// Configuration for compilation and batch synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Target dialect. Default: MySQL.
    pub dialect: Dialect,
    /// Default skip policy for batch statements.
    pub skip: SkipPolicy,
    /// Maximum records per batch chunk.
    #[serde(default = "default_max_deal")]
    pub max_deal: usize,
    /// Output layout.
    pub format: FormatStyle,
    /// Compiled SQL longer than this is truncated in debug logs.
    #[serde(default = "default_log_sql_max_len")]
    pub log_sql_max_len: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            skip: SkipPolicy::default(),
            max_deal: default_max_deal(),
            format: FormatStyle::default(),
            log_sql_max_len: default_log_sql_max_len(),
        }
    }
}

impl SqlConfig {
    /// Create a configuration with defaults (MySQL, skip everything empty, chunks of 500).
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a default configuration targeting `dialect`.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self::default().with_dialect(dialect)
    }

    /// Target `dialect` for placeholders, quoting and DDL.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Replace the value-skipping policy used by batch operations.
    pub fn with_skip(mut self, skip: SkipPolicy) -> Self {
        self.skip = skip;
        self
    }

    /// Set the chunk size for batch insert / update. Zero is rejected by [`SqlConfig::validate`].
    pub fn with_max_deal(mut self, max_deal: usize) -> Self {
        self.max_deal = max_deal;
        self
    }

    /// How compiled SQL text is laid out.
    pub fn with_format(mut self, format: FormatStyle) -> Self {
        self.format = format;
        self
    }

    /// Truncate logged SQL to `len` bytes.
    pub fn with_log_sql_max_len(mut self, len: usize) -> Self {
        self.log_sql_max_len = len;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> SqlResult<Self> {
        let config: SqlConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SqlResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SqlError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            SqlError::Config(msg) => {
                SqlError::Config(format!("failed to parse config file {}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Reject settings the batch builders cannot honor.
    pub fn validate(&self) -> SqlResult<()> {
        if self.max_deal == 0 {
            return Err(SqlError::Config("max_deal must be greater than 0".to_string()));
        }
        Ok(())
    }
}
