//! Compiled statements and the placeholder-tracking builder used to produce them.
//!
//! # Example
//!
//! ```ignore
//! use sqlmill::{sql, Dialect};
//! use serde_json::json;
//!
//! let mut q = sql("SELECT * FROM users WHERE 1=1");
//! q.push(" AND status = ").push_bind(json!("active"));
//! let stmt = q.build(Dialect::Postgres);
//! assert_eq!(stmt.sql, "SELECT * FROM users WHERE 1=1 AND status = $1");
//! ```

use crate::dialect::Dialect;
use crate::ident::Ident;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Final SQL text plus its ordered bind values.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledStatement {
    /// A statement with its bind values in placeholder order.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without bind values.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Number of bind values.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for CompiledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[derive(Debug, Clone)]
enum SqlPart {
    Raw(String),
    Param,
}

/// A parameter-safe SQL builder.
///
/// Text pieces and bind values are stored separately; placeholders are
/// rendered per dialect on [`Sql::build`], so `$n` numbering is always dense.
#[derive(Debug, Clone, Default)]
pub struct Sql {
    parts: Vec<SqlPart>,
    params: Vec<Value>,
}

/// Start building a SQL statement.
pub fn sql(initial_sql: impl Into<String>) -> Sql {
    Sql::new(initial_sql)
}

impl Sql {
    /// Start a builder with `initial_sql`.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Raw(initial_sql.into())],
            params: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append raw SQL.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a placeholder and bind its value.
    pub fn push_bind(&mut self, value: Value) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(value);
        self
    }

    /// Append `?, ?, ?` for each value. Empty input appends `NULL`.
    pub fn push_bind_list(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        let mut iter = values.into_iter();
        let Some(first) = iter.next() else {
            return self.push("NULL");
        };
        self.push_bind(first);
        for v in iter {
            self.push(", ");
            self.push_bind(v);
        }
        self
    }

    /// Append a validated identifier.
    pub fn push_ident(&mut self, ident: &Ident, dialect: Dialect) -> &mut Self {
        let mut s = String::new();
        ident.write_sql(dialect, &mut s);
        self.push(&s)
    }

    /// Append another builder, consuming it.
    pub fn push_sql(&mut self, mut other: Sql) -> &mut Self {
        self.parts.append(&mut other.parts);
        self.params.append(&mut other.params);
        self
    }

    /// Join `items` with `sep`, each produced by `f`.
    pub fn push_joined<T>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        sep: &str,
        mut f: impl FnMut(&mut Self, T),
    ) -> &mut Self {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            f(self, item);
        }
        self
    }

    /// Number of bind values pushed so far.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// True when nothing but empty text was pushed.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, SqlPart::Raw(s) if s.is_empty()))
    }

    /// Render the SQL text for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        let mut idx: usize = 0;
        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    out.push_str(&dialect.placeholder(idx));
                }
            }
        }
        out
    }

    /// Render placeholders for `dialect` and take the bind values.
    pub fn build(self, dialect: Dialect) -> CompiledStatement {
        let sql = self.to_sql(dialect);
        CompiledStatement {
            sql,
            params: self.params,
        }
    }
}
