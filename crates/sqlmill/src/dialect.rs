//! Target SQL dialects.
//!
//! A [`Dialect`] decides placeholder syntax, identifier and literal quoting,
//! generated-id expressions and the shape of the DDL / DML emitted by the
//! batch synthesizer.

use serde::{Deserialize, Serialize};

/// A target SQL flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// MySQL / MariaDB: `?` placeholders, backtick identifiers.
    #[default]
    Mysql,
    /// PostgreSQL: `$n` placeholders, double-quoted identifiers.
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    /// SQLite: `?` placeholders, double-quoted identifiers.
    Sqlite,
}

impl Dialect {
    /// Placeholder for the `index`-th (1-based) bind parameter.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Mysql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Character used to quote identifiers.
    pub fn ident_quote(self) -> char {
        match self {
            Dialect::Mysql => '`',
            Dialect::Postgres | Dialect::Sqlite => '"',
        }
    }

    /// Quote a single identifier segment, doubling embedded quote characters.
    pub fn quote_ident(self, name: &str) -> String {
        let q = self.ident_quote();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(q);
        for ch in name.chars() {
            if ch == q {
                out.push(q);
            }
            out.push(ch);
        }
        out.push(q);
        out
    }

    /// Render `value` as a quoted string literal.
    ///
    /// MySQL additionally backslash-escapes control characters and `\`.
    pub fn quote_literal(self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for ch in value.chars() {
            match (self, ch) {
                (_, '\'') => out.push_str("''"),
                (Dialect::Mysql, '\\') => out.push_str("\\\\"),
                (Dialect::Mysql, '\0') => out.push_str("\\0"),
                (Dialect::Mysql, '\x08') => out.push_str("\\b"),
                (Dialect::Mysql, '\t') => out.push_str("\\t"),
                (Dialect::Mysql, '\x1a') => out.push_str("\\Z"),
                (Dialect::Mysql, '\n') => out.push_str("\\n"),
                (Dialect::Mysql, '\r') => out.push_str("\\r"),
                (_, c) => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    /// Expression generating a UUID on the engine side.
    pub fn uuid_expr(self) -> &'static str {
        match self {
            Dialect::Mysql => "UUID()",
            Dialect::Postgres => "gen_random_uuid()",
            Dialect::Sqlite => "lower(hex(randomblob(16)))",
        }
    }

    /// Expression generating a short unique id on the engine side.
    pub fn short_uuid_expr(self) -> &'static str {
        match self {
            Dialect::Mysql => "UUID_SHORT()",
            Dialect::Postgres => "encode(uuid_send(gen_random_uuid()::uuid),'base64')",
            Dialect::Sqlite => "abs(random())",
        }
    }

    /// Table to select constants from, if the dialect requires one.
    pub fn dual(self) -> Option<&'static str> {
        match self {
            Dialect::Mysql => Some("DUAL"),
            Dialect::Postgres | Dialect::Sqlite => None,
        }
    }

    /// Statement head for "insert or replace by primary key", if supported.
    pub fn replace_into(self) -> Option<&'static str> {
        match self {
            Dialect::Mysql => Some("REPLACE INTO"),
            Dialect::Sqlite => Some("INSERT OR REPLACE INTO"),
            Dialect::Postgres => None,
        }
    }

    /// Table options appended to `CREATE TEMPORARY TABLE`.
    pub fn temp_table_suffix(self) -> &'static str {
        match self {
            Dialect::Mysql => " ENGINE=MEMORY",
            Dialect::Postgres | Dialect::Sqlite => "",
        }
    }

    /// Pagination clause.
    pub fn limit_clause(self, start: u64, size: u64) -> String {
        match self {
            Dialect::Mysql => format!("LIMIT {start}, {size}"),
            Dialect::Postgres | Dialect::Sqlite => format!("LIMIT {size} OFFSET {start}"),
        }
    }

    /// Whether indexes can be declared inline in `CREATE TABLE`.
    pub fn inline_indexes(self) -> bool {
        matches!(self, Dialect::Mysql)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        })
    }
}
