//! Safe SQL identifier handling.
//!
//! [`Ident`] represents a table or column reference that ends up spliced into
//! generated SQL text (sort columns, descriptor columns, table names).
//!
//! - Unquoted parts are validated against `[A-Za-z_][A-Za-z0-9_$]*` and render bare
//! - Quoted parts (`"x"` or `` `x` ``) allow anything except NUL and render with
//!   the target dialect's quote character
//!
//! # Example
//! ```ignore
//! use sqlmill::{Dialect, Ident};
//!
//! let c = Ident::parse("u.created_at")?;
//! assert_eq!(c.to_sql(Dialect::Mysql), "u.created_at");
//! # Ok::<(), sqlmill::SqlError>(())
//! ```

use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};

/// A part of a SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    /// Unquoted identifier: must match `[A-Za-z_][A-Za-z0-9_$]*`.
    Unquoted(String),
    /// Quoted identifier: allows any characters except NUL.
    Quoted(String),
}

/// A SQL identifier with optional dotted qualification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<IdentPart>,
}

impl Ident {
    /// Create a single quoted identifier.
    pub fn quoted(name: &str) -> SqlResult<Self> {
        if name.is_empty() {
            return Err(SqlError::validation("Empty quoted identifier"));
        }
        if name.contains('\0') {
            return Err(SqlError::validation(
                "Identifier cannot contain NUL character",
            ));
        }
        Ok(Self {
            parts: vec![IdentPart::Quoted(name.to_string())],
        })
    }

    /// Parse an identifier string.
    ///
    /// Accepts `table.column`, `"Mixed"."Case"`, and backtick-quoted parts.
    pub fn parse(s: &str) -> SqlResult<Self> {
        if s.is_empty() {
            return Err(SqlError::validation("Identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(SqlError::validation(
                "Identifier cannot contain NUL character",
            ));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();

        while chars.peek().is_some() {
            if !parts.is_empty() {
                match chars.next() {
                    Some('.') => {
                        if chars.peek().is_none() {
                            return Err(SqlError::validation(format!(
                                "Trailing '.' in identifier: {s}"
                            )));
                        }
                    }
                    _ => {
                        return Err(SqlError::validation(format!(
                            "Expected '.' between identifier parts: {s}"
                        )));
                    }
                }
            }

            match chars.peek().copied() {
                Some(q @ ('"' | '`')) => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        if c == q {
                            if chars.peek() == Some(&q) {
                                chars.next();
                                name.push(q);
                            } else {
                                closed = true;
                                break;
                            }
                        } else {
                            name.push(c);
                        }
                    }
                    if !closed {
                        return Err(SqlError::validation(format!(
                            "Unclosed quoted identifier: {s}"
                        )));
                    }
                    if name.is_empty() {
                        return Err(SqlError::validation("Empty quoted identifier"));
                    }
                    parts.push(IdentPart::Quoted(name));
                }
                Some(_) => {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c == '.' {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    if !is_plain_ident(&name) {
                        return Err(SqlError::validation(format!(
                            "Invalid identifier part '{name}' in '{s}'"
                        )));
                    }
                    parts.push(IdentPart::Unquoted(name));
                }
                None => break,
            }
        }

        if parts.is_empty() {
            return Err(SqlError::validation("Identifier cannot be empty"));
        }
        Ok(Self { parts })
    }

    /// Last part of the identifier (the column name for `alias.column`).
    pub fn last(&self) -> &str {
        match self.parts.last() {
            Some(IdentPart::Unquoted(s)) | Some(IdentPart::Quoted(s)) => s,
            None => "",
        }
    }

    /// Render for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        self.write_sql(dialect, &mut out);
        out
    }

    pub(crate) fn write_sql(&self, dialect: Dialect, out: &mut String) {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            match part {
                IdentPart::Unquoted(s) => out.push_str(s),
                IdentPart::Quoted(s) => out.push_str(&dialect.quote_ident(s)),
            }
        }
    }
}

/// Returns `true` for a bare identifier matching `[A-Za-z_][A-Za-z0-9_$]*`.
pub fn is_plain_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric())
}

/// Conversion into a validated [`Ident`].
pub trait IntoIdent {
    fn into_ident(self) -> SqlResult<Ident>;
}

impl IntoIdent for Ident {
    fn into_ident(self) -> SqlResult<Ident> {
        Ok(self)
    }
}

impl IntoIdent for &Ident {
    fn into_ident(self) -> SqlResult<Ident> {
        Ok(self.clone())
    }
}

impl IntoIdent for &str {
    fn into_ident(self) -> SqlResult<Ident> {
        Ident::parse(self)
    }
}

impl IntoIdent for String {
    fn into_ident(self) -> SqlResult<Ident> {
        Ident::parse(&self)
    }
}
