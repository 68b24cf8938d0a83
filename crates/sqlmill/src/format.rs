//! Cosmetic SQL formatting and a balance check.
//!
//! Formatting never changes the meaning of a statement: statements are split
//! into tokens with the `sqlparser` tokenizer, tokens are copied back as they
//! were written, and only whitespace between them moves. Line comments keep
//! the newline that ends them.

use crate::config::FormatStyle;
use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

/// Words that start a new line in [`FormatStyle::Pretty`] output (top level only).
const CLAUSE_WORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "UNION", "VALUES", "SET", "INNER",
    "LEFT", "RIGHT", "ON",
];

/// Tokens of `sql` as written, comments and whitespace included.
fn tokenize(sql: &str, dialect: Dialect) -> SqlResult<Vec<Token>> {
    let tokens = match dialect {
        Dialect::Mysql => Tokenizer::new(&MySqlDialect {}, sql).with_unescape(false).tokenize(),
        Dialect::Postgres => Tokenizer::new(&PostgreSqlDialect {}, sql)
            .with_unescape(false)
            .tokenize(),
        Dialect::Sqlite => Tokenizer::new(&SQLiteDialect {}, sql).with_unescape(false).tokenize(),
    };
    tokens.map_err(|e| SqlError::validation(format!("Malformed SQL: {e}")))
}

/// Collapse whitespace, trim, and lay the statement out per `style`.
///
/// Input the tokenizer rejects (an unclosed quote or comment) is returned
/// trimmed but otherwise untouched.
pub fn format_sql(sql: &str, dialect: Dialect, style: FormatStyle) -> String {
    let Ok(tokens) = tokenize(sql, dialect) else {
        return sql.trim().to_string();
    };

    let mut out = String::with_capacity(sql.len());
    let mut depth: i32 = 0;
    let mut pending_space = false;
    for token in tokens {
        let at_line_start = out.is_empty() || out.ends_with('\n');
        match token {
            Token::EOF => continue,
            Token::Whitespace(Whitespace::SingleLineComment { prefix, comment }) => {
                if pending_space && !at_line_start {
                    out.push(' ');
                }
                out.push_str(&prefix);
                out.push_str(&comment);
                if !comment.ends_with('\n') {
                    out.push('\n');
                }
            }
            Token::Whitespace(Whitespace::MultiLineComment(text)) => {
                if pending_space && !at_line_start {
                    out.push(' ');
                }
                out.push_str("/*");
                out.push_str(&text);
                out.push_str("*/");
            }
            Token::Whitespace(_) => {
                pending_space = true;
                continue;
            }
            Token::Word(w) => {
                let breaks = style == FormatStyle::Pretty
                    && depth == 0
                    && w.quote_style.is_none()
                    && CLAUSE_WORDS.iter().any(|k| k.eq_ignore_ascii_case(&w.value));
                if breaks && !at_line_start {
                    out.push('\n');
                } else if pending_space && !at_line_start {
                    out.push(' ');
                }
                out.push_str(&w.to_string());
            }
            other => {
                if pending_space && !at_line_start {
                    out.push(' ');
                }
                match other {
                    Token::LParen => depth += 1,
                    Token::RParen => depth -= 1,
                    _ => {}
                }
                out.push_str(&other.to_string());
            }
        }
        pending_space = false;
    }
    out
}

/// Report unbalanced parentheses or unterminated quotes and comments.
pub fn check_balanced(sql: &str, dialect: Dialect) -> SqlResult<()> {
    let mut depth: i64 = 0;
    for token in tokenize(sql, dialect)? {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(SqlError::validation("Unbalanced ')' in SQL"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SqlError::validation(format!(
            "{depth} unclosed '(' in SQL"
        )));
    }
    Ok(())
}
