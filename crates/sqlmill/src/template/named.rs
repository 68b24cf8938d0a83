//! `:name` parameter binding.
//!
//! Rewrites `:name` / `:a.b` markers in expanded SQL into dialect placeholders
//! and collects the bound values in order. Markers inside quoted literals,
//! identifiers and comments are left alone, as are `::type` casts and a colon
//! not followed by a name (`:=`, slice bounds).

use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::params::resolve;
use crate::statement::{CompiledStatement, Sql};
use serde_json::Value;

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn starts_name(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Replace named markers in `sql` with placeholders bound from `bag`.
///
/// Array values expand to one placeholder per element (`IN (:ids)`); an
/// empty array binds `NULL`. Markers that do not resolve in the bag are
/// reported together as [`SqlError::UnconvertedParameter`].
pub fn bind_named(sql: &str, bag: &Value, dialect: Dialect) -> SqlResult<CompiledStatement> {
    Ok(bind_named_sql(sql, bag, dialect)?.build(dialect))
}

/// Like [`bind_named`], but returns the builder so the fragment can be
/// spliced into a larger statement before placeholders are numbered.
///
/// `dialect` only decides how quoted literals and comments are skipped.
pub fn bind_named_sql(sql: &str, bag: &Value, dialect: Dialect) -> SqlResult<Sql> {
    let mut out = Sql::empty();
    let mut text = String::new();
    let mut missing = Vec::new();
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let offset = |k: usize| chars.get(k).map_or(sql.len(), |(p, _)| *p);
    let next_is = |k: usize, want: char| chars.get(k).is_some_and(|(_, n)| *n == want);
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let mut j = i + 1;
                while j < chars.len() {
                    let cj = chars[j].1;
                    if c == '\'' && cj == '\\' && dialect == Dialect::Mysql {
                        j += 2;
                        continue;
                    }
                    if cj == c {
                        if next_is(j + 1, c) {
                            j += 2;
                            continue;
                        }
                        break;
                    }
                    j += 1;
                }
                text.push_str(&sql[pos..offset(j + 1)]);
                i = j + 1;
            }
            '-' if next_is(i + 1, '-') => {
                let j = (i..chars.len()).find(|&k| chars[k].1 == '\n').unwrap_or(chars.len());
                text.push_str(&sql[pos..offset(j)]);
                i = j;
            }
            '#' if dialect == Dialect::Mysql => {
                let j = (i..chars.len()).find(|&k| chars[k].1 == '\n').unwrap_or(chars.len());
                text.push_str(&sql[pos..offset(j)]);
                i = j;
            }
            '/' if next_is(i + 1, '*') => {
                let j = (i + 2..chars.len())
                    .find(|&k| chars[k].1 == '*' && next_is(k + 1, '/'))
                    .map_or(chars.len(), |k| k + 2);
                text.push_str(&sql[pos..offset(j)]);
                i = j;
            }
            ':' if next_is(i + 1, ':') => {
                text.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|(_, n)| starts_name(*n)) => {
                let mut j = i + 1;
                while j < chars.len() && is_name_char(chars[j].1) {
                    j += 1;
                }
                while chars[j - 1].1 == '.' {
                    j -= 1;
                }
                let name = &sql[pos + 1..offset(j)];
                match resolve(bag, name) {
                    Some(value) => {
                        out.push(&text);
                        text.clear();
                        match value {
                            Value::Array(items) => {
                                out.push_bind_list(items.iter().cloned());
                            }
                            other => {
                                out.push_bind(other.clone());
                            }
                        }
                    }
                    None => {
                        missing.push(format!(":{name}"));
                        text.push_str(&sql[pos..offset(j)]);
                    }
                }
                i = j;
            }
            _ => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !missing.is_empty() {
        return Err(SqlError::UnconvertedParameter(missing));
    }
    out.push(&text);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binds_in_order() {
        let s = bind_named(
            "SELECT * FROM t WHERE a = :a AND b = :user.id",
            &json!({"a": 1, "user": {"id": "u1"}}),
            Dialect::Mysql,
        )
        .unwrap();
        assert_eq!(s.sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(s.params, vec![json!(1), json!("u1")]);
    }

    #[test]
    fn postgres_numbers_placeholders() {
        let s = bind_named(
            "WHERE id IN (:ids) AND n = :name",
            &json!({"ids": [1, 2, 3], "name": "x"}),
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(s.sql, "WHERE id IN ($1, $2, $3) AND n = $4");
        assert_eq!(s.params.len(), 4);
    }

    #[test]
    fn skips_literals_and_casts() {
        let s = bind_named(
            "SELECT ':a', x::text FROM t WHERE a = :a",
            &json!({"a": 5}),
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(s.sql, "SELECT ':a', x::text FROM t WHERE a = $1");
        assert_eq!(s.params, vec![json!(5)]);
    }

    #[test]
    fn unresolved_markers_are_reported() {
        let sql = "a = :missing AND b = :b AND c = :other";
        let err = bind_named(sql, &json!({"b": 1}), Dialect::Mysql).unwrap_err();
        match err {
            SqlError::UnconvertedParameter(names) => assert_eq!(names, vec![":missing", ":other"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn colon_without_name_is_text() {
        let s = bind_named("SET @a := 1, b = arr[1:2]", &json!({}), Dialect::Mysql).unwrap();
        assert_eq!(s.sql, "SET @a := 1, b = arr[1:2]");
        assert!(s.params.is_empty());
    }

    #[test]
    fn comments_are_not_bound() {
        let sql = "SELECT a -- by :owner\nFROM t /* :skip */ WHERE id = :id";
        let s = bind_named(sql, &json!({"id": 1}), Dialect::Postgres).unwrap();
        assert_eq!(s.sql, "SELECT a -- by :owner\nFROM t /* :skip */ WHERE id = $1");
        assert_eq!(s.params, vec![json!(1)]);

        let sql = "SELECT a # :note\nFROM t WHERE id = :id";
        let s = bind_named(sql, &json!({"id": 2}), Dialect::Mysql).unwrap();
        assert_eq!(s.sql, "SELECT a # :note\nFROM t WHERE id = ?");
        assert_eq!(s.params, vec![json!(2)]);
    }

    #[test]
    fn case_fallback_and_trailing_dot() {
        let s = bind_named("x = :user_name.", &json!({"userName": "a"}), Dialect::Sqlite).unwrap();
        assert_eq!(s.sql, "x = ?.");
        assert_eq!(s.params, vec![json!("a")]);
    }

    #[test]
    fn null_is_bound() {
        let s = bind_named("x = :v", &json!({"v": null}), Dialect::Mysql).unwrap();
        assert_eq!(s.sql, "x = ?");
        assert_eq!(s.params, vec![Value::Null]);
    }

    #[test]
    fn empty_array_binds_null() {
        let s = bind_named("id IN (:ids)", &json!({"ids": []}), Dialect::Mysql).unwrap();
        assert_eq!(s.sql, "id IN (NULL)");
        assert!(s.params.is_empty());
    }
}
