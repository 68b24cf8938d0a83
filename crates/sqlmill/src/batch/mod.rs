//! Batch statement synthesis.
//!
//! Every operation returns an ordered list of [`CompiledStatement`]s. Multi-step
//! plans (temp-table modes) must run in order on one connection; wrap them in a
//! transaction for atomicity, this module does not.
//!
//! Records are JSON objects keyed by property name. Which fields take part in
//! a statement is decided by the [`SkipPolicy`] in the [`SqlConfig`] passed in.
//!
//! [`SqlConfig`]: crate::SqlConfig

mod ddl;
mod delete;
mod insert;
mod select;
mod update;

#[cfg(test)]
mod tests;

pub use ddl::create_table;
pub use delete::{DeleteMode, DeleteRequest, delete};
pub use insert::{InsertMode, InsertOptions, insert};
pub use select::{SelectMode, SelectPlan, SelectRequest, select_by_keys};
pub use update::update;

use crate::config::SkipPolicy;
use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, FieldDescriptor};
use crate::error::{SqlError, SqlResult};
use crate::ident::is_plain_ident;
use crate::statement::{CompiledStatement, Sql};
use serde_json::{Map, Value};

/// One input row, keyed by property name.
pub type Record = Map<String, Value>;

/// Which rows a delete or keyed select addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Values of the single primary key.
    Ids(Vec<Value>),
    /// One equality group per record.
    Where(Vec<Record>),
    /// A raw predicate with `:name` parameters bound from `params`.
    Raw { sql: String, params: Value },
}

fn blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

/// Whether `field` takes part for `record`, and with which value.
///
/// Checked in order: absent, null, blank string, anything else. On insert
/// an absent/null/blank value falls back to the declared default, and
/// fields with an id generator always take part (with `null` standing in
/// for "generate").
pub(crate) fn participate(
    field: &FieldDescriptor,
    record: &Record,
    policy: &SkipPolicy,
    insert: bool,
) -> Option<Value> {
    let value = record.get(field.name());
    if insert && field.generator().is_some() {
        return Some(match value {
            Some(v) if !v.is_null() && !blank(v) => v.clone(),
            _ => Value::Null,
        });
    }
    let fallback = |empty: Value| {
        if insert {
            field.declared_default().cloned().unwrap_or(empty)
        } else {
            empty
        }
    };
    match value {
        None => (!policy.skip_undefined).then(|| fallback(Value::Null)),
        Some(Value::Null) => (!policy.skip_null).then(|| fallback(Value::Null)),
        Some(v) if blank(v) => {
            (!policy.skip_empty_string).then(|| fallback(Value::String(String::new())))
        }
        Some(v) => Some(v.clone()),
    }
}

/// Expand `target` into one record per addressed row.
///
/// `Raw` is not handled here.
pub(crate) fn key_records(entity: &EntityDescriptor, target: &Target) -> SqlResult<Vec<Record>> {
    match target {
        Target::Ids(ids) => {
            let mut keys = entity.primary_keys();
            let (Some(key), None) = (keys.next(), keys.next()) else {
                return Err(SqlError::validation(format!(
                    "Entity '{}' needs exactly one primary key to address rows by id; use Target::Where",
                    entity.name()
                )));
            };
            Ok(ids
                .iter()
                .map(|id| {
                    let mut r = Record::new();
                    r.insert(key.name().to_string(), id.clone());
                    r
                })
                .collect())
        }
        Target::Where(records) => Ok(records.clone()),
        Target::Raw { .. } => Err(SqlError::validation("Raw predicates carry no key records")),
    }
}

/// The fields named by `record`, in declaration order.
pub(crate) fn predicate_fields<'e>(
    entity: &'e EntityDescriptor,
    record: &Record,
) -> SqlResult<Vec<&'e FieldDescriptor>> {
    if let Some(unknown) = record.keys().find(|k| entity.field(k).is_none()) {
        return Err(SqlError::validation(format!(
            "Unknown field '{unknown}' for entity '{}'",
            entity.name()
        )));
    }
    let fields: Vec<&FieldDescriptor> = entity
        .fields()
        .iter()
        .filter(|f| record.contains_key(f.name()))
        .collect();
    if fields.is_empty() {
        return Err(SqlError::validation(
            "Empty predicate record would address every row",
        ));
    }
    Ok(fields)
}

/// `col = ?`, or `col IS NULL` for a null value.
pub(crate) fn push_match(
    sql: &mut Sql,
    qualifier: &str,
    field: &FieldDescriptor,
    value: &Value,
    dialect: Dialect,
) {
    sql.push(qualifier);
    sql.push(&field.column_sql(dialect));
    if value.is_null() {
        sql.push(" IS NULL");
    } else {
        sql.push(" = ");
        sql.push_bind(value.clone());
    }
}

/// A fresh temp table name derived from the entity's table.
pub(crate) fn temp_table_name(entity: &EntityDescriptor) -> String {
    let base = entity.table_base();
    let base = if is_plain_ident(base) { base } else { "tmp" };
    format!("{base}_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn drop_table(name: &str) -> CompiledStatement {
    CompiledStatement::raw(format!("DROP TABLE IF EXISTS {name}"))
}

/// Comma-separated column list, optionally qualified.
pub(crate) fn column_list(fields: &[&FieldDescriptor], qualifier: &str, dialect: Dialect) -> String {
    fields
        .iter()
        .map(|f| format!("{qualifier}{}", f.column_sql(dialect)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drop, create and fill a temp table holding `rows` over `fields`.
///
/// The fill is split into one `INSERT` per `max_deal` rows. Returns the
/// table name and the statements, drop and create first.
pub(crate) fn stage_temp_rows(
    entity: &EntityDescriptor,
    fields: &[&FieldDescriptor],
    rows: &[Record],
    max_deal: usize,
    dialect: Dialect,
) -> SqlResult<(String, Vec<CompiledStatement>)> {
    if let Some(odd) = rows.iter().find(|r| {
        r.len() != fields.len() || fields.iter().any(|f| !r.contains_key(f.name()))
    }) {
        return Err(SqlError::validation(format!(
            "Temp-table mode needs the same fields in every record; got {:?}",
            odd.keys().collect::<Vec<_>>()
        )));
    }

    let tmp = temp_table_name(entity);
    let mut steps = vec![drop_table(&tmp)];
    steps.push(ddl::create_temp_table(&tmp, fields, true, dialect));

    let head = format!("INSERT INTO {tmp} ({}) VALUES ", column_list(fields, "", dialect));
    for chunk in rows.chunks(max_deal.max(1)) {
        let mut fill = Sql::new(head.clone());
        fill.push_joined(chunk, ", ", |q, row| {
            q.push("(");
            q.push_joined(fields, ", ", |q, f| {
                q.push_bind(row.get(f.name()).cloned().unwrap_or(Value::Null));
            });
            q.push(")");
        });
        steps.push(fill.build(dialect));
    }
    Ok((tmp, steps))
}

/// Null-safe equality between `left` and `right`.
pub(crate) fn null_safe_eq(left: &str, right: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Mysql => format!("{left} <=> {right}"),
        Dialect::Postgres => format!("{left} IS NOT DISTINCT FROM {right}"),
        Dialect::Sqlite => format!("{left} IS {right}"),
    }
}

/// `a.k1 <=> b.k1 AND a.k2 <=> b.k2`, spelled per dialect so null keys
/// match like the `IS NULL` of the common modes.
pub(crate) fn join_on(fields: &[&FieldDescriptor], dialect: Dialect) -> String {
    fields
        .iter()
        .map(|f| {
            let c = f.column_sql(dialect);
            null_safe_eq(&format!("a.{c}"), &format!("b.{c}"), dialect)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
