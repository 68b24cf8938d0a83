//! Batch update keyed by primary key, as one `CASE WHEN` statement per chunk.

use super::{Record, blank, participate};
use crate::config::SqlConfig;
use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, FieldDescriptor};
use crate::error::{SqlError, SqlResult};
use crate::statement::{CompiledStatement, Sql};
use serde_json::Value;

/// One record's key values and its changed columns.
struct Change<'e> {
    keys: Vec<Value>,
    sets: Vec<(&'e FieldDescriptor, Value)>,
}

/// Build the statements updating `records` by primary key.
///
/// Each non-key column that changes for at least one record gets a
/// `CASE WHEN <key match> THEN ? ... ELSE <column> END` arm; the `WHERE`
/// clause addresses only records with a change. Records with nothing to
/// change are left out, and a chunk with no changes emits nothing.
pub fn update(
    entity: &EntityDescriptor,
    records: &[Record],
    config: &SqlConfig,
) -> SqlResult<Vec<CompiledStatement>> {
    config.validate()?;
    let keys: Vec<&FieldDescriptor> = entity.primary_keys().collect();
    if keys.is_empty() {
        return Err(SqlError::validation(format!(
            "Update on '{}' needs a primary key",
            entity.name()
        )));
    }
    let dialect = config.dialect;
    let table = entity.table_sql(dialect);

    let mut steps = Vec::new();
    for chunk in records.chunks(config.max_deal) {
        let changes = chunk
            .iter()
            .map(|r| change_for(entity, &keys, r, config))
            .collect::<SqlResult<Vec<_>>>()?;
        let changes: Vec<Change> = changes.into_iter().filter(|c| !c.sets.is_empty()).collect();
        if changes.is_empty() {
            continue;
        }

        let columns: Vec<&FieldDescriptor> = entity
            .fields()
            .iter()
            .filter(|f| changes.iter().any(|c| c.sets.iter().any(|(s, _)| s.name() == f.name())))
            .collect();

        let mut q = Sql::new(format!("UPDATE {table} SET "));
        q.push_joined(&columns, ", ", |q, field| {
            let column = field.column_sql(dialect);
            q.push(&format!("{column} = CASE"));
            for change in &changes {
                let Some((_, value)) = change.sets.iter().find(|(s, _)| s.name() == field.name())
                else {
                    continue;
                };
                q.push(" WHEN ");
                push_key_match(q, &keys, &change.keys, dialect);
                q.push(" THEN ");
                q.push_bind(value.clone());
            }
            q.push(&format!(" ELSE {column} END"));
        });

        q.push(" WHERE ");
        if let [key] = keys.as_slice() {
            q.push(&key.column_sql(dialect));
            q.push(" IN (");
            q.push_bind_list(changes.iter().map(|c| c.keys[0].clone()));
            q.push(")");
        } else {
            q.push_joined(&changes, " OR ", |q, change| {
                q.push("(");
                push_key_match(q, &keys, &change.keys, dialect);
                q.push(")");
            });
        }
        steps.push(q.build(dialect));
    }

    tracing::trace!(
        target: "sqlmill.batch",
        entity = %entity.name(),
        records = records.len(),
        steps = steps.len(),
        "update statements built"
    );
    Ok(steps)
}

fn change_for<'e>(
    entity: &'e EntityDescriptor,
    keys: &[&FieldDescriptor],
    record: &Record,
    config: &SqlConfig,
) -> SqlResult<Change<'e>> {
    let key_values = keys
        .iter()
        .map(|k| match record.get(k.name()) {
            Some(v) if !v.is_null() && !blank(v) => Ok(v.clone()),
            _ => Err(SqlError::validation(format!(
                "Update record for '{}' is missing key '{}'",
                entity.name(),
                k.name()
            ))),
        })
        .collect::<SqlResult<Vec<_>>>()?;
    let sets = entity
        .fields()
        .iter()
        .filter(|f| !f.is_primary_key())
        .filter_map(|f| participate(f, record, &config.skip, false).map(|v| (f, v)))
        .collect();
    Ok(Change {
        keys: key_values,
        sets,
    })
}

/// `k1 = ? AND k2 = ?`
fn push_key_match(q: &mut Sql, keys: &[&FieldDescriptor], values: &[Value], dialect: Dialect) {
    q.push_joined(keys.iter().zip(values), " AND ", |q, (key, value)| {
        q.push(&key.column_sql(dialect));
        q.push(" = ");
        q.push_bind(value.clone());
    });
}
