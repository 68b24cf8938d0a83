//! Physical and logical batch delete.

use super::{
    Record, Target, drop_table, join_on, key_records, null_safe_eq, predicate_fields, push_match,
    stage_temp_rows,
};
use crate::config::SqlConfig;
use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, FieldDescriptor};
use crate::error::{SqlError, SqlResult};
use crate::statement::{CompiledStatement, Sql};
use crate::template::bind_named_sql;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the addressed rows are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// One statement with an `OR` of equality groups.
    #[default]
    Common,
    /// Stage the keys in a temp table and join against it.
    TempTable,
}

/// What to delete and how.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub target: Target,
    pub mode: DeleteMode,
    /// Delete physically even when the entity has a logical-delete field.
    pub force: bool,
}

impl DeleteRequest {
    /// A [`DeleteMode::Common`] delete of `target`, logical when the entity allows it.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            mode: DeleteMode::Common,
            force: false,
        }
    }

    /// Delete by single primary key values.
    pub fn ids(ids: impl IntoIterator<Item = Value>) -> Self {
        Self::new(Target::Ids(ids.into_iter().collect()))
    }

    /// Delete rows matching any of `records` (all fields of a record AND-ed).
    pub fn by_where(records: impl IntoIterator<Item = Record>) -> Self {
        Self::new(Target::Where(records.into_iter().collect()))
    }

    /// Delete rows matching a raw predicate with `:name` parameters.
    pub fn raw(sql: impl Into<String>, params: Value) -> Self {
        Self::new(Target::Raw {
            sql: sql.into(),
            params,
        })
    }

    /// Match the addressed rows with `mode` instead.
    pub fn with_mode(mut self, mode: DeleteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Remove rows even when the entity declares a logical-delete field.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Build the statements deleting the rows addressed by `request`.
///
/// With a logical-delete field and no `force`, rows are marked instead of
/// removed. A raw predicate always uses [`DeleteMode::Common`]. Nothing to
/// address yields no statements.
pub fn delete(
    entity: &EntityDescriptor,
    request: &DeleteRequest,
    config: &SqlConfig,
) -> SqlResult<Vec<CompiledStatement>> {
    config.validate()?;
    let dialect = config.dialect;
    let marker = if request.force {
        None
    } else {
        entity.logical_delete_field()
    };

    if let Target::Raw { sql, params } = &request.target {
        if sql.trim().is_empty() {
            return Err(SqlError::validation(
                "Empty raw predicate would address every row",
            ));
        }
        let mut q = statement_head(entity, marker, dialect);
        q.push(" WHERE ");
        q.push_sql(bind_named_sql(sql, params, dialect)?);
        return Ok(vec![q.build(dialect)]);
    }

    let records = key_records(entity, &request.target)?;
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let steps = match request.mode {
        DeleteMode::Common => {
            let groups = records
                .iter()
                .map(|r| predicate_fields(entity, r).map(|fields| (fields, r)))
                .collect::<SqlResult<Vec<_>>>()?;
            let mut q = statement_head(entity, marker, dialect);
            q.push(" WHERE ");
            q.push_joined(&groups, " OR ", |q, (fields, record)| {
                q.push("(");
                q.push_joined(fields, " AND ", |q, field| {
                    let value = record.get(field.name()).unwrap_or(&Value::Null);
                    push_match(q, "", field, value, dialect);
                });
                q.push(")");
            });
            vec![q.build(dialect)]
        }
        DeleteMode::TempTable => {
            let fields = predicate_fields(entity, &records[0])?;
            let (tmp, mut steps) =
                stage_temp_rows(entity, &fields, &records, config.max_deal, dialect)?;
            steps.push(join_statement(entity, &fields, &tmp, marker, dialect));
            steps.push(drop_table(&tmp));
            steps
        }
    };

    tracing::trace!(
        target: "sqlmill.batch",
        entity = %entity.name(),
        mode = ?request.mode,
        logical = marker.is_some(),
        steps = steps.len(),
        "delete statements built"
    );
    Ok(steps)
}

/// `DELETE FROM t` or `UPDATE t SET marker = ?`.
fn statement_head(entity: &EntityDescriptor, marker: Option<&FieldDescriptor>, dialect: Dialect) -> Sql {
    let table = entity.table_sql(dialect);
    match marker {
        None => Sql::new(format!("DELETE FROM {table}")),
        Some(field) => {
            let mut q = Sql::new(format!("UPDATE {table} SET {} = ", field.column_sql(dialect)));
            q.push_bind(deleted_value(field));
            q
        }
    }
}

fn deleted_value(field: &FieldDescriptor) -> Value {
    field.deleted_value().cloned().unwrap_or(Value::Null)
}

/// The delete (or mark) joining the entity table `a` against temp table `b`.
fn join_statement(
    entity: &EntityDescriptor,
    fields: &[&FieldDescriptor],
    tmp: &str,
    marker: Option<&FieldDescriptor>,
    dialect: Dialect,
) -> CompiledStatement {
    let table = entity.table_sql(dialect);
    let on = join_on(fields, dialect);
    let matched = fields
        .iter()
        .map(|f| {
            let c = f.column_sql(dialect);
            null_safe_eq(&format!("{table}.{c}"), &format!("b.{c}"), dialect)
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    match (dialect, marker) {
        (Dialect::Mysql, None) => {
            CompiledStatement::raw(format!("DELETE a.* FROM {table} a INNER JOIN {tmp} b ON {on}"))
        }
        (Dialect::Mysql, Some(m)) => CompiledStatement::new(
            format!(
                "UPDATE {table} a INNER JOIN {tmp} b ON {on} SET a.{} = ?",
                m.column_sql(dialect)
            ),
            vec![deleted_value(m)],
        ),
        (Dialect::Postgres, None) => {
            CompiledStatement::raw(format!("DELETE FROM {table} a USING {tmp} b WHERE {on}"))
        }
        (Dialect::Postgres, Some(m)) => CompiledStatement::new(
            format!(
                "UPDATE {table} a SET {} = $1 FROM {tmp} b WHERE {on}",
                m.column_sql(dialect)
            ),
            vec![deleted_value(m)],
        ),
        (Dialect::Sqlite, None) => CompiledStatement::raw(format!(
            "DELETE FROM {table} WHERE EXISTS (SELECT 1 FROM {tmp} b WHERE {matched})"
        )),
        (Dialect::Sqlite, Some(m)) => CompiledStatement::new(
            format!(
                "UPDATE {table} SET {} = ? WHERE EXISTS (SELECT 1 FROM {tmp} b WHERE {matched})",
                m.column_sql(dialect)
            ),
            vec![deleted_value(m)],
        ),
    }
}
