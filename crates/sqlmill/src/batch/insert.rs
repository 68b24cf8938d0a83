//! Batch insert in four modes.

use super::{Record, column_list, ddl, drop_table, participate, temp_table_name};
use crate::config::{SkipPolicy, SqlConfig};
use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, FieldDescriptor};
use crate::error::{SqlError, SqlResult};
use crate::statement::{CompiledStatement, Sql};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// One multi-row `INSERT ... VALUES`.
    #[default]
    Insert,
    /// Stage rows in a temp table, then `INSERT ... SELECT` from it.
    TempTable,
    /// Insert each record only if no row matches its existence columns.
    IfNotExists,
    /// Insert or replace by primary key.
    Replace,
}

/// Options for [`insert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOptions {
    pub mode: InsertMode,
    /// Existence check fields for [`InsertMode::IfNotExists`]; defaults to the primary key.
    pub exists_fields: Option<Vec<String>>,
}

impl InsertOptions {
    /// Options for `mode`, checking existence by primary key.
    pub fn new(mode: InsertMode) -> Self {
        Self {
            mode,
            exists_fields: None,
        }
    }

    /// Check existence on these property names instead of the primary key.
    pub fn with_exists_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exists_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Participating columns and per-row values for one chunk.
struct InsertRows<'e> {
    columns: Vec<&'e FieldDescriptor>,
    rows: Vec<Vec<Value>>,
}

impl<'e> InsertRows<'e> {
    /// A column takes part when it takes part for at least one record; rows
    /// that skip it get the declared default or `null`.
    fn collect(entity: &'e EntityDescriptor, records: &[Record], policy: &SkipPolicy) -> Self {
        let fields = entity.fields();
        let cells: Vec<Vec<Option<Value>>> = records
            .iter()
            .map(|r| fields.iter().map(|f| participate(f, r, policy, true)).collect())
            .collect();
        let used: Vec<usize> = (0..fields.len())
            .filter(|&i| cells.iter().any(|row| row[i].is_some()))
            .collect();

        let rows = cells
            .into_iter()
            .map(|mut row| {
                used.iter()
                    .map(|&i| {
                        row[i].take().unwrap_or_else(|| {
                            fields[i].declared_default().cloned().unwrap_or(Value::Null)
                        })
                    })
                    .collect()
            })
            .collect();
        Self {
            columns: used.iter().map(|&i| &fields[i]).collect(),
            rows,
        }
    }

    /// `v1, v2, ...`: generated-id expressions for empty id fields, binds otherwise.
    fn push_values(&self, q: &mut Sql, row: &[Value], dialect: Dialect) {
        q.push_joined(self.columns.iter().zip(row), ", ", |q, (field, value)| {
            match (value, field.generator()) {
                (Value::Null, Some(generator)) => {
                    q.push(generator.expr(dialect));
                }
                _ => {
                    q.push_bind(value.clone());
                }
            }
        });
    }

    /// ` VALUES (...), (...)`
    fn push_values_list(&self, q: &mut Sql, dialect: Dialect) {
        q.push(" VALUES ");
        q.push_joined(&self.rows, ", ", |q, row| {
            q.push("(");
            self.push_values(q, row, dialect);
            q.push(")");
        });
    }
}

/// Build the statements inserting `records` into `entity`.
///
/// Records are processed in chunks of `config.max_deal`; each chunk
/// contributes its own statements, in order. An empty input yields no
/// statements.
pub fn insert(
    entity: &EntityDescriptor,
    records: &[Record],
    options: &InsertOptions,
    config: &SqlConfig,
) -> SqlResult<Vec<CompiledStatement>> {
    config.validate()?;
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let dialect = config.dialect;
    let exists = match options.mode {
        InsertMode::IfNotExists => exists_fields(entity, options)?,
        _ => Vec::new(),
    };
    if options.mode == InsertMode::Replace && dialect.replace_into().is_none() && entity.is_keyless() {
        return Err(SqlError::validation(format!(
            "Replace on {dialect} needs a primary key; entity '{}' has none",
            entity.name()
        )));
    }

    let table = entity.table_sql(dialect);
    let mut steps = Vec::new();
    for chunk in records.chunks(config.max_deal) {
        let rows = InsertRows::collect(entity, chunk, &config.skip);
        if rows.columns.is_empty() {
            return Err(SqlError::validation(format!(
                "No field of entity '{}' takes part in the insert",
                entity.name()
            )));
        }
        let columns = column_list(&rows.columns, "", dialect);

        match options.mode {
            InsertMode::Insert => {
                let mut q = Sql::new(format!("INSERT INTO {table} ({columns})"));
                rows.push_values_list(&mut q, dialect);
                steps.push(q.build(dialect));
            }
            InsertMode::Replace => {
                let head = dialect.replace_into().unwrap_or("INSERT INTO");
                let mut q = Sql::new(format!("{head} {table} ({columns})"));
                rows.push_values_list(&mut q, dialect);
                if dialect.replace_into().is_none() {
                    q.push(&on_conflict(entity, &rows.columns, dialect));
                }
                steps.push(q.build(dialect));
            }
            InsertMode::IfNotExists => {
                let checks = chunk
                    .iter()
                    .map(|record| {
                        exists
                            .iter()
                            .map(|field| exists_value(entity, field, record, &config.skip))
                            .collect::<SqlResult<Vec<_>>>()
                    })
                    .collect::<SqlResult<Vec<_>>>()?;
                let mut q = Sql::new(format!("INSERT INTO {table} ({columns}) "));
                let dual = dialect.dual().map(|d| format!(" FROM {d}")).unwrap_or_default();
                q.push_joined(checks.iter().zip(&rows.rows), " UNION ALL ", |q, (check, row)| {
                    q.push("SELECT ");
                    rows.push_values(q, row, dialect);
                    q.push(&dual);
                    q.push(&format!(" WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE "));
                    q.push_joined(exists.iter().zip(check), " AND ", |q, (field, value)| {
                        q.push(&field.column_sql(dialect));
                        q.push(" = ");
                        q.push_bind(value.clone());
                    });
                    q.push(")");
                });
                steps.push(q.build(dialect));
            }
            InsertMode::TempTable => {
                let tmp = temp_table_name(entity);
                steps.push(drop_table(&tmp));
                steps.push(ddl::create_temp_table(&tmp, &rows.columns, false, dialect));
                let mut q = Sql::new(format!("INSERT INTO {tmp} ({columns})"));
                rows.push_values_list(&mut q, dialect);
                steps.push(q.build(dialect));
                steps.push(CompiledStatement::raw(format!(
                    "INSERT INTO {table} ({columns}) SELECT {columns} FROM {tmp}"
                )));
                steps.push(drop_table(&tmp));
            }
        }
    }

    tracing::trace!(
        target: "sqlmill.batch",
        entity = %entity.name(),
        mode = ?options.mode,
        records = records.len(),
        steps = steps.len(),
        "insert statements built"
    );
    Ok(steps)
}

fn exists_fields<'e>(
    entity: &'e EntityDescriptor,
    options: &InsertOptions,
) -> SqlResult<Vec<&'e FieldDescriptor>> {
    let fields: Vec<&FieldDescriptor> = match &options.exists_fields {
        Some(names) => names
            .iter()
            .map(|n| {
                entity.field(n).ok_or_else(|| {
                    SqlError::validation(format!(
                        "Unknown existence field '{n}' for entity '{}'",
                        entity.name()
                    ))
                })
            })
            .collect::<SqlResult<_>>()?,
        None => entity.primary_keys().collect(),
    };
    if fields.is_empty() {
        return Err(SqlError::validation(format!(
            "Insert-if-not-exists on '{}' needs existence fields or a primary key",
            entity.name()
        )));
    }
    Ok(fields)
}

/// The value an existence check compares against. Missing or null is an error.
fn exists_value(
    entity: &EntityDescriptor,
    field: &FieldDescriptor,
    record: &Record,
    policy: &SkipPolicy,
) -> SqlResult<Value> {
    participate(field, record, policy, true)
        .filter(|v| !v.is_null())
        .or_else(|| field.declared_default().cloned())
        .ok_or_else(|| {
            SqlError::validation(format!(
                "Insert-if-not-exists on '{}' needs a value for existence field '{}'",
                entity.name(),
                field.name()
            ))
        })
}

/// Postgres upsert tail: update every non-key column from `EXCLUDED`.
fn on_conflict(entity: &EntityDescriptor, columns: &[&FieldDescriptor], dialect: Dialect) -> String {
    let keys: Vec<&FieldDescriptor> = entity.primary_keys().collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|f| !f.is_primary_key())
        .map(|f| {
            let c = f.column_sql(dialect);
            format!("{c} = EXCLUDED.{c}")
        })
        .collect();
    let target = column_list(&keys, "", dialect);
    if updates.is_empty() {
        format!(" ON CONFLICT ({target}) DO NOTHING")
    } else {
        format!(" ON CONFLICT ({target}) DO UPDATE SET {}", updates.join(", "))
    }
}
