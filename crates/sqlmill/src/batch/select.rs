//! Keyed select: fetch rows by ids or equality records.

use super::{
    Record, Target, drop_table, join_on, key_records, participate, push_match, stage_temp_rows,
};
use crate::config::SqlConfig;
use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, FieldDescriptor};
use crate::error::{SqlError, SqlResult};
use crate::ident::is_plain_ident;
use crate::statement::{CompiledStatement, Sql};
use crate::template::bind_named_sql;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the addressed rows are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectMode {
    /// `UNION ALL` of one select per record.
    #[default]
    Common,
    /// Stage the keys in a temp table and join against it.
    TempTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub target: Target,
    pub mode: SelectMode,
    /// Select `COUNT(1) ct` instead of columns.
    pub count: bool,
    /// Property names to select; all fields when `None`.
    pub columns: Option<Vec<String>>,
}

impl SelectRequest {
    /// A [`SelectMode::Common`] select of every field of the rows `target` addresses.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            mode: SelectMode::Common,
            count: false,
            columns: None,
        }
    }

    /// Select by single primary key values.
    pub fn ids(ids: impl IntoIterator<Item = Value>) -> Self {
        Self::new(Target::Ids(ids.into_iter().collect()))
    }

    /// Select rows matching any of `records`.
    pub fn by_where(records: impl IntoIterator<Item = Record>) -> Self {
        Self::new(Target::Where(records.into_iter().collect()))
    }

    /// Select rows matching a raw predicate with `:name` parameters.
    pub fn raw(sql: impl Into<String>, params: Value) -> Self {
        Self::new(Target::Raw {
            sql: sql.into(),
            params,
        })
    }

    /// Choose how several keys are matched.
    pub fn with_mode(mut self, mode: SelectMode) -> Self {
        self.mode = mode;
        self
    }

    /// Count the matches instead of fetching them.
    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Restrict the select list to these property names.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Ordered statements plus the index of the one whose rows are the result.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub steps: Vec<CompiledStatement>,
    pub query_step: usize,
}

impl SelectPlan {
    /// The statement producing the result rows.
    pub fn query(&self) -> &CompiledStatement {
        &self.steps[self.query_step]
    }
}

/// Build a select over the rows addressed by `request.target`.
///
/// Where-records go through the skip policy: a skipped field does not
/// constrain the match, a kept `null` becomes `IS NULL`. In
/// [`SelectMode::Common`] a count request yields one `ct` row per record.
pub fn select_by_keys(
    entity: &EntityDescriptor,
    request: &SelectRequest,
    config: &SqlConfig,
) -> SqlResult<SelectPlan> {
    config.validate()?;
    let dialect = config.dialect;
    let table = entity.table_sql(dialect);
    let columns = if request.count {
        "COUNT(1) ct".to_string()
    } else {
        select_list(entity, request.columns.as_deref(), dialect)?
    };

    if let Target::Raw { sql, params } = &request.target {
        if sql.trim().is_empty() {
            return Err(SqlError::validation("Select needs a non-empty raw predicate"));
        }
        let mut q = Sql::new(format!("SELECT {columns} FROM {table} a WHERE "));
        q.push_sql(bind_named_sql(sql, params, dialect)?);
        return Ok(SelectPlan {
            steps: vec![q.build(dialect)],
            query_step: 0,
        });
    }

    let records = key_records(entity, &request.target)?
        .iter()
        .map(|r| filtered(entity, r, config))
        .collect::<SqlResult<Vec<_>>>()?;
    if records.is_empty() {
        return Err(SqlError::validation(format!(
            "Select on '{}' needs at least one id or where record",
            entity.name()
        )));
    }

    let plan = match request.mode {
        SelectMode::Common => {
            let mut q = Sql::empty();
            q.push_joined(&records, " UNION ALL ", |q, record| {
                q.push(&format!("SELECT {columns} FROM {table} a WHERE "));
                let fields = entity.fields().iter().filter(|f| record.contains_key(f.name()));
                q.push_joined(fields, " AND ", |q, field| {
                    let value = record.get(field.name()).unwrap_or(&Value::Null);
                    push_match(q, "a.", field, value, dialect);
                });
            });
            SelectPlan {
                steps: vec![q.build(dialect)],
                query_step: 0,
            }
        }
        SelectMode::TempTable => {
            let fields: Vec<&FieldDescriptor> = entity
                .fields()
                .iter()
                .filter(|f| records[0].contains_key(f.name()))
                .collect();
            let (tmp, mut steps) =
                stage_temp_rows(entity, &fields, &records, config.max_deal, dialect)?;
            let query_step = steps.len();
            steps.push(CompiledStatement::raw(format!(
                "SELECT {columns} FROM {table} a INNER JOIN {tmp} b ON {}",
                join_on(&fields, dialect)
            )));
            steps.push(drop_table(&tmp));
            SelectPlan { steps, query_step }
        }
    };

    tracing::trace!(
        target: "sqlmill.batch",
        entity = %entity.name(),
        mode = ?request.mode,
        steps = plan.steps.len(),
        "select statements built"
    );
    Ok(plan)
}

/// `record` restricted to the fields the skip policy keeps.
fn filtered(entity: &EntityDescriptor, record: &Record, config: &SqlConfig) -> SqlResult<Record> {
    if let Some(unknown) = record.keys().find(|k| entity.field(k).is_none()) {
        return Err(SqlError::validation(format!(
            "Unknown field '{unknown}' for entity '{}'",
            entity.name()
        )));
    }
    let kept: Record = entity
        .fields()
        .iter()
        .filter_map(|f| {
            participate(f, record, &config.skip, false).map(|v| (f.name().to_string(), v))
        })
        .collect();
    if kept.is_empty() {
        return Err(SqlError::validation(
            "Select record constrains no field after skipping empty values",
        ));
    }
    Ok(kept)
}

/// `a.col, a.col2 AS prop2`; an alias is added when the property and column names differ.
fn select_list(
    entity: &EntityDescriptor,
    names: Option<&[String]>,
    dialect: Dialect,
) -> SqlResult<String> {
    let fields: Vec<&FieldDescriptor> = match names {
        None => entity.fields().iter().collect(),
        Some(names) => names
            .iter()
            .map(|n| {
                entity.field(n).ok_or_else(|| {
                    SqlError::validation(format!(
                        "Unknown column '{n}' for entity '{}'",
                        entity.name()
                    ))
                })
            })
            .collect::<SqlResult<_>>()?,
    };
    if fields.is_empty() {
        return Err(SqlError::validation("Select needs at least one column"));
    }
    Ok(fields
        .iter()
        .map(|f| {
            let column = format!("a.{}", f.column_sql(dialect));
            if f.column_bare() == f.name() {
                column
            } else if is_plain_ident(f.name()) {
                format!("{column} AS {}", f.name())
            } else {
                format!("{column} AS {}", dialect.quote_ident(f.name()))
            }
        })
        .collect::<Vec<_>>()
        .join(", "))
}
