//! `CREATE TABLE` generation.

use super::column_list;
use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, FieldDescriptor};
use crate::statement::CompiledStatement;

/// DDL for `entity`: the table, then (outside MySQL) one statement per index.
///
/// MySQL declares indexes inline. A `temp` table is created as
/// `CREATE TEMPORARY TABLE` with the dialect's temp-table options.
pub fn create_table(entity: &EntityDescriptor, dialect: Dialect, temp: bool) -> Vec<CompiledStatement> {
    let table = entity.table_sql(dialect);
    let fields: Vec<&FieldDescriptor> = entity.fields().iter().collect();
    let keys: Vec<&FieldDescriptor> = entity.primary_keys().collect();
    let indexes: Vec<&FieldDescriptor> = entity.fields().iter().filter(|f| f.is_indexed()).collect();

    let mut body: Vec<String> = fields.iter().map(|f| f.column_ddl(dialect)).collect();
    if !keys.is_empty() {
        body.push(format!("PRIMARY KEY ({})", column_list(&keys, "", dialect)));
    }
    let index_name =
        |f: &FieldDescriptor| sanitize(&format!("idx_{}_{}", entity.table_base(), f.column_bare()));
    if dialect.inline_indexes() {
        body.extend(
            indexes
                .iter()
                .map(|f| format!("KEY {} ({})", index_name(*f), f.column_sql(dialect))),
        );
    }

    let mut steps = vec![CompiledStatement::raw(format!(
        "CREATE {}TABLE IF NOT EXISTS {table} ({}){}",
        if temp { "TEMPORARY " } else { "" },
        body.join(", "),
        if temp { dialect.temp_table_suffix() } else { "" }
    ))];
    if !dialect.inline_indexes() {
        steps.extend(indexes.iter().map(|f| {
            CompiledStatement::raw(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} ({})",
                index_name(*f),
                f.column_sql(dialect)
            ))
        }));
    }
    steps
}

/// A temp table over `fields`, without primary key.
///
/// With `keyed`, MySQL gets an inline key per column; other dialects get no
/// index so the plan keeps a fixed number of steps.
pub(crate) fn create_temp_table(
    name: &str,
    fields: &[&FieldDescriptor],
    keyed: bool,
    dialect: Dialect,
) -> CompiledStatement {
    let mut body: Vec<String> = fields.iter().map(|f| f.column_ddl(dialect)).collect();
    if keyed && dialect.inline_indexes() {
        body.extend(fields.iter().map(|f| {
            let c = f.column_sql(dialect);
            format!("KEY {} ({c})", sanitize(&format!("idx_{}", f.column_bare())))
        }));
    }
    CompiledStatement::raw(format!(
        "CREATE TEMPORARY TABLE IF NOT EXISTS {name} ({}){}",
        body.join(", "),
        dialect.temp_table_suffix()
    ))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
