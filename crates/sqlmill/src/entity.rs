//! Entity and field descriptors.
//!
//! Descriptors are built once through ordinary builder calls and are
//! immutable afterwards. The batch synthesizer only ever reads them.
//!
//! # Example
//!
//! ```ignore
//! use sqlmill::{EntityDescriptor, FieldDescriptor, IdGenerator, SqlType};
//!
//! let user = EntityDescriptor::builder("user_info")
//!     .field(FieldDescriptor::new("id", SqlType::Char).length(36).primary_key().id_generator(IdGenerator::Uuid))
//!     .field(FieldDescriptor::new("userName", SqlType::Varchar).column("user_name").length(64))
//!     .field(FieldDescriptor::new("deleted", SqlType::TinyInt).default_value(0).logical_delete(1))
//!     .build()?;
//! ```

use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::ident::{Ident, IdentPart};
use crate::registry::candidate_ids;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Column type, rendered per dialect by [`SqlType::ddl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Char,
    Varchar,
    Text,
    LongText,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Json,
    Blob,
}

impl SqlType {
    /// Column type text, e.g. `VARCHAR(64)` or `NUMERIC(10, 2)`.
    pub fn ddl(self, dialect: Dialect, length: Option<u32>, scale: Option<u32>) -> String {
        let sized = |name: &str, default_len: u32| format!("{name}({})", length.unwrap_or(default_len));
        let numeric = |name: &str| match (length, scale) {
            (Some(p), Some(s)) => format!("{name}({p}, {s})"),
            (Some(p), None) => format!("{name}({p})"),
            _ => name.to_string(),
        };
        match dialect {
            Dialect::Mysql => match self {
                SqlType::Char => sized("CHAR", 1),
                SqlType::Varchar => sized("VARCHAR", 255),
                SqlType::Text => "TEXT".into(),
                SqlType::LongText => "LONGTEXT".into(),
                SqlType::TinyInt => "TINYINT".into(),
                SqlType::SmallInt => "SMALLINT".into(),
                SqlType::Int => "INT".into(),
                SqlType::BigInt => "BIGINT".into(),
                SqlType::Float => "FLOAT".into(),
                SqlType::Double => "DOUBLE".into(),
                SqlType::Decimal => numeric("DECIMAL"),
                SqlType::Boolean => "TINYINT(1)".into(),
                SqlType::Date => "DATE".into(),
                SqlType::DateTime => "DATETIME".into(),
                SqlType::Timestamp => "TIMESTAMP".into(),
                SqlType::Json => "JSON".into(),
                SqlType::Blob => "BLOB".into(),
            },
            Dialect::Postgres => match self {
                SqlType::Char => sized("CHAR", 1),
                SqlType::Varchar => sized("VARCHAR", 255),
                SqlType::Text | SqlType::LongText => "TEXT".into(),
                SqlType::TinyInt | SqlType::SmallInt => "SMALLINT".into(),
                SqlType::Int => "INTEGER".into(),
                SqlType::BigInt => "BIGINT".into(),
                SqlType::Float => "REAL".into(),
                SqlType::Double => "DOUBLE PRECISION".into(),
                SqlType::Decimal => numeric("NUMERIC"),
                SqlType::Boolean => "BOOLEAN".into(),
                SqlType::Date => "DATE".into(),
                SqlType::DateTime | SqlType::Timestamp => "TIMESTAMP".into(),
                SqlType::Json => "JSONB".into(),
                SqlType::Blob => "BYTEA".into(),
            },
            Dialect::Sqlite => match self {
                SqlType::Char
                | SqlType::Varchar
                | SqlType::Text
                | SqlType::LongText
                | SqlType::Date
                | SqlType::DateTime
                | SqlType::Timestamp
                | SqlType::Json => "TEXT".into(),
                SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Int
                | SqlType::BigInt
                | SqlType::Boolean => "INTEGER".into(),
                SqlType::Float | SqlType::Double => "REAL".into(),
                SqlType::Decimal => "NUMERIC".into(),
                SqlType::Blob => "BLOB".into(),
            },
        }
    }
}

/// Engine-side id generation for key fields left empty on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdGenerator {
    Uuid,
    ShortUuid,
}

impl IdGenerator {
    /// SQL expression that generates a key on `dialect`.
    pub fn expr(self, dialect: Dialect) -> &'static str {
        match self {
            IdGenerator::Uuid => dialect.uuid_expr(),
            IdGenerator::ShortUuid => dialect.short_uuid_expr(),
        }
    }
}

/// One property of an entity and the column backing it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    column: String,
    ident: Option<Ident>,
    sql_type: SqlType,
    length: Option<u32>,
    scale: Option<u32>,
    default_value: Option<Value>,
    nullable: bool,
    primary_key: bool,
    indexed: bool,
    id_generator: Option<IdGenerator>,
    logical_delete: Option<Value>,
    comment: Option<String>,
}

impl FieldDescriptor {
    /// A nullable field whose column is named like the property.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            ident: None,
            sql_type,
            length: None,
            scale: None,
            default_value: None,
            nullable: true,
            primary_key: false,
            indexed: false,
            id_generator: None,
            logical_delete: None,
            comment: None,
        }
    }

    /// Column name when it differs from the property name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Declared length or precision.
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Declared scale for decimal types.
    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Value used on insert when the record has none.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Declare the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Part of the primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Request a secondary index on this column.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Generate missing key values on insert.
    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Mark as the logical-delete column; deleting sets it to `deleted`.
    pub fn logical_delete(mut self, deleted: impl Into<Value>) -> Self {
        self.logical_delete = Some(deleted.into());
        self
    }

    /// Column comment emitted in DDL.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Property name used in records.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column name as declared.
    pub fn column_name(&self) -> &str {
        &self.column
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    /// Default applied on insert, if any.
    pub fn declared_default(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn generator(&self) -> Option<IdGenerator> {
        self.id_generator
    }

    /// Value written by a logical delete.
    pub fn deleted_value(&self) -> Option<&Value> {
        self.logical_delete.as_ref()
    }

    /// Column reference for `dialect`.
    pub fn column_sql(&self, dialect: Dialect) -> String {
        match &self.ident {
            Some(ident) => ident.to_sql(dialect),
            None => self.column.clone(),
        }
    }

    /// Column name without quotes.
    pub(crate) fn column_bare(&self) -> &str {
        match &self.ident {
            Some(ident) => ident.last(),
            None => &self.column,
        }
    }

    /// Column definition for `CREATE TABLE`.
    pub fn column_ddl(&self, dialect: Dialect) -> String {
        let mut out = format!(
            "{} {}",
            self.column_sql(dialect),
            self.sql_type.ddl(dialect, self.length, self.scale)
        );
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            out.push_str(" DEFAULT ");
            out.push_str(&default_literal(default, dialect));
        }
        if let (Dialect::Mysql, Some(comment)) = (dialect, &self.comment) {
            out.push_str(" COMMENT ");
            out.push_str(&dialect.quote_literal(comment));
        }
        out
    }
}

fn default_literal(value: &Value, dialect: Dialect) -> String {
    match (value, dialect) {
        (Value::Null, _) => "NULL".into(),
        (Value::Bool(true), Dialect::Postgres) => "TRUE".into(),
        (Value::Bool(false), Dialect::Postgres) => "FALSE".into(),
        (Value::Bool(b), _) => u8::from(*b).to_string(),
        (Value::Number(n), _) => n.to_string(),
        (Value::String(s), _) => dialect.quote_literal(s),
        (other, _) => dialect.quote_literal(&other.to_string()),
    }
}

/// A table and its ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    name: String,
    table: Ident,
    table_name: String,
    fields: Vec<FieldDescriptor>,
}

/// Builder returned by [`EntityDescriptor::builder`].
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    table: String,
    name: Option<String>,
    fields: Vec<FieldDescriptor>,
}

impl EntityBuilder {
    /// Entity name used for template namespaces. Defaults to the table name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a field; order is kept.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Append several fields.
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Validate identifiers and field rules.
    pub fn build(self) -> SqlResult<EntityDescriptor> {
        let table = Ident::parse(&self.table)?;
        if self.fields.is_empty() {
            return Err(SqlError::validation(format!(
                "Entity '{}' declares no fields",
                self.table
            )));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        let mut logical = 0;
        let mut fields = Vec::with_capacity(self.fields.len());
        for mut field in self.fields {
            if field.name.is_empty() {
                return Err(SqlError::validation(format!(
                    "Entity '{}' has a field without a name",
                    self.table
                )));
            }
            let ident = Ident::parse(&field.column)?;
            if ident.parts.len() != 1 {
                return Err(SqlError::validation(format!(
                    "Column '{}' must not be qualified",
                    field.column
                )));
            }
            if !names.insert(field.name.clone()) {
                return Err(SqlError::validation(format!(
                    "Duplicate field '{}' in entity '{}'",
                    field.name, self.table
                )));
            }
            let bare = match &ident.parts[0] {
                IdentPart::Unquoted(s) | IdentPart::Quoted(s) => s.to_ascii_lowercase(),
            };
            if !columns.insert(bare) {
                return Err(SqlError::validation(format!(
                    "Duplicate column '{}' in entity '{}'",
                    field.column, self.table
                )));
            }
            if field.logical_delete.is_some() {
                logical += 1;
            }
            if field.scale.is_some() && field.length.is_none() {
                return Err(SqlError::validation(format!(
                    "Field '{}' sets a scale without a length",
                    field.name
                )));
            }
            field.ident = Some(ident);
            fields.push(field);
        }
        if logical > 1 {
            return Err(SqlError::validation(format!(
                "Entity '{}' declares {logical} logical-delete fields; at most one is allowed",
                self.table
            )));
        }

        Ok(EntityDescriptor {
            name: self.name.unwrap_or_else(|| table.last().to_string()),
            table,
            table_name: self.table,
            fields,
        })
    }
}

impl EntityDescriptor {
    /// Start describing the entity stored in `table`.
    pub fn builder(table: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            table: table.into(),
            name: None,
            fields: Vec::new(),
        }
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table name as declared.
    pub fn table(&self) -> &str {
        &self.table_name
    }

    /// Table reference quoted for `dialect`.
    pub fn table_sql(&self, dialect: Dialect) -> String {
        self.table.to_sql(dialect)
    }

    /// Last part of the table name (`user` for `app.user`).
    pub fn table_base(&self) -> &str {
        self.table.last()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Field by property name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Primary-key fields in declaration order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// True when no field is part of the primary key.
    pub fn is_keyless(&self) -> bool {
        !self.fields.iter().any(|f| f.primary_key)
    }

    /// The logical-delete field, if one is declared.
    pub fn logical_delete_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.logical_delete.is_some())
    }

    /// Template ids to try for `id` on behalf of this entity.
    pub fn candidate_ids(&self, id: &str) -> Vec<String> {
        candidate_ids(id, self.table_base(), &self.name)
    }
}

/// In-memory entity registry.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the entity name, replacing any previous descriptor.
    pub fn register(&mut self, entity: EntityDescriptor) -> Arc<EntityDescriptor> {
        let entity = Arc::new(entity);
        tracing::debug!(
            target: "sqlmill.registry",
            entity = %entity.name(),
            fields = entity.fields().len(),
            "entity registered"
        );
        self.entities
            .insert(entity.name().to_string(), Arc::clone(&entity));
        entity
    }

    /// Descriptor registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(name).cloned()
    }

    /// The ordered field list of `name`.
    pub fn describe(&self, name: &str) -> SqlResult<&[FieldDescriptor]> {
        self.entities
            .get(name)
            .map(|e| e.fields())
            .ok_or_else(|| SqlError::validation(format!("Unknown entity '{name}'")))
    }
}
