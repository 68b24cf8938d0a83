//! # sqlmill
//!
//! A cross-dialect SQL template compiler and batch statement synthesizer.
//!
//! ## Features
//!
//! - **Named templates**: handlebars text with SQL macros, generator functions or MyBatis-style
//!   `<mapper>` markup, looked up through an ordered list of candidate ids
//! - **Dialect output**: `?` or `$n` placeholders, identifier and literal quoting,
//!   `LIMIT` shapes and engine-side id generation for MySQL, Postgres and SQLite
//! - **Batch synthesis**: multi-row insert, `CASE WHEN` update, physical or logical
//!   delete and keyed select, with temp-table variants for large key sets
//! - **No I/O**: every call returns [`CompiledStatement`]s; running them is up to an
//!   [`Executor`] you provide
//!
//! ## Templates
//!
//! ```ignore
//! use sqlmill::{QueryOptions, SqlConfig, TemplateRegistry};
//! use serde_json::json;
//!
//! let mut registry = TemplateRegistry::new();
//! registry.load_markdown("user", r#"
//! list
//! ===
//! SELECT * FROM user {{#where}} {{#age}} AND age > :age {{/age}} {{/where}}
//! "#)?;
//!
//! let stmt = registry.compile(&["user.list"], &QueryOptions::new(json!({"age": 18})), &SqlConfig::new())?;
//! assert_eq!(stmt.sql, "SELECT * FROM user WHERE age > ?");
//! assert_eq!(stmt.params, vec![json!(18)]);
//! ```
//!
//! ## Batch statements
//!
//! ```ignore
//! use sqlmill::batch::{self, InsertOptions};
//! use sqlmill::{EntityDescriptor, FieldDescriptor, SqlConfig, SqlType};
//!
//! let user = EntityDescriptor::builder("user")
//!     .field(FieldDescriptor::new("id", SqlType::BigInt).primary_key())
//!     .field(FieldDescriptor::new("name", SqlType::Varchar).length(64))
//!     .build()?;
//!
//! let steps = batch::insert(&user, &records, &InsertOptions::default(), &SqlConfig::new())?;
//! sqlmill::run_steps(&executor, &steps)?;
//! ```

pub mod batch;
pub mod config;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod exec;
pub mod format;
pub mod ident;
pub mod params;
pub mod registry;
pub mod statement;
pub mod template;
pub mod xml;

pub use batch::{
    DeleteMode, DeleteRequest, InsertMode, InsertOptions, Record, SelectMode, SelectPlan,
    SelectRequest, Target,
};
pub use config::{FormatStyle, SkipPolicy, SqlConfig};
pub use dialect::Dialect;
pub use entity::{EntityDescriptor, EntityRegistry, FieldDescriptor, IdGenerator, SqlType};
pub use error::{SqlError, SqlResult};
pub use exec::{
    AsyncExecutor, ExecOutcome, Executor, Row, query_plan, query_plan_async, run_steps,
    run_steps_async,
};
pub use format::{check_balanced, format_sql};
pub use ident::{Ident, IntoIdent};
pub use registry::{PagePlan, PageRequest, TemplateRegistry, TemplateSource};
pub use statement::{CompiledStatement, Sql, sql};
pub use template::{EnumMapProvider, MacroEngine, QueryKind, QueryOptions, SortType, bind_named};
pub use xml::TagNode;
