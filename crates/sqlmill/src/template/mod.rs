//! Handlebars-based macro expansion.
//!
//! Templates are handlebars text rendered with HTML escaping off: `{{var}}`,
//! `{{{var}}}`, `{{#name}}` / `{{else}}` sections, `{{#unless name}}`,
//! `{{> partial}}`, `{{! comments }}` and dotted names. `{{this}}` is the
//! current item inside a section.
//!
//! Blocks named after a macro (`page`, `sum`, `notPage`, `where`, `hump`,
//! `trim`, `order`, `group`, `between`, `distance`, `enum`) run the macro;
//! any other block is a mustache section over the view. See [`macros`].

pub mod macros;
pub mod named;


pub use macros::{EnumMapProvider, Macro};
pub use named::{bind_named, bind_named_sql};

use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::ident::Ident;
use crate::xml::TextExpander;
use handlebars::Handlebars;
use macros::{ExpandState, NoEnums};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

const MAX_PARTIAL_DEPTH: usize = 32;

/// What a compile request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryKind {
    #[default]
    Normal,
    /// Row count for paging.
    Count,
    /// Summary row.
    Sum,
}

impl QueryKind {
    /// Count and sum requests drop ordering and paging.
    pub fn is_aggregate(self) -> bool {
        matches!(self, QueryKind::Count | QueryKind::Sum)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortType {
    #[default]
    Asc,
    Desc,
}

impl SortType {
    /// `ASC` or `DESC`.
    pub fn as_str(self) -> &'static str {
        match self {
            SortType::Asc => "ASC",
            SortType::Desc => "DESC",
        }
    }

    /// Parse `asc` / `desc`, case-insensitively.
    pub fn parse(s: &str) -> SqlResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortType::Asc),
            "DESC" => Ok(SortType::Desc),
            other => Err(SqlError::validation(format!("Invalid sort type: {other}"))),
        }
    }
}

/// Caller-supplied sort column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub column: Ident,
    pub direction: SortType,
}

/// The options record handed to generator sources and used as the macro view.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub kind: QueryKind,
    pub sort: Option<SortSpec>,
    pub limit_start: Option<u64>,
    pub limit_end: Option<u64>,
    /// Parameter bag.
    pub params: Value,
    /// Opaque caller context, visible to templates as `ctx`.
    pub ctx: Value,
}

impl QueryOptions {
    /// A normal request over `params`.
    pub fn new(params: Value) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Render for `kind`; macros such as `order` depend on it.
    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Shorthand for `with_kind(QueryKind::Count)`.
    pub fn count(self) -> Self {
        self.with_kind(QueryKind::Count)
    }

    /// Shorthand for `with_kind(QueryKind::Sum)`.
    pub fn sum(self) -> Self {
        self.with_kind(QueryKind::Sum)
    }

    /// Sort by `column`. The column is validated as an identifier.
    pub fn sort_by(mut self, column: &str, direction: SortType) -> SqlResult<Self> {
        self.sort = Some(SortSpec {
            column: Ident::parse(column)?,
            direction,
        });
        Ok(self)
    }

    /// Expose `limitStart` / `limitEnd` to templates.
    pub fn with_limit(mut self, start: u64, end: u64) -> Self {
        self.limit_start = Some(start);
        self.limit_end = Some(end);
        self
    }

    /// Caller context, visible to templates as `ctx`.
    pub fn with_ctx(mut self, ctx: Value) -> Self {
        self.ctx = ctx;
        self
    }

    /// `column DIR` for the automatic order clause.
    pub fn order_by(&self, dialect: Dialect) -> Option<String> {
        self.sort
            .as_ref()
            .map(|s| format!("{} {}", s.column.to_sql(dialect), s.direction.as_str()))
    }

    /// The mustache view: option fields overlaid by the parameter bag.
    pub fn view(&self) -> Value {
        let mut view = Map::new();
        view.insert("ctx".into(), self.ctx.clone());
        view.insert("isCount".into(), Value::Bool(self.kind == QueryKind::Count));
        view.insert("isSum".into(), Value::Bool(self.kind == QueryKind::Sum));
        if let Some(sort) = &self.sort {
            view.insert("sortName".into(), Value::String(sort.column.to_sql(Dialect::Mysql)));
            view.insert("sortType".into(), Value::String(sort.direction.as_str().into()));
        }
        if let Some(start) = self.limit_start {
            view.insert("limitStart".into(), start.into());
        }
        if let Some(end) = self.limit_end {
            view.insert("limitEnd".into(), end.into());
        }
        if let Value::Object(bag) = &self.params {
            for (k, v) in bag {
                view.insert(k.clone(), v.clone());
            }
        }
        Value::Object(view)
    }
}

/// Mustache truthiness: null, false, `0`, `""` and `[]` are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Compiled templates plus the helpers that expand them.
///
/// Templates and partials share one namespace: any registered template can
/// be included from another as `{{> name}}`. Partial references are checked
/// at registration; including a template from itself, directly or through
/// other templates, is a [`SqlError::Parse`].
pub struct MacroEngine {
    hbs: Handlebars<'static>,
    enums: Arc<dyn EnumMapProvider>,
    /// Partials each registered template includes.
    references: HashMap<String, Vec<String>>,
}

impl Default for MacroEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MacroEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroEngine")
            .field("templates", &self.references.len())
            .finish_non_exhaustive()
    }
}

fn partial_refs(text: &str) -> Vec<String> {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"\{\{~?>\s*([A-Za-z0-9_.\-/]+)").expect("invalid built-in regex")
    });
    let mut refs: Vec<String> = re.captures_iter(text).map(|c| c[1].to_string()).collect();
    refs.sort();
    refs.dedup();
    refs
}

impl MacroEngine {
    /// An engine with the SQL macros registered and escaping off.
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.set_prevent_indent(true);
        macros::register_helpers(&mut hbs);
        Self {
            hbs,
            enums: Arc::new(NoEnums),
            references: HashMap::new(),
        }
    }

    /// Replace the provider consulted by the `enum` macro.
    pub fn set_enums(&mut self, enums: Arc<dyn EnumMapProvider>) {
        self.enums = enums;
    }

    /// Compile `text` under `name`, replacing any previous template.
    pub fn register(&mut self, name: &str, text: &str) -> SqlResult<()> {
        let refs = partial_refs(text);
        self.check_partials(name, &refs)?;
        self.hbs
            .register_template_string(name, text)
            .map_err(|e| SqlError::parse(format!("{name}: {e}")))?;
        self.references.insert(name.to_string(), refs);
        Ok(())
    }

    /// Drop `name`; templates that include it fail to render afterwards.
    pub fn unregister(&mut self, name: &str) {
        self.hbs.unregister_template(name);
        self.references.remove(name);
    }

    /// True when a template or partial is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.references.contains_key(name)
    }

    fn check_partials(&self, name: &str, refs: &[String]) -> SqlResult<()> {
        let mut stack: Vec<(&str, usize)> = refs.iter().map(|r| (r.as_str(), 1)).collect();
        while let Some((current, depth)) = stack.pop() {
            if current == name {
                return Err(SqlError::parse(format!("Template '{name}' includes itself")));
            }
            if depth > MAX_PARTIAL_DEPTH {
                return Err(SqlError::parse(format!(
                    "Partials of '{name}' nest deeper than {MAX_PARTIAL_DEPTH}"
                )));
            }
            if let Some(next) = self.references.get(current) {
                stack.extend(next.iter().map(|r| (r.as_str(), depth + 1)));
            }
        }
        Ok(())
    }

    /// Expand the registered template `name` against `options`.
    pub fn expand(&self, name: &str, options: &QueryOptions, dialect: Dialect) -> SqlResult<String> {
        let view = options.view();
        self.expand_with(options, dialect, |x| x.render(name, &view))
    }

    /// Expand unregistered template text against `options`.
    pub fn expand_text(&self, text: &str, options: &QueryOptions, dialect: Dialect) -> SqlResult<String> {
        let view = options.view();
        self.expand_with(options, dialect, |x| x.render_text(text, &view))
    }

    /// Run `f` as one expansion of `options`: every render it makes shares
    /// the macro state.
    ///
    /// Appends ` ORDER BY <sort>` when a sort column was given, the request
    /// is not an aggregate, and no `order` block ran.
    pub fn expand_with<F>(&self, options: &QueryOptions, dialect: Dialect, f: F) -> SqlResult<String>
    where
        F: FnOnce(&Expansion<'_>) -> SqlResult<String>,
    {
        let state = ExpandState::new(
            options.kind,
            options.order_by(dialect),
            dialect,
            Arc::clone(&self.enums),
        );
        let (rendered, state) = macros::scoped(state, || f(&Expansion { engine: self }));
        let mut out = rendered?;
        if let Some(order_by) = state.pending_order_by() {
            let last_line = out.rsplit('\n').next().unwrap_or_default();
            if last_line.contains("--") || last_line.contains('#') {
                out.push('\n');
            }
            out.push_str(" ORDER BY ");
            out.push_str(&order_by);
        }
        Ok(out)
    }
}

/// Renders inside one [`MacroEngine::expand_with`] call.
pub struct Expansion<'e> {
    engine: &'e MacroEngine,
}

impl Expansion<'_> {
    /// Render the registered template `name`.
    pub fn render(&self, name: &str, view: &Value) -> SqlResult<String> {
        self.engine
            .hbs
            .render(name, view)
            .map_err(|e| SqlError::parse(format!("{name}: {e}")))
    }

    /// Render template text; text without tags comes back unchanged.
    pub fn render_text(&self, text: &str, view: &Value) -> SqlResult<String> {
        if !text.contains("{{") {
            return Ok(text.to_string());
        }
        self.engine
            .hbs
            .render_template(text, view)
            .map_err(|e| SqlError::parse(e.to_string()))
    }
}

impl TextExpander for Expansion<'_> {
    fn expand(&self, text: &str, view: &Value) -> SqlResult<String> {
        self.render_text(text, view)
    }
}
