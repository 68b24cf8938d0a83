//! Named block helpers.
//!
//! | helper | output |
//! |---|---|
//! | `page` | `COUNT(1) zccw1986` for count requests, nothing for sum requests |
//! | `sum` | the block, only for sum requests |
//! | `notPage` | the block, except for count / sum requests |
//! | `where`, `whereTag` | ` WHERE <block>` minus one leading `and`/`or` |
//! | `hump` | each bare column gets a camelCase alias |
//! | `trim` | block minus one leading `and `/`or ` and one trailing `,`/`;` |
//! | `order`, `group` | ` ORDER BY ...` / ` GROUP BY ...`, nothing for aggregates |
//! | `between` | `(a,b)` → ` BETWEEN 'a' AND 'b'` |
//! | `distance` | `(x1, y1), (x2, y2)` → great-circle distance in meters |
//! | `enum`, `enumTag` | `NAME(col)` → `CASE WHEN col = 'k' THEN 'label' ... END` |
//!
//! Blocks named after anything else are mustache sections over the view; see
//! [`SectionHelper`]. The request being expanded is tracked per thread while
//! a render runs, so helpers nested at any depth (and text expanded from
//! markup sources) share one [`ExpandState`].

use super::{QueryKind, truthy};
use crate::dialect::Dialect;
use handlebars::{
    BlockContext, Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext,
    Renderable,
};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// Replacement emitted by `page` for count requests.
pub const COUNT_EXPR: &str = "COUNT(1) zccw1986 ";

/// Degrees to meters on the equator, used by `distance`.
const DEGREE_METERS: u32 = 111195;

/// Source of `(code, label)` pairs for the `enum` macro.
pub trait EnumMapProvider: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Vec<(String, String)>>;
}

impl EnumMapProvider for HashMap<String, Vec<(String, String)>> {
    fn lookup(&self, name: &str) -> Option<Vec<(String, String)>> {
        self.get(name).cloned()
    }
}

impl EnumMapProvider for BTreeMap<String, Vec<(String, String)>> {
    fn lookup(&self, name: &str) -> Option<Vec<(String, String)>> {
        self.get(name).cloned()
    }
}

/// Provider with no enums.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnums;

impl EnumMapProvider for NoEnums {
    fn lookup(&self, _name: &str) -> Option<Vec<(String, String)>> {
        None
    }
}

/// Per-expansion macro state.
#[derive(Clone)]
pub struct ExpandState {
    kind: QueryKind,
    order_by: Option<String>,
    order_emitted: bool,
    dialect: Dialect,
    enums: Arc<dyn EnumMapProvider>,
}

impl Default for ExpandState {
    fn default() -> Self {
        Self::new(QueryKind::Normal, None, Dialect::Mysql, Arc::new(NoEnums))
    }
}

impl ExpandState {
    /// State for one top-level render.
    pub fn new(
        kind: QueryKind,
        order_by: Option<String>,
        dialect: Dialect,
        enums: Arc<dyn EnumMapProvider>,
    ) -> Self {
        Self {
            kind,
            order_by,
            order_emitted: false,
            dialect,
            enums,
        }
    }

    /// Sort clause still owed after expansion, if any.
    pub fn pending_order_by(&self) -> Option<String> {
        if self.order_emitted || self.kind.is_aggregate() {
            return None;
        }
        self.order_by.clone()
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<ExpandState>> = const { RefCell::new(None) };
}

/// Run `f` with `state` as this thread's active expansion and hand the
/// state back afterwards. Any enclosing expansion is restored.
pub(crate) fn scoped<R>(state: ExpandState, f: impl FnOnce() -> R) -> (R, ExpandState) {
    let previous = ACTIVE.with(|cell| cell.replace(Some(state)));
    let result = f();
    let state = ACTIVE
        .with(|cell| cell.replace(previous))
        .unwrap_or_default();
    (result, state)
}

/// Borrow the active expansion state; a fresh default outside [`scoped`].
fn with_active<R>(f: impl FnOnce(&mut ExpandState) -> R) -> R {
    ACTIVE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(state) => f(state),
        None => f(&mut ExpandState::default()),
    })
}

/// A named section helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    Page,
    Sum,
    NotPage,
    Where,
    Hump,
    Trim,
    Order,
    Group,
    Between,
    Distance,
    Enum,
}

impl Macro {
    /// Helper names, aliases included.
    pub const NAMES: &'static [(&'static str, Macro)] = &[
        ("page", Macro::Page),
        ("sum", Macro::Sum),
        ("notPage", Macro::NotPage),
        ("where", Macro::Where),
        ("whereTag", Macro::Where),
        ("hump", Macro::Hump),
        ("trim", Macro::Trim),
        ("order", Macro::Order),
        ("group", Macro::Group),
        ("between", Macro::Between),
        ("distance", Macro::Distance),
        ("enum", Macro::Enum),
        ("enumTag", Macro::Enum),
    ];

    /// Look up a macro by helper name, aliases included.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, m)| *m)
    }

    /// Output that replaces the block without rendering it, if any.
    pub fn short_circuit(self, state: &mut ExpandState) -> Option<String> {
        let kind = state.kind;
        match self {
            Macro::Page => match kind {
                QueryKind::Count => Some(COUNT_EXPR.to_string()),
                QueryKind::Sum => Some(String::new()),
                QueryKind::Normal => None,
            },
            Macro::Sum => (kind != QueryKind::Sum).then(String::new),
            Macro::NotPage | Macro::Group => kind.is_aggregate().then(String::new),
            Macro::Order => {
                if kind.is_aggregate() {
                    Some(String::new())
                } else {
                    state.order_emitted = true;
                    None
                }
            }
            _ => None,
        }
    }

    /// Transform the rendered block.
    pub fn apply(self, rendered: String, state: &ExpandState) -> String {
        match self {
            Macro::Page | Macro::Sum | Macro::NotPage => rendered,
            Macro::Where => where_wrap(&rendered),
            Macro::Hump => hump(&rendered),
            Macro::Trim => trim_edges(&rendered),
            Macro::Order => {
                let mut parts = Vec::new();
                if let Some(o) = &state.order_by {
                    parts.push(o.clone());
                }
                let block = rendered.trim();
                if !block.is_empty() {
                    parts.push(block.to_string());
                }
                if parts.is_empty() {
                    String::new()
                } else {
                    format!(" ORDER BY {} ", parts.join(", "))
                }
            }
            Macro::Group => {
                let block = rendered.trim();
                if block.is_empty() {
                    String::new()
                } else {
                    format!(" GROUP BY {block} ")
                }
            }
            Macro::Between => between(&rendered, state.dialect),
            Macro::Distance => distance(&rendered),
            Macro::Enum => enum_case(&rendered, state.enums.as_ref(), state.dialect),
        }
    }
}

/// Collects a rendered block so a macro can rewrite it.
#[derive(Default)]
struct Captured(String);

impl Output for Captured {
    fn write(&mut self, seg: &str) -> std::io::Result<()> {
        self.0.push_str(seg);
        Ok(())
    }
}

/// Block helper running one [`Macro`].
pub struct MacroHelper(pub Macro);

impl HelperDef for MacroHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if let Some(fixed) = with_active(|state| self.0.short_circuit(state)) {
            out.write(&fixed)?;
            return Ok(());
        }
        let mut block = Captured::default();
        if let Some(t) = h.template() {
            t.render(r, ctx, rc, &mut block)?;
        }
        out.write(&with_active(|state| self.0.apply(block.0, state)))?;
        Ok(())
    }
}

/// Mustache section semantics for blocks that name a view value.
///
/// A falsy value renders the `{{else}}` block. An array renders the block
/// once per item, an object renders it once with the object in scope, and
/// any other value renders it once in the current scope. Object items see
/// the fields of the enclosing object too.
pub struct SectionHelper;

impl HelperDef for SectionHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = rc.evaluate(ctx, h.name())?.as_json().clone();
        if !truthy(&value) {
            if let Some(t) = h.inverse() {
                t.render(r, ctx, rc, out)?;
            }
            return Ok(());
        }
        let Some(t) = h.template() else {
            return Ok(());
        };
        let scope = rc.evaluate(ctx, "this")?.as_json().clone();
        match value {
            Value::Array(items) => {
                for item in items {
                    let base = overlay(&scope, item);
                    render_with_base(t, base, r, ctx, rc, out)?;
                }
            }
            object @ Value::Object(_) => {
                let base = overlay(&scope, object);
                render_with_base(t, base, r, ctx, rc, out)?;
            }
            _ => t.render(r, ctx, rc, out)?,
        }
        Ok(())
    }
}

/// `item`'s fields over `scope`'s; non-objects replace the scope.
fn overlay(scope: &Value, item: Value) -> Value {
    match (scope, item) {
        (Value::Object(outer), Value::Object(inner)) => {
            let mut merged = outer.clone();
            merged.extend(inner);
            Value::Object(merged)
        }
        (_, item) => item,
    }
}

fn render_with_base<'reg: 'rc, 'rc>(
    t: &'rc handlebars::Template,
    base: Value,
    r: &'reg Handlebars<'reg>,
    ctx: &'rc Context,
    rc: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
) -> HelperResult {
    let mut block = BlockContext::new();
    block.set_base_value(base);
    rc.push_block(block);
    let result = t.render(r, ctx, rc, out);
    rc.pop_block();
    result
}

/// Install the macro helpers and mustache section handling on `hbs`.
pub fn register_helpers(hbs: &mut Handlebars<'_>) {
    for (name, m) in Macro::NAMES {
        hbs.register_helper(name, Box::new(MacroHelper(*m)));
    }
    hbs.register_helper("blockHelperMissing", Box::new(SectionHelper));
}

fn leading_connective() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)^(and|or)\b").expect("invalid built-in regex"))
}

/// ` WHERE <block>` with one leading connective removed; empty block → empty.
pub fn where_wrap(rendered: &str) -> String {
    let data = rendered.trim();
    if data.is_empty() {
        return String::new();
    }
    let data = leading_connective().replace(data, "");
    format!(" WHERE {} ", data.trim())
}

/// Strip one leading `and `/`or ` and one trailing `,`/`;`.
pub fn trim_edges(rendered: &str) -> String {
    static LEAD: OnceLock<regex::Regex> = OnceLock::new();
    let lead = LEAD.get_or_init(|| regex::Regex::new(r"(?i)^(and|or)\s").expect("invalid built-in regex"));
    let data = rendered.trim();
    let data = lead.replace(data, "");
    let data = data.trim();
    let data = data
        .strip_suffix(',')
        .or_else(|| data.strip_suffix(';'))
        .unwrap_or(data);
    data.to_string()
}

/// Alias derived from a column expression: `a.event_id` → `eventId`.
pub fn hump_alias(column: &str) -> String {
    static QUALIFIER: OnceLock<regex::Regex> = OnceLock::new();
    let qualifier =
        QUALIFIER.get_or_init(|| regex::Regex::new(r"[a-zA-Z0-9]+\.").expect("invalid built-in regex"));
    let bare = qualifier.replacen(column, 1, "");
    let mut out = String::with_capacity(bare.len());
    let mut chars = bare.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' && chars.peek().is_some_and(|n| n.is_ascii_lowercase()) {
            if let Some(n) = chars.next() {
                out.push(n.to_ascii_uppercase());
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn hump(rendered: &str) -> String {
    let items: Vec<String> = rendered
        .trim()
        .split(',')
        .map(|item| {
            let item = item.trim();
            if item.is_empty() || item.contains(char::is_whitespace) {
                item.to_string()
            } else {
                format!("{item} {}", hump_alias(item))
            }
        })
        .collect();
    format!(" {} ", items.join(", "))
}

fn between(rendered: &str, dialect: Dialect) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"\(([\w\W]+)\)").expect("invalid built-in regex"));
    let Some(caps) = re.captures(rendered) else {
        return String::new();
    };
    let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
        return String::new();
    };
    let inner = inner.as_str().trim();
    let inner = inner
        .strip_prefix('[')
        .and_then(|i| i.strip_suffix(']'))
        .unwrap_or(inner);
    let mut bounds = inner.split(',').map(str::trim);
    let low = bounds.next().unwrap_or_default();
    let high = bounds.next().unwrap_or_default();
    let replaced = format!(
        "{} BETWEEN {} AND {}{}",
        &rendered[..whole.start()],
        dialect.quote_literal(low),
        dialect.quote_literal(high),
        &rendered[whole.end()..]
    );
    replaced.replacen('|', " BETWEEN ", 1)
}

fn distance(rendered: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"\(([^()]+)\)").expect("invalid built-in regex"));
    if !re.is_match(rendered) {
        return String::new();
    }
    let mut index = 0;
    re.replace_all(rendered, |caps: &regex::Captures<'_>| {
        let mut xy = caps[1].split(',').map(str::trim);
        let x = xy.next().unwrap_or_default();
        let y = xy.next().unwrap_or_default();
        index += 1;
        if index == 1 {
            format!(" ROUND(ST_DISTANCE(POINT({x}, {y})")
        } else {
            format!(" POINT({x}, {y}))*{DEGREE_METERS}, 2)")
        }
    })
    .into_owned()
}

fn enum_case(rendered: &str, enums: &dyn EnumMapProvider, dialect: Dialect) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"([a-zA-Z_]+)\(([^()]+)\)").expect("invalid built-in regex")
    });
    let Some(caps) = re.captures(rendered) else {
        return "''".to_string();
    };
    let name = caps[1].trim();
    let column = caps[2].trim();
    match enums.lookup(name) {
        Some(entries) if !entries.is_empty() => {
            let whens: Vec<String> = entries
                .iter()
                .map(|(code, label)| {
                    format!(
                        "WHEN {column} = {} THEN {}",
                        dialect.quote_literal(code),
                        dialect.quote_literal(label)
                    )
                })
                .collect();
            format!(" CASE {} END ", whens.join(" "))
        }
        _ => "''".to_string(),
    }
}
