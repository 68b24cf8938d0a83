//! Template registry: id → source, candidate resolution and compilation.
//!
//! Sources come in three shapes (see [`TemplateSource`]) and are keyed by
//! `<namespace>.<localId>`. A request carries an ordered list of candidate
//! ids; the first registered one wins.
//!
//! The registry is filled during a load phase through `&mut self` and read
//! through `&self` afterwards. It is `Send + Sync`; share it with an `Arc`.
//!
//! # Example
//!
//! ```ignore
//! use sqlmill::{QueryOptions, SqlConfig, TemplateRegistry};
//! use serde_json::json;
//!
//! let mut registry = TemplateRegistry::new();
//! registry.register_text("user.list", "SELECT * FROM user {{#where}} AND age > :age {{/where}}")?;
//!
//! let stmt = registry.compile(&["user.list"], &QueryOptions::new(json!({"age": 18})), &SqlConfig::new())?;
//! assert_eq!(stmt.sql, "SELECT * FROM user WHERE age > ?");
//! ```

use crate::config::SqlConfig;
use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::format::{check_balanced, format_sql};
use crate::statement::CompiledStatement;
use crate::template::{EnumMapProvider, MacroEngine, QueryKind, QueryOptions, bind_named};
use crate::xml::{FragmentLookup, TagNode, interpret_with, parse_mapper};
use heck::{ToKebabCase, ToLowerCamelCase, ToUpperCamelCase};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A function from query options to template text.
pub type GeneratorFn = Arc<dyn Fn(&QueryOptions) -> String + Send + Sync>;

/// A registered template.
#[derive(Clone)]
pub enum TemplateSource {
    /// Template text, compiled at registration.
    Text(String),
    /// Called per compile; the returned text is then macro-expanded.
    Generator(GeneratorFn),
    /// A parsed markup block.
    Tree(Vec<TagNode>),
}

impl fmt::Debug for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSource::Text(t) => f.debug_tuple("Text").field(t).finish(),
            TemplateSource::Generator(_) => f.write_str("Generator(..)"),
            TemplateSource::Tree(nodes) => f.debug_tuple("Tree").field(&nodes.len()).finish(),
        }
    }
}

impl TemplateSource {
    /// `text`, `generator` or `tree`, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateSource::Text(_) => "text",
            TemplateSource::Generator(_) => "generator",
            TemplateSource::Tree(_) => "tree",
        }
    }
}

/// Candidate ids for `id` requested on behalf of an entity.
///
/// A qualified id (containing `.`) is returned as is. Otherwise the id is
/// tried under the table name, then the camelCase, PascalCase and kebab-case
/// spellings of the entity name, without duplicates.
pub fn candidate_ids(id: &str, table: &str, entity_name: &str) -> Vec<String> {
    if id.contains('.') {
        return vec![id.to_string()];
    }
    let namespaces = [
        table.to_string(),
        entity_name.to_lower_camel_case(),
        entity_name.to_upper_camel_case(),
        entity_name.to_kebab_case(),
    ];
    let mut out: Vec<String> = Vec::with_capacity(namespaces.len());
    for ns in namespaces {
        if ns.is_empty() {
            continue;
        }
        let candidate = format!("{ns}.{id}");
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Paging parameters for [`TemplateRegistry::compile_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page_number: u64,
    /// Rows per page. Zero disables the LIMIT clause and the count query.
    pub page_size: u64,
    /// The template paginates itself; no LIMIT is appended.
    pub limit_self: bool,
    /// Count with the dedicated `<id>_count` template.
    pub count_self: bool,
    /// Also build a summary query.
    pub sum: bool,
    /// Summarize with the dedicated `<id>_sum` template.
    pub sum_self: bool,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 0,
            limit_self: false,
            count_self: false,
            sum: false,
            sum_self: false,
        }
    }
}

impl PageRequest {
    /// Page `page_number` (1-based) of `page_size` rows.
    pub fn new(page_number: u64, page_size: u64) -> Self {
        Self {
            page_number,
            page_size,
            ..Self::default()
        }
    }

    /// When set, the template applies its own limit and no clause is appended.
    pub fn with_limit_self(mut self, limit_self: bool) -> Self {
        self.limit_self = limit_self;
        self
    }

    /// Use the dedicated `<id>_count` template for the total.
    pub fn with_count_self(mut self, count_self: bool) -> Self {
        self.count_self = count_self;
        self
    }

    /// Request a summary query; `dedicated` selects the `<id>_sum` template.
    pub fn with_sum(mut self, dedicated: bool) -> Self {
        self.sum = true;
        self.sum_self = dedicated;
        self
    }

    /// Offset of the first row on this page.
    pub fn offset(&self) -> u64 {
        self.page_number.max(1).saturating_sub(1) * self.page_size
    }

    /// Number of pages needed for `total` rows.
    pub fn page_count(&self, total: u64) -> u64 {
        if self.page_size == 0 {
            return if total == 0 { 0 } else { 1 };
        }
        total.div_ceil(self.page_size)
    }
}

/// Statements for one page: the rows, and optionally count and summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PagePlan {
    pub records: CompiledStatement,
    pub count: Option<CompiledStatement>,
    pub sum: Option<CompiledStatement>,
}

/// Registered templates, partials and the enum map provider.
pub struct TemplateRegistry {
    sources: HashMap<String, TemplateSource>,
    engine: MacroEngine,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.sources.len())
            .field("engine", &self.engine)
            .finish()
    }
}

impl FragmentLookup for TemplateRegistry {
    fn fragment(&self, id: &str) -> Option<&[TagNode]> {
        match self.sources.get(id) {
            Some(TemplateSource::Tree(nodes)) => Some(nodes.as_slice()),
            _ => None,
        }
    }
}

fn with_context(id: &str, err: SqlError) -> SqlError {
    match err {
        SqlError::Parse(msg) => SqlError::parse(format!("{id}: {msg}")),
        other => other,
    }
}

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

impl TemplateRegistry {
    /// An empty registry without enums.
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            engine: MacroEngine::new(),
        }
    }

    /// Use `provider` for the `enum` macro.
    pub fn with_enums(mut self, provider: impl EnumMapProvider + 'static) -> Self {
        self.engine.set_enums(Arc::new(provider));
        self
    }

    /// Register `source` under `id`, replacing any previous source.
    ///
    /// Text sources are compiled here; a syntax error or a partial cycle
    /// leaves the registry unchanged.
    pub fn register(&mut self, id: impl Into<String>, source: TemplateSource) -> SqlResult<()> {
        let id = id.into();
        match &source {
            TemplateSource::Text(text) => {
                self.engine.register(&id, text)?;
                self.insert(id, source);
            }
            _ => self.insert_uncompiled(id, source),
        }
        Ok(())
    }

    fn insert(&mut self, id: String, source: TemplateSource) {
        tracing::debug!(target: "sqlmill.registry", id = %id, kind = source.kind(), "template registered");
        if let Some(prev) = self.sources.insert(id.clone(), source) {
            tracing::warn!(
                target: "sqlmill.registry",
                id = %id,
                previous = prev.kind(),
                "template replaced"
            );
        }
    }

    /// Compile and register template text.
    pub fn register_text(&mut self, id: impl Into<String>, text: &str) -> SqlResult<()> {
        self.register(id, TemplateSource::Text(text.to_string()))
    }

    /// Register a generator; its output is expanded on every compile.
    pub fn register_fn<F>(&mut self, id: impl Into<String>, f: F)
    where
        F: Fn(&QueryOptions) -> String + Send + Sync + 'static,
    {
        self.insert_uncompiled(id.into(), TemplateSource::Generator(Arc::new(f)));
    }

    /// Register a parsed markup block.
    pub fn register_tree(&mut self, id: impl Into<String>, nodes: Vec<TagNode>) {
        self.insert_uncompiled(id.into(), TemplateSource::Tree(nodes));
    }

    fn insert_uncompiled(&mut self, id: String, source: TemplateSource) {
        if self.engine.contains(&id) {
            self.engine.unregister(&id);
        }
        self.insert(id, source);
    }

    /// Register a partial usable as `{{> name}}` from any template.
    ///
    /// Partials share a namespace with text templates.
    pub fn register_partial(&mut self, name: impl Into<String>, text: &str) -> SqlResult<()> {
        self.engine.register(&name.into(), text)
    }

    /// Whether a template is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Number of registered templates, partials excluded.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True when no template is registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The first registered candidate.
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> SqlResult<(&str, &TemplateSource)> {
        candidates
            .iter()
            .find_map(|c| self.sources.get_key_value(c.as_ref()))
            .map(|(id, source)| (id.as_str(), source))
            .ok_or_else(|| {
                SqlError::TemplateNotFound(candidates.iter().map(|c| c.as_ref().to_string()).collect())
            })
    }

    /// Resolve and expand to SQL text with `:name` markers still in place.
    pub fn load<S: AsRef<str>>(
        &self,
        candidates: &[S],
        options: &QueryOptions,
        dialect: Dialect,
    ) -> SqlResult<String> {
        let (id, source) = self.resolve(candidates)?;
        match source {
            TemplateSource::Text(_) => self.engine.expand(id, options, dialect),
            TemplateSource::Generator(f) => self
                .engine
                .expand_text(&f(options), options, dialect)
                .map_err(|e| with_context(id, e)),
            TemplateSource::Tree(nodes) => {
                let namespaces: Vec<String> = candidates
                    .iter()
                    .map(|c| {
                        let c = c.as_ref();
                        c.split('.').next().unwrap_or(c).to_string()
                    })
                    .collect();
                let view = options.view();
                self.engine.expand_with(options, dialect, |expansion| {
                    interpret_with(nodes, &view, &namespaces, self, dialect, expansion)
                })
            }
        }
    }

    /// Resolve, expand, bind `:name` parameters and format.
    pub fn compile<S: AsRef<str>>(
        &self,
        candidates: &[S],
        options: &QueryOptions,
        config: &SqlConfig,
    ) -> SqlResult<CompiledStatement> {
        let text = self.load(candidates, options, config.dialect)?;
        let bound = bind_named(&text, &options.params, config.dialect)?;
        let sql = format_sql(&bound.sql, config.dialect, config.format);

        let template = candidates.first().map_or("", |c| c.as_ref());
        if let Err(e) = check_balanced(&sql, config.dialect) {
            tracing::warn!(target: "sqlmill.sql", template, error = %e, "compiled SQL is unbalanced");
        }
        if tracing::enabled!(target: "sqlmill.sql", tracing::Level::DEBUG) {
            let shown = if sql.len() > config.log_sql_max_len {
                format!("{}...", truncate_sql_bytes(&sql, config.log_sql_max_len))
            } else {
                sql.clone()
            };
            tracing::debug!(
                target: "sqlmill.sql",
                template,
                kind = ?options.kind,
                param_count = bound.params.len(),
                sql = %shown,
                "compiled"
            );
        }
        Ok(CompiledStatement::new(sql, bound.params))
    }

    /// Compile the records query of a page plus its count / summary queries.
    ///
    /// `limitStart` and `limitEnd` are injected into the parameter bag.
    pub fn compile_page<S: AsRef<str>>(
        &self,
        candidates: &[S],
        page: PageRequest,
        options: &QueryOptions,
        config: &SqlConfig,
    ) -> SqlResult<PagePlan> {
        let start = page.offset();
        let mut options = options.clone().with_limit(start, page.page_size);
        if let Value::Object(bag) = &mut options.params {
            bag.insert("limitStart".into(), start.into());
            bag.insert("limitEnd".into(), page.page_size.into());
        } else if options.params.is_null() {
            options.params = serde_json::json!({
                "limitStart": start,
                "limitEnd": page.page_size,
            });
        }

        let mut records = self.compile(
            candidates,
            &options.clone().with_kind(QueryKind::Normal),
            config,
        )?;
        if !page.limit_self && page.page_size > 0 {
            records.sql.push(' ');
            records
                .sql
                .push_str(&config.dialect.limit_clause(start, page.page_size));
        }

        let count = if page.page_size > 0 {
            let count_options = options.clone().with_kind(QueryKind::Count);
            Some(if page.count_self {
                self.compile(&suffixed(candidates, "_count"), &count_options, config)?
            } else {
                self.compile(candidates, &count_options, config)?
            })
        } else {
            None
        };

        let sum = if page.sum {
            let sum_options = options.clone().with_kind(QueryKind::Sum);
            Some(if page.sum_self {
                self.compile(&suffixed(candidates, "_sum"), &sum_options, config)?
            } else {
                self.compile(candidates, &sum_options, config)?
            })
        } else {
            None
        };

        Ok(PagePlan {
            records,
            count,
            sum,
        })
    }

    /// Register every block of a `.mu` document under `namespace`. Returns the number found.
    pub fn load_markdown(&mut self, namespace: &str, text: &str) -> SqlResult<usize> {
        let blocks = parse_markdown(text);
        let count = blocks.len();
        for (id, sql) in blocks {
            self.register_text(format!("{namespace}.{id}"), &sql)?;
        }
        Ok(count)
    }

    /// Register every block of a `<mapper>` document.
    ///
    /// Blocks go under `namespace`, or under the document's `namespace`
    /// attribute when `namespace` is empty.
    pub fn load_mapper_xml(&mut self, namespace: &str, xml: &str) -> SqlResult<usize> {
        let doc = parse_mapper(xml)?;
        let ns = if namespace.is_empty() {
            doc.namespace.clone().unwrap_or_default()
        } else {
            namespace.to_string()
        };
        if ns.is_empty() {
            return Err(SqlError::malformed("mapper", "no namespace given or declared"));
        }
        let count = doc.blocks.len();
        for block in doc.blocks {
            self.register_tree(format!("{ns}.{}", block.id), block.children);
        }
        Ok(count)
    }

    /// Load every `.mu` and `.xml` file below `dir`.
    ///
    /// A file's namespace is the name of the directory containing it, or
    /// its file stem for files directly inside `dir`.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> SqlResult<usize> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = Vec::new();
        for ext in ["mu", "xml"] {
            let pattern = dir.join("**").join(format!("*.{ext}"));
            let pattern = pattern.to_str().ok_or_else(|| {
                SqlError::Config(format!("invalid template directory: {}", dir.display()))
            })?;
            let entries = glob::glob(pattern)
                .map_err(|e| SqlError::Config(format!("invalid glob {pattern}: {e}")))?;
            for entry in entries {
                let path = entry.map_err(|e| SqlError::Io(e.into()))?;
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();

        let mut total = 0;
        for path in files {
            let namespace = namespace_for(dir, &path);
            let text = std::fs::read_to_string(&path)?;
            let is_xml = path.extension().is_some_and(|e| e == "xml");
            let count = if is_xml {
                self.load_mapper_xml(&namespace, &text)
            } else {
                self.load_markdown(&namespace, &text)
            }
            .map_err(|e| with_context(&path.display().to_string(), e))?;
            tracing::debug!(
                target: "sqlmill.registry",
                file = %path.display(),
                namespace = %namespace,
                count,
                "template file loaded"
            );
            total += count;
        }
        Ok(total)
    }
}

fn suffixed<S: AsRef<str>>(candidates: &[S], suffix: &str) -> Vec<String> {
    candidates
        .iter()
        .map(|c| format!("{}{suffix}", c.as_ref()))
        .collect()
}

fn namespace_for(root: &Path, file: &Path) -> String {
    let stem = || {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    match file.parent() {
        Some(parent) if parent != root => parent
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(stem),
        _ => stem(),
    }
}

fn is_fence(line: &str) -> bool {
    let t = line.trim();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Split a `.mu` document into `(id, sql)` blocks.
///
/// Everything before the first `===` underline is header. Each block is the
/// id line, its `===` underline, optional `*` comment lines, then SQL up to
/// the next id. Code fence lines are dropped.
pub fn parse_markdown(text: &str) -> Vec<(String, String)> {
    let text = text.replace('\r', "");
    let lines: Vec<&str> = text.split('\n').collect();
    let mut blocks = Vec::new();

    let Some(mut underline) = lines.iter().position(|l| l.starts_with("===")) else {
        return blocks;
    };
    loop {
        let id = match underline.checked_sub(1) {
            Some(i) => lines[i].trim(),
            None => "",
        };

        let mut start = underline + 1;
        while start < lines.len() {
            let t = lines[start].trim();
            if t.is_empty() || t.starts_with('*') || is_fence(t) {
                start += 1;
            } else {
                break;
            }
        }
        if start >= lines.len() {
            break;
        }

        let next = (start..lines.len()).find(|&i| lines[i].starts_with("==="));
        let end = match next {
            // the line above the next underline is the next id
            Some(n) => n.saturating_sub(1).max(start),
            None => lines.len(),
        };
        let sql = lines[start..end]
            .iter()
            .filter(|l| !is_fence(l))
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        if !id.is_empty() {
            blocks.push((id.to_string(), sql.trim_end().to_string()));
        }

        match next {
            Some(n) => underline = n,
            None => break,
        }
    }
    blocks
}
