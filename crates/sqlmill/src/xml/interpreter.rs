//! Tag tree evaluation.

use super::TagNode;
use super::expr::Expr;
use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::params::Scope;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

const MAX_INCLUDE_DEPTH: usize = 16;

/// Resolves `<include refid>` targets by fully qualified id.
pub trait FragmentLookup {
    fn fragment(&self, id: &str) -> Option<&[TagNode]>;
}

impl FragmentLookup for HashMap<String, Vec<TagNode>> {
    fn fragment(&self, id: &str) -> Option<&[TagNode]> {
        self.get(id).map(Vec::as_slice)
    }
}

/// Lookup with nothing in it.
impl FragmentLookup for () {
    fn fragment(&self, _id: &str) -> Option<&[TagNode]> {
        None
    }
}

/// Expands template text found in text nodes before substitution.
pub trait TextExpander {
    /// `view` is the current scope flattened into one object.
    fn expand(&self, text: &str, view: &Value) -> SqlResult<String>;
}

/// Leaves text as written.
impl TextExpander for () {
    fn expand(&self, text: &str, _view: &Value) -> SqlResult<String> {
        Ok(text.to_string())
    }
}

/// Render `nodes` against `bag`.
///
/// `namespaces` is the parent-namespace chain used to resolve `<include>`.
/// A `#{...}` / `${...}` marker that does not resolve fails the whole call
/// with [`SqlError::UnconvertedParameter`].
pub fn interpret(
    nodes: &[TagNode],
    bag: &Value,
    namespaces: &[String],
    fragments: &dyn FragmentLookup,
    dialect: Dialect,
) -> SqlResult<String> {
    interpret_with(nodes, bag, namespaces, fragments, dialect, &())
}

/// Like [`interpret`], but text nodes containing `{{` go through `expander`
/// first. Values substituted afterwards are never expanded.
pub fn interpret_with(
    nodes: &[TagNode],
    bag: &Value,
    namespaces: &[String],
    fragments: &dyn FragmentLookup,
    dialect: Dialect,
    expander: &dyn TextExpander,
) -> SqlResult<String> {
    let mut interp = Interpreter {
        scope: Scope::new(bag),
        namespaces,
        fragments,
        dialect,
        expander,
        include_depth: 0,
    };
    interp.render_all(nodes)
}

struct Interpreter<'a> {
    scope: Scope<'a>,
    namespaces: &'a [String],
    fragments: &'a dyn FragmentLookup,
    dialect: Dialect,
    expander: &'a dyn TextExpander,
    include_depth: usize,
}

fn required<'n>(tag: &str, attrs: &'n BTreeMap<String, String>, key: &str) -> SqlResult<&'n str> {
    attrs
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SqlError::malformed(tag, format!("missing required attribute '{key}'")))
}

impl<'a> Interpreter<'a> {
    fn render_all(&mut self, nodes: &[TagNode]) -> SqlResult<String> {
        let mut out = String::new();
        for node in nodes {
            out.push_str(&self.render(node)?);
        }
        Ok(out)
    }

    fn render(&mut self, node: &TagNode) -> SqlResult<String> {
        let (name, attrs, children) = match node {
            TagNode::Text(text) if text.contains("{{") => {
                let expanded = self.expander.expand(text, &self.scope.to_value())?;
                return self.substitute(&expanded);
            }
            TagNode::Text(text) => return self.substitute(text),
            TagNode::Element {
                name,
                attrs,
                children,
            } => (name, attrs, children),
        };
        match name.to_ascii_lowercase().as_str() {
            "if" => {
                let test = required(name, attrs, "test")?;
                if self.test(test) {
                    self.render_all(children)
                } else {
                    Ok(String::new())
                }
            }
            "choose" => self.choose(children),
            "trim" => self.trim(attrs, children),
            "where" => self.where_(children),
            "set" => self.set(children),
            "foreach" => self.foreach(attrs, children),
            "bind" => {
                self.bind(attrs)?;
                Ok(String::new())
            }
            "include" => self.include(attrs, children),
            _ => Err(SqlError::malformed(name.as_str(), "unsupported tag")),
        }
    }

    /// Fail-closed test evaluation: any error counts as `false`.
    fn test(&self, src: &str) -> bool {
        let scope = &self.scope;
        let result =
            Expr::parse(src).and_then(|e| e.test(&|p: &str| scope.resolve(p).cloned()));
        match result {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(target: "sqlmill.xml", expr = src, error = %e, "condition treated as false");
                false
            }
        }
    }

    fn choose(&mut self, children: &[TagNode]) -> SqlResult<String> {
        for child in children {
            let TagNode::Element {
                name,
                attrs,
                children,
            } = child
            else {
                continue;
            };
            match name.to_ascii_lowercase().as_str() {
                "when" => {
                    let test = required(name, attrs, "test")?;
                    if self.test(test) {
                        return self.render_all(children);
                    }
                }
                "otherwise" => return self.render_all(children),
                _ => {
                    return Err(SqlError::malformed(
                        name.as_str(),
                        "only <when> and <otherwise> are allowed inside <choose>",
                    ));
                }
            }
        }
        Ok(String::new())
    }

    fn trim(&mut self, attrs: &BTreeMap<String, String>, children: &[TagNode]) -> SqlResult<String> {
        let body = self.render_all(children)?;
        let spec = TrimSpec {
            prefix: attrs.get("prefix").map(String::as_str).unwrap_or(""),
            suffix: attrs.get("suffix").map(String::as_str).unwrap_or(""),
            prefix_overrides: attrs.get("prefixOverrides").map(String::as_str),
            suffix_overrides: attrs.get("suffixOverrides").map(String::as_str),
            strip_trailing_prefix_overrides: false,
        };
        let out = spec.apply(&body)?;
        Ok(comma_before_where().replace_all(&out, " WHERE ").into_owned())
    }

    fn where_(&mut self, children: &[TagNode]) -> SqlResult<String> {
        let body = self.render_all(children)?;
        TrimSpec {
            prefix: "WHERE",
            suffix: "",
            prefix_overrides: Some("and|or"),
            suffix_overrides: None,
            strip_trailing_prefix_overrides: true,
        }
        .apply(&body)
    }

    fn set(&mut self, children: &[TagNode]) -> SqlResult<String> {
        static REPEATED: OnceLock<regex::Regex> = OnceLock::new();
        static EDGES: OnceLock<regex::Regex> = OnceLock::new();
        let repeated =
            REPEATED.get_or_init(|| regex::Regex::new(r",[,\s]{2,}").expect("invalid built-in regex"));
        let edges =
            EDGES.get_or_init(|| regex::Regex::new(r"^\s*,|,\s*$").expect("invalid built-in regex"));

        let body = self.render_all(children)?;
        let body = repeated.replace_all(&body, ",\n");
        let body = edges.replace_all(&body, "");
        Ok(format!(" SET {body}"))
    }

    fn foreach(&mut self, attrs: &BTreeMap<String, String>, children: &[TagNode]) -> SqlResult<String> {
        let collection = required("foreach", attrs, "collection")?;
        let item = attrs.get("item").map(String::as_str).unwrap_or("item");
        let index = attrs.get("index").map(String::as_str);
        let open = attrs.get("open").map(String::as_str).unwrap_or("");
        let close = attrs.get("close").map(String::as_str).unwrap_or("");
        let separator = attrs.get("separator").map(String::as_str).unwrap_or("");

        let entries: Vec<(Value, Value)> = match self.scope.resolve(collection.trim()) {
            None => return Err(SqlError::UnconvertedParameter(vec![collection.to_string()])),
            Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v.clone()))
                .collect(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                .collect(),
            Some(_) => {
                return Err(SqlError::malformed(
                    "foreach",
                    format!("collection '{collection}' is not an array or object"),
                ));
            }
        };

        let mut parts = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let mut frame = Map::new();
            frame.insert(item.to_string(), value);
            if let Some(index) = index {
                frame.insert(index.to_string(), key);
            }
            self.scope.push_frame_with(frame);
            let rendered = self.render_each_nonblank(children);
            self.scope.pop_frame();
            let text = rendered?;
            if !text.is_empty() {
                parts.push(text);
            }
        }
        Ok(format!("{open}{}{close}", parts.join(separator)))
    }

    fn render_each_nonblank(&mut self, children: &[TagNode]) -> SqlResult<String> {
        let mut out = String::new();
        for child in children {
            let text = self.render(child)?;
            if !text.trim().is_empty() {
                out.push_str(&text);
            }
        }
        Ok(out)
    }

    fn bind(&mut self, attrs: &BTreeMap<String, String>) -> SqlResult<()> {
        let name = required("bind", attrs, "name")?;
        let src = required("bind", attrs, "value")?;
        let scope = &self.scope;
        let value = Expr::parse(src)?.eval(&|p: &str| scope.resolve(p).cloned())?;
        self.scope.set(name.trim(), value);
        Ok(())
    }

    fn include(&mut self, attrs: &BTreeMap<String, String>, children: &[TagNode]) -> SqlResult<String> {
        let refid = self.substitute(required("include", attrs, "refid")?)?;
        let refid = refid.trim();

        let mut frame = Map::new();
        for child in children {
            match child {
                TagNode::Element { name, attrs, .. } if name == "property" => {
                    let key = required("property", attrs, "name")?;
                    let value = attrs.get("value").cloned().unwrap_or_default();
                    frame.insert(key.to_string(), Value::String(value));
                }
                TagNode::Element { name, .. } => {
                    return Err(SqlError::malformed(
                        name.as_str(),
                        "only <property> is allowed inside <include>",
                    ));
                }
                TagNode::Text(_) => {}
            }
        }

        let fragments = self.fragments;
        let mut candidates: Vec<String> = self
            .namespaces
            .iter()
            .map(|ns| format!("{ns}.{refid}"))
            .collect();
        if refid.contains('.') {
            candidates.insert(0, refid.to_string());
        }
        let Some(nodes) = candidates.iter().find_map(|id| fragments.fragment(id)) else {
            return Err(SqlError::IncludeResolution {
                refid: refid.to_string(),
                namespaces: self.namespaces.to_vec(),
            });
        };

        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(SqlError::malformed(
                "include",
                format!("'{refid}' nested deeper than {MAX_INCLUDE_DEPTH}"),
            ));
        }
        self.include_depth += 1;
        self.scope.push_frame_with(frame);
        let rendered = self.render_all(nodes);
        self.scope.pop_frame();
        self.include_depth -= 1;
        rendered
    }

    /// Replace `#{path}` (quoted literal) and `${path}` (raw text) markers.
    ///
    /// Single left-to-right pass: substituted values are never rescanned.
    fn substitute(&self, text: &str) -> SqlResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut unresolved = Vec::new();
        let mut rest = text;

        while let Some(pos) = rest.find(['#', '$']) {
            let sigil = &rest[pos..pos + 1];
            let after = &rest[pos + 1..];
            let close = after.strip_prefix('{').and_then(|inner| inner.find('}'));
            let Some(close) = close else {
                out.push_str(&rest[..pos + 1]);
                rest = after;
                continue;
            };
            out.push_str(&rest[..pos]);
            let marker = &rest[pos..pos + 2 + close + 1];
            let inner = &after[1..1 + close];
            let path = inner.split(',').next().unwrap_or("").trim();

            match self.scope.resolve(path) {
                Some(value) if !path.is_empty() => {
                    out.push_str(&self.render_value(value, sigil == "#")?);
                }
                _ => {
                    unresolved.push(marker.to_string());
                    out.push_str(marker);
                }
            }
            rest = &rest[pos + 2 + close + 1..];
        }
        out.push_str(rest);

        if !unresolved.is_empty() {
            unresolved.dedup();
            return Err(SqlError::UnconvertedParameter(unresolved));
        }
        Ok(out)
    }

    fn render_value(&self, value: &Value, escaped: bool) -> SqlResult<String> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Array(_) | Value::Object(_) => {
                let json = serde_json::to_string(value)?;
                if escaped {
                    self.dialect.quote_literal(&json)
                } else {
                    json
                }
            }
            Value::String(s) => {
                if escaped {
                    self.dialect.quote_literal(s)
                } else {
                    s.clone()
                }
            }
            other => {
                let s = other.to_string();
                if escaped {
                    self.dialect.quote_literal(&s)
                } else {
                    s
                }
            }
        })
    }
}

fn comma_before_where() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i),\s*where\b").expect("invalid built-in regex"))
}

/// Prefix / suffix trimming shared by `<trim>` and `<where>`.
struct TrimSpec<'s> {
    prefix: &'s str,
    suffix: &'s str,
    prefix_overrides: Option<&'s str>,
    suffix_overrides: Option<&'s str>,
    strip_trailing_prefix_overrides: bool,
}

/// Build a case-insensitive alternation from `a|b|c` override tokens.
fn alternation(overrides: &str) -> Option<String> {
    let alts: Vec<String> = overrides
        .split('|')
        .filter(|t| !t.trim().is_empty())
        .map(|t| {
            let mut alt = regex::escape(t);
            if t.starts_with(|c: char| c.is_alphanumeric()) {
                alt.insert_str(0, r"\b");
            }
            if t.ends_with(|c: char| c.is_alphanumeric()) {
                alt.push_str(r"\b");
            }
            alt
        })
        .collect();
    (!alts.is_empty()).then(|| format!("(?i)(?:{})", alts.join("|")))
}

fn compile(pattern: String) -> SqlResult<regex::Regex> {
    regex::Regex::new(&pattern).map_err(|e| SqlError::malformed("trim", e.to_string()))
}

impl TrimSpec<'_> {
    fn apply(&self, body: &str) -> SqlResult<String> {
        let mut s = body.trim().to_string();
        if let Some(alt) = self.prefix_overrides.and_then(alternation) {
            let leading = compile(format!(r"^\s*{alt}"))?;
            s = leading.replace(&s, "").trim().to_string();
            if self.strip_trailing_prefix_overrides {
                let trailing = compile(format!(r"{alt}\s*$"))?;
                s = trailing.replace(&s, "").trim().to_string();
            }
        }
        if let Some(alt) = self.suffix_overrides.and_then(alternation) {
            let trailing = compile(format!(r"{alt}\s*$"))?;
            s = trailing.replace(&s, "").trim().to_string();
        }
        if !s.chars().any(|c| c.is_ascii_alphabetic()) {
            return Ok(String::new());
        }
        let mut out = String::with_capacity(s.len() + self.prefix.len() + self.suffix.len() + 3);
        out.push(' ');
        if !self.prefix.is_empty() {
            out.push_str(self.prefix);
            out.push(' ');
        }
        out.push_str(&s);
        if !self.suffix.is_empty() {
            out.push(' ');
            out.push_str(self.suffix);
        }
        out.push(' ');
        Ok(out)
    }
}
