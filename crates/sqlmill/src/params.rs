//! Parameter bag lookup.
//!
//! A parameter bag is a [`serde_json::Value`] object. Lookups use dotted paths
//! with array indices (`user.tags[0]`, `rows.1.id`). When the exact path is
//! absent, the lookup is retried with the snake→camel spelling of every key,
//! then with the camel→snake spelling.
//!
//! Absence (`None`) is distinct from an explicit `null` (`Some(&Value::Null)`).

use heck::{ToLowerCamelCase, ToSnakeCase};
use serde_json::{Map, Value};

/// One step of a parameter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Split `a.b[0].c` into segments. Returns `None` for syntactically broken paths.
pub fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let mut segs = Vec::new();
    for raw in path.split('.') {
        let mut rest = raw;
        let key_end = rest.find('[').unwrap_or(rest.len());
        let key = &rest[..key_end];
        if !key.is_empty() {
            segs.push(PathSegment::Key(key.to_string()));
        } else if key_end == rest.len() {
            return None;
        }
        rest = &rest[key_end..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let idx = stripped[..close].trim().parse().ok()?;
            segs.push(PathSegment::Index(idx));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    Some(segs)
}

fn step<'a>(value: &'a Value, seg: &PathSegment) -> Option<&'a Value> {
    match (value, seg) {
        (Value::Object(map), PathSegment::Key(k)) => map.get(k),
        (Value::Array(items), PathSegment::Key(k)) => {
            k.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        (Value::Array(items), PathSegment::Index(i)) => items.get(*i),
        _ => None,
    }
}

fn walk<'a>(root: &'a Value, segs: &[PathSegment]) -> Option<&'a Value> {
    segs.iter().try_fold(root, |cur, seg| step(cur, seg))
}

fn transform(segs: &[PathSegment], f: fn(&str) -> String) -> Vec<PathSegment> {
    segs.iter()
        .map(|s| match s {
            PathSegment::Key(k) => PathSegment::Key(f(k)),
            other => other.clone(),
        })
        .collect()
}

/// `user_name` → `userName`, leaving keys without underscores alone.
pub fn snake_to_camel(key: &str) -> String {
    if key.contains('_') {
        key.to_lower_camel_case()
    } else {
        key.to_string()
    }
}

/// `userName` → `user_name`, leaving keys without capitals alone.
pub fn camel_to_snake(key: &str) -> String {
    if key.chars().any(|c| c.is_ascii_uppercase()) {
        key.to_snake_case()
    } else {
        key.to_string()
    }
}

fn candidates(segs: Vec<PathSegment>) -> [Vec<PathSegment>; 3] {
    let camel = transform(&segs, snake_to_camel);
    let snake = transform(&segs, camel_to_snake);
    [segs, camel, snake]
}

/// Resolve `path` against `bag`.
///
/// ```ignore
/// let bag = json!({"user": {"firstName": "Ada"}});
/// assert_eq!(resolve(&bag, "user.first_name"), Some(&json!("Ada")));
/// ```
pub fn resolve<'a>(bag: &'a Value, path: &str) -> Option<&'a Value> {
    let segs = parse_path(path)?;
    candidates(segs).iter().find_map(|c| walk(bag, c))
}

/// Layered lookup scope used while interpreting a tag tree.
///
/// The caller's bag is the bottom layer and is never modified. `foreach`
/// iterations and `include` push frames on top; `bind` writes into the
/// topmost frame. Lookups search frames top-down before the bag.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    base: &'a Value,
    frames: Vec<Map<String, Value>>,
}

impl<'a> Scope<'a> {
    /// A scope over `base` with one empty frame.
    pub fn new(base: &'a Value) -> Self {
        Self {
            base,
            frames: vec![Map::new()],
        }
    }

    /// Push a frame pre-populated with `entries`.
    pub fn push_frame_with(&mut self, entries: Map<String, Value>) {
        self.frames.push(entries);
    }

    /// Pop the topmost frame. The root frame is never removed.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Set `key` in the topmost frame.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(key.into(), value);
        }
    }

    /// Resolve `path` across all frames, then the base bag.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let segs = parse_path(path)?;
        candidates(segs).iter().find_map(|c| self.lookup(c))
    }

    fn lookup(&self, segs: &[PathSegment]) -> Option<&Value> {
        if let Some((PathSegment::Key(first), rest)) = segs.split_first() {
            if let Some(v) = self.frames.iter().rev().find_map(|f| f.get(first)) {
                return walk(v, rest);
            }
        }
        walk(self.base, segs)
    }

    /// Flatten into a single object (frames override the bag).
    pub fn to_value(&self) -> Value {
        let mut merged = match self.base {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for frame in &self.frames {
            for (k, v) in frame {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::Object(merged)
    }
}
