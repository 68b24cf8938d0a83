//! Markup parsing with quick-xml.

use super::TagNode;
use crate::error::{SqlError, SqlResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeMap;

/// Statement kinds accepted inside `<mapper>`.
pub const BLOCK_KINDS: &[&str] = &["sql", "select", "insert", "update", "delete"];

/// A named block of a mapper document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperBlock {
    /// Element name: `select`, `sql`, ...
    pub kind: String,
    pub id: String,
    pub children: Vec<TagNode>,
}

/// A parsed `<mapper>` document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapperDocument {
    /// The `namespace` attribute, if declared.
    pub namespace: Option<String>,
    pub blocks: Vec<MapperBlock>,
}

fn start_element(e: &BytesStart<'_>) -> SqlResult<(String, BTreeMap<String, String>)> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok((name, attrs))
}

/// Parse a markup fragment (any number of top-level nodes).
///
/// Entities are decoded and CDATA sections become plain text.
pub fn parse_fragment(xml: &str) -> SqlResult<Vec<TagNode>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<(String, BTreeMap<String, String>, Vec<TagNode>)> = Vec::new();
    let mut roots: Vec<TagNode> = Vec::new();

    loop {
        let node = match reader.read_event()? {
            Event::Start(e) => {
                let (name, attrs) = start_element(&e)?;
                stack.push((name, attrs, Vec::new()));
                continue;
            }
            Event::Empty(e) => {
                let (name, attrs) = start_element(&e)?;
                TagNode::Element {
                    name,
                    attrs,
                    children: Vec::new(),
                }
            }
            Event::End(e) => {
                let closing = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let Some((name, attrs, children)) = stack.pop() else {
                    return Err(SqlError::parse(format!("Unexpected </{closing}>")));
                };
                if name != closing {
                    return Err(SqlError::parse(format!("<{name}> closed by </{closing}>")));
                }
                TagNode::Element {
                    name,
                    attrs,
                    children,
                }
            }
            Event::Text(t) => TagNode::Text(t.unescape()?.into_owned()),
            Event::CData(c) => TagNode::Text(String::from_utf8_lossy(&c.into_inner()).into_owned()),
            Event::Eof => break,
            _ => continue,
        };
        push_node(&mut stack, &mut roots, node);
    }

    if let Some((name, _, _)) = stack.last() {
        return Err(SqlError::parse(format!("Unclosed <{name}>")));
    }
    Ok(roots)
}

fn push_node(
    stack: &mut [(String, BTreeMap<String, String>, Vec<TagNode>)],
    roots: &mut Vec<TagNode>,
    node: TagNode,
) {
    let target = match stack.last_mut() {
        Some((_, _, children)) => children,
        None => roots,
    };
    if let (TagNode::Text(new), Some(TagNode::Text(prev))) = (&node, target.last_mut()) {
        prev.push_str(new);
        return;
    }
    target.push(node);
}

/// Parse a `<mapper>` document into its named blocks.
///
/// `resultMap` blocks are skipped; any other unknown block or a block
/// without `id` is a [`SqlError::MalformedTag`].
pub fn parse_mapper(xml: &str) -> SqlResult<MapperDocument> {
    let nodes = parse_fragment(xml)?;
    let mut mapper = None;
    for node in nodes {
        match node {
            TagNode::Element {
                name,
                attrs,
                children,
            } if name == "mapper" => {
                if mapper.is_some() {
                    return Err(SqlError::malformed("mapper", "more than one <mapper> root"));
                }
                mapper = Some((attrs, children));
            }
            TagNode::Element { name, .. } => {
                return Err(SqlError::malformed(name, "expected a <mapper> root element"));
            }
            TagNode::Text(t) if t.trim().is_empty() => {}
            TagNode::Text(_) => {
                return Err(SqlError::parse("Text outside <mapper>"));
            }
        }
    }
    let Some((attrs, children)) = mapper else {
        return Err(SqlError::malformed("mapper", "missing <mapper> root element"));
    };

    let mut doc = MapperDocument {
        namespace: attrs.get("namespace").cloned(),
        blocks: Vec::new(),
    };
    for child in children {
        let TagNode::Element {
            name,
            attrs,
            children,
        } = child
        else {
            continue;
        };
        if name == "resultMap" {
            continue;
        }
        if !BLOCK_KINDS.contains(&name.as_str()) {
            return Err(SqlError::malformed(name, "unsupported block in <mapper>"));
        }
        let Some(id) = attrs.get("id").filter(|id| !id.trim().is_empty()) else {
            return Err(SqlError::malformed(name, "missing required attribute 'id'"));
        };
        doc.blocks.push(MapperBlock {
            kind: name.clone(),
            id: id.trim().to_string(),
            children,
        });
    }
    Ok(doc)
}
