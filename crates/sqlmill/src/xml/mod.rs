//! Dynamic SQL markup (`<if>`, `<choose>`, `<where>`, `<foreach>`, ...).
//!
//! Markup is parsed once into a [`TagNode`] tree by [`parser`], then
//! evaluated per call by [`interpreter::interpret`] against a parameter bag.
//! Test expressions are handled by [`expr`].

pub mod expr;
pub mod interpreter;
pub mod parser;

#[cfg(test)]
mod tests;

pub use interpreter::{FragmentLookup, TextExpander, interpret, interpret_with};
pub use parser::{MapperBlock, MapperDocument, parse_fragment, parse_mapper};

use std::collections::BTreeMap;

/// A node of a parsed markup tree. Read-only after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagNode {
    Text(String),
    Element {
        name: String,
        attrs: BTreeMap<String, String>,
        children: Vec<TagNode>,
    },
}

impl TagNode {
    /// A text node.
    pub fn text(s: impl Into<String>) -> Self {
        TagNode::Text(s.into())
    }

    /// An element node with attributes in the given order.
    pub fn element(
        name: impl Into<String>,
        attrs: &[(&str, &str)],
        children: Vec<TagNode>,
    ) -> Self {
        TagNode::Element {
            name: name.into(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children,
        }
    }

    /// Attribute value, for elements.
    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            TagNode::Element { attrs, .. } => attrs.get(key).map(String::as_str),
            TagNode::Text(_) => None,
        }
    }
}
