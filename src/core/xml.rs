//! Thin helpers over roxmltree for the slash-path lookups the upstream
//! XML replies need. Missing elements are protocol violations: the
//! services never legitimately omit them.

use crate::core::error::{ResolveError, ResolveResult};
use roxmltree::{Document, Node};

pub fn parse(body: &str) -> ResolveResult<Document<'_>> {
    Document::parse(body).map_err(|e| ResolveError::protocol(format!("invalid XML: {e}")))
}

/// First element down a slash-separated tag path, relative to `node`.
pub fn find<'a, 'i>(node: Node<'a, 'i>, path: &str) -> Option<Node<'a, 'i>> {
    let mut current = node;
    for tag in path.split('/') {
        current = current
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == tag)?;
    }
    Some(current)
}

pub fn require<'a, 'i>(node: Node<'a, 'i>, path: &str) -> ResolveResult<Node<'a, 'i>> {
    find(node, path).ok_or_else(|| ResolveError::protocol(format!("missing <{path}> element")))
}

pub fn text<'a>(node: Node<'a, '_>, path: &str) -> ResolveResult<&'a str> {
    require(node, path)?
        .text()
        .ok_or_else(|| ResolveError::protocol(format!("empty <{path}> element")))
}

/// Direct child elements with the given tag, in document order.
pub fn elements<'a, 'i>(node: Node<'a, 'i>, tag: &str) -> Vec<Node<'a, 'i>> {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().name() == tag)
        .collect()
}
