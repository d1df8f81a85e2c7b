use kuchiki::NodeRef;
use kuchiki::traits::TendrilSink;

/// Parses a markup fragment. The returned node is the document; use
/// [`body_of`] to reach the fragment's children.
pub(crate) fn parse_fragment(markup: &str) -> NodeRef {
    kuchiki::parse_html().one(markup)
}

pub(crate) fn body_of(document: &NodeRef) -> NodeRef {
    document
        .select_first("body")
        .map(|body| body.as_node().clone())
        .unwrap_or_else(|_| document.clone())
}

pub(crate) fn inner_html(node: &NodeRef) -> String {
    let mut out = String::new();
    for child in node.children() {
        out.push_str(&child.to_string());
    }
    out
}

/// Parses `markup` and returns the serialized body content.
pub(crate) fn fragment_html(document: &NodeRef) -> String {
    inner_html(&body_of(document))
}

pub(crate) fn tag_name(node: &NodeRef) -> Option<String> {
    node.as_element()
        .map(|element| element.name.local.as_ref().to_ascii_lowercase())
}

pub(crate) fn is_tag(node: &NodeRef, tags: &[&str]) -> bool {
    node.as_element().is_some_and(|element| {
        let name = element.name.local.as_ref();
        tags.iter().any(|tag| name.eq_ignore_ascii_case(tag))
    })
}

pub(crate) fn attr(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|element| element.attributes.borrow().get(name).map(str::to_string))
}

pub(crate) fn set_attr(node: &NodeRef, name: &str, value: impl Into<String>) {
    if let Some(element) = node.as_element() {
        element.attributes.borrow_mut().insert(name, value.into());
    }
}

pub(crate) fn remove_attr(node: &NodeRef, name: &str) {
    if let Some(element) = node.as_element() {
        element.attributes.borrow_mut().remove(name);
    }
}

pub(crate) fn has_class(node: &NodeRef, class: &str) -> bool {
    attr(node, "class")
        .is_some_and(|value| value.split_whitespace().any(|c| c == class))
}

pub(crate) fn add_class(node: &NodeRef, class: &str) {
    if has_class(node, class) {
        return;
    }
    let value = match attr(node, "class") {
        Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
        _ => class.to_string(),
    };
    set_attr(node, "class", value);
}

/// Case-insensitive substring match on the `class` or `id` attribute.
pub(crate) fn class_or_id_contains(node: &NodeRef, needle: &str) -> bool {
    ["class", "id"].iter().any(|name| {
        attr(node, name).is_some_and(|value| value.to_ascii_lowercase().contains(needle))
    })
}

/// Builds a detached element from a single-element HTML snippet.
pub(crate) fn element_from_html(html: &str) -> Option<NodeRef> {
    let document = parse_fragment(html);
    let body = body_of(&document);
    let first = body.children().find(|child| child.as_element().is_some())?;
    first.detach();
    Some(first)
}

pub(crate) fn nodes_from_html(html: &str) -> Vec<NodeRef> {
    let document = parse_fragment(html);
    let body = body_of(&document);
    let nodes: Vec<NodeRef> = body.children().collect();
    for node in &nodes {
        node.detach();
    }
    nodes
}

/// Replaces `node` with its own children.
pub(crate) fn unwrap_node(node: &NodeRef) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        node.insert_before(child);
    }
    node.detach();
}

pub(crate) fn replace_with(node: &NodeRef, replacement: NodeRef) {
    node.insert_before(replacement);
    node.detach();
}

pub(crate) fn replace_with_text(node: &NodeRef, text: &str) {
    replace_with(node, NodeRef::new_text(text));
}

pub(crate) fn remove_children(node: &NodeRef) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        child.detach();
    }
}

pub(crate) fn select_all(node: &NodeRef, selector: &str) -> Vec<NodeRef> {
    match node.select(selector) {
        Ok(found) => found.map(|element| element.as_node().clone()).collect(),
        Err(()) => Vec::new(),
    }
}

pub(crate) fn select_first(node: &NodeRef, selector: &str) -> Option<NodeRef> {
    node.select_first(selector)
        .ok()
        .map(|element| element.as_node().clone())
}

pub(crate) fn matches_selector(node: &NodeRef, selector: &str) -> bool {
    let Ok(selectors) = kuchiki::Selectors::compile(selector) else {
        return false;
    };
    node.clone()
        .into_element_ref()
        .is_some_and(|element| selectors.matches(&element))
}

/// Nearest ancestor (excluding `node`) satisfying `pred`.
pub(crate) fn closest_ancestor(node: &NodeRef, pred: impl Fn(&NodeRef) -> bool) -> Option<NodeRef> {
    node.ancestors().find(|ancestor| pred(ancestor))
}

pub(crate) fn is_attached(node: &NodeRef) -> bool {
    node.parent().is_some()
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub(crate) fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Serializes an element's start tag; attributes come out in name order.
pub(crate) fn start_tag(node: &NodeRef) -> Option<String> {
    let element = node.as_element()?;
    let mut out = String::from("<");
    out.push_str(element.name.local.as_ref());
    for (name, value) in element.attributes.borrow().map.iter() {
        out.push(' ');
        out.push_str(name.local.as_ref());
        out.push_str("=\"");
        out.push_str(&escape_attr(&value.value));
        out.push('"');
    }
    out.push('>');
    Some(out)
}
