use crate::block::ArticleIndex;
use crate::footnote::{
    ARTICLE_INDEX_ATTR, FOOTNOTE_NUMBER_ATTR, FOOTNOTE_REF_ATTR, article_index_of,
    is_footnote_container, leading_number,
};
use crate::markup::{
    add_class, attr, body_of, collapse_whitespace, element_from_html, fragment_html, has_class,
    is_attached, is_tag, parse_fragment, remove_children, replace_with, replace_with_text,
    select_all, select_first, set_attr, unwrap_node,
};
use kuchiki::NodeRef;
use std::collections::{BTreeMap, BTreeSet};

const LABEL_TEXT: &str = "Footnotes:";
const MAX_ITEM_CHARS: usize = 2000;
const HEADINGS: &str = "h1, h2, h3, h4, h5, h6";
const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Outcome of a resolve pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub containers: usize,
    /// Footnotes numbered per article, keyed by article index.
    pub footnotes: BTreeMap<ArticleIndex, u32>,
    /// Footnotes whose article could not be determined.
    pub unattributed: u32,
    pub superscripts: usize,
    pub dangling: usize,
}

impl ResolveReport {
    pub fn total_footnotes(&self) -> u32 {
        self.footnotes.values().sum::<u32>() + self.unattributed
    }
}

struct ContainerPlan {
    node: NodeRef,
    article: Option<ArticleIndex>,
    items: Vec<PlannedItem>,
}

struct PlannedItem {
    node: NodeRef,
    text: String,
    number: u32,
}

/// Finalizes every footnote container in a fully rendered layout and rewrites
/// in-body reference placeholders to match the numbers actually assigned.
pub fn resolve(markup: &str) -> (String, ResolveReport) {
    let document = parse_fragment(markup);
    let report = resolve_document(&document);
    (fragment_html(&document), report)
}

pub(crate) fn resolve_document(document: &NodeRef) -> ResolveReport {
    let root = body_of(document);
    let (plans, valid) = collect(&root);

    let mut report = ResolveReport {
        containers: plans.len(),
        ..ResolveReport::default()
    };
    for (article, numbers) in &valid {
        let count = numbers.len() as u32;
        match article {
            Some(index) => {
                report.footnotes.insert(*index, count);
            }
            None => report.unattributed += count,
        }
    }

    let mut labelled: BTreeSet<Option<ArticleIndex>> = BTreeSet::new();
    for plan in &plans {
        finalize_container(plan, &mut labelled);
    }

    let (superscripts, dangling) = rewrite_references(&root, &valid);
    report.superscripts = superscripts;
    report.dangling = dangling;

    log::debug!(
        "footnotes resolved containers={} footnotes={} superscripts={} dangling={}",
        report.containers,
        report.total_footnotes(),
        report.superscripts,
        report.dangling
    );
    report
}

/// Pass 1: find containers in document order, attribute each to an article,
/// and assign sequential numbers from a per-article counter.
fn collect(
    root: &NodeRef,
) -> (
    Vec<ContainerPlan>,
    BTreeMap<Option<ArticleIndex>, BTreeSet<u32>>,
) {
    let containers: Vec<NodeRef> = root
        .descendants()
        .filter(is_footnote_container)
        .filter(|node| !node.ancestors().any(|a| is_footnote_container(&a)))
        .collect();

    let mut counters: BTreeMap<Option<ArticleIndex>, u32> = BTreeMap::new();
    let mut valid: BTreeMap<Option<ArticleIndex>, BTreeSet<u32>> = BTreeMap::new();
    let mut previous: Option<ArticleIndex> = None;
    let mut plans = Vec::with_capacity(containers.len());

    for container in containers {
        let article = detect_article(root, &container).or(previous);
        if article.is_none() {
            log::warn!("footnote container without article identity; numbering as unattributed");
        }
        previous = article;

        structure_loose_text(&container);
        let counter = counters.entry(article).or_insert(0);
        let mut items = Vec::new();
        for node in candidate_items(&container) {
            let text = collapse_whitespace(&node.text_contents());
            if text.is_empty() || text.chars().count() >= MAX_ITEM_CHARS {
                continue;
            }
            if text.chars().all(|c| c.is_ascii_digit() || c == '.') {
                continue;
            }
            let text = match leading_number(&text) {
                Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
                _ => text,
            };
            *counter += 1;
            valid.entry(article).or_default().insert(*counter);
            items.push(PlannedItem {
                node,
                text,
                number: *counter,
            });
        }
        plans.push(ContainerPlan {
            node: container,
            article,
            items,
        });
    }
    (plans, valid)
}

/// Explicit identity on the container or a descendant, then the nearest
/// tagged ancestor, then the article title preceding it in document order.
fn detect_article(root: &NodeRef, container: &NodeRef) -> Option<ArticleIndex> {
    if let Some(index) = article_index_of(container) {
        return Some(index);
    }
    if let Some(index) = container
        .descendants()
        .filter(|node| !is_reference(node))
        .find_map(|node| article_index_of(&node))
    {
        return Some(index);
    }
    if let Some(index) = container.ancestors().find_map(|node| article_index_of(&node)) {
        return Some(index);
    }

    let mut titles_seen = 0usize;
    let mut last_title: Option<NodeRef> = None;
    for node in root.descendants() {
        if node == *container {
            break;
        }
        if has_class(&node, "article-title") {
            titles_seen += 1;
            last_title = Some(node);
        }
    }
    let title = last_title?;
    article_index_of(&title).or(Some(titles_seen - 1))
}

fn is_reference(node: &NodeRef) -> bool {
    has_class(node, "footnote-reference")
        || has_class(node, "footnote-ref")
        || attr(node, FOOTNOTE_REF_ATTR).is_some()
}

/// A container holding only loose text gets one paragraph per line.
fn structure_loose_text(container: &NodeRef) {
    if is_tag(container, &["ol", "ul"]) || select_first(container, "p, li").is_some() {
        return;
    }
    if select_first(container, HEADINGS).is_some() {
        return;
    }
    let lines: Vec<String> = container
        .text_contents()
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return;
    }
    remove_children(container);
    for line in lines {
        if let Some(paragraph) = element_from_html("<p></p>") {
            paragraph.append(NodeRef::new_text(line));
            container.append(paragraph);
        }
    }
}

/// Paragraphs and list items inside the container, in document order.
/// Paragraphs nested in list items are covered by their item.
fn candidate_items(container: &NodeRef) -> Vec<NodeRef> {
    container
        .descendants()
        .filter(|node| is_tag(node, &["p", "li"]))
        .filter(|node| {
            !node.ancestors().take_while(|a| a != container).any(|a| {
                is_tag(&a, &["li"]) || is_tag(&a, HEADING_TAGS) || has_class(&a, "footnotes-label")
            })
        })
        .collect()
}

/// Pass 2: merge sub-containers, label once per article and rebuild the items
/// as a single canonical list.
fn finalize_container(plan: &ContainerPlan, labelled: &mut BTreeSet<Option<ArticleIndex>>) {
    let container = &plan.node;
    for nested in select_all(container, ".footnote-content, [class*=\"footnote-content\"]") {
        if nested != *container {
            unwrap_node(&nested);
        }
    }

    add_class(container, "footnotes-section");
    if let Some(article) = plan.article {
        set_attr(container, ARTICLE_INDEX_ATTR, article.to_string());
    }
    if let Some(previous) = container
        .preceding_siblings()
        .find(|sibling| sibling.as_element().is_some())
    {
        if is_tag(&previous, &["hr"]) {
            add_class(&previous, "footnotes-divider");
        }
    }

    let is_list = is_tag(container, &["ol", "ul"]);
    if !is_list && labelled.insert(plan.article) {
        let has_heading = select_first(container, HEADINGS).is_some();
        let has_label = select_first(container, ".footnotes-label").is_some();
        if !has_heading && !has_label {
            if let Some(label) = element_from_html("<div class=\"footnotes-label\"></div>") {
                label.append(NodeRef::new_text(LABEL_TEXT));
                container.prepend(label);
            }
        }
    }

    if plan.items.is_empty() {
        return;
    }

    let list = if is_list {
        add_class(container, "footnotes-list");
        container.clone()
    } else if let Some(existing) = select_first(container, "ol.footnotes-list, ul.footnotes-list") {
        existing
    } else {
        let Some(list) = element_from_html("<ol class=\"footnotes-list\"></ol>") else {
            return;
        };
        match select_first(container, ".footnotes-label") {
            Some(label) => label.insert_after(list.clone()),
            None => container.prepend(list.clone()),
        }
        list
    };

    for item in &plan.items {
        if !is_attached(&item.node) {
            continue;
        }
        let Some(li) = element_from_html("<li></li>") else {
            continue;
        };
        set_attr(&li, FOOTNOTE_NUMBER_ATTR, item.number.to_string());
        if let Some(article) = plan.article {
            set_attr(&li, ARTICLE_INDEX_ATTR, article.to_string());
        }
        li.append(NodeRef::new_text(format!("{}. {}", item.number, item.text)));
        list.append(li);
        item.node.detach();
    }

    prune_leftovers(container, &list);
}

/// Drops digit-only text and wrappers emptied by the rebuild.
fn prune_leftovers(container: &NodeRef, list: &NodeRef) {
    let stray_digits: Vec<NodeRef> = container
        .descendants()
        .filter(|node| {
            node.as_text().is_some_and(|text| {
                let text = text.borrow();
                let trimmed = text.trim().trim_end_matches('.');
                !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit())
            })
        })
        .filter(|node| !node.ancestors().any(|a| a == *list))
        .collect();
    for node in stray_digits {
        node.detach();
    }

    let empties: Vec<NodeRef> = container
        .descendants()
        .filter(|node| node.as_element().is_some() && *node != *list)
        .filter(|node| !node.ancestors().any(|a| a == *list))
        .filter(|node| !has_class(node, "footnotes-label"))
        .filter(|node| !is_tag(node, &["img", "br", "hr"]))
        .filter(|node| node.text_contents().trim().is_empty() && select_first(node, "img").is_none())
        .collect();
    for node in empties {
        if is_attached(&node) {
            node.detach();
        }
    }
}

/// Pass 3: placeholders whose number was assigned to their article become
/// superscripts; the rest collapse to plain digits.
fn rewrite_references(
    root: &NodeRef,
    valid: &BTreeMap<Option<ArticleIndex>, BTreeSet<u32>>,
) -> (usize, usize) {
    let union: BTreeSet<u32> = valid.values().flatten().copied().collect();
    let mut superscripts = 0;
    let mut dangling = 0;

    for reference in select_all(root, "span[data-footnote-ref], span.footnote-reference") {
        let number = attr(&reference, FOOTNOTE_REF_ATTR)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .or_else(|| reference.text_contents().trim().parse().ok());
        let Some(number) = number else {
            replace_with_text(&reference, reference.text_contents().trim());
            dangling += 1;
            continue;
        };
        let article = article_index_of(&reference)
            .or_else(|| reference.ancestors().find_map(|node| article_index_of(&node)));
        let known = match article {
            Some(index) => valid
                .get(&Some(index))
                .is_some_and(|set| set.contains(&number)),
            None => union.contains(&number),
        };
        if !known {
            replace_with_text(&reference, &number.to_string());
            dangling += 1;
            continue;
        }
        let Some(sup) = element_from_html("<sup class=\"footnote-ref\"></sup>") else {
            continue;
        };
        set_attr(&sup, FOOTNOTE_REF_ATTR, number.to_string());
        if let Some(index) = article {
            set_attr(&sup, ARTICLE_INDEX_ATTR, index.to_string());
        }
        sup.append(NodeRef::new_text(number.to_string()));
        replace_with(&reference, sup);
        superscripts += 1;
    }
    (superscripts, dangling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn items(html: &str) -> Vec<String> {
        let doc = parse_fragment(html);
        select_all(&doc, "ol.footnotes-list > li")
            .iter()
            .map(|li| li.text_contents())
            .collect()
    }

    #[test]
    fn stray_numbers_are_replaced_by_sequence() {
        let html = "<div class=\"footnotes\" data-article-index=\"0\"><ol><li>Some note</li><li>2. Another</li><li>Third</li></ol></div>";
        let (out, report) = resolve(html);
        assert_eq!(items(&out), vec!["1. Some note", "2. Another", "3. Third"]);
        assert_eq!(report.footnotes.get(&0), Some(&3));
        assert!(out.contains("<div class=\"footnotes-label\">Footnotes:</div>"));
    }

    #[test]
    fn dangling_references_degrade_to_plain_digits() {
        let html = "<div data-article-index=\"1\"><p>A<span class=\"footnote-reference\" data-footnote-ref=\"1\" data-article-index=\"1\">1</span> \
                    B<span class=\"footnote-reference\" data-footnote-ref=\"2\" data-article-index=\"1\">2</span> \
                    C<span class=\"footnote-reference\" data-footnote-ref=\"4\" data-article-index=\"1\">4</span></p>\
                    <div class=\"footnotes\"><ol><li>One</li><li>Two</li></ol></div></div>";
        let (out, report) = resolve(html);
        assert_eq!((report.superscripts, report.dangling), (2, 1));
        let doc = parse_fragment(&out);
        let sups: Vec<String> = select_all(&doc, "sup.footnote-ref")
            .iter()
            .map(|s| s.text_contents())
            .collect();
        assert_eq!(sups, vec!["1", "2"]);
        assert!(out.contains("C4</p>"), "{out}");
    }

    #[test]
    fn numbering_restarts_per_article_and_continues_across_containers() {
        let html = "<h2 class=\"article-title\" data-article-index=\"0\">A</h2>\
            <div class=\"footnote\"><a class=\"footnote-number\">1</a><div class=\"footnote-content\"><p>First of A</p></div></div>\
            <div class=\"footnote\">2<div class=\"footnote-content\"><p>Second of A</p></div></div>\
            <h2 class=\"article-title\" data-article-index=\"1\">B</h2>\
            <div class=\"footnote\"><div class=\"footnote-content\"><p>7. First of B</p></div></div>";
        let (out, report) = resolve(html);
        assert_eq!(report.footnotes.get(&0), Some(&2));
        assert_eq!(report.footnotes.get(&1), Some(&1));
        let doc = parse_fragment(&out);
        let numbered: Vec<(String, String)> = select_all(&doc, "li[data-footnote-number]")
            .iter()
            .map(|li| {
                (
                    attr(li, ARTICLE_INDEX_ATTR).unwrap_or_default(),
                    li.text_contents(),
                )
            })
            .collect();
        assert_eq!(
            numbered,
            vec![
                ("0".to_string(), "1. First of A".to_string()),
                ("0".to_string(), "2. Second of A".to_string()),
                ("1".to_string(), "1. First of B".to_string()),
            ]
        );
        assert_eq!(out.matches(LABEL_TEXT).count(), 2);
        assert!(select_first(&doc, ".footnote-content").is_none());
    }

    #[test]
    fn unknown_article_keeps_previous_context() {
        let html = "<div class=\"footnotes\" data-article-index=\"2\"><ol><li>a</li></ol></div>\
                    <div class=\"footnotes\"><p>b</p></div>";
        let (_, report) = resolve(html);
        assert_eq!(report.footnotes.get(&2), Some(&2));
        assert_eq!(report.unattributed, 0);
    }

    #[test]
    fn body_lists_never_become_footnotes() {
        let html = "<div data-article-index=\"0\"><ol><li>Step one</li></ol><p>Body</p></div>";
        let (out, report) = resolve(html);
        assert_eq!(out, html);
        assert_eq!(report.total_footnotes(), 0);
    }

    #[test]
    fn loose_lines_become_items() {
        let html = "<div class=\"footnote\" data-article-index=\"0\">1. A note\n2. Another</div>";
        let (out, _) = resolve(html);
        assert_eq!(items(&out), vec!["1. A note", "2. Another"]);
    }
}
