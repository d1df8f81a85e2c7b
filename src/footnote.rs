use crate::block::ArticleIndex;
use crate::markup::{
    attr, body_of, class_or_id_contains, collapse_whitespace, element_from_html, fragment_html,
    has_class, is_tag, parse_fragment, remove_children, replace_with, replace_with_text, select_all,
    set_attr,
};
use crate::sanitize::footnote_anchor_number;
use kuchiki::NodeRef;
use regex::Regex;
use std::sync::OnceLock;

pub(crate) const ARTICLE_INDEX_ATTR: &str = "data-article-index";
pub(crate) const FOOTNOTE_REF_ATTR: &str = "data-footnote-ref";
pub(crate) const FOOTNOTE_NUMBER_ATTR: &str = "data-footnote-number";

/// Text length ceiling for the line-break heuristic; longer matches are prose.
const HEURISTIC_MAX_CHARS: usize = 2000;

/// Ancestor levels tagged with the article index above a footnote list.
const TAG_DEPTH: usize = 5;

const INLINE_TAGS: &[&str] = &[
    "a", "span", "sup", "sub", "em", "strong", "b", "i", "u", "small", "code",
];
const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

fn leading_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)(?:\.\s*|\s+|$)").expect("leading number pattern compiles")
    })
}

fn broken_footnote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(\d+)\.?[^\S\n]*\n+\s*(.+)$").expect("footnote line pattern compiles")
    })
}

/// Splits `"12. text"` into `(12, "text")`.
pub(crate) fn leading_number(text: &str) -> Option<(u32, &str)> {
    let caps = leading_number_pattern().captures(text)?;
    let number = caps[1].parse().ok()?;
    let rest = &text[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
    Some((number, rest))
}

/// A footnote-named element that can hold footnote items. Inline markers,
/// headings, list items and the generated label never count.
pub(crate) fn is_footnote_container(node: &NodeRef) -> bool {
    if node.as_element().is_none() || !class_or_id_contains(node, "footnote") {
        return false;
    }
    if is_tag(node, INLINE_TAGS) || is_tag(node, HEADING_TAGS) || is_tag(node, &["li"]) {
        return false;
    }
    if has_class(node, "footnotes-label") {
        return false;
    }
    if is_tag(node, &["ol", "ul"]) {
        return !node.ancestors().any(|ancestor| is_footnote_container(&ancestor));
    }
    true
}

/// A list that holds footnotes: `*.footnotes-list`, or any list under a footnote container.
pub(crate) fn is_footnote_list(node: &NodeRef) -> bool {
    if !is_tag(node, &["ol", "ul"]) {
        return false;
    }
    has_class(node, "footnotes-list")
        || is_footnote_container(node)
        || node.ancestors().any(|ancestor| is_footnote_container(&ancestor))
}

pub(crate) fn article_index_of(node: &NodeRef) -> Option<ArticleIndex> {
    attr(node, ARTICLE_INDEX_ATTR).and_then(|value| value.trim().parse().ok())
}

/// What a normalize pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub markers: usize,
    pub list_items: usize,
    pub heuristic_lines: usize,
}

/// Rewrites footnote markers and footnote-list items into canonical form and
/// tags them with `article`. Running it on its own output changes nothing.
pub fn normalize(markup: &str, article: ArticleIndex) -> String {
    normalize_with_report(markup, article).0
}

pub fn normalize_with_report(markup: &str, article: ArticleIndex) -> (String, NormalizeReport) {
    let document = parse_fragment(markup);
    let report = normalize_document(&document, article);
    (fragment_html(&document), report)
}

pub(crate) fn normalize_document(document: &NodeRef, article: ArticleIndex) -> NormalizeReport {
    let body = body_of(document);
    let mut report = NormalizeReport {
        markers: replace_markers(&body, article),
        ..NormalizeReport::default()
    };

    for container in body
        .descendants()
        .filter(|node| node.as_element().is_some() && class_or_id_contains(node, "footnote"))
        .filter(|node| !is_tag(node, INLINE_TAGS) && !has_class(node, "footnote-reference"))
    {
        set_attr(&container, ARTICLE_INDEX_ATTR, article.to_string());
    }

    let lists: Vec<NodeRef> = select_all(&body, "ol, ul")
        .into_iter()
        .filter(is_footnote_list)
        .collect();
    for list in lists {
        report.list_items += flatten_list(&list, article);
    }

    report.heuristic_lines = rejoin_broken_footnotes(&body);
    clean_list_items(&body);

    log::debug!(
        "normalize article={} markers={} items={} heuristic={}",
        article,
        report.markers,
        report.list_items,
        report.heuristic_lines
    );
    report
}

/// Replaces footnote-anchor links with reference placeholders, last first so
/// earlier positions stay valid while the tree changes.
fn replace_markers(body: &NodeRef, article: ArticleIndex) -> usize {
    let markers: Vec<(NodeRef, u32)> = select_all(body, "a")
        .into_iter()
        .filter_map(|link| footnote_anchor_number(&link).map(|number| (link, number)))
        .collect();
    let count = markers.len();
    for (link, number) in markers.into_iter().rev() {
        let text = link.text_contents();
        let text = if text.trim().is_empty() {
            number.to_string()
        } else {
            text.trim().to_string()
        };
        let Some(span) = element_from_html("<span class=\"footnote-reference\"></span>") else {
            continue;
        };
        set_attr(&span, FOOTNOTE_REF_ATTR, number.to_string());
        set_attr(&span, ARTICLE_INDEX_ATTR, article.to_string());
        span.append(NodeRef::new_text(text));
        replace_with(&link, span);
    }
    count
}

fn flatten_list(list: &NodeRef, article: ArticleIndex) -> usize {
    set_attr(list, ARTICLE_INDEX_ATTR, article.to_string());
    for ancestor in list.ancestors().take(TAG_DEPTH) {
        if is_tag(&ancestor, &["body", "html"]) {
            break;
        }
        if class_or_id_contains(&ancestor, "footnote") {
            set_attr(&ancestor, ARTICLE_INDEX_ATTR, article.to_string());
        }
    }

    let ordered = is_tag(list, &["ol"]);
    let items: Vec<NodeRef> = list.children().filter(|c| is_tag(c, &["li"])).collect();
    for (idx, item) in items.iter().enumerate() {
        let position = idx as u32 + 1;
        for br in select_all(item, "br") {
            replace_with_text(&br, " ");
        }
        let text = collapse_whitespace(&item.text_contents());
        let (number, body_text) = match leading_number(&text) {
            Some((parsed, rest)) if !ordered => (parsed, rest.to_string()),
            Some((parsed, rest)) if parsed == position => (position, rest.to_string()),
            _ => (position, text.clone()),
        };
        set_attr(item, ARTICLE_INDEX_ATTR, article.to_string());
        remove_children(item);
        item.append(NodeRef::new_text(format!("{number}. {}", body_text.trim())));
    }
    items.len()
}

/// `"3\n\nSome note"` inside loose text becomes `"3. Some note"`.
fn rejoin_broken_footnotes(body: &NodeRef) -> usize {
    let mut rewritten = 0;
    let texts: Vec<NodeRef> = body
        .descendants()
        .filter(|node| node.as_text().is_some())
        .collect();
    for node in texts {
        let Some(cell) = node.as_text() else {
            continue;
        };
        let original = cell.borrow().clone();
        let mut hits = 0;
        let updated = broken_footnote_pattern().replace_all(&original, |caps: &regex::Captures| {
            let trailing = caps[2].trim();
            if trailing.is_empty() || trailing.chars().count() >= HEURISTIC_MAX_CHARS {
                return caps[0].to_string();
            }
            hits += 1;
            format!("{}. {}", &caps[1], collapse_whitespace(trailing))
        });
        if updated != original {
            *cell.borrow_mut() = updated.into_owned();
            rewritten += hits;
        }
    }
    rewritten
}

/// Drops line breaks inside list items and collapses their whitespace without
/// touching inline structure.
fn clean_list_items(body: &NodeRef) {
    for item in select_all(body, "li") {
        for br in select_all(&item, "br") {
            br.detach();
        }
        let texts: Vec<NodeRef> = item
            .descendants()
            .filter(|node| node.as_text().is_some())
            .collect();
        let last = texts.len().saturating_sub(1);
        for (idx, node) in texts.iter().enumerate() {
            let Some(cell) = node.as_text() else {
                continue;
            };
            let raw = cell.borrow().clone();
            let mut collapsed = String::with_capacity(raw.len());
            let mut in_space = false;
            for ch in raw.chars() {
                if ch.is_whitespace() {
                    if !in_space {
                        collapsed.push(' ');
                    }
                    in_space = true;
                } else {
                    collapsed.push(ch);
                    in_space = false;
                }
            }
            if idx == 0 {
                collapsed = collapsed.trim_start().to_string();
            }
            if idx == last {
                collapsed = collapsed.trim_end().to_string();
            }
            if collapsed != raw {
                *cell.borrow_mut() = collapsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::select_first;
    use pretty_assertions::assert_eq;

    fn item_texts(html: &str) -> Vec<String> {
        let doc = parse_fragment(html);
        select_all(&doc, "li")
            .iter()
            .map(|li| li.text_contents())
            .collect()
    }

    #[test]
    fn markers_become_reference_placeholders() {
        let html = r##"<p>One<a class="footnote-anchor" data-component-name="FootnoteAnchorToDOM" id="footnote-anchor-1" href="#footnote-1">1</a> two<a class="footnote-anchor" id="footnote-anchor-2" href="#footnote-2"></a> <a href="#footnote-9">plain</a></p>"##;
        let (out, report) = normalize_with_report(html, 4);
        assert_eq!(report.markers, 2);
        let doc = parse_fragment(&out);
        let refs = select_all(&doc, "span.footnote-reference");
        assert_eq!(refs.len(), 2);
        assert_eq!(attr(&refs[0], FOOTNOTE_REF_ATTR).as_deref(), Some("1"));
        assert_eq!(attr(&refs[1], FOOTNOTE_REF_ATTR).as_deref(), Some("2"));
        assert_eq!(refs[1].text_contents(), "2");
        assert_eq!(attr(&refs[0], ARTICLE_INDEX_ATTR).as_deref(), Some("4"));
        assert!(out.contains("<a href=\"#footnote-9\">plain</a>"), "plain links are out of scope");
    }

    #[test]
    fn footnote_lists_flatten_to_single_numbered_lines() {
        let html = "<div class=\"footnotes\"><ol><li><p>First\n  note</p><br></li><li>2. Second</li><li>9. Odd</li></ol></div>\
                    <ul class=\"footnotes-list\"><li>4 Four</li><li>Plain</li></ul>";
        let out = normalize(html, 1);
        assert_eq!(
            item_texts(&out),
            vec!["1. First note", "2. Second", "3. 9. Odd", "4. Four", "2. Plain"]
        );
        let doc = parse_fragment(&out);
        let container = select_first(&doc, "div.footnotes").expect("container");
        assert_eq!(attr(&container, ARTICLE_INDEX_ATTR).as_deref(), Some("1"));
    }

    #[test]
    fn body_lists_are_left_alone() {
        let html = "<ol><li><strong>Step</strong> one</li><li>Step two</li></ol>";
        let out = normalize(html, 0);
        assert_eq!(out, html);
    }

    #[test]
    fn broken_number_lines_are_rejoined() {
        let html = "<div class=\"footnote\">1\n\nA note that wrapped\n2.\nAnother</div><p>In 2024 we\nwrote</p>";
        let (out, report) = normalize_with_report(html, 0);
        assert_eq!(report.heuristic_lines, 2);
        assert!(out.contains("1. A note that wrapped\n2. Another"), "{out}");
        assert!(out.contains("In 2024 we\nwrote"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let html = r##"<p>Text<a class="footnote-anchor" href="#footnote-1" id="footnote-anchor-1">1</a></p>
            <div class="footnotes"><ol><li>Some note<br>continued</li><li>2. Another</li><li>Third</li></ol></div>
            <ul><li> body   item </li></ul>
            <div class="footnote">3
            Loose note</div>"##;
        let once = normalize(html, 2);
        let twice = normalize(&once, 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn leading_number_requires_a_boundary() {
        assert_eq!(leading_number("2. Another"), Some((2, "Another")));
        assert_eq!(leading_number("12 words"), Some((12, "words")));
        assert_eq!(leading_number("3rd place"), None);
        assert_eq!(leading_number("Plain"), None);
    }
}
