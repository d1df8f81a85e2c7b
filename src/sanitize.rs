use crate::block::ArticleIndex;
use crate::markup::{
    add_class, attr, body_of, element_from_html, fragment_html, inner_html, is_attached, is_tag,
    matches_selector, nodes_from_html, parse_fragment, remove_attr, replace_with,
    replace_with_text, select_all, select_first, set_attr, unwrap_node,
};
use kuchiki::NodeRef;
use regex::Regex;
use std::sync::OnceLock;

const UNWANTED_SELECTORS: &[&str] = &[
    "script",
    "style",
    "iframe",
    "noscript",
    "button",
    "form",
    "input",
    "textarea",
    "select",
    ".subscribe-widget",
    ".subscribe-button",
    ".share-buttons",
    ".button-wrapper",
    "[class*=\"subscribe\"]",
    "[class*=\"share\"]",
    "[class*=\"social\"]",
    "[class*=\"button\"]",
];

const MEANINGFUL_CHILDREN: &str = "img, picture, svg, video, audio, source, iframe, embed, object, \
     table, ul, ol, blockquote, pre, h1, h2, h3, h4, h5, h6";

const PRUNABLE_WRAPPERS: &[&str] = &["div", "p", "figure", "section", "article"];

struct EmbedKind {
    players: &'static str,
    wrappers: &'static [&'static str],
}

const EMBEDS: &[EmbedKind] = &[
    EmbedKind {
        players: "[data-component-name=\"VideoEmbedPlayer\"]",
        wrappers: &[
            "figure",
            "[data-component-name=\"VideoEmbed\"]",
            "[data-component-name=\"VideoEmbedWithCaption\"]",
            "[data-component-name=\"Embed\"]",
        ],
    },
    EmbedKind {
        players: "[data-component-name=\"AudioEmbedPlayer\"], [aria-label=\"Audio embed player\"]",
        wrappers: &[
            "figure",
            "[data-component-name=\"AudioEmbed\"]",
            "[data-component-name=\"AudioEmbedWithCaption\"]",
            "[data-component-name=\"Embed\"]",
        ],
    },
];

const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy-src", "data-image"];
const LAZY_SRCSET_ATTRS: &[&str] = &["data-srcset", "data-lazy-srcset"];

/// What a sanitize pass changed, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub removed_elements: usize,
    pub removed_embeds: usize,
    pub unwrapped_links: usize,
    pub mentions: usize,
    pub lazy_images: usize,
    pub stanzas: usize,
    pub read_more_trimmed: usize,
}

fn read_more_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\s*read\s+more[.,;:!?]*\s*$").expect("read-more pattern compiles")
    })
}

fn standalone_read_more_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*read\s+more[.,;:!?]*\s*$").expect("read-more pattern compiles")
    })
}

fn stanza_break_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:<br\s*/?>\s*){2,}").expect("stanza pattern compiles")
    })
}

pub(crate) fn footnote_href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)#footnote-?(\d+)").expect("footnote href pattern compiles"))
}

pub(crate) fn footnote_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)footnote-anchor-?(\d+)").expect("footnote id pattern compiles")
    })
}

/// Footnote number carried by a footnote-anchor link, if `node` is one.
pub(crate) fn footnote_anchor_number(node: &NodeRef) -> Option<u32> {
    if !is_tag(node, &["a"]) {
        return None;
    }
    let class = attr(node, "class")?;
    if !class.split_whitespace().any(|c| c == "footnote-anchor") {
        return None;
    }
    let from_href = attr(node, "href").and_then(|href| {
        footnote_href_pattern()
            .captures(&href)
            .and_then(|caps| caps[1].parse().ok())
    });
    from_href.or_else(|| {
        attr(node, "id").and_then(|id| {
            footnote_id_pattern()
                .captures(&id)
                .and_then(|caps| caps[1].parse().ok())
        })
    })
}

/// Strips widgets, embeds and link wrappers from article markup and
/// normalizes lazy images, poem blocks and read-more tails.
pub fn sanitize(markup: &str, article: ArticleIndex) -> String {
    sanitize_with_report(markup, article).0
}

pub fn sanitize_with_report(markup: &str, article: ArticleIndex) -> (String, SanitizeReport) {
    let document = parse_fragment(markup);
    let report = sanitize_document(&document, article);
    (fragment_html(&document), report)
}

pub(crate) fn sanitize_document(document: &NodeRef, article: ArticleIndex) -> SanitizeReport {
    let body = body_of(document);
    let mut report = SanitizeReport::default();

    report.removed_embeds = remove_embed_players(&body);
    report.removed_elements = remove_unwanted(&body);
    report.stanzas = split_preformatted_blocks(&body);
    let (mentions, unwrapped) = unwrap_links(&body);
    report.mentions = mentions;
    report.unwrapped_links = unwrapped;
    report.lazy_images = normalize_lazy_images(&body);
    report.read_more_trimmed = trim_read_more(&body);

    log::debug!(
        "sanitize article={} removed={} embeds={} links={} mentions={} images={} stanzas={} read_more={}",
        article,
        report.removed_elements,
        report.removed_embeds,
        report.unwrapped_links,
        report.mentions,
        report.lazy_images,
        report.stanzas,
        report.read_more_trimmed
    );
    report
}

fn is_effectively_empty(node: &NodeRef) -> bool {
    node.text_contents().trim().is_empty() && select_first(node, MEANINGFUL_CHILDREN).is_none()
}

/// Walks up from `start` removing block wrappers left with nothing visible.
fn remove_empty_parents(start: Option<NodeRef>) {
    let mut current = start;
    while let Some(node) = current {
        if is_tag(&node, &["body", "html"]) || !is_tag(&node, PRUNABLE_WRAPPERS) {
            break;
        }
        if !is_effectively_empty(&node) {
            break;
        }
        let parent = node.parent();
        node.detach();
        current = parent;
    }
}

fn remove_embed_players(body: &NodeRef) -> usize {
    let mut removed = 0;
    for embed in EMBEDS {
        for player in select_all(body, embed.players) {
            if !is_attached(&player) {
                continue;
            }
            let mut done = false;
            for wrapper_selector in embed.wrappers {
                let Some(wrapper) = player.ancestors().find(|ancestor| {
                    !is_tag(ancestor, &["body", "html"]) && matches_selector(ancestor, wrapper_selector)
                }) else {
                    continue;
                };
                // The wrapper only goes if the player was all it held.
                let probe = wrapper.to_string();
                let probe_doc = parse_fragment(&probe);
                for inner in select_all(&probe_doc, embed.players) {
                    inner.detach();
                }
                let probe_root = body_of(&probe_doc)
                    .children()
                    .find(|child| child.as_element().is_some());
                if probe_root.as_ref().is_some_and(is_effectively_empty) {
                    let parent = wrapper.parent();
                    wrapper.detach();
                    remove_empty_parents(parent);
                    done = true;
                    break;
                }
            }
            if !done {
                let parent = player.parent();
                player.detach();
                remove_empty_parents(parent);
            }
            removed += 1;
        }
    }
    removed
}

fn remove_unwanted(body: &NodeRef) -> usize {
    let mut removed = 0;
    for selector in UNWANTED_SELECTORS {
        for node in select_all(body, selector) {
            if !is_attached(&node) || footnote_anchor_number(&node).is_some() {
                continue;
            }
            node.detach();
            removed += 1;
        }
    }
    removed
}

fn split_preformatted_blocks(body: &NodeRef) -> usize {
    let mut stanzas = 0;
    let blocks = select_all(
        body,
        "[data-component-name=\"PreformattedTextBlockToDOM\"], .preformatted-block",
    );
    for block in blocks {
        if !is_attached(&block) {
            continue;
        }
        if let Some(next) = block
            .following_siblings()
            .find(|sibling| sibling.as_element().is_some())
        {
            if is_hide_text(&next) {
                next.detach();
            }
        }
        for label in select_all(&block, ".hide-text") {
            if is_hide_text(&label) {
                label.detach();
            }
        }
        remove_attr(&block, "data-component-name");
        if let Some(class) = attr(&block, "class") {
            let kept: Vec<&str> = class
                .split_whitespace()
                .filter(|c| *c != "preformatted-block")
                .collect();
            set_attr(&block, "class", kept.join(" "));
        }

        let block = if is_tag(&block, &["pre"]) {
            let Some(div) = element_from_html("<div class=\"poetry-block\"></div>") else {
                continue;
            };
            for node in nodes_from_html(&newlines_to_breaks(&inner_html(&block))) {
                div.append(node);
            }
            replace_with(&block, div.clone());
            div
        } else {
            for pre in select_all(&block, "pre") {
                if let Some(div) = element_from_html("<div></div>") {
                    for node in nodes_from_html(&newlines_to_breaks(&inner_html(&pre))) {
                        div.append(node);
                    }
                    replace_with(&pre, div);
                }
            }
            add_class(&block, "poetry-block");
            block
        };

        let html = inner_html(&block);
        let chunks: Vec<&str> = stanza_break_pattern()
            .split(&html)
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .collect();
        if chunks.len() > 1 {
            for chunk in &chunks {
                let Some(stanza) = element_from_html("<div class=\"poetry-block poetry-stanza\"></div>")
                else {
                    continue;
                };
                for node in nodes_from_html(chunk) {
                    stanza.append(node);
                }
                block.insert_before(stanza);
                stanzas += 1;
            }
            block.detach();
        } else if chunks.len() == 1 {
            add_class(&block, "poetry-stanza");
            stanzas += 1;
        }
    }
    stanzas
}

fn is_hide_text(node: &NodeRef) -> bool {
    attr(node, "class").is_some_and(|class| class.split_whitespace().any(|c| c == "hide-text"))
        && attr(node, "contenteditable").as_deref() == Some("false")
}

fn newlines_to_breaks(html: &str) -> String {
    html.replace("\r\n", "<br>").replace('\n', "<br>")
}

/// Display name from a mention payload such as `{"name":"Ada","id":7}`. The
/// payload may arrive entity-encoded a second time.
fn mention_name(payload: &str) -> Option<String> {
    let parsed: Option<serde_json::Value> = serde_json::from_str(payload).ok().or_else(|| {
        let decoded = payload
            .replace("&quot;", "\"")
            .replace("&#34;", "\"")
            .replace("&#39;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&");
        serde_json::from_str(&decoded).ok()
    });
    parsed?
        .get("name")
        .and_then(|name| name.as_str())
        .map(str::to_string)
        .filter(|name| !name.trim().is_empty())
}

fn unwrap_links(body: &NodeRef) -> (usize, usize) {
    let mut mentions = 0;
    let mut unwrapped = 0;
    for link in select_all(body, "a") {
        if !is_attached(&link) {
            continue;
        }
        if attr(&link, "data-component-name").as_deref() == Some("MentionUser") {
            let fallback = link.text_contents();
            let name = attr(&link, "data-attrs")
                .and_then(|payload| mention_name(&payload))
                .unwrap_or(fallback);
            replace_with_text(&link, &name);
            mentions += 1;
            continue;
        }
        if footnote_anchor_number(&link).is_some() {
            continue;
        }
        if let Some(image) = select_first(&link, "img") {
            image.detach();
            replace_with(&link, image);
        } else {
            let text = link.text_contents();
            if text.trim().is_empty() {
                let label = attr(&link, "aria-label")
                    .or_else(|| attr(&link, "href"))
                    .unwrap_or_default();
                replace_with_text(&link, &label);
            } else {
                unwrap_node(&link);
            }
        }
        unwrapped += 1;
    }
    (mentions, unwrapped)
}

fn is_placeholder_src(src: &str) -> bool {
    let s = src.trim().to_ascii_lowercase();
    s.is_empty()
        || s == "about:blank"
        || s.starts_with("data:")
        || s.contains("transparent")
        || s.contains("1x1")
        || s.contains("blank")
}

fn first_attr(node: &NodeRef, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| attr(node, name))
        .find(|value| !value.trim().is_empty())
}

fn normalize_lazy_images(body: &NodeRef) -> usize {
    for source in select_all(body, "source") {
        let has_srcset = attr(&source, "srcset").is_some_and(|v| !v.trim().is_empty());
        if !has_srcset {
            if let Some(deferred) = first_attr(&source, &["data-srcset", "data-src"]) {
                set_attr(&source, "srcset", deferred);
            }
        }
    }

    let mut fixed = 0;
    for image in select_all(body, "img") {
        let src = attr(&image, "src").unwrap_or_default();
        let mut changed = false;
        if is_placeholder_src(&src) {
            if let Some(deferred) = first_attr(&image, LAZY_SRC_ATTRS) {
                set_attr(&image, "src", deferred);
                changed = true;
            }
        }
        let has_srcset = attr(&image, "srcset").is_some_and(|v| !v.trim().is_empty());
        if !has_srcset {
            if let Some(deferred) = first_attr(&image, LAZY_SRCSET_ATTRS) {
                set_attr(&image, "srcset", deferred);
                changed = true;
            }
        }
        let src_missing = attr(&image, "src").is_none_or(|v| v.trim().is_empty());
        if src_missing {
            let first = attr(&image, "srcset").and_then(|srcset| {
                srcset
                    .split(',')
                    .next()
                    .and_then(|candidate| candidate.split_whitespace().next())
                    .map(str::to_string)
            });
            if let Some(first) = first {
                set_attr(&image, "src", first);
                changed = true;
            }
        }
        set_attr(&image, "loading", "eager");
        set_attr(&image, "decoding", "sync");
        if changed {
            fixed += 1;
        }
    }
    fixed
}

/// Removes `count` characters from the end of `node`'s text, last text node first.
fn strip_trailing_chars(node: &NodeRef, mut count: usize) {
    let texts: Vec<NodeRef> = node
        .descendants()
        .filter(|child| child.as_text().is_some())
        .collect();
    for text_node in texts.iter().rev() {
        if count == 0 {
            break;
        }
        let Some(cell) = text_node.as_text() else {
            continue;
        };
        let len = cell.borrow().chars().count();
        if len <= count {
            count -= len;
            text_node.detach();
        } else {
            let kept: String = cell.borrow().chars().take(len - count).collect();
            *cell.borrow_mut() = kept.trim_end().to_string();
            count = 0;
        }
    }
}

fn trim_read_more(body: &NodeRef) -> usize {
    let mut trimmed = 0;
    for paragraph in select_all(body, "p") {
        let text = paragraph.text_contents();
        let Some(found) = read_more_pattern().find(&text) else {
            continue;
        };
        let tail_chars = text[found.start()..].chars().count();
        strip_trailing_chars(&paragraph, tail_chars);
        if paragraph.text_contents().trim().is_empty()
            && select_first(&paragraph, "img, picture, svg").is_none()
        {
            paragraph.detach();
        }
        trimmed += 1;
    }

    let loose: Vec<NodeRef> = body
        .descendants()
        .filter(|node| {
            node.as_text()
                .is_some_and(|text| read_more_pattern().is_match(&text.borrow()))
        })
        .collect();
    for node in loose {
        let Some(cell) = node.as_text() else {
            continue;
        };
        let text = cell.borrow().clone();
        let kept = match read_more_pattern().find(&text) {
            Some(found) if !standalone_read_more_pattern().is_match(&text) => {
                text[..found.start()].trim_end().to_string()
            }
            _ => String::new(),
        };
        if kept.is_empty() {
            node.detach();
        } else {
            *cell.borrow_mut() = kept;
        }
        trimmed += 1;
    }
    trimmed
}
