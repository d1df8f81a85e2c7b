use crate::block::{ArticleIndex, BlockKind, ContentBlock, parse_blocks};
use crate::footnote::{is_footnote_container, normalize_document};
use crate::markup::{
    attr, body_of, closest_ancestor, collapse_whitespace, escape_attr, escape_text, fragment_html,
    is_tag, parse_fragment, select_all, select_first,
};
use crate::sanitize::sanitize_document;
use chrono::{DateTime, FixedOffset};
use kuchiki::NodeRef;
use rayon::prelude::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publication {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    /// Earliest known article date; printed as "EST. YYYY".
    pub established: Option<DateTime<FixedOffset>>,
}

/// Raw article as retrieved, before any markup processing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleSource {
    pub title: String,
    pub author: Option<String>,
    pub publication: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<FixedOffset>>,
    pub content: String,
}

impl ArticleSource {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadImage {
    pub src: String,
    pub caption: Option<String>,
}

/// A sanitized, normalized article split into blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub index: ArticleIndex,
    pub title: String,
    pub author: Option<String>,
    pub publication: Option<String>,
    pub subtitle: Option<String>,
    pub lead_image: Option<LeadImage>,
    pub featured: bool,
    /// Full article content, every block tagged with this article's index.
    pub blocks: Vec<ContentBlock>,
    /// Paragraph excerpts offered to a front-page teaser.
    pub teaser: Vec<ContentBlock>,
}

impl Article {
    /// "by X from Y", "by X", "from Y", or nothing.
    pub fn author_line(&self) -> Option<String> {
        let author = self.author.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let publication = self
            .publication
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (author, publication) {
            (Some(a), Some(p)) => Some(format!("by {a} from {p}")),
            (Some(a), None) => Some(format!("by {a}")),
            (None, Some(p)) => Some(format!("from {p}")),
            (None, None) => None,
        }
    }
}

const FEATURED_IMAGE_SELECTORS: &[&str] = &[
    "figure.featured-image img",
    "figure.main-image img",
    "figure.hero-image img",
    "figure.post-image img",
    ".featured-image img",
    ".main-image img",
    ".hero-image img",
    ".post-image img",
    "[class*=\"featured\"] img",
    "[class*=\"main-image\"] img",
    "[class*=\"hero\"] img",
    "img[data-featured], img[data-main], img[data-hero]",
    "figure img",
    "img",
];

const SUBTITLE_SELECTOR: &str = "h3, h4, .subtitle, [class*=\"subtitle\"]";

/// What to do with the lead image found in an article body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageUse {
    /// Lift it out of the body (featured article).
    Extract,
    /// Copy it for the teaser; the body keeps it.
    Copy,
    Ignore,
}

fn image_use(index: ArticleIndex) -> ImageUse {
    match index {
        0 => ImageUse::Extract,
        2 => ImageUse::Copy,
        _ => ImageUse::Ignore,
    }
}

/// Sanitizes, normalizes and splits every source, in parallel. Article `i`
/// gets index `i`; the first is featured.
pub fn prepare_articles(sources: &[ArticleSource]) -> Vec<Article> {
    sources
        .par_iter()
        .enumerate()
        .map(|(index, source)| prepare_article(source, index))
        .collect()
}

pub fn prepare_article(source: &ArticleSource, index: ArticleIndex) -> Article {
    let document = parse_fragment(&source.content);
    let sanitized = sanitize_document(&document, index);
    let normalized = normalize_document(&document, index);
    log::debug!(
        "prepared article {index} '{}' removed={} markers={}",
        source.title,
        sanitized.removed_elements,
        normalized.markers
    );
    let full_markup = fragment_html(&document);

    let mode = image_use(index);
    let lead_image = match mode {
        ImageUse::Extract => take_lead_image(&document, true),
        ImageUse::Copy => take_lead_image(&parse_fragment(&full_markup), false),
        ImageUse::Ignore => None,
    };

    // The featured article loses its subtitle from the body; teasers only
    // exclude it from the excerpt.
    let teaser_document = parse_fragment(&fragment_html(&document));
    let subtitle = take_subtitle(&teaser_document);
    if index == 0 {
        take_subtitle(&document);
    }

    let body_markup = if index == 0 {
        fragment_html(&document)
    } else {
        full_markup
    };

    Article {
        index,
        title: collapse_whitespace(&source.title),
        author: source.author.clone(),
        publication: source.publication.clone(),
        subtitle,
        lead_image,
        featured: index == 0,
        blocks: parse_blocks(&body_markup, index),
        teaser: teaser_paragraphs(&teaser_document),
    }
}

fn take_lead_image(document: &NodeRef, remove: bool) -> Option<LeadImage> {
    let body = body_of(document);
    let image = FEATURED_IMAGE_SELECTORS
        .iter()
        .find_map(|selector| select_first(&body, selector))?;
    let src = attr(&image, "src")
        .or_else(|| attr(&image, "data-src"))
        .unwrap_or_default();
    if src.trim().is_empty() {
        return None;
    }

    let figure = closest_ancestor(&image, |node| is_tag(node, &["figure"]));
    let caption_node = match &figure {
        Some(figure) => select_first(figure, "figcaption, .image-caption"),
        None => select_first(&body, "figcaption, .image-caption"),
    };
    let caption = caption_node
        .as_ref()
        .map(|node| collapse_whitespace(&node.text_contents()))
        .filter(|text| !text.is_empty());

    if remove {
        image.detach();
        if let Some(node) = caption_node {
            node.detach();
        }
        if let Some(figure) = figure {
            if !figure.children().any(|child| child.as_element().is_some()) {
                figure.detach();
            }
        }
    }
    Some(LeadImage { src, caption })
}

fn take_subtitle(document: &NodeRef) -> Option<String> {
    let node = select_first(&body_of(document), SUBTITLE_SELECTOR)?;
    let text = collapse_whitespace(&node.text_contents());
    node.detach();
    (!text.is_empty()).then_some(text)
}

/// Every non-empty paragraph outside footnotes, flattened to a top-level block.
fn teaser_paragraphs(document: &NodeRef) -> Vec<ContentBlock> {
    let body = body_of(document);
    let mut blocks = Vec::new();
    for paragraph in select_all(&body, "p") {
        if paragraph.ancestors().any(|a| is_footnote_container(&a)) {
            continue;
        }
        if paragraph.ancestors().any(|a| is_tag(&a, &["p", "li", "blockquote"])) {
            continue;
        }
        if paragraph.text_contents().trim().is_empty() {
            continue;
        }
        blocks.push(ContentBlock::new(BlockKind::Paragraph, paragraph.to_string(), None));
    }
    blocks
}

/// Markup for a front-page image block with an optional caption.
pub(crate) fn lead_image_markup(image: &LeadImage, alt: &str, class: &str) -> String {
    let mut out = format!(
        "<div class=\"{class}\"><img src=\"{}\" alt=\"{}\">",
        escape_attr(&image.src),
        escape_attr(alt)
    );
    if let Some(caption) = &image.caption {
        out.push_str("<div class=\"image-caption\">");
        out.push_str(&escape_text(caption));
        out.push_str("</div>");
    }
    out.push_str("</div>");
    out
}
