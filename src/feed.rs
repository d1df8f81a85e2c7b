use crate::article::{ArticleSource, Publication};
use crate::error::NewsprintError;
use chrono::{DateTime, FixedOffset};
use roxmltree::Node;

/// Articles laid out per edition: one featured, two teasers.
pub const MAX_ARTICLES: usize = 3;

const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub publication: Publication,
    pub articles: Vec<ArticleSource>,
    /// Items in the feed, including those past [`MAX_ARTICLES`].
    pub item_count: usize,
}

/// Parses an RSS 2.0 document. Only the first [`MAX_ARTICLES`] items are
/// kept; every item contributes to the publication's established date.
pub fn parse_rss(xml: &str) -> Result<Feed, NewsprintError> {
    let document = roxmltree::Document::parse(xml)?;
    let channel = document
        .descendants()
        .find(|node| node.has_tag_name("channel"))
        .ok_or_else(|| NewsprintError::Feed("missing <channel> element".into()))?;

    let items: Vec<Node<'_, '_>> = channel
        .children()
        .filter(|node| node.has_tag_name("item"))
        .collect();

    let established = items
        .iter()
        .filter_map(|item| child_text(*item, "pubDate"))
        .filter_map(|value| parse_date(&value))
        .min();

    let publication = Publication {
        title: child_text(channel, "title").unwrap_or_default(),
        description: child_text(channel, "description").unwrap_or_default(),
        link: child_text(channel, "link"),
        established,
    };

    let articles: Vec<ArticleSource> = items
        .iter()
        .take(MAX_ARTICLES)
        .map(|item| parse_item(*item, &publication.title))
        .collect();

    log::info!(
        "parsed feed '{}' items={} kept={}",
        publication.title,
        items.len(),
        articles.len()
    );
    Ok(Feed {
        publication,
        articles,
        item_count: items.len(),
    })
}

fn parse_item(item: Node<'_, '_>, publication_name: &str) -> ArticleSource {
    let content = item
        .children()
        .find(|node| {
            node.is_element()
                && (node.tag_name().name() == "encoded"
                    || node.tag_name().namespace() == Some(CONTENT_NS))
        })
        .map(text_of)
        .filter(|text| !text.trim().is_empty())
        .or_else(|| child_text(item, "description"))
        .unwrap_or_default();

    let author = item
        .children()
        .find(|node| {
            node.is_element()
                && (node.tag_name().name() == "creator" || node.tag_name().name() == "author")
        })
        .map(text_of)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    ArticleSource {
        title: child_text(item, "title")
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        author,
        publication: (!publication_name.trim().is_empty()).then(|| publication_name.to_string()),
        link: child_text(item, "link"),
        published: child_text(item, "pubDate").and_then(|value| parse_date(&value)),
        content,
    }
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == name)
        .map(text_of)
        .map(|text| text.trim().to_string())
}

fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect()
}

/// RFC 2822 as RSS specifies, with RFC 3339 accepted for Atom-flavoured feeds.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
}
