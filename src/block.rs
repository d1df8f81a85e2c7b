use crate::inline::InlineText;
use crate::markup::{
    attr, body_of, class_or_id_contains, collapse_whitespace, element_from_html,
    escape_text, is_tag, parse_fragment, select_first, start_tag, tag_name,
};
use kuchiki::NodeRef;

/// Caller-assigned article identity, threaded through every block from parse time.
pub type ArticleIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    Figure,
    List,
    Stanza,
    Quote,
    Preformatted,
    Footnotes,
    Rule,
    /// Layout furniture (titles, bylines, markers); never counted as article content.
    Furniture,
    Other,
}

impl BlockKind {
    pub fn is_paragraph_like(self) -> bool {
        matches!(self, BlockKind::Paragraph)
    }

    fn from_node(node: &NodeRef) -> BlockKind {
        let Some(name) = tag_name(node) else {
            return BlockKind::Other;
        };
        match name.as_str() {
            "p" => {
                if is_image_only(node) {
                    BlockKind::Figure
                } else {
                    BlockKind::Paragraph
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                BlockKind::Heading(name[1..].parse().unwrap_or(2))
            }
            "figure" | "picture" | "img" => BlockKind::Figure,
            "ul" | "ol" => BlockKind::List,
            "blockquote" => BlockKind::Quote,
            "pre" => BlockKind::Preformatted,
            "hr" => BlockKind::Rule,
            _ if class_or_id_contains(node, "footnote") => BlockKind::Footnotes,
            _ if has_token(node, "poetry-stanza") => BlockKind::Stanza,
            _ if class_or_id_contains(node, "image-with-caption") => BlockKind::Figure,
            _ if is_image_only(node) => BlockKind::Figure,
            _ => BlockKind::Other,
        }
    }
}

/// Where a block came from: its article and its position in the parsed article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockOrigin {
    pub article: ArticleIndex,
    pub ordinal: usize,
}

/// One structural unit of article markup.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub kind: BlockKind,
    markup: String,
    text_len: usize,
    pub origin: Option<BlockOrigin>,
    /// 0 for a whole block or the first piece of a split one.
    pub part: u32,
}

impl ContentBlock {
    pub fn new(kind: BlockKind, markup: impl Into<String>, origin: Option<BlockOrigin>) -> Self {
        let markup = markup.into();
        let text_len = visible_text_len(&markup);
        Self {
            kind,
            markup,
            text_len,
            origin,
            part: 0,
        }
    }

    pub fn furniture(markup: impl Into<String>) -> Self {
        Self::new(BlockKind::Furniture, markup, None)
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn text_len(&self) -> usize {
        self.text_len
    }

    pub fn is_furniture(&self) -> bool {
        matches!(self.kind, BlockKind::Furniture)
    }

    pub fn word_count(&self) -> usize {
        self.inline().map(|text| text.word_count()).unwrap_or(0)
    }

    fn root(&self) -> Option<NodeRef> {
        let document = parse_fragment(&self.markup);
        body_of(&document)
            .children()
            .find(|child| child.as_element().is_some())
    }

    fn inline(&self) -> Option<InlineText> {
        self.root().map(|root| InlineText::from_element(&root))
    }

    /// Splits a paragraph after `words` words. Both halves keep the element's
    /// attributes; the tail carries `part + 1`. Returns `None` when either
    /// side would be empty or the block is not paragraph-like.
    pub fn split_at_word(&self, words: usize) -> Option<(ContentBlock, ContentBlock)> {
        if !self.kind.is_paragraph_like() || words == 0 {
            return None;
        }
        let root = self.root()?;
        let text = InlineText::from_element(&root);
        if words >= text.word_count() {
            return None;
        }
        let open = start_tag(&root)?;
        let name = tag_name(&root)?;
        let (head, tail) = text.split_at_word(words);
        let mut first = ContentBlock::new(self.kind, format!("{open}{head}</{name}>"), self.origin);
        first.part = self.part;
        let mut rest = ContentBlock::new(self.kind, format!("{open}{tail}</{name}>"), self.origin);
        rest.part = self.part + 1;
        Some((first, rest))
    }

    /// Keeps only the first `words` words of a paragraph.
    pub fn truncated(&self, words: usize) -> Option<ContentBlock> {
        self.split_at_word(words).map(|(head, _)| head)
    }
}

pub fn join_markup(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(block.markup());
    }
    out
}

fn visible_text_len(markup: &str) -> usize {
    let document = parse_fragment(markup);
    collapse_whitespace(&body_of(&document).text_contents())
        .chars()
        .count()
}

fn has_token(node: &NodeRef, class: &str) -> bool {
    attr(node, "class").is_some_and(|value| value.split_whitespace().any(|c| c == class))
}

fn is_image_only(node: &NodeRef) -> bool {
    let has_image = select_first(node, "img, picture, svg").is_some();
    has_image && node.text_contents().trim().is_empty()
}

fn is_caption(node: &NodeRef) -> bool {
    is_tag(node, &["figcaption"])
        || attr(node, "class").is_some_and(|class| class.to_ascii_lowercase().contains("caption"))
}

fn is_empty_block(node: &NodeRef) -> bool {
    node.text_contents().trim().is_empty()
        && select_first(
            node,
            "img, picture, svg, video, audio, iframe, embed, object, table, hr, li",
        )
        .is_none()
}

/// Splits sanitized article markup into blocks, tagging each with `article`.
///
/// Loose top-level text becomes a paragraph, empty wrappers are dropped, and an
/// image directly followed by its caption is kept together as one block.
pub fn parse_blocks(markup: &str, article: ArticleIndex) -> Vec<ContentBlock> {
    let document = parse_fragment(markup);
    let body = body_of(&document);
    let nodes: Vec<NodeRef> = body.children().collect();

    let mut blocks = Vec::new();
    let mut idx = 0;
    while idx < nodes.len() {
        let node = &nodes[idx];
        idx += 1;
        if let Some(text) = node.as_text() {
            let text = collapse_whitespace(&text.borrow());
            if !text.is_empty() {
                let origin = BlockOrigin {
                    article,
                    ordinal: blocks.len(),
                };
                blocks.push(ContentBlock::new(
                    BlockKind::Paragraph,
                    format!("<p>{}</p>", escape_text(&text)),
                    Some(origin),
                ));
            }
            continue;
        }
        if node.as_element().is_none() || is_empty_block(node) {
            continue;
        }

        let kind = BlockKind::from_node(node);
        let mut html = node.to_string();
        if kind == BlockKind::Figure && !is_tag(node, &["figure"]) {
            let next = nodes[idx..]
                .iter()
                .position(|n| n.as_element().is_some() || !n.text_contents().trim().is_empty());
            if let Some(offset) = next {
                let caption = &nodes[idx + offset];
                if is_caption(caption) {
                    if let Some(wrapper) =
                        element_from_html("<div class=\"image-with-caption-wrapper\"></div>")
                    {
                        wrapper.append(node.clone());
                        wrapper.append(caption.clone());
                        html = wrapper.to_string();
                        idx += offset + 1;
                    }
                }
            }
        }
        let origin = BlockOrigin {
            article,
            ordinal: blocks.len(),
        };
        blocks.push(ContentBlock::new(kind, html, Some(origin)));
    }
    blocks
}
