use crate::article::{Article, Publication};
use crate::block::{ArticleIndex, ContentBlock};
use crate::fit::Capacity;
use crate::measure::StyleContext;
use crate::types::{Margins, Px, Size};
use crate::xref::ResolveReport;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};

/// Physical layout of an edition: page box, masthead and column split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_size: Size,
    pub margins: Margins,
    pub masthead_height: Px,
    pub page_number_height: Px,
    pub column_gap: Px,
    /// Share of the front page's content width given to the teaser column.
    pub left_column_pct: i32,
    pub flow_columns: u32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            page_size: Size::letter(),
            margins: Margins::all(48.0),
            masthead_height: Px::from_i32(230),
            page_number_height: Px::from_i32(30),
            column_gap: Px::from_i32(24),
            left_column_pct: 38,
            flow_columns: 3,
        }
    }
}

impl PageGeometry {
    pub fn content_width(&self) -> Px {
        (self.page_size.width - self.margins.horizontal()).max(Px::ZERO)
    }

    /// Height below the masthead on the front page.
    pub fn front_height(&self) -> Px {
        (self.page_size.height - self.margins.vertical() - self.masthead_height).max(Px::ZERO)
    }

    /// Height of a flow page's column area, above the page number.
    pub fn flow_height(&self) -> Px {
        (self.page_size.height - self.margins.vertical() - self.page_number_height).max(Px::ZERO)
    }

    pub fn left_width(&self) -> Px {
        self.content_width().percent(self.left_column_pct)
    }

    pub fn right_width(&self) -> Px {
        (self.content_width() - self.left_width() - self.column_gap).max(Px::ZERO)
    }

    pub fn left_capacity(&self, style: StyleContext) -> Capacity {
        Capacity::new(self.front_height(), self.left_width()).with_style(style)
    }

    pub fn flow_capacity(&self, style: StyleContext) -> Capacity {
        Capacity::new(self.flow_height(), self.content_width())
            .with_style(style.with_columns(self.flow_columns, self.column_gap))
    }
}

/// Masthead text for the front page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masthead {
    pub title: String,
    pub tagline: String,
    pub edition_date: NaiveDate,
    pub established_year: i32,
}

impl Masthead {
    /// The established year comes from the publication, then the earliest
    /// article date, then the edition itself.
    pub fn new(
        publication: &Publication,
        earliest_article: Option<DateTime<FixedOffset>>,
        edition_date: NaiveDate,
    ) -> Self {
        let established_year = publication
            .established
            .or(earliest_article)
            .map(|date| date.year())
            .unwrap_or_else(|| edition_date.year());
        let title = publication.title.trim();
        Self {
            title: if title.is_empty() {
                "SUBSCRIPTION".to_string()
            } else {
                title.to_string()
            },
            tagline: publication.description.trim().to_string(),
            edition_date,
            established_year,
        }
    }

    /// `SATURDAY, DECEMBER 27, 2025`
    pub fn header_date(&self) -> String {
        self.edition_date
            .format("%A, %B %-d, %Y")
            .to_string()
            .to_uppercase()
    }
}

/// Right half of the front page: the featured article's opening.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturedColumn {
    pub article: ArticleIndex,
    /// Image, title, bar and author line.
    pub header: Vec<ContentBlock>,
    pub content: Vec<ContentBlock>,
    /// Whether the article continues on the flow pages.
    pub continued: bool,
}

/// A secondary article's excerpt in the front page's left column.
#[derive(Debug, Clone, PartialEq)]
pub struct Teaser {
    pub article: ArticleIndex,
    pub header: Vec<ContentBlock>,
    pub snippet: Vec<ContentBlock>,
    pub see_page: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontPage {
    pub featured: Option<FeaturedColumn>,
    pub teasers: Vec<Teaser>,
}

/// A secondary page holding one slice of the continuous flow stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPage {
    /// 1-based page number in the edition; the front page is 1.
    pub number: u32,
    pub blocks: Vec<ContentBlock>,
}

/// A complete edition: the page model plus, once finalized, its markup with
/// footnotes resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub masthead: Masthead,
    pub articles: Vec<Article>,
    pub front: FrontPage,
    pub flow: Vec<FlowPage>,
    pub(crate) resolved: Option<String>,
    pub(crate) footnotes: Option<ResolveReport>,
}

impl Layout {
    pub fn page_count(&self) -> usize {
        1 + self.flow.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn footnotes(&self) -> Option<&ResolveReport> {
        self.footnotes.as_ref()
    }

    /// Page on which `article`'s title appears in the flow, if it does.
    pub fn flow_page_of(&self, article: ArticleIndex) -> Option<u32> {
        self.flow.iter().find_map(|page| {
            page.blocks
                .iter()
                .any(|block| crate::render::is_title_of(block, article))
                .then_some(page.number)
        })
    }

    /// Every placed article block, front page first, in reading order.
    /// Teaser excerpts are not included.
    pub fn placed_blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.front
            .featured
            .iter()
            .flat_map(|column| column.content.iter())
            .chain(self.flow.iter().flat_map(|page| page.blocks.iter()))
            .filter(|block| !block.is_furniture())
    }

    pub fn to_html(&self) -> String {
        match &self.resolved {
            Some(html) => html.clone(),
            None => crate::render::render_layout(self),
        }
    }
}
