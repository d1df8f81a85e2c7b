use crate::article::{Article, lead_image_markup};
use crate::block::{ArticleIndex, ContentBlock, join_markup};
use crate::markup::escape_text;
use crate::page::{FeaturedColumn, FlowPage, FrontPage, Layout, Masthead, Teaser};

/// First page after the front page.
pub(crate) const FIRST_FLOW_PAGE: u32 = 2;
/// Secondary articles teased on the front page.
const TEASER_SLOTS: usize = 2;
/// Paragraphs each teaser shows before fitting.
const INITIAL_TEASER_PARAGRAPHS: usize = 2;

const TITLE_OPEN: &str = "<h2 class=\"article-title\"";

fn title_block(article: &Article) -> ContentBlock {
    ContentBlock::furniture(format!(
        "{TITLE_OPEN} data-article-index=\"{}\">{}</h2>",
        article.index,
        escape_text(&article.title)
    ))
}

fn author_block(article: &Article) -> Option<ContentBlock> {
    article.author_line().map(|line| {
        ContentBlock::furniture(format!(
            "<div class=\"article-author\">{}</div>",
            escape_text(&line)
        ))
    })
}

fn subtitle_block(article: &Article) -> Option<ContentBlock> {
    article.subtitle.as_ref().map(|subtitle| {
        ContentBlock::furniture(format!(
            "<div class=\"article-subtitle\">{}</div>",
            escape_text(subtitle)
        ))
    })
}

/// True for the flow or front title block of `article`.
pub(crate) fn is_title_of(block: &ContentBlock, article: ArticleIndex) -> bool {
    block.is_furniture()
        && block.markup().starts_with(TITLE_OPEN)
        && block
            .markup()
            .contains(&format!("data-article-index=\"{article}\""))
}

pub(crate) fn is_heading_furniture(block: &ContentBlock) -> bool {
    block.is_furniture()
        && (block.markup().starts_with(TITLE_OPEN)
            || block.markup().starts_with("<div class=\"article-title-bar")
            || block.markup().starts_with("<div class=\"article-author\"")
            || block.markup().starts_with("<div class=\"article-subtitle\""))
}

/// Lead image, title, bar, author line and subtitle of the featured article.
pub(crate) fn featured_header(article: &Article) -> Vec<ContentBlock> {
    let mut header = Vec::new();
    if let Some(image) = &article.lead_image {
        header.push(ContentBlock::furniture(lead_image_markup(
            image,
            &article.title,
            "featured-image",
        )));
    }
    header.push(title_block(article));
    header.push(ContentBlock::furniture(
        "<div class=\"article-title-bar-front\"></div>",
    ));
    header.extend(author_block(article));
    header.extend(subtitle_block(article));
    header
}

pub(crate) fn teaser_header(article: &Article) -> Vec<ContentBlock> {
    let mut header = vec![
        title_block(article),
        ContentBlock::furniture("<div class=\"article-title-bar-front\"></div>"),
    ];
    header.extend(author_block(article));
    if let Some(image) = &article.lead_image {
        header.push(ContentBlock::furniture(lead_image_markup(
            image,
            &article.title,
            "article-image",
        )));
    }
    header
}

/// Title, bar and author line opening an article on the flow pages.
pub(crate) fn flow_header(article: &Article) -> Vec<ContentBlock> {
    let mut header = vec![
        title_block(article),
        ContentBlock::furniture("<div class=\"article-title-bar\"></div>"),
    ];
    header.extend(author_block(article));
    header
}

fn continued_marker(text: &str) -> String {
    format!("<div class=\"article-continued\">{}</div>", escape_text(text))
}

/// Closing marker of a featured column that continues on the flow pages.
pub(crate) fn continued_on() -> String {
    continued_marker(&format!("Continued on Page {FIRST_FLOW_PAGE}"))
}

pub(crate) fn see_page(page: u32) -> String {
    continued_marker(&format!("See Page {page}"))
}

pub(crate) fn render_masthead(masthead: &Masthead) -> String {
    format!(
        "<div class=\"newsletter-masthead\">\
         <div class=\"masthead-title\">{}</div>\
         <div class=\"masthead-tagline\">{}</div>\
         <div class=\"masthead-divider\"></div>\
         <div class=\"masthead-info-row\"><span class=\"date\">{}</span>\
         <span class=\"established\">EST. {}</span></div>\
         <div class=\"masthead-divider\"></div></div>",
        escape_text(&masthead.title),
        escape_text(&masthead.tagline),
        masthead.header_date(),
        masthead.established_year
    )
}

pub(crate) fn render_teaser(teaser: &Teaser) -> String {
    format!(
        "<div class=\"article-section\" data-article-index=\"{}\">{}<div class=\"article-snippet\">{}</div>{}</div>",
        teaser.article,
        join_markup(&teaser.header),
        join_markup(&teaser.snippet),
        see_page(teaser.see_page)
    )
}

pub(crate) fn render_left_column(teasers: &[Teaser]) -> String {
    let mut out = String::from("<div class=\"article-col-left\">");
    for teaser in teasers {
        out.push_str(&render_teaser(teaser));
    }
    out.push_str("</div>");
    out
}

pub(crate) fn render_featured(column: &FeaturedColumn) -> String {
    let mut out = format!(
        "<div class=\"article-col-right\" data-article-index=\"{}\">{}<div class=\"article-content-right\">{}</div>",
        column.article,
        join_markup(&column.header),
        join_markup(&column.content)
    );
    if column.continued {
        out.push_str(&continued_on());
    }
    out.push_str("</div>");
    out
}

pub(crate) fn render_front_page(layout: &Layout) -> String {
    let mut out = String::from("<div class=\"newsletter-page front-page\" data-page=\"1\">");
    out.push_str(&render_masthead(&layout.masthead));
    out.push_str("<div class=\"newsletter-content\"><div class=\"article-featured\"><div class=\"article-columns\">");
    out.push_str(&render_left_column(&layout.front.teasers));
    if let Some(featured) = &layout.front.featured {
        out.push_str(&render_featured(featured));
    }
    out.push_str("</div></div></div></div>");
    out
}

pub(crate) fn render_flow_page(page: &FlowPage) -> String {
    format!(
        "<div class=\"newsletter-page\" data-page=\"{n}\"><div class=\"newsletter-content\">\
         <div class=\"article-columns-three-css\">{}</div></div>\
         <div class=\"page-number\">Page {n}</div></div>",
        join_markup(&page.blocks),
        n = page.number
    )
}

/// Continuous flow content: the featured article's remainder, then every
/// later article in full behind its own header.
pub(crate) fn flow_stream(remainder: Vec<ContentBlock>, articles: &[Article]) -> Vec<ContentBlock> {
    let mut stream = remainder;
    for article in articles.iter().filter(|article| !article.featured) {
        stream.extend(flow_header(article));
        stream.extend(article.blocks.iter().cloned());
    }
    stream
}

/// Unfitted edition: the featured article whole on the front page, two
/// paragraphs per teaser, and one flow page holding everything else.
pub(crate) fn skeleton_layout(masthead: Masthead, articles: Vec<Article>) -> Layout {
    let featured = articles
        .iter()
        .find(|article| article.featured)
        .map(|article| FeaturedColumn {
            article: article.index,
            header: featured_header(article),
            content: article.blocks.clone(),
            continued: false,
        });
    let teasers = articles
        .iter()
        .filter(|article| !article.featured)
        .take(TEASER_SLOTS)
        .zip(FIRST_FLOW_PAGE..)
        .map(|(article, page)| Teaser {
            article: article.index,
            header: teaser_header(article),
            snippet: article
                .teaser
                .iter()
                .take(INITIAL_TEASER_PARAGRAPHS)
                .cloned()
                .collect(),
            see_page: page,
        })
        .collect();
    let stream = flow_stream(Vec::new(), &articles);
    let flow = if stream.is_empty() {
        Vec::new()
    } else {
        vec![FlowPage {
            number: FIRST_FLOW_PAGE,
            blocks: stream,
        }]
    };
    Layout {
        masthead,
        articles,
        front: FrontPage { featured, teasers },
        flow,
        resolved: None,
        footnotes: None,
    }
}

/// The whole edition as one markup document.
pub fn render_layout(layout: &Layout) -> String {
    let mut out = String::from("<div class=\"newsprint-edition\">");
    out.push_str(&render_front_page(layout));
    for page in &layout.flow {
        out.push_str(&render_flow_page(page));
    }
    out.push_str("</div>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticleSource, prepare_article};
    use crate::article::Publication;
    use chrono::NaiveDate;

    fn article(index: usize) -> Article {
        let mut source = ArticleSource::new(format!("Title <{index}>"), "<p>Body text</p>");
        source.author = Some("Ada".into());
        prepare_article(&source, index)
    }

    #[test]
    fn titles_are_escaped_and_tagged() {
        let header = flow_header(&article(1));
        assert_eq!(
            header[0].markup(),
            "<h2 class=\"article-title\" data-article-index=\"1\">Title &lt;1&gt;</h2>"
        );
        assert!(is_title_of(&header[0], 1));
        assert!(!is_title_of(&header[0], 2));
        assert!(header.iter().all(is_heading_furniture));
        assert_eq!(header[2].markup(), "<div class=\"article-author\">by Ada</div>");
    }

    #[test]
    fn flow_pages_carry_page_numbers() {
        let page = FlowPage {
            number: 3,
            blocks: vec![ContentBlock::furniture("<p>x</p>")],
        };
        let html = render_flow_page(&page);
        assert!(html.contains("<div class=\"page-number\">Page 3</div>"));
        assert!(html.contains("<div class=\"article-columns-three-css\"><p>x</p></div>"));
    }

    #[test]
    fn skeleton_flows_every_secondary_article() {
        let articles = vec![article(0), article(1), article(2), article(3)];
        let masthead = Masthead::new(
            &Publication::default(),
            None,
            NaiveDate::from_ymd_opt(2025, 12, 27).expect("date"),
        );
        let layout = skeleton_layout(masthead, articles);
        let featured = layout.front.featured.as_ref().expect("featured");
        assert_eq!(featured.article, 0);
        assert!(!featured.continued);
        let teased: Vec<(usize, u32)> = layout
            .front
            .teasers
            .iter()
            .map(|t| (t.article, t.see_page))
            .collect();
        assert_eq!(teased, vec![(1, 2), (2, 3)]);
        assert_eq!(layout.flow.len(), 1);
        for index in 1..4 {
            assert_eq!(layout.flow_page_of(index), Some(2));
        }
        assert_eq!(layout.flow_page_of(0), None);
    }

    #[test]
    fn front_page_has_masthead_and_markers() {
        let first = article(0);
        let second = article(1);
        let layout = Layout {
            masthead: Masthead {
                title: "The Weekly".into(),
                tagline: "News".into(),
                edition_date: NaiveDate::from_ymd_opt(2025, 12, 27).expect("date"),
                established_year: 2020,
            },
            front: FrontPage {
                featured: Some(FeaturedColumn {
                    article: 0,
                    header: featured_header(&first),
                    content: first.blocks.clone(),
                    continued: true,
                }),
                teasers: vec![Teaser {
                    article: 1,
                    header: teaser_header(&second),
                    snippet: second.teaser.clone(),
                    see_page: 2,
                }],
            },
            articles: vec![first, second],
            flow: Vec::new(),
            resolved: None,
            footnotes: None,
        };
        let html = render_layout(&layout);
        assert!(html.contains("SATURDAY, DECEMBER 27, 2025"));
        assert!(html.contains("EST. 2020"));
        assert!(html.contains("<div class=\"article-continued\">See Page 2</div>"));
        assert!(html.contains("<div class=\"article-continued\">Continued on Page 2</div>"));
        assert!(html.contains("<div class=\"article-section\" data-article-index=\"1\">"));
    }
}
