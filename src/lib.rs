mod allocate;
mod article;
mod audit;
mod block;
mod debug;
mod error;
mod feed;
mod fit;
mod footnote;
mod inline;
mod markup;
mod measure;
mod metrics;
mod page;
mod render;
mod sanitize;
mod types;
mod xref;

pub use allocate::{AllocationSettings, Allocator};
pub use article::{
    Article, ArticleSource, LeadImage, Publication, prepare_article, prepare_articles,
};
pub use audit::{
    AUDIT_BLOCKS_CONSERVED, AUDIT_DANGLING_PLAIN, AUDIT_NUMBERING_CONTIGUOUS, AUDIT_OVERFLOW_NONE,
    AUDIT_PAGE_REFERENCES, AUDIT_SECTIONS_NONEMPTY, AuditReport, audit_layout,
};
pub use block::{ArticleIndex, BlockKind, BlockOrigin, ContentBlock, join_markup, parse_blocks};
use chrono::NaiveDate;
use debug::DebugLogger;
pub use error::NewsprintError;
pub use feed::{Feed, MAX_ARTICLES, parse_date, parse_rss};
pub use fit::{
    AddResult, Capacity, FitPolicy, FitResult, Slot, fit, fit_with_policy, measure_blocks,
};
pub use footnote::{NormalizeReport, normalize, normalize_with_report};
pub use measure::{CountingMeasure, Measure, StyleContext, TextMetricsMeasure};
pub use metrics::{LayoutMetrics, PageMetrics};
pub use newsprint_audit::{AuditFinding, Verdict};
pub use page::{FeaturedColumn, FlowPage, FrontPage, Layout, Masthead, PageGeometry, Teaser};
pub use render::render_layout;
pub use sanitize::{SanitizeReport, sanitize, sanitize_with_report};
use std::path::PathBuf;
use std::sync::Arc;
pub use types::{Margins, Px, Size};
pub use xref::{ResolveReport, resolve};

/// Outcome of [`Newsprint::finalize_layout`].
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub metrics: LayoutMetrics,
    pub footnotes: ResolveReport,
}

/// Lays syndicated articles out as a print newspaper edition.
///
/// [`generate_layout`](Newsprint::generate_layout) builds the unfitted page
/// skeleton; [`finalize_layout`](Newsprint::finalize_layout) fits it against
/// a [`Measure`] and resolves footnotes.
pub struct Newsprint {
    settings: AllocationSettings,
    edition_date: Option<NaiveDate>,
    debug: Option<Arc<DebugLogger>>,
}

impl Newsprint {
    pub fn builder() -> NewsprintBuilder {
        NewsprintBuilder::new()
    }

    pub fn settings(&self) -> &AllocationSettings {
        &self.settings
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
    }

    /// Sanitizes and normalizes every source and renders the page skeleton.
    /// The first source is featured; the next two are teased on the front page.
    pub fn generate_layout(
        &self,
        publication: &Publication,
        sources: &[ArticleSource],
    ) -> Result<Layout, NewsprintError> {
        if sources.is_empty() {
            return Err(NewsprintError::EmptyArticleSet);
        }
        let articles = prepare_articles(sources);
        let earliest = sources.iter().filter_map(|source| source.published).min();
        let edition_date = self
            .edition_date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let masthead = Masthead::new(publication, earliest, edition_date);
        let layout = render::skeleton_layout(masthead, articles);
        log::info!(
            "generated skeleton for '{}': {} articles, {} pages",
            layout.masthead.title,
            layout.articles.len(),
            layout.page_count()
        );
        Ok(layout)
    }

    /// Fits every slot, then resolves footnotes across the rendered edition.
    /// Fitting failures fall back to the skeleton's content and are reported
    /// in [`LayoutMetrics::fallbacks`].
    pub fn finalize_layout(
        &self,
        layout: &mut Layout,
        measure: &dyn Measure,
    ) -> Result<FinalizeReport, NewsprintError> {
        if layout.articles.is_empty() {
            return Err(NewsprintError::EmptyArticleSet);
        }
        let metrics = Allocator::new(&self.settings, measure)
            .with_debug(self.debug.clone())
            .allocate(layout);
        let (html, footnotes) = resolve(&render_layout(layout));
        log::debug!(
            "resolved {} footnotes, {} references, {} dangling",
            footnotes.total_footnotes(),
            footnotes.superscripts,
            footnotes.dangling
        );
        layout.resolved = Some(html);
        layout.footnotes = Some(footnotes.clone());
        self.emit_debug_summary("finalize_layout");
        Ok(FinalizeReport { metrics, footnotes })
    }

    /// Parses an RSS document and lays out its first [`MAX_ARTICLES`] items.
    pub fn layout_feed(
        &self,
        xml: &str,
        measure: &dyn Measure,
    ) -> Result<(Layout, FinalizeReport), NewsprintError> {
        let feed = parse_rss(xml)?;
        let mut layout = self.generate_layout(&feed.publication, &feed.articles)?;
        let report = self.finalize_layout(&mut layout, measure)?;
        Ok((layout, report))
    }

    pub fn audit(&self, layout: &Layout, measure: &dyn Measure) -> AuditReport {
        audit_layout(layout, &self.settings, measure)
    }
}

#[derive(Debug, Clone)]
pub struct NewsprintBuilder {
    settings: AllocationSettings,
    edition_date: Option<NaiveDate>,
    debug_path: Option<PathBuf>,
}

impl NewsprintBuilder {
    pub fn new() -> Self {
        Self {
            settings: AllocationSettings::default(),
            edition_date: None,
            debug_path: None,
        }
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.settings.geometry.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.settings.geometry.margins = margins;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.settings.geometry.margins = Margins::all(value);
        self
    }

    pub fn masthead_height(mut self, height: Px) -> Self {
        self.settings.geometry.masthead_height = height;
        self
    }

    pub fn page_number_height(mut self, height: Px) -> Self {
        self.settings.geometry.page_number_height = height;
        self
    }

    pub fn column_gap(mut self, gap: Px) -> Self {
        self.settings.geometry.column_gap = gap;
        self
    }

    // Share of the front page's content width given to the teaser column.
    pub fn left_column_pct(mut self, pct: i32) -> Self {
        self.settings.geometry.left_column_pct = pct;
        self
    }

    pub fn flow_columns(mut self, columns: u32) -> Self {
        self.settings.geometry.flow_columns = columns;
        self
    }

    pub fn style(mut self, style: StyleContext) -> Self {
        self.settings.style = style;
        self
    }

    pub fn continued_reserve(mut self, reserve: Px) -> Self {
        self.settings.continued_reserve = reserve;
        self
    }

    pub fn safety_margin(mut self, margin: Px) -> Self {
        self.settings.safety_margin = margin;
        self
    }

    pub fn teaser_min_words(mut self, words: usize) -> Self {
        self.settings.teaser_min_words = words;
        self
    }

    pub fn trim_floor_words(mut self, words: usize) -> Self {
        self.settings.trim_floor_words = words;
        self
    }

    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.settings.max_iterations = iterations;
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.settings.max_pages = pages;
        self
    }

    // Date printed in the masthead. Defaults to today in local time.
    pub fn edition_date(mut self, date: NaiveDate) -> Self {
        self.edition_date = Some(date);
        self
    }

    // JSON-lines trace of every split, page break and trim.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Newsprint, NewsprintError> {
        validate_settings(&self.settings)?;
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        Ok(Newsprint {
            settings: self.settings,
            edition_date: self.edition_date,
            debug,
        })
    }
}

impl Default for NewsprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_settings(settings: &AllocationSettings) -> Result<(), NewsprintError> {
    let invalid = |message: &str| Err(NewsprintError::InvalidConfiguration(message.to_string()));
    let geometry = &settings.geometry;
    if geometry.page_size.width <= Px::ZERO || geometry.page_size.height <= Px::ZERO {
        return invalid("page size must be positive");
    }
    if geometry.flow_columns == 0 {
        return invalid("flow_columns must be >= 1");
    }
    if !(1..=99).contains(&geometry.left_column_pct) {
        return invalid("left_column_pct must be within 1..=99");
    }
    if geometry.right_width() <= Px::ZERO || geometry.content_width() <= Px::ZERO {
        return invalid("margins and column gap leave no room for columns");
    }
    if geometry.front_height() <= settings.continued_reserve {
        return invalid("masthead and margins leave no room on the front page");
    }
    if geometry.flow_height() <= Px::ZERO {
        return invalid("margins leave no room on flow pages");
    }
    let style = &settings.style;
    if style.font_size <= Px::ZERO || !style.line_height.is_finite() || style.line_height <= 0.0 {
        return invalid("font size and line height must be positive");
    }
    if settings.max_iterations == 0 || settings.max_pages == 0 {
        return invalid("iteration and page caps must be >= 1");
    }
    Ok(())
}
