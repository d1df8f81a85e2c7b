use crate::article::Article;
use crate::block::{ContentBlock, join_markup};
use crate::debug::DebugLogger;
use crate::error::NewsprintError;
use crate::fit::{Capacity, FitPolicy, fit, fit_with_policy, largest_head, measure_blocks};
use crate::measure::{CountingMeasure, Measure, StyleContext};
use crate::metrics::{LayoutMetrics, PageMetrics};
use crate::page::{FlowPage, Layout, PageGeometry, Teaser};
use crate::render::{
    FIRST_FLOW_PAGE, featured_header, flow_stream, is_heading_furniture, render_left_column,
    see_page,
};
use crate::types::Px;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Tunables of one allocation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationSettings {
    pub geometry: PageGeometry,
    pub style: StyleContext,
    /// Kept free under the featured column for "Continued on Page 2".
    pub continued_reserve: Px,
    /// How far a finished slot may exceed its capacity before the audit flags it.
    pub safety_margin: Px,
    /// Overflow the featured column tolerates before it is fitted at all.
    pub featured_tolerance: Px,
    /// Space left under every teaser but the last while balancing.
    pub teaser_margin: Px,
    pub teaser_min_words: usize,
    pub trim_floor_words: usize,
    pub max_iterations: usize,
    pub max_pages: usize,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            geometry: PageGeometry::default(),
            style: StyleContext::default(),
            continued_reserve: Px::from_i32(45),
            safety_margin: Px::from_i32(30),
            featured_tolerance: Px::from_i32(10),
            teaser_margin: Px::from_i32(50),
            teaser_min_words: 30,
            trim_floor_words: 10,
            max_iterations: 1000,
            max_pages: 64,
        }
    }
}

/// Fits a skeleton layout's slots against measured capacity: the featured
/// column first, then the flow pages, then the teaser column.
///
/// A phase that fails keeps the skeleton's content for its slots and logs the
/// error; allocation itself never fails.
pub struct Allocator<'a> {
    settings: &'a AllocationSettings,
    measure: CountingMeasure<'a>,
    debug: Option<Arc<DebugLogger>>,
}

impl<'a> Allocator<'a> {
    pub fn new(settings: &'a AllocationSettings, measure: &'a dyn Measure) -> Self {
        Self {
            settings,
            measure: CountingMeasure::new(measure),
            debug: None,
        }
    }

    pub(crate) fn with_debug(mut self, debug: Option<Arc<DebugLogger>>) -> Self {
        self.debug = debug;
        self
    }

    fn trace(&self, kind: &str, fields: serde_json::Value) {
        if let Some(logger) = self.debug.as_deref() {
            logger.event(kind, fields);
        }
    }

    fn fallback(&self, metrics: &mut LayoutMetrics, phase: &str, err: &NewsprintError) {
        log::error!("{phase} fitting failed, keeping unfitted content: {err}");
        self.trace(
            "fit.fallback",
            json!({"phase": phase, "error": err.to_string()}),
        );
        metrics.fallbacks.push(phase.to_string());
    }

    pub fn allocate(&self, layout: &mut Layout) -> LayoutMetrics {
        let started = Instant::now();
        let mut metrics = LayoutMetrics::default();

        let featured = layout
            .front
            .featured
            .as_ref()
            .and_then(|column| layout.articles.get(column.article));
        let remainder = match featured.map(|article| self.fit_featured(article)) {
            Some(Ok((content, remainder))) => {
                if let Some(column) = layout.front.featured.as_mut() {
                    column.content = content;
                    column.continued = !remainder.is_empty();
                }
                remainder
            }
            Some(Err(err)) => {
                self.fallback(&mut metrics, "featured", &err);
                Vec::new()
            }
            None => Vec::new(),
        };

        let stream = flow_stream(remainder, &layout.articles);
        match self.paginate(stream.clone(), &mut metrics) {
            Ok(pages) => layout.flow = pages,
            Err(err) => {
                self.fallback(&mut metrics, "flow", &err);
                layout.flow = if stream.is_empty() {
                    Vec::new()
                } else {
                    vec![FlowPage {
                        number: FIRST_FLOW_PAGE,
                        blocks: stream,
                    }]
                };
            }
        }

        let see_pages: Vec<u32> = layout
            .front
            .teasers
            .iter()
            .map(|teaser| {
                layout
                    .flow_page_of(teaser.article)
                    .unwrap_or(FIRST_FLOW_PAGE)
            })
            .collect();
        for (teaser, page) in layout.front.teasers.iter_mut().zip(see_pages) {
            teaser.see_page = page;
        }

        let mut teasers = layout.front.teasers.clone();
        match self.balance_teasers(&mut teasers, &layout.articles, &mut metrics) {
            Ok(()) => layout.front.teasers = teasers,
            Err(err) => self.fallback(&mut metrics, "teasers", &err),
        }

        if let Err(err) = self.record_front_page(layout, &mut metrics) {
            log::warn!("front page metrics unavailable: {err}");
        }
        metrics.measure_calls = self.measure.calls();
        metrics.total_fit_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "allocated {} pages with {} measurements in {:.1}ms",
            layout.page_count(),
            metrics.measure_calls,
            metrics.total_fit_ms
        );
        metrics
    }

    /// Returns the featured column's content and the remainder that continues
    /// on the flow pages.
    fn fit_featured(
        &self,
        article: &Article,
    ) -> Result<(Vec<ContentBlock>, Vec<ContentBlock>), NewsprintError> {
        let settings = self.settings;
        let width = settings.geometry.right_width();
        let header = join_markup(&featured_header(article));
        let header_height = self.measure.measure(&header, width, &settings.style)?;
        let available = settings.geometry.front_height() - header_height;
        let blocks = article.blocks.clone();
        if available <= Px::ZERO {
            log::warn!(
                "featured header leaves no room ({header_height}); article {} moves to the flow",
                article.index
            );
            return Ok((Vec::new(), blocks));
        }

        let capacity = Capacity::new(available, width).with_style(settings.style);
        let total = measure_blocks(&blocks, &capacity, &self.measure)?;
        if total <= available + settings.featured_tolerance {
            return Ok((blocks, Vec::new()));
        }

        let result = fit(
            blocks,
            &capacity.with_reserve(settings.continued_reserve),
            &self.measure,
        )?;
        self.trace(
            "fit.featured",
            json!({
                "article": article.index,
                "fitted": result.fitted.len(),
                "carried": result.remainder.len(),
                "split": result.split,
                "oversized": result.oversized,
                "height": result.height.to_f32(),
                "capacity": available.to_f32(),
            }),
        );
        Ok((result.fitted, result.remainder))
    }

    /// Splits the flow stream across as many pages as it needs.
    fn paginate(
        &self,
        stream: Vec<ContentBlock>,
        metrics: &mut LayoutMetrics,
    ) -> Result<Vec<FlowPage>, NewsprintError> {
        if stream.is_empty() {
            return Ok(Vec::new());
        }
        let capacity = self
            .settings
            .geometry
            .flow_capacity(self.settings.style);
        let budget = capacity.budget();

        let page_start = Instant::now();
        let calls_before = self.measure.calls();
        let total = measure_blocks(&stream, &capacity, &self.measure)?;
        let overflows = total > budget.percent(105)
            || (stream.len() > 50 && total > budget.percent(80));
        if !overflows {
            metrics.pages.push(PageMetrics {
                page_number: FIRST_FLOW_PAGE,
                fit_ms: page_start.elapsed().as_secs_f64() * 1000.0,
                block_count: stream.len(),
                height: total.to_f32(),
                capacity: budget.to_f32(),
                measure_calls: self.measure.calls() - calls_before,
            });
            return Ok(vec![FlowPage {
                number: FIRST_FLOW_PAGE,
                blocks: stream,
            }]);
        }

        let log_page_break = |from_page: u32, reason: &str, carried: usize| {
            self.trace(
                "fit.page_break",
                json!({
                    "from_page": from_page,
                    "to_page": from_page + 1,
                    "reason": reason,
                    "carried": carried,
                }),
            );
        };

        let mut pages = Vec::new();
        let mut queue = stream;
        let mut number = FIRST_FLOW_PAGE;
        while !queue.is_empty() {
            let page_start = Instant::now();
            let calls_before = self.measure.calls();
            if pages.len() + 1 >= self.settings.max_pages {
                let stall = NewsprintError::Stall {
                    phase: "flow",
                    iterations: pages.len(),
                };
                log::warn!("{stall}; {} blocks stay on page {number}", queue.len());
                self.trace(
                    "fit.stall",
                    json!({"phase": "flow", "page": number, "blocks": queue.len()}),
                );
                pages.push(FlowPage {
                    number,
                    blocks: std::mem::take(&mut queue),
                });
                break;
            }

            let result = fit_with_policy(queue, &capacity, &self.measure, FitPolicy::flow())?;
            let height = result.height;
            let mut fitted = result.fitted;
            let mut remainder = result.remainder;
            if !remainder.is_empty() {
                let moved = move_orphaned_headings(&mut fitted, &mut remainder);
                let reason = if moved > 0 {
                    "orphaned_heading"
                } else {
                    "capacity"
                };
                log_page_break(number, reason, remainder.len());
            }
            metrics.pages.push(PageMetrics {
                page_number: number,
                fit_ms: page_start.elapsed().as_secs_f64() * 1000.0,
                block_count: fitted.len(),
                height: height.to_f32(),
                capacity: budget.to_f32(),
                measure_calls: self.measure.calls() - calls_before,
            });
            log::debug!("flow page {number}: {} blocks", fitted.len());
            pages.push(FlowPage {
                number,
                blocks: fitted,
            });
            queue = remainder;
            number += 1;
        }
        Ok(pages)
    }

    fn column_height(&self, teasers: &[Teaser], capacity: &Capacity) -> Result<Px, NewsprintError> {
        self.measure
            .measure(&render_left_column(teasers), capacity.width, &capacity.style)
    }

    /// Fills the teaser column round-robin, one paragraph per section per
    /// round, then trims back into capacity.
    fn balance_teasers(
        &self,
        teasers: &mut [Teaser],
        articles: &[Article],
        metrics: &mut LayoutMetrics,
    ) -> Result<(), NewsprintError> {
        if teasers.is_empty() {
            return Ok(());
        }
        let settings = self.settings;
        let capacity = settings.geometry.left_capacity(settings.style);
        let marker_height = self.measure.measure(
            &see_page(FIRST_FLOW_PAGE),
            capacity.width,
            &capacity.style,
        )?;
        let last = teasers.len() - 1;
        let limit_for = |section: usize| {
            let margin = if section == last {
                marker_height + Px::from_i32(10)
            } else {
                settings.teaser_margin
            };
            capacity.height - margin
        };

        let mut pending: Vec<VecDeque<ContentBlock>> = teasers
            .iter()
            .map(|teaser| {
                articles
                    .get(teaser.article)
                    .map(|article| article.teaser.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .collect();
        for teaser in teasers.iter_mut() {
            teaser.snippet.clear();
        }

        let mut done = vec![false; teasers.len()];
        let mut iterations = 0usize;
        let mut stalled_rounds = 0usize;
        'rounds: while done.iter().any(|finished| !finished) {
            let mut progressed = false;
            for section in 0..teasers.len() {
                if done[section] {
                    continue;
                }
                if iterations >= settings.max_iterations {
                    let stall = NewsprintError::Stall {
                        phase: "teasers",
                        iterations,
                    };
                    log::warn!("{stall}; keeping the teasers balanced so far");
                    self.trace(
                        "fit.stall",
                        json!({"phase": "teasers", "iterations": iterations}),
                    );
                    break 'rounds;
                }
                let Some(next) = pending[section].pop_front() else {
                    done[section] = true;
                    continue;
                };
                iterations += 1;
                let limit = limit_for(section);

                teasers[section].snippet.push(next);
                if self.column_height(teasers, &capacity)? <= limit {
                    progressed = true;
                    continue;
                }
                let Some(next) = teasers[section].snippet.pop() else {
                    continue;
                };
                let head = largest_head(&next, |head| {
                    teasers[section].snippet.push(head.clone());
                    let height = self.column_height(teasers, &capacity);
                    teasers[section].snippet.pop();
                    Ok(height? <= limit)
                })?;
                if let Some((head, _)) = head {
                    self.trace(
                        "fit.teaser_split",
                        json!({
                            "article": teasers[section].article,
                            "words": head.word_count(),
                            "of": next.word_count(),
                        }),
                    );
                    teasers[section].snippet.push(head);
                    progressed = true;
                }
                done[section] = true;
            }
            if progressed {
                stalled_rounds = 0;
            } else {
                stalled_rounds += 1;
                if stalled_rounds >= teasers.len() * 2 {
                    log::warn!("teaser balancing made no progress for {stalled_rounds} rounds");
                    break;
                }
            }
        }
        metrics.teaser_iterations = iterations;

        self.trim_teasers(teasers, &capacity, metrics)?;
        restore_minimum(teasers, articles, settings.teaser_min_words);
        fix_widows(teasers);
        Ok(())
    }

    /// Trims from the last section backward, whole paragraphs first and then
    /// words, until the column fits. A section keeps at least one paragraph of
    /// at least `trim_floor_words` words.
    fn trim_teasers(
        &self,
        teasers: &mut [Teaser],
        capacity: &Capacity,
        metrics: &mut LayoutMetrics,
    ) -> Result<(), NewsprintError> {
        let floor = self.settings.trim_floor_words;
        let fits = |teasers: &[Teaser]| -> Result<bool, NewsprintError> {
            Ok(self.column_height(teasers, capacity)? <= capacity.height)
        };
        if fits(teasers)? {
            return Ok(());
        }

        for section in (0..teasers.len()).rev() {
            while teasers[section].snippet.len() > 1 && !fits(teasers)? {
                teasers[section].snippet.pop();
                metrics.trimmed_paragraphs += 1;
                self.trace(
                    "fit.trim",
                    json!({"article": teasers[section].article, "unit": "paragraph"}),
                );
            }
            if fits(teasers)? {
                return Ok(());
            }

            let Some(only) = teasers[section].snippet.first().cloned() else {
                continue;
            };
            let words = only.word_count();
            if words > floor {
                let best = largest_head(&only, |head| {
                    teasers[section].snippet[0] = head.clone();
                    fits(teasers)
                })?;
                teasers[section].snippet[0] = only.clone();
                let keep = best
                    .map(|(head, _)| head.word_count())
                    .unwrap_or(0)
                    .max(floor);
                if let Some(shorter) = only.truncated(keep) {
                    teasers[section].snippet[0] = shorter;
                    metrics.trimmed_words += words - keep;
                    self.trace(
                        "fit.trim",
                        json!({
                            "article": teasers[section].article,
                            "unit": "words",
                            "kept": keep,
                            "of": words,
                        }),
                    );
                }
            }
            if fits(teasers)? {
                return Ok(());
            }
        }
        log::warn!("teaser column still overflows at minimum content");
        Ok(())
    }

    fn record_front_page(
        &self,
        layout: &Layout,
        metrics: &mut LayoutMetrics,
    ) -> Result<(), NewsprintError> {
        let Some(column) = layout.front.featured.as_ref() else {
            return Ok(());
        };
        let geometry = &self.settings.geometry;
        let calls_before = self.measure.calls();
        let mut blocks = column.header.clone();
        blocks.extend(column.content.iter().cloned());
        let height = self.measure.measure(
            &join_markup(&blocks),
            geometry.right_width(),
            &self.settings.style,
        )?;
        metrics.pages.insert(
            0,
            PageMetrics {
                page_number: 1,
                fit_ms: 0.0,
                block_count: column.content.len()
                    + layout
                        .front
                        .teasers
                        .iter()
                        .map(|teaser| teaser.snippet.len())
                        .sum::<usize>(),
                height: height.to_f32(),
                capacity: geometry.front_height().to_f32(),
                measure_calls: self.measure.calls() - calls_before,
            },
        );
        Ok(())
    }
}

/// Moves titles, bars and author lines stranded at the bottom of a page to
/// the top of the next one. A page of nothing but headings keeps them.
fn move_orphaned_headings(fitted: &mut Vec<ContentBlock>, remainder: &mut Vec<ContentBlock>) -> usize {
    if fitted.iter().all(is_heading_furniture) {
        return 0;
    }
    let mut moved = 0;
    while fitted.last().is_some_and(is_heading_furniture) {
        if let Some(block) = fitted.pop() {
            remainder.insert(0, block);
            moved += 1;
        }
    }
    moved
}

/// An empty section gets the opening words of its first paragraph back.
fn restore_minimum(teasers: &mut [Teaser], articles: &[Article], min_words: usize) {
    for teaser in teasers.iter_mut().filter(|teaser| teaser.snippet.is_empty()) {
        let Some(first) = articles
            .get(teaser.article)
            .and_then(|article| article.teaser.first())
        else {
            continue;
        };
        let snippet = first.truncated(min_words).unwrap_or_else(|| first.clone());
        log::debug!(
            "restored {} words to empty teaser for article {}",
            snippet.word_count(),
            teaser.article
        );
        teaser.snippet.push(snippet);
    }
}

/// Drops a trailing one-word paragraph.
fn fix_widows(teasers: &mut [Teaser]) {
    for teaser in teasers.iter_mut() {
        if teaser.snippet.len() > 1
            && teaser
                .snippet
                .last()
                .is_some_and(|block| block.word_count() == 1)
        {
            teaser.snippet.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticleSource, Publication, prepare_article};
    use crate::block::BlockKind;
    use crate::markup::word_count;
    use crate::page::Masthead;
    use crate::render::{flow_header, skeleton_layout};
    use crate::types::{Margins, Size};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    /// 10px per visible word, tags and attributes ignored.
    fn per_word(fragment: &str, _: Px, _: &StyleContext) -> Px {
        let text = fragment
            .split('<')
            .map(|chunk| chunk.split_once('>').map(|(_, rest)| rest).unwrap_or(chunk))
            .collect::<Vec<_>>()
            .join(" ");
        Px::from_i32(10 * word_count(&text) as i32)
    }

    struct FailingOn(&'static str);

    impl Measure for FailingOn {
        fn measure(&self, fragment: &str, width: Px, style: &StyleContext) -> Result<Px, NewsprintError> {
            if fragment.contains(self.0) {
                return Err(NewsprintError::Measure(format!("cannot measure {}", self.0)));
            }
            Ok(per_word(fragment, width, style))
        }
    }

    /// Front page 200px tall with two 200px columns; flow pages 300px.
    fn settings() -> AllocationSettings {
        AllocationSettings {
            geometry: PageGeometry {
                page_size: Size {
                    width: Px::from_i32(400),
                    height: Px::from_i32(300),
                },
                margins: Margins::all(0.0),
                masthead_height: Px::from_i32(100),
                page_number_height: Px::ZERO,
                column_gap: Px::ZERO,
                left_column_pct: 50,
                flow_columns: 3,
            },
            ..AllocationSettings::default()
        }
    }

    fn paragraphs(tag: &str, count: usize, words: usize) -> String {
        (1..=count)
            .map(|i| format!("<p>{}</p>", vec![format!("{tag}{i}"); words].join(" ")))
            .collect()
    }

    fn layout(bodies: &[(&str, String)]) -> Layout {
        let articles = bodies
            .iter()
            .enumerate()
            .map(|(index, (title, body))| prepare_article(&ArticleSource::new(*title, body.clone()), index))
            .collect();
        let masthead = Masthead::new(
            &Publication::default(),
            None,
            NaiveDate::from_ymd_opt(2025, 12, 27).expect("date"),
        );
        skeleton_layout(masthead, articles)
    }

    fn placed_words(layout: &Layout, article: usize) -> String {
        layout
            .placed_blocks()
            .filter(|block| block.origin.map(|o| o.article) == Some(article))
            .map(|block| {
                let text = crate::markup::parse_fragment(block.markup()).text_contents();
                crate::markup::collapse_whitespace(&text)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn source_words(layout: &Layout, article: usize) -> String {
        layout.articles[article]
            .blocks
            .iter()
            .map(|block| {
                let text = crate::markup::parse_fragment(block.markup()).text_contents();
                crate::markup::collapse_whitespace(&text)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn standard_layout() -> Layout {
        layout(&[
            ("Lead", paragraphs("a", 5, 5)),
            ("Second", paragraphs("b", 2, 5)),
            ("Third", paragraphs("c", 2, 5)),
        ])
    }

    #[test]
    fn featured_column_fits_with_continued_reserve() {
        let settings = settings();
        let mut layout = standard_layout();
        Allocator::new(&settings, &per_word).allocate(&mut layout);

        let column = layout.front.featured.as_ref().expect("featured");
        assert!(column.continued);
        // 190px under the header, 45px reserved: two paragraphs and four words.
        assert_eq!(column.content.len(), 3);
        assert_eq!(column.content[2].word_count(), 4);
        let first_flow = &layout.flow[0].blocks[0];
        assert_eq!(first_flow.word_count(), 1);
        assert_eq!(first_flow.part, 1);
    }

    #[test]
    fn short_featured_article_is_not_continued() {
        let settings = settings();
        let mut layout = layout(&[("Lead", paragraphs("a", 1, 5)), ("Second", paragraphs("b", 1, 5))]);
        Allocator::new(&settings, &per_word).allocate(&mut layout);
        let column = layout.front.featured.as_ref().expect("featured");
        assert!(!column.continued);
        assert_eq!(column.content.len(), 1);
        assert_eq!(layout.flow.len(), 1);
    }

    #[test]
    fn every_article_block_is_placed_once() {
        let settings = settings();
        let mut layout = standard_layout();
        Allocator::new(&settings, &per_word).allocate(&mut layout);
        for article in 0..3 {
            assert_eq!(placed_words(&layout, article), source_words(&layout, article));
        }
    }

    #[test]
    fn flow_overflow_creates_pages_and_updates_references() {
        let settings = settings();
        let mut layout = standard_layout();
        let metrics = Allocator::new(&settings, &per_word).allocate(&mut layout);

        assert_eq!(layout.flow.len(), 2);
        assert_eq!(
            layout.flow.iter().map(|page| page.number).collect::<Vec<_>>(),
            vec![2, 3]
        );
        let see: Vec<u32> = layout.front.teasers.iter().map(|t| t.see_page).collect();
        assert_eq!(see, vec![2, 2]);
        assert!(metrics.fallbacks.is_empty());
        assert_eq!(metrics.pages.first().map(|page| page.page_number), Some(1));
        assert!(metrics.measure_calls > 0);
        for page in metrics.pages.iter().filter(|page| page.page_number > 1) {
            assert!(page.height <= page.capacity * 1.05);
        }
    }

    #[test]
    fn long_article_spreads_over_pages_two_paragraphs_each() {
        let settings = settings();
        let mut layout = layout(&[("Lead", paragraphs("a", 1, 2)), ("Long", paragraphs("b", 10, 10))]);
        Allocator::new(&settings, &per_word).allocate(&mut layout);
        let counts: Vec<usize> = layout.flow.iter().map(|page| page.blocks.len()).collect();
        // Title and bar open page 2; 98% of 300px holds two 100px paragraphs.
        assert_eq!(counts, vec![4, 2, 2, 2, 2]);
        assert_eq!(layout.flow_page_of(1), Some(2));
        assert_eq!(placed_words(&layout, 1), source_words(&layout, 1));
    }

    #[test]
    fn teasers_take_turns_and_split_at_words() {
        let settings = settings();
        let mut layout = standard_layout();
        let metrics = Allocator::new(&settings, &per_word).allocate(&mut layout);

        let teasers = &layout.front.teasers;
        assert_eq!(teasers.len(), 2);
        assert_eq!(teasers[0].snippet.len(), 1);
        assert_eq!(teasers[0].snippet[0].word_count(), 5);
        assert_eq!(teasers[1].snippet.len(), 1);
        assert_eq!(teasers[1].snippet[0].word_count(), 3);
        assert_eq!(metrics.teaser_iterations, 3);
        let column = per_word(&render_left_column(teasers), Px::ZERO, &StyleContext::default());
        assert!(column <= settings.geometry.front_height());
    }

    #[test]
    fn trimming_removes_paragraphs_from_the_last_section_first() {
        let settings = settings();
        let layout = standard_layout();
        let allocator = Allocator::new(&settings, &per_word);
        let capacity = settings.geometry.left_capacity(settings.style);
        let mut teasers = layout.front.teasers.clone();
        teasers[0].snippet = crate::block::parse_blocks(&paragraphs("x", 2, 5), 1);
        teasers[1].snippet = crate::block::parse_blocks(&paragraphs("y", 2, 5), 2);
        let mut metrics = LayoutMetrics::default();
        allocator
            .trim_teasers(&mut teasers, &capacity, &mut metrics)
            .expect("trim");
        // 280px: the second section loses a paragraph, then the first does.
        assert_eq!(metrics.trimmed_paragraphs, 2);
        assert_eq!(teasers[0].snippet.len(), 1);
        assert_eq!(teasers[1].snippet.len(), 1);
    }

    #[test]
    fn trimming_respects_the_word_floor() {
        let settings = settings();
        let layout = standard_layout();
        let allocator = Allocator::new(&settings, &per_word);
        let capacity = settings.geometry.left_capacity(settings.style);
        let mut teasers = layout.front.teasers.clone();
        teasers[0].snippet = crate::block::parse_blocks(&paragraphs("x", 2, 5), 1);
        teasers[1].snippet = crate::block::parse_blocks(&paragraphs("y", 1, 20), 2);
        let mut metrics = LayoutMetrics::default();
        allocator
            .trim_teasers(&mut teasers, &capacity, &mut metrics)
            .expect("trim");
        assert_eq!(teasers[1].snippet[0].word_count(), settings.trim_floor_words);
        assert_eq!(metrics.trimmed_words, 10);
        assert_eq!(teasers[0].snippet.len(), 1);
    }

    #[test]
    fn empty_sections_get_minimum_content_back() {
        let layout = standard_layout();
        let mut teasers = layout.front.teasers.clone();
        teasers[1].snippet.clear();
        restore_minimum(&mut teasers, &layout.articles, 3);
        assert_eq!(teasers[1].snippet.len(), 1);
        assert_eq!(teasers[1].snippet[0].word_count(), 3);
        assert_eq!(teasers[0].snippet.len(), 2);
    }

    #[test]
    fn one_word_trailing_paragraph_is_dropped() {
        let layout = standard_layout();
        let mut teasers = layout.front.teasers.clone();
        teasers[0].snippet = crate::block::parse_blocks("<p>one two three</p><p>alone</p>", 1);
        teasers[1].snippet = crate::block::parse_blocks("<p>alone</p>", 2);
        fix_widows(&mut teasers);
        assert_eq!(teasers[0].snippet.len(), 1);
        assert_eq!(teasers[1].snippet.len(), 1);
    }

    #[test]
    fn orphaned_headings_move_to_the_next_page() {
        let layout = standard_layout();
        let header = flow_header(&layout.articles[1]);
        let body = ContentBlock::new(BlockKind::Paragraph, "<p>text</p>", None);
        let mut fitted = vec![body.clone()];
        fitted.extend(header.iter().cloned());
        let mut remainder = vec![body.clone()];
        assert_eq!(move_orphaned_headings(&mut fitted, &mut remainder), header.len());
        assert_eq!(fitted, vec![body.clone()]);
        assert_eq!(remainder.len(), header.len() + 1);
        assert!(is_heading_furniture(&remainder[0]));

        let mut headings_only = header.clone();
        assert_eq!(move_orphaned_headings(&mut headings_only, &mut remainder), 0);
    }

    #[test]
    fn failing_phase_keeps_unfitted_content() {
        let settings = settings();
        let mut layout = standard_layout();
        let skeleton_teasers = layout.front.teasers.clone();
        let measure = FailingOn("article-title-bar-front");
        let metrics = Allocator::new(&settings, &measure).allocate(&mut layout);

        assert_eq!(metrics.fallbacks, vec!["featured".to_string(), "teasers".to_string()]);
        let column = layout.front.featured.as_ref().expect("featured");
        assert_eq!(column.content, layout.articles[0].blocks);
        assert!(!column.continued);
        let snippets: Vec<_> = layout.front.teasers.iter().map(|t| t.snippet.clone()).collect();
        let expected: Vec<_> = skeleton_teasers.iter().map(|t| t.snippet.clone()).collect();
        assert_eq!(snippets, expected);
        assert!(!layout.flow.is_empty());
    }

    #[test]
    fn trace_records_fitting_decisions() {
        let settings = settings();
        let mut layout = standard_layout();
        let logger = Arc::new(DebugLogger::from_writer(std::io::sink()));
        Allocator::new(&settings, &per_word)
            .with_debug(Some(logger.clone()))
            .allocate(&mut layout);
        assert_eq!(logger.counter("fit.featured"), 1);
        assert_eq!(logger.counter("fit.page_break"), 1);
        assert_eq!(logger.counter("fit.teaser_split"), 1);
    }
}
