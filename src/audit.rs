use crate::allocate::AllocationSettings;
use crate::block::{ArticleIndex, ContentBlock, join_markup};
use crate::error::NewsprintError;
use crate::footnote::{ARTICLE_INDEX_ATTR, FOOTNOTE_NUMBER_ATTR, FOOTNOTE_REF_ATTR};
use crate::markup::{attr, parse_fragment, select_all};
use crate::measure::Measure;
use crate::page::Layout;
use crate::render::{continued_on, render_left_column};
use crate::types::Px;
use newsprint_audit::{AuditFinding, Verdict, hex_sha256};
use std::collections::{BTreeMap, BTreeSet};

pub const AUDIT_OVERFLOW_NONE: &str = "layout.overflow_none";
pub const AUDIT_SECTIONS_NONEMPTY: &str = "layout.sections_nonempty";
pub const AUDIT_PAGE_REFERENCES: &str = "layout.page_references_resolved";
pub const AUDIT_BLOCKS_CONSERVED: &str = "content.blocks_conserved";
pub const AUDIT_NUMBERING_CONTIGUOUS: &str = "footnotes.numbering_contiguous";
pub const AUDIT_DANGLING_PLAIN: &str = "footnotes.dangling_refs_plain";

#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub findings: Vec<AuditFinding>,
    /// sha256 of the edition markup the findings were computed on.
    pub layout_fingerprint: String,
}

impl AuditReport {
    pub fn verdict(&self, audit_id: &str) -> Option<Verdict> {
        newsprint_audit::worst_verdict(
            self.findings
                .iter()
                .filter(|finding| finding.audit_id == audit_id)
                .map(|finding| finding.verdict),
        )
    }

    pub fn score(&self, profile: &str) -> newsprint_audit::AuditScore {
        newsprint_audit::score(profile, &self.findings)
    }

    pub fn to_json(&self, profile: &str) -> serde_json::Value {
        newsprint_audit::report_json(profile, &self.findings, &self.layout_fingerprint)
    }
}

/// Checks a fitted layout against the invariants every edition must hold.
pub fn audit_layout(
    layout: &Layout,
    settings: &AllocationSettings,
    measure: &dyn Measure,
) -> AuditReport {
    let html = layout.to_html();
    let mut findings = Vec::new();
    findings.push(overflow_finding(layout, settings, measure));
    findings.push(sections_finding(layout));
    findings.push(page_reference_finding(layout));
    findings.push(conservation_finding(layout));
    if layout.is_finalized() {
        let footnotes = FootnoteScan::of(&html);
        findings.push(footnotes.numbering_finding());
        findings.push(footnotes.dangling_finding());
    } else {
        findings.push(AuditFinding::new(
            AUDIT_NUMBERING_CONTIGUOUS,
            Verdict::NotApplicable,
            "layout not finalized",
        ));
        findings.push(AuditFinding::new(
            AUDIT_DANGLING_PLAIN,
            Verdict::NotApplicable,
            "layout not finalized",
        ));
    }
    AuditReport {
        findings,
        layout_fingerprint: hex_sha256(html.as_bytes()),
    }
}

fn overflow_finding(
    layout: &Layout,
    settings: &AllocationSettings,
    measure: &dyn Measure,
) -> AuditFinding {
    match overflowing_slots(layout, settings, measure) {
        Ok(slots) if slots.is_empty() => {
            AuditFinding::new(AUDIT_OVERFLOW_NONE, Verdict::Pass, "every slot within capacity")
        }
        Ok(slots) => AuditFinding::new(
            AUDIT_OVERFLOW_NONE,
            Verdict::Fail,
            format!("over capacity: {}", slots.join(", ")),
        ),
        Err(err) => AuditFinding::new(
            AUDIT_OVERFLOW_NONE,
            Verdict::Warn,
            format!("measurement failed: {err}"),
        ),
    }
}

fn overflowing_slots(
    layout: &Layout,
    settings: &AllocationSettings,
    measure: &dyn Measure,
) -> Result<Vec<String>, NewsprintError> {
    let geometry = &settings.geometry;
    let tolerance = settings.safety_margin;
    let mut over = Vec::new();
    let mut check = |name: String, height: Px, capacity: Px| {
        if height > capacity + tolerance {
            over.push(format!("{name} ({height} > {capacity})"));
        }
    };

    // A lone block too large for its slot is placed anyway.
    let crowded = |blocks: &[ContentBlock]| blocks.iter().filter(|block| !block.is_furniture()).count() > 1;

    if let Some(column) = layout.front.featured.as_ref().filter(|column| crowded(&column.content)) {
        let mut markup = join_markup(&column.header);
        markup.push_str(&join_markup(&column.content));
        if column.continued {
            markup.push_str(&continued_on());
        }
        let height = measure.measure(&markup, geometry.right_width(), &settings.style)?;
        check("featured column".into(), height, geometry.front_height());
    }
    if !layout.front.teasers.is_empty() {
        let height = measure.measure(
            &render_left_column(&layout.front.teasers),
            geometry.left_width(),
            &settings.style,
        )?;
        check("teaser column".into(), height, geometry.front_height());
    }
    let flow = geometry.flow_capacity(settings.style);
    // Flow pages are accepted up to 105% before they are split.
    for page in layout.flow.iter().filter(|page| crowded(&page.blocks)) {
        let height = measure.measure(&join_markup(&page.blocks), flow.width, &flow.style)?;
        check(format!("page {}", page.number), height, flow.budget().percent(105));
    }
    Ok(over)
}

fn sections_finding(layout: &Layout) -> AuditFinding {
    let mut empty = Vec::new();
    for teaser in &layout.front.teasers {
        let has_source = layout
            .articles
            .get(teaser.article)
            .is_some_and(|article| !article.teaser.is_empty());
        if has_source && teaser.snippet.is_empty() {
            empty.push(format!("teaser {}", teaser.article));
        }
    }
    for page in &layout.flow {
        if page.blocks.is_empty() {
            empty.push(format!("page {}", page.number));
        }
    }
    if empty.is_empty() {
        AuditFinding::new(AUDIT_SECTIONS_NONEMPTY, Verdict::Pass, "no empty sections")
    } else {
        AuditFinding::new(
            AUDIT_SECTIONS_NONEMPTY,
            Verdict::Fail,
            format!("empty: {}", empty.join(", ")),
        )
    }
}

fn page_reference_finding(layout: &Layout) -> AuditFinding {
    if layout.front.teasers.is_empty() {
        return AuditFinding::new(AUDIT_PAGE_REFERENCES, Verdict::NotApplicable, "no teasers");
    }
    let wrong: Vec<String> = layout
        .front
        .teasers
        .iter()
        .filter_map(|teaser| match layout.flow_page_of(teaser.article) {
            Some(page) if page == teaser.see_page => None,
            Some(page) => Some(format!(
                "article {} says page {} but starts on {page}",
                teaser.article, teaser.see_page
            )),
            None => Some(format!("article {} is not on any flow page", teaser.article)),
        })
        .collect();
    if wrong.is_empty() {
        AuditFinding::new(AUDIT_PAGE_REFERENCES, Verdict::Pass, "all page references match")
    } else {
        AuditFinding::new(AUDIT_PAGE_REFERENCES, Verdict::Fail, wrong.join("; "))
    }
}

fn words_of(blocks: &[&ContentBlock]) -> Vec<String> {
    blocks
        .iter()
        .flat_map(|block| {
            parse_fragment(block.markup())
                .text_contents()
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Every article's placed text, split pieces rejoined, matches its source text.
fn conservation_finding(layout: &Layout) -> AuditFinding {
    let mut placed: BTreeMap<ArticleIndex, Vec<&ContentBlock>> = BTreeMap::new();
    for block in layout.placed_blocks() {
        if let Some(origin) = block.origin {
            placed.entry(origin.article).or_default().push(block);
        }
    }

    let mut problems = Vec::new();
    for article in &layout.articles {
        let source: Vec<&ContentBlock> = article.blocks.iter().collect();
        let placed = placed.remove(&article.index).unwrap_or_default();
        if words_of(&source) != words_of(&placed) {
            problems.push(format!(
                "article {}: {} source blocks, {} placed",
                article.index,
                source.len(),
                placed.len()
            ));
        }
    }
    for article in placed.keys() {
        problems.push(format!("blocks placed for unknown article {article}"));
    }

    if problems.is_empty() {
        AuditFinding::new(AUDIT_BLOCKS_CONSERVED, Verdict::Pass, "every block placed once")
    } else {
        AuditFinding::new(AUDIT_BLOCKS_CONSERVED, Verdict::Fail, problems.join("; "))
    }
}

/// Footnote numbers and references found in resolved markup, by article.
struct FootnoteScan {
    numbers: BTreeMap<Option<String>, Vec<u32>>,
    references: Vec<(Option<String>, u32)>,
    placeholders: usize,
}

impl FootnoteScan {
    fn of(html: &str) -> Self {
        let document = parse_fragment(html);
        let mut numbers: BTreeMap<Option<String>, Vec<u32>> = BTreeMap::new();
        for item in select_all(&document, "ol.footnotes-list > li") {
            if let Some(number) =
                attr(&item, FOOTNOTE_NUMBER_ATTR).and_then(|value| value.parse::<u32>().ok())
            {
                numbers
                    .entry(attr(&item, ARTICLE_INDEX_ATTR))
                    .or_default()
                    .push(number);
            }
        }
        let references = select_all(&document, "sup.footnote-ref")
            .iter()
            .filter_map(|sup| {
                let number = attr(sup, FOOTNOTE_REF_ATTR)?.parse::<u32>().ok()?;
                Some((attr(sup, ARTICLE_INDEX_ATTR), number))
            })
            .collect();
        let placeholders = select_all(&document, "span.footnote-reference").len();
        Self {
            numbers,
            references,
            placeholders,
        }
    }

    fn numbering_finding(&self) -> AuditFinding {
        if self.numbers.is_empty() {
            return AuditFinding::new(
                AUDIT_NUMBERING_CONTIGUOUS,
                Verdict::NotApplicable,
                "no footnotes",
            );
        }
        let broken: Vec<String> = self
            .numbers
            .iter()
            .filter(|(_, numbers)| {
                numbers
                    .iter()
                    .enumerate()
                    .any(|(position, number)| *number as usize != position + 1)
            })
            .map(|(article, numbers)| {
                format!(
                    "article {}: {numbers:?}",
                    article.as_deref().unwrap_or("unknown")
                )
            })
            .collect();
        if broken.is_empty() {
            AuditFinding::new(
                AUDIT_NUMBERING_CONTIGUOUS,
                Verdict::Pass,
                format!("{} articles numbered from 1", self.numbers.len()),
            )
        } else {
            AuditFinding::new(AUDIT_NUMBERING_CONTIGUOUS, Verdict::Fail, broken.join("; "))
        }
    }

    fn dangling_finding(&self) -> AuditFinding {
        if self.references.is_empty() && self.placeholders == 0 {
            return AuditFinding::new(AUDIT_DANGLING_PLAIN, Verdict::NotApplicable, "no references");
        }
        let union: BTreeSet<u32> = self.numbers.values().flatten().copied().collect();
        let styled_dangling = self
            .references
            .iter()
            .filter(|(article, number)| match article {
                Some(_) => !self
                    .numbers
                    .get(article)
                    .is_some_and(|numbers| numbers.contains(number)),
                None => !union.contains(number),
            })
            .count();
        if styled_dangling == 0 && self.placeholders == 0 {
            AuditFinding::new(
                AUDIT_DANGLING_PLAIN,
                Verdict::Pass,
                format!("{} references resolve", self.references.len()),
            )
        } else {
            AuditFinding::new(
                AUDIT_DANGLING_PLAIN,
                Verdict::Fail,
                format!(
                    "{styled_dangling} styled references without footnotes, {} unresolved placeholders",
                    self.placeholders
                ),
            )
        }
    }
}
