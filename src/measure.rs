use crate::error::NewsprintError;
use crate::markup::{attr, body_of, collapse_whitespace, is_tag, parse_fragment, select_first, tag_name};
use crate::types::Px;
use kuchiki::NodeRef;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Typography a fragment is measured under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleContext {
    pub font_size: Px,
    /// Line height as a multiple of the font size.
    pub line_height: f32,
    /// Space after each block-level element.
    pub block_spacing: Px,
    pub columns: u32,
    pub column_gap: Px,
}

impl Default for StyleContext {
    fn default() -> Self {
        Self {
            font_size: Px::from_f32(15.0),
            line_height: 1.45,
            block_spacing: Px::from_f32(10.0),
            columns: 1,
            column_gap: Px::from_f32(20.0),
        }
    }
}

impl StyleContext {
    pub fn with_columns(mut self, columns: u32, gap: Px) -> Self {
        self.columns = columns.max(1);
        self.column_gap = gap;
        self
    }

    pub fn line_px(&self) -> Px {
        self.font_size * self.line_height
    }

    /// Width of one column inside a container of `width`.
    pub fn column_width(&self, width: Px) -> Px {
        let columns = self.columns.max(1) as i32;
        if columns == 1 {
            return width;
        }
        ((width - self.column_gap * (columns - 1)) / columns).max(Px::from_i32(1))
    }
}

/// Height oracle for a markup fragment laid out at a given width.
pub trait Measure {
    fn measure(&self, fragment: &str, width: Px, style: &StyleContext) -> Result<Px, NewsprintError>;
}

impl<F> Measure for F
where
    F: Fn(&str, Px, &StyleContext) -> Px,
{
    fn measure(&self, fragment: &str, width: Px, style: &StyleContext) -> Result<Px, NewsprintError> {
        Ok(self(fragment, width, style))
    }
}

/// Counts every measurement it forwards.
pub struct CountingMeasure<'a> {
    inner: &'a dyn Measure,
    calls: AtomicUsize,
}

impl<'a> CountingMeasure<'a> {
    pub fn new(inner: &'a dyn Measure) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn reset(&self) -> usize {
        self.calls.swap(0, Ordering::Relaxed)
    }
}

impl Measure for CountingMeasure<'_> {
    fn measure(&self, fragment: &str, width: Px, style: &StyleContext) -> Result<Px, NewsprintError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.measure(fragment, width, style)
    }
}

impl std::fmt::Debug for CountingMeasure<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingMeasure")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct FaceMetrics {
    name: String,
    /// Advances in 1/1000 em for U+0020..=U+00FF.
    widths: Vec<u16>,
    missing_width: u16,
    /// ascent - descent + line gap in 1/1000 em.
    line_height_1000: i32,
    /// Advances for characters outside the table, filled on registration.
    extended: HashMap<char, u16>,
}

const FIRST_CHAR: u32 = 32;
const LAST_CHAR: u32 = 255;

impl FaceMetrics {
    fn from_face(face: &ttf_parser::Face<'_>, fallback_name: &str) -> Self {
        let units_per_em = face.units_per_em().max(1) as f32;
        let scale = 1000.0 / units_per_em;
        let advance = |ch: char| -> Option<u16> {
            face.glyph_index(ch)
                .and_then(|id| face.glyph_hor_advance(id))
                .map(|value| (value as f32 * scale).round() as u16)
        };
        let widths: Vec<u16> = (FIRST_CHAR..=LAST_CHAR)
            .map(|code| char::from_u32(code).and_then(advance).unwrap_or(0))
            .collect();
        let missing_width = advance(' ').unwrap_or(250);

        let mut extended = HashMap::new();
        for ch in ['\u{2013}', '\u{2014}', '\u{2018}', '\u{2019}', '\u{201c}', '\u{201d}', '\u{2026}'] {
            if let Some(width) = advance(ch) {
                extended.insert(ch, width);
            }
        }

        let ascent = (face.ascender() as f32 * scale) as i32;
        let descent = (face.descender() as f32 * scale) as i32;
        let line_gap = (face.line_gap() as f32 * scale) as i32;

        Self {
            name: face_name(face).unwrap_or_else(|| fallback_name.to_string()),
            widths,
            missing_width,
            line_height_1000: ascent - descent + line_gap,
            extended,
        }
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        if (FIRST_CHAR..=LAST_CHAR).contains(&code) {
            let width = self.widths[(code - FIRST_CHAR) as usize];
            if width > 0 {
                return width;
            }
        }
        self.extended.get(&ch).copied().unwrap_or(self.missing_width)
    }
}

fn face_name(face: &ttf_parser::Face<'_>) -> Option<String> {
    use ttf_parser::name::name_id;
    face.names()
        .into_iter()
        .filter(|name| name.name_id == name_id::FULL_NAME || name.name_id == name_id::FAMILY)
        .find_map(|name| name.to_string())
}

/// Deterministic layout estimator: wraps words against the column width using
/// font advances and stacks block heights the way a browser's normal flow would.
#[derive(Debug, Clone)]
pub struct TextMetricsMeasure {
    face: Option<FaceMetrics>,
    /// Advance used for every character when no face is registered, in em.
    average_advance: f32,
    default_image_height: Px,
}

impl Default for TextMetricsMeasure {
    fn default() -> Self {
        Self::new()
    }
}

impl TextMetricsMeasure {
    pub fn new() -> Self {
        Self {
            face: None,
            average_advance: 0.5,
            default_image_height: Px::from_i32(200),
        }
    }

    pub fn with_average_advance(mut self, em: f32) -> Self {
        self.average_advance = em.max(0.05);
        self
    }

    pub fn with_default_image_height(mut self, height: Px) -> Self {
        self.default_image_height = height;
        self
    }

    pub fn from_font_bytes(data: &[u8], source_name: &str) -> Result<Self, NewsprintError> {
        let face = ttf_parser::Face::parse(data, 0)
            .map_err(|err| NewsprintError::Measure(format!("invalid font data for {source_name}: {err}")))?;
        let mut measure = Self::new();
        measure.face = Some(FaceMetrics::from_face(&face, source_name));
        Ok(measure)
    }

    pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, NewsprintError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let source = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("font");
        Self::from_font_bytes(&data, source)
    }

    pub fn font_name(&self) -> Option<&str> {
        self.face.as_ref().map(|face| face.name.as_str())
    }

    pub fn text_width(&self, text: &str, font_size: Px) -> Px {
        match &self.face {
            Some(face) => {
                let units: i32 = text
                    .chars()
                    .map(|ch| face.advance_for_char(ch) as i32)
                    .fold(0i32, |acc, adv| acc.saturating_add(adv));
                if units <= 0 {
                    return Px::ZERO;
                }
                font_size.mul_ratio(units, 1000)
            }
            None => font_size * (self.average_advance * text.chars().count() as f32),
        }
    }

    fn line_height(&self, style: &StyleContext, scale: f32) -> Px {
        let font_size = style.font_size * scale;
        let css = font_size * style.line_height;
        match &self.face {
            Some(face) if face.line_height_1000 > 0 => {
                css.max(font_size.mul_ratio(face.line_height_1000, 1000))
            }
            _ => css,
        }
    }

    /// Number of lines `text` wraps to at `width`.
    pub fn line_count(&self, text: &str, width: Px, font_size: Px) -> usize {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return 0;
        }
        let width = width.max(Px::from_i32(1));
        let space = self.text_width(" ", font_size);
        let mut lines = 1usize;
        let mut used = Px::ZERO;
        for word in words {
            let word_width = self.text_width(word, font_size);
            if word_width > width {
                // Overlong words break across lines.
                if used > Px::ZERO {
                    lines += 1;
                }
                let mut remaining = word_width;
                while remaining > width {
                    lines += 1;
                    remaining -= width;
                }
                used = remaining;
                continue;
            }
            let needed = if used > Px::ZERO { used + space + word_width } else { word_width };
            if needed > width {
                lines += 1;
                used = word_width;
            } else {
                used = needed;
            }
        }
        lines
    }

    fn image_height(&self, node: &NodeRef, width: Px) -> Px {
        let declared_height = attr(node, "height").and_then(|value| parse_px(&value));
        let declared_width = attr(node, "width").and_then(|value| parse_px(&value));
        match (declared_width, declared_height) {
            (Some(w), Some(h)) if w > width && w > Px::ZERO => {
                Px::from_f32(h.to_f32() * width.to_f32() / w.to_f32())
            }
            (_, Some(h)) => h,
            _ => self.default_image_height,
        }
    }

    fn block_height(&self, node: &NodeRef, width: Px, style: &StyleContext) -> Px {
        if let Some(text) = node.as_text() {
            let text = collapse_whitespace(&text.borrow());
            if text.is_empty() {
                return Px::ZERO;
            }
            let lines = self.line_count(&text, width, style.font_size);
            return self.line_height(style, 1.0) * lines as i32 + style.block_spacing;
        }
        let Some(name) = tag_name(node) else {
            return Px::ZERO;
        };
        if is_hidden(node) {
            return Px::ZERO;
        }
        match name.as_str() {
            "script" | "style" | "template" | "noscript" | "meta" | "link" => Px::ZERO,
            "img" | "svg" | "video" | "iframe" => self.image_height(node, width) + style.block_spacing,
            "hr" => Px::from_i32(1) + style.block_spacing * 2,
            "br" => self.line_height(style, 1.0),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let scale = heading_scale(&name);
                let text = collapse_whitespace(&node.text_contents());
                let lines = self.line_count(&text, width, style.font_size * scale);
                self.line_height(style, scale) * lines as i32 + style.block_spacing
            }
            "ul" | "ol" => {
                let indent = style.font_size * 2;
                let inner = (width - indent).max(Px::from_i32(1));
                let items: Px = node
                    .children()
                    .filter(|child| child.as_element().is_some() || !child.text_contents().trim().is_empty())
                    .map(|child| self.flow_height(&child, inner, style, Px::from_i32(2)))
                    .sum();
                items + style.block_spacing
            }
            "blockquote" => {
                let indent = style.font_size * 2;
                self.flow_height(node, (width - indent).max(Px::from_i32(1)), style, style.block_spacing)
            }
            _ => self.flow_height(node, width, style, style.block_spacing),
        }
    }

    /// Height of an element that either holds inline content or block children.
    fn flow_height(&self, node: &NodeRef, width: Px, style: &StyleContext, spacing: Px) -> Px {
        if has_block_children(node) {
            return node
                .children()
                .map(|child| self.block_height(&child, width, style))
                .sum();
        }
        let text = collapse_whitespace(&node.text_contents());
        let media: Px = if select_first(node, "img, svg, video, iframe").is_some() {
            let mut total = Px::ZERO;
            for child in node.descendants() {
                if is_tag(&child, &["img", "svg", "video", "iframe"]) {
                    total += self.image_height(&child, width);
                }
            }
            total
        } else {
            Px::ZERO
        };
        if text.is_empty() && media == Px::ZERO {
            return Px::ZERO;
        }
        let lines = self.line_count(&text, width, style.font_size);
        media + self.line_height(style, 1.0) * lines as i32 + spacing
    }
}

impl Measure for TextMetricsMeasure {
    fn measure(&self, fragment: &str, width: Px, style: &StyleContext) -> Result<Px, NewsprintError> {
        if width <= Px::ZERO {
            return Err(NewsprintError::Measure(format!(
                "non-positive container width {width}"
            )));
        }
        let document = parse_fragment(fragment);
        let body = body_of(&document);
        let column_width = style.column_width(width);
        let total: Px = body
            .children()
            .map(|child| self.block_height(&child, column_width, style))
            .sum();
        if style.columns <= 1 || total == Px::ZERO {
            return Ok(total);
        }
        // Balanced columns lose up to one line per column break.
        let columns = style.columns as i32;
        Ok(total / columns + self.line_height(style, 1.0))
    }
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "figcaption", "figure",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "ul",
];

fn has_block_children(node: &NodeRef) -> bool {
    node.children().any(|child| is_tag(&child, BLOCK_TAGS))
}

fn heading_scale(name: &str) -> f32 {
    match name {
        "h1" => 2.0,
        "h2" => 1.5,
        "h3" => 1.25,
        "h4" => 1.1,
        _ => 1.0,
    }
}

fn is_hidden(node: &NodeRef) -> bool {
    if attr(node, "hidden").is_some() {
        return true;
    }
    attr(node, "style").is_some_and(|style| {
        let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        compact.to_ascii_lowercase().contains("display:none")
    })
}

fn parse_px(value: &str) -> Option<Px> {
    let trimmed = value.trim().trim_end_matches("px");
    trimmed
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Px::from_f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> StyleContext {
        StyleContext {
            font_size: Px::from_i32(10),
            line_height: 1.5,
            block_spacing: Px::from_i32(5),
            columns: 1,
            column_gap: Px::from_i32(20),
        }
    }

    #[test]
    fn closures_are_measures() {
        let fixed = |_: &str, _: Px, _: &StyleContext| Px::from_i32(42);
        let height = fixed
            .measure("<p>x</p>", Px::from_i32(100), &style())
            .expect("measure");
        assert_eq!(height, Px::from_i32(42));
    }

    #[test]
    fn average_advance_wraps_words() {
        let measure = TextMetricsMeasure::new();
        // 5px per char: "aaaa" is 20px, a space 5px.
        assert_eq!(measure.line_count("aaaa aaaa", Px::from_i32(45), Px::from_i32(10)), 1);
        assert_eq!(measure.line_count("aaaa aaaa", Px::from_i32(44), Px::from_i32(10)), 2);
        assert_eq!(measure.line_count("", Px::from_i32(44), Px::from_i32(10)), 0);
    }

    #[test]
    fn paragraph_height_is_lines_plus_spacing() {
        let measure = TextMetricsMeasure::new();
        let height = measure
            .measure("<p>aaaa aaaa</p><p>bbbb</p>", Px::from_i32(44), &style())
            .expect("measure");
        // Two lines and one line at 15px each, plus 5px after each paragraph.
        assert_eq!(height, Px::from_i32(55));
    }

    #[test]
    fn height_grows_with_words() {
        let measure = TextMetricsMeasure::new();
        let mut previous = Px::ZERO;
        let mut text = String::new();
        for _ in 0..40 {
            text.push_str("word ");
            let height = measure
                .measure(&format!("<p>{text}</p>"), Px::from_i32(120), &style())
                .expect("measure");
            assert!(height >= previous);
            previous = height;
        }
    }

    #[test]
    fn images_use_declared_height_scaled_to_width() {
        let measure = TextMetricsMeasure::new();
        let html = "<p><img src=\"a.png\" width=\"400\" height=\"200\"></p>";
        let height = measure.measure(html, Px::from_i32(200), &style()).expect("measure");
        assert_eq!(height, Px::from_i32(105));
        let plain = measure
            .measure("<img src=\"b.png\">", Px::from_i32(200), &style())
            .expect("measure");
        assert_eq!(plain, Px::from_i32(205));
    }

    #[test]
    fn headings_are_taller_than_body_text() {
        let measure = TextMetricsMeasure::new();
        let heading = measure.measure("<h2>Title</h2>", Px::from_i32(300), &style()).expect("h2");
        let body = measure.measure("<p>Title</p>", Px::from_i32(300), &style()).expect("p");
        assert!(heading > body);
    }

    #[test]
    fn columns_shorten_the_flow() {
        let measure = TextMetricsMeasure::new();
        let html = "<p>word word word word word word word word word word word word</p>".repeat(6);
        let one = measure.measure(&html, Px::from_i32(600), &style()).expect("one");
        let three = measure
            .measure(&html, Px::from_i32(600), &style().with_columns(3, Px::from_i32(20)))
            .expect("three");
        assert!(three < one);
    }

    #[test]
    fn hidden_nodes_take_no_space() {
        let measure = TextMetricsMeasure::new();
        let height = measure
            .measure("<div style=\"display: none\"><p>x</p></div>", Px::from_i32(100), &style())
            .expect("measure");
        assert_eq!(height, Px::ZERO);
    }

    #[test]
    fn counting_measure_counts_calls() {
        let one = |_: &str, _: Px, _: &StyleContext| Px::from_i32(1);
        let counting = CountingMeasure::new(&one);
        for _ in 0..3 {
            counting.measure("", Px::from_i32(1), &style()).expect("measure");
        }
        assert_eq!(counting.calls(), 3);
        assert_eq!(counting.reset(), 3);
        assert_eq!(counting.calls(), 0);
    }

    #[test]
    fn rejects_invalid_font_data() {
        let err = TextMetricsMeasure::from_font_bytes(b"not a font", "bogus").unwrap_err();
        assert!(matches!(err, NewsprintError::Measure(_)));
    }

    #[test]
    fn rejects_zero_width() {
        let measure = TextMetricsMeasure::new();
        assert!(measure.measure("<p>x</p>", Px::ZERO, &style()).is_err());
    }
}
