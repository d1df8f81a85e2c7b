use chrono::NaiveDate;
use newsprint::{
    AUDIT_BLOCKS_CONSERVED, AUDIT_DANGLING_PLAIN, AUDIT_NUMBERING_CONTIGUOUS, AUDIT_OVERFLOW_NONE,
    AUDIT_PAGE_REFERENCES, AUDIT_SECTIONS_NONEMPTY, Capacity, ContentBlock, Newsprint,
    NewsprintError, Px, StyleContext, TextMetricsMeasure, Verdict, fit, join_markup, normalize,
    parse_blocks, resolve,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn visible_words(markup: &str) -> usize {
    markup
        .split('<')
        .map(|chunk| chunk.split_once('>').map(|(_, rest)| rest).unwrap_or(chunk))
        .flat_map(str::split_whitespace)
        .count()
}

/// 2px per visible word.
fn linear(fragment: &str, _: Px, _: &StyleContext) -> Px {
    Px::from_i32(2 * visible_words(fragment) as i32)
}

fn texts(blocks: &[ContentBlock]) -> Vec<String> {
    blocks.iter().map(|block| block.markup().to_string()).collect()
}

fn list_items(html: &str) -> Vec<String> {
    html.split("<li")
        .skip(1)
        .filter_map(|chunk| chunk.split_once('>'))
        .filter_map(|(_, rest)| rest.split_once("</li>"))
        .map(|(text, _)| text.to_string())
        .collect()
}

#[test]
fn five_paragraphs_with_room_for_two() {
    let blocks = parse_blocks(
        "<p>one one</p><p>two two</p><p>three three</p><p>four four</p><p>five five</p>",
        0,
    );
    // Two paragraphs of two words measure 8px.
    let capacity = Capacity::new(Px::from_i32(8), Px::from_i32(300));
    let result = fit(blocks, &capacity, &linear).expect("fit");
    assert_eq!(texts(&result.fitted), vec!["<p>one one</p>", "<p>two two</p>"]);
    assert_eq!(
        texts(&result.remainder),
        vec!["<p>three three</p>", "<p>four four</p>", "<p>five five</p>"]
    );
    assert!(!result.is_complete());
}

#[test]
fn oversized_paragraph_is_still_placed() {
    let words = vec!["long"; 200].join(" ");
    let blocks = parse_blocks(&format!("<p>{words}</p><p>after</p>"), 0);
    // Not even one word (2px) fits, so no split is possible.
    let capacity = Capacity::new(Px::from_i32(1), Px::from_i32(300));
    let result = fit(blocks, &capacity, &linear).expect("fit");
    assert_eq!(result.fitted.len(), 1);
    assert_eq!(result.fitted[0].word_count(), 200);
    assert!(result.oversized);
    assert!(!result.split);
    assert_eq!(texts(&result.remainder), vec!["<p>after</p>"]);
}

#[test]
fn fitted_height_never_exceeds_capacity() {
    let html: String = (1..=12)
        .map(|i| format!("<p>{}</p>", vec![format!("w{i}"); i * 3].join(" ")))
        .collect();
    let blocks = parse_blocks(&html, 0);
    for height in (10..=400).step_by(7) {
        let capacity = Capacity::new(Px::from_i32(height), Px::from_i32(300));
        let result = fit(blocks.clone(), &capacity, &linear).expect("fit");
        if !result.oversized {
            let joined = join_markup(&result.fitted);
            let measured = linear(&joined, Px::ZERO, &StyleContext::default());
            assert!(measured <= capacity.budget(), "{measured} > {height}px");
        }
        let placed: usize = result
            .fitted
            .iter()
            .chain(result.remainder.iter())
            .map(|block| block.word_count())
            .sum();
        assert_eq!(placed, blocks.iter().map(|block| block.word_count()).sum::<usize>());
    }
}

#[test]
fn stray_numbers_become_a_sequence() {
    let html = "<div class=\"footnotes\" data-article-index=\"0\"><ol>\
                <li>Some note</li><li>2. Another</li><li>Third</li></ol></div>";
    let (out, report) = resolve(html);
    assert_eq!(list_items(&out), vec!["1. Some note", "2. Another", "3. Third"]);
    assert_eq!(report.total_footnotes(), 3);
}

#[test]
fn only_discovered_footnotes_become_superscripts() {
    let body = "<p>See<a class=\"footnote-anchor\" href=\"#footnote-1\">1</a> \
                and<a class=\"footnote-anchor\" href=\"#footnote-2\">2</a> \
                but<a class=\"footnote-anchor\" href=\"#footnote-4\">4</a>.</p>\
                <div class=\"footnote\"><ol><li>First</li><li>Second</li></ol></div>";
    let (out, report) = resolve(&normalize(body, 0));
    assert_eq!((report.superscripts, report.dangling), (2, 1));
    assert!(out.contains("See<sup class=\"footnote-ref\""));
    assert!(out.contains("but4."), "{out}");
    assert_eq!(list_items(&out), vec!["1. First", "2. Second"]);
}

#[test]
fn normalizing_twice_changes_nothing() {
    let body = "<p>Text<a class=\"footnote-anchor\" id=\"footnote-anchor-1\" href=\"#footnote-1\">1</a></p>\
                <div class=\"footnotes\"><ul><li>1.<br>  A note\n spanning lines</li><li>Plain</li></ul></div>\
                <div class=\"footnote-content\">3\n\nBroken footnote text</div>";
    let once = normalize(body, 2);
    let twice = normalize(&once, 2);
    assert_eq!(once, twice);
    assert!(once.contains("1. A note spanning lines"));
    assert!(once.contains("3. Broken footnote text"));
}

fn article_body(tag: &str, paragraphs: usize) -> String {
    let mut html = String::new();
    for i in 1..=paragraphs {
        let words: Vec<String> = (0..40).map(|w| format!("{tag}{i}x{w}")).collect();
        html.push_str(&format!("<p>{}</p>", words.join(" ")));
    }
    html.push_str(
        "<p>Closing<a class=\"footnote-anchor\" id=\"footnote-anchor-1\" href=\"#footnote-1\">1</a> \
         then<a class=\"footnote-anchor\" id=\"footnote-anchor-2\" href=\"#footnote-2\">2</a> \
         stray<a class=\"footnote-anchor\" href=\"#footnote-4\">4</a>.</p>\
         <div class=\"footnotes\"><ol><li>First note</li><li>Second note</li></ol></div>",
    );
    html
}

fn feed_xml() -> String {
    let items: String = [("Lead Story", "a"), ("Second Story", "b"), ("Third Story", "c")]
        .iter()
        .enumerate()
        .map(|(day, (title, tag))| {
            format!(
                "<item><title>{title}</title><dc:creator>Reporter {tag}</dc:creator>\
                 <pubDate>Mon, {:02} Dec 2025 09:00:00 GMT</pubDate>\
                 <content:encoded><![CDATA[{}]]></content:encoded></item>",
                day + 1,
                article_body(tag, 12)
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?>\
         <rss version=\"2.0\" xmlns:content=\"http://purl.org/rss/1.0/modules/content/\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><channel>\
         <title>The Weekly</title><description>All the news</description>{items}\
         </channel></rss>"
    )
}

fn engine() -> Newsprint {
    Newsprint::builder()
        .edition_date(NaiveDate::from_ymd_opt(2025, 12, 27).expect("date"))
        .build()
        .expect("engine")
}

#[test]
fn feed_renders_a_fitted_edition() {
    let engine = engine();
    let measure = TextMetricsMeasure::new();
    let (layout, report) = engine.layout_feed(&feed_xml(), &measure).expect("layout");

    assert!(layout.is_finalized());
    assert!(report.metrics.fallbacks.is_empty(), "{:?}", report.metrics.fallbacks);
    assert!(layout.page_count() >= 3, "only {} pages", layout.page_count());
    assert_eq!(layout.masthead.title, "The Weekly");
    assert_eq!(layout.masthead.established_year, 2025);

    let featured = layout.front.featured.as_ref().expect("featured column");
    assert!(featured.continued);
    for teaser in &layout.front.teasers {
        assert!(!teaser.snippet.is_empty());
        assert_eq!(layout.flow_page_of(teaser.article), Some(teaser.see_page));
    }

    let expected: BTreeMap<usize, u32> = [(0, 2), (1, 2), (2, 2)].into_iter().collect();
    assert_eq!(report.footnotes.footnotes, expected);
    assert_eq!(report.footnotes.superscripts, 6);
    assert_eq!(report.footnotes.dangling, 3);

    let html = layout.to_html();
    assert!(html.contains("THE WEEKLY") || html.contains("The Weekly"));
    assert!(html.contains("SATURDAY, DECEMBER 27, 2025"));
    assert!(html.contains("EST. 2025"));
    assert!(html.contains("Continued on Page 2"));
    assert!(html.contains("by Reporter a from The Weekly"));
    assert!(html.contains("stray4."));
}

#[test]
fn fitted_edition_passes_its_audit() {
    let engine = engine();
    let measure = TextMetricsMeasure::new();
    let (layout, _) = engine.layout_feed(&feed_xml(), &measure).expect("layout");
    let audit = engine.audit(&layout, &measure);

    for id in [
        AUDIT_OVERFLOW_NONE,
        AUDIT_SECTIONS_NONEMPTY,
        AUDIT_PAGE_REFERENCES,
        AUDIT_BLOCKS_CONSERVED,
        AUDIT_NUMBERING_CONTIGUOUS,
        AUDIT_DANGLING_PLAIN,
    ] {
        assert_eq!(audit.verdict(id), Some(Verdict::Pass), "{id}: {:?}", audit.findings);
    }
    let json = audit.to_json("strict");
    assert_eq!(json["gate_passed"], true);
    assert_eq!(json["layout_fingerprint_sha256"].as_str().map(str::len), Some(64));
}

#[test]
fn identical_input_gives_identical_layout() {
    let engine = engine();
    let measure = TextMetricsMeasure::new();
    let (first, _) = engine.layout_feed(&feed_xml(), &measure).expect("first");
    let (second, _) = engine.layout_feed(&feed_xml(), &measure).expect("second");
    assert_eq!(first.to_html(), second.to_html());
}

#[test]
fn malformed_feed_is_reported() {
    let measure = TextMetricsMeasure::new();
    let err = engine().layout_feed("<rss><channel>", &measure).unwrap_err();
    assert!(matches!(err, NewsprintError::Feed(_)));
    let err = engine()
        .layout_feed("<rss version=\"2.0\"><channel><title>x</title></channel></rss>", &measure)
        .unwrap_err();
    assert!(matches!(err, NewsprintError::EmptyArticleSet));
}
