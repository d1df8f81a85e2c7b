use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMetrics {
    pub page_number: u32,
    pub fit_ms: f64,
    pub block_count: usize,
    /// Measured height of the page's content, in px.
    pub height: f32,
    pub capacity: f32,
    pub measure_calls: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LayoutMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_fit_ms: f64,
    pub measure_calls: usize,
    pub teaser_iterations: usize,
    pub trimmed_paragraphs: usize,
    pub trimmed_words: usize,
    /// Phases that failed and fell back to the unfitted layout.
    pub fallbacks: Vec<String>,
}

impl LayoutMetrics {
    pub fn page(&self, number: u32) -> Option<&PageMetrics> {
        self.pages.iter().find(|page| page.page_number == number)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
