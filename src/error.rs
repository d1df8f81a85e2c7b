use thiserror::Error;

#[derive(Debug, Error)]
pub enum NewsprintError {
    #[error("measurement failed: {0}")]
    Measure(String),
    #[error("markup error: {0}")]
    Markup(String),
    #[error("feed error: {0}")]
    Feed(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("no progress after {iterations} iterations in {phase}")]
    Stall { phase: &'static str, iterations: usize },
    #[error("no articles to lay out")]
    EmptyArticleSet,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<roxmltree::Error> for NewsprintError {
    fn from(value: roxmltree::Error) -> Self {
        NewsprintError::Feed(value.to_string())
    }
}
