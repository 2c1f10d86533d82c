//! Error types for the krag pipeline

use thiserror::Error;

/// Result type alias using krag's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared by every pipeline stage.
///
/// The taxonomy is two-tiered: [`Error::NoRelevantContent`] is control
/// flow — orchestrators substitute the configured fallback answer and
/// report success. Every other variant is a hard failure that aborts the
/// remaining chain; its [`Error::kind`] tag is recorded on the active
/// trace span.
#[derive(Debug, Error)]
pub enum Error {
    // ============ Control flow ============
    /// Retrieval produced no candidates anywhere in the pipeline.
    /// Callers must answer with the configured fallback instead of failing.
    #[error("no relevant content found")]
    NoRelevantContent,

    // ============ Retrieval errors ============
    /// Hybrid search against the knowledge base failed
    #[error("knowledge base search failed: {0}")]
    Search(String),

    /// Second-pass relevance scoring failed
    #[error("reranking failed: {0}")]
    Rerank(String),

    /// Graph store lookup failed
    #[error("graph lookup failed: {0}")]
    Graph(String),

    // ============ Generation errors ============
    /// Chat model invocation failed
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// Prompt template could not be parsed
    #[error("context template parse failed: {0}")]
    TemplateParse(String),

    /// Prompt template could not be rendered
    #[error("context template render failed: {0}")]
    TemplateRender(String),

    // ============ Extraction errors ============
    /// A model response could not be parsed into the expected structure
    #[error("extraction response parse failed: {0}")]
    ExtractionParse(String),

    // ============ History errors ============
    /// Conversation history could not be loaded
    #[error("failed to load conversation history: {0}")]
    History(String),

    // ============ Streaming errors ============
    /// The answer stream ended unexpectedly
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // ============ System errors ============
    /// JSON serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a search failure carrying the underlying cause
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Create a rerank failure carrying the underlying cause
    pub fn rerank(msg: impl Into<String>) -> Self {
        Self::Rerank(msg.into())
    }

    /// Create a model-call failure carrying the underlying cause
    pub fn model_call(msg: impl Into<String>) -> Self {
        Self::ModelCall(msg.into())
    }

    /// Create an extraction-parse failure carrying the underlying cause
    pub fn extraction_parse(msg: impl Into<String>) -> Self {
        Self::ExtractionParse(msg.into())
    }

    /// Check whether this is the "no results" control-flow signal
    pub fn is_no_results(&self) -> bool {
        matches!(self, Self::NoRelevantContent)
    }

    /// Stable identifier recorded on trace spans for failed stages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoRelevantContent => "search_nothing",
            Self::Search(_) => "search_failed",
            Self::Rerank(_) => "rerank_failed",
            Self::Graph(_) => "graph_failed",
            Self::ModelCall(_) => "model_call_failed",
            Self::TemplateParse(_) => "template_parse_failed",
            Self::TemplateRender(_) => "template_render_failed",
            Self::ExtractionParse(_) => "extraction_parse_failed",
            Self::History(_) => "get_history_failed",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Serialization(_) => "serialization_failed",
            Self::Io(_) => "io_failed",
            Self::Internal(_) => "internal",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_control_flow() {
        assert!(Error::NoRelevantContent.is_no_results());
        assert!(!Error::search("boom").is_no_results());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::NoRelevantContent.kind(), "search_nothing");
        assert_eq!(Error::rerank("x").kind(), "rerank_failed");
        assert_eq!(Error::model_call("x").kind(), "model_call_failed");
    }
}
