//! Configuration for conversation and summary behavior

use serde::{Deserialize, Serialize};

/// Default system prompt for answer generation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledge-base assistant. Answer the \
question using only the provided context passages. If the context does not contain the \
answer, say that you do not know.";

/// Default template rendering retrieved passages into the user message
pub const DEFAULT_CONTEXT_TEMPLATE: &str = "Context passages:\n{{contexts}}\n\nCurrent time: \
{{current_time}} ({{current_week}})\n\nQuestion: {{query}}";

/// Default system prompt for query rewriting
pub const DEFAULT_REWRITE_PROMPT_SYSTEM: &str = "You rewrite follow-up questions into \
self-contained search queries. Use the conversation to resolve pronouns and implicit \
references. Current time: {{current_time}}. Yesterday was {{yesterday}}. Answer with the \
rewritten query only.\n\nConversation:\n{{conversation}}";

/// Default user prompt for query rewriting
pub const DEFAULT_REWRITE_PROMPT_USER: &str = "{{query}}";

/// Render a prompt template by substituting `{{name}}` placeholders
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// Generation settings for the final answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// System prompt
    pub prompt: String,
    /// Template rendering passages + query into the user message
    pub context_template: String,
    /// Answer prefix the model emits when the context did not help;
    /// matching answers are replaced by the fallback response
    pub no_match_prefix: String,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f64>,
    /// Sampling seed
    pub seed: Option<u64>,
    /// Maximum prompt + completion tokens
    pub max_tokens: Option<u64>,
    /// Maximum completion tokens
    pub max_completion_tokens: Option<u64>,
    /// Frequency penalty
    pub frequency_penalty: Option<f64>,
    /// Presence penalty
    pub presence_penalty: Option<f64>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_template: DEFAULT_CONTEXT_TEMPLATE.to_string(),
            no_match_prefix: String::new(),
            temperature: Some(0.3),
            top_p: None,
            seed: None,
            max_tokens: None,
            max_completion_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

/// Retrieval and conversation defaults applied to new requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Minimum score for vector matches
    pub vector_threshold: f64,
    /// Minimum score for keyword matches
    pub keyword_threshold: f64,
    /// Candidates requested per retriever
    pub embedding_top_k: usize,
    /// Final result count after merging
    pub rerank_top_k: usize,
    /// Minimum rerank relevance score
    pub rerank_threshold: f64,
    /// Maximum history turns used for rewriting and generation
    pub max_rounds: usize,
    /// Whether graph-based entity search is active
    pub graph_enabled: bool,
    /// Answer used when retrieval finds nothing
    pub fallback_response: String,
    /// System prompt template for query rewriting
    pub rewrite_prompt_system: String,
    /// User prompt template for query rewriting
    pub rewrite_prompt_user: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            vector_threshold: 0.5,
            keyword_threshold: 0.3,
            embedding_top_k: 10,
            rerank_top_k: 5,
            rerank_threshold: 0.7,
            max_rounds: 5,
            graph_enabled: false,
            fallback_response: "No relevant content was found in the knowledge base."
                .to_string(),
            rewrite_prompt_system: DEFAULT_REWRITE_PROMPT_SYSTEM.to_string(),
            rewrite_prompt_user: DEFAULT_REWRITE_PROMPT_USER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_placeholders() {
        let rendered = render_template(
            "Q: {{query}} at {{current_time}}",
            &[("query", "what is rust"), ("current_time", "12:00")],
        );
        assert_eq!(rendered, "Q: what is rust at 12:00");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let rendered = render_template("{{query}} {{unknown}}", &[("query", "q")]);
        assert_eq!(rendered, "q {{unknown}}");
    }
}
