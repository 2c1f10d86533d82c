//! Query preprocessing: cleaning, tokenization, stopword filtering

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use krag_core::error::Result;

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Common stopwords filtered out of the preprocessed query.
/// Covers English and Chinese function words.
const STOPWORDS: &[&str] = &[
    "the", "is", "are", "am", "i", "you", "he", "she", "it", "this", "that", "what", "how",
    "a", "an", "and", "or", "but", "if", "of", "to", "in", "on", "at", "by", "for", "with",
    "about", "from", "was", "were", "be", "been", "do", "does", "did", "will", "would",
    "could", "should", "can", "not", "no", "so", "than", "too", "very", "just", "then",
    "when", "where", "why", "which", "who",
    "的", "了", "和", "是", "在", "我", "你", "他", "她", "它", "这", "那", "什么", "怎么",
    "如何", "为什么", "哪里", "什么时候", "有", "无", "好", "来", "去", "说", "看", "想",
    "会", "可以", "吗", "呢", "啊", "吧", "的话", "就是", "只是", "因为", "所以",
];

/// Cleans, tokenizes and stopword-filters the rewritten query
pub struct QueryPreprocessor {
    url_re: Regex,
    email_re: Regex,
    punct_re: Regex,
    space_re: Regex,
    stopwords: HashSet<&'static str>,
}

impl Default for QueryPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPreprocessor {
    /// Create the preprocessor with its built-in stopword list
    pub fn new() -> Self {
        Self {
            url_re: Regex::new(r"https?://\S+").expect("url regex is valid"),
            email_re: Regex::new(r"\b[\w.%+-]+@[\w.-]+\.[a-zA-Z]{2,}\b")
                .expect("email regex is valid"),
            punct_re: Regex::new(r"[^\p{L}\p{N}\s]").expect("punctuation regex is valid"),
            space_re: Regex::new(r"\s+").expect("whitespace regex is valid"),
            stopwords: STOPWORDS.iter().copied().collect(),
        }
    }

    fn clean_text(&self, text: &str) -> String {
        let text = self.url_re.replace_all(text, " ");
        let text = self.email_re.replace_all(&text, " ");
        let text = self.punct_re.replace_all(&text, " ");
        let text = self.space_re.replace_all(&text, " ");
        text.trim().to_string()
    }

    fn segment_text<'t>(&self, text: &'t str) -> Vec<&'t str> {
        text.unicode_words().collect()
    }

    fn filter_stopwords<'t>(&self, words: Vec<&'t str>) -> Vec<&'t str> {
        let filtered: Vec<&str> = words
            .iter()
            .copied()
            .filter(|w| !self.stopwords.contains(w.to_lowercase().as_str()))
            .collect();

        // An all-stopword query falls back to the raw tokenization
        if filtered.is_empty() {
            words
        } else {
            filtered
        }
    }
}

#[async_trait]
impl Plugin for QueryPreprocessor {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::PreprocessQuery]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        if state.rewrite_query.is_empty() {
            return next.run(event, state).await;
        }

        let cleaned = self.clean_text(&state.rewrite_query);
        let words = self.segment_text(&cleaned);
        let filtered = self.filter_stopwords(words);
        state.processed_query = filtered.join(" ");

        debug!(
            rewrite_query = %state.rewrite_query,
            processed_query = %state.processed_query,
            "query preprocessing complete"
        );

        next.run(event, state).await
    }
}
