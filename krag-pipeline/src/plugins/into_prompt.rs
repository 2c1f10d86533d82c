//! Prompt assembly: render merged passages into the user message

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Datelike, Local};
use regex::Regex;
use tracing::debug;

use krag_core::config::render_template;
use krag_core::error::{Error, Result};
use krag_core::search::SearchResult;

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

static MD_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").expect("image regex is valid"));

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Renders the context template with the merged passages
pub struct PromptAssembler;

impl PromptAssembler {
    /// Create the assembler
    pub fn new() -> Self {
        Self
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Passage text for the prompt: image captions/OCR are attached to their
/// markdown links, unmatched image metadata is appended at the end
fn enrich_content_with_images(result: &SearchResult) -> String {
    if result.image_info.is_empty() {
        return result.content.clone();
    }

    let mut by_url: HashMap<&str, &krag_core::chunk::ImageInfo> = HashMap::new();
    for image in &result.image_info {
        if !image.url.is_empty() {
            by_url.insert(image.url.as_str(), image);
        }
        if !image.original_url.is_empty() {
            by_url.insert(image.original_url.as_str(), image);
        }
    }

    let mut content = result.content.clone();
    let mut processed: HashSet<&str> = HashSet::new();

    for caps in MD_IMAGE_RE.captures_iter(&result.content) {
        let (Some(full), Some(url)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        processed.insert(url.as_str());

        if let Some(image) = by_url.get(url.as_str()) {
            let mut replacement = format!("{}\n", full.as_str());
            if !image.caption.is_empty() {
                replacement.push_str(&format!("Image caption: {}\n", image.caption));
            }
            if !image.ocr_text.is_empty() {
                replacement.push_str(&format!("Image text: {}\n", image.ocr_text));
            }
            content = content.replacen(full.as_str(), &replacement, 1);
        }
    }

    let mut additional = Vec::new();
    for image in &result.image_info {
        if processed.contains(image.url.as_str())
            || processed.contains(image.original_url.as_str())
        {
            continue;
        }
        if !image.caption.is_empty() {
            additional.push(format!("Caption for image {}: {}", image.url, image.caption));
        }
        if !image.ocr_text.is_empty() {
            additional.push(format!("Text in image {}: {}", image.url, image.ocr_text));
        }
    }
    if !additional.is_empty() {
        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str("Additional image information:\n");
        content.push_str(&additional.join("\n"));
    }

    content
}

#[async_trait]
impl Plugin for PromptAssembler {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::IntoChatMessage]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        let template = state.summary_config.context_template.clone();
        if template.trim().is_empty() {
            return Err(Error::TemplateParse("context template is empty".into()));
        }

        let passages: Vec<String> = state
            .merge_results
            .iter()
            .map(enrich_content_with_images)
            .collect();
        let contexts = passages.join("\n\n");

        let now = Local::now();
        let current_time = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let current_week = WEEKDAYS[now.weekday().num_days_from_sunday() as usize];

        let rendered = render_template(
            &template,
            &[
                ("query", &state.query),
                ("contexts", &contexts),
                ("current_time", &current_time),
                ("current_week", current_week),
            ],
        );
        if rendered.trim().is_empty() {
            return Err(Error::TemplateRender(
                "rendered user content is empty".into(),
            ));
        }

        debug!(content_len = rendered.len(), "user content assembled");
        state.user_content = rendered;
        next.run(event, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::chunk::ImageInfo;

    #[tokio::test]
    async fn renders_query_and_contexts() {
        let mut state = ChatState::default();
        state.query = "what is rust".into();
        state.summary_config.context_template = "C: {{contexts}}\nQ: {{query}}".into();
        state.merge_results = vec![
            SearchResult {
                content: "passage one".into(),
                ..SearchResult::default()
            },
            SearchResult {
                content: "passage two".into(),
                ..SearchResult::default()
            },
        ];

        PromptAssembler::new()
            .on_event(EventType::IntoChatMessage, &mut state, Next::noop())
            .await
            .unwrap();

        assert!(state.user_content.contains("passage one"));
        assert!(state.user_content.contains("passage two"));
        assert!(state.user_content.ends_with("Q: what is rust"));
    }

    #[tokio::test]
    async fn empty_template_is_a_hard_error() {
        let mut state = ChatState::default();
        state.summary_config.context_template = String::new();

        let result = PromptAssembler::new()
            .on_event(EventType::IntoChatMessage, &mut state, Next::noop())
            .await;

        assert!(matches!(result, Err(Error::TemplateParse(_))));
    }

    #[test]
    fn image_descriptions_follow_their_markdown_links() {
        let result = SearchResult {
            content: "Intro ![fig](http://img/1.png) outro".into(),
            image_info: vec![ImageInfo {
                url: "http://img/1.png".into(),
                caption: "a chart".into(),
                ocr_text: "42".into(),
                ..ImageInfo::default()
            }],
            ..SearchResult::default()
        };

        let enriched = enrich_content_with_images(&result);

        assert!(enriched.contains("![fig](http://img/1.png)\nImage caption: a chart\nImage text: 42"));
    }

    #[test]
    fn unreferenced_images_are_appended() {
        let result = SearchResult {
            content: "No image links here".into(),
            image_info: vec![ImageInfo {
                url: "http://img/2.png".into(),
                caption: "unlinked image".into(),
                ..ImageInfo::default()
            }],
            ..SearchResult::default()
        };

        let enriched = enrich_content_with_images(&result);

        assert!(enriched.contains("Additional image information:"));
        assert!(enriched.contains("Caption for image http://img/2.png: unlinked image"));
    }
}
