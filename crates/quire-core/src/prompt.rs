//! Prompt construction for the three backend calls.
//!
//! The shell prompt asks for the JSON field names the extractor looks for
//! first, but the extractor accepts common variants as well.

use crate::client::{GenerationParams, PromptPayload};
use crate::config::{BackendConfig, DocumentConfig};
use crate::{OutlineEntry, TopicClassification};

/// Builds [`PromptPayload`]s from configuration.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    backend: BackendConfig,
    chapter_count: u32,
}

impl PromptBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(backend: &BackendConfig, document: &DocumentConfig) -> Self {
        Self {
            backend: backend.clone(),
            chapter_count: document.chapter_count,
        }
    }

    /// Prompt for the intent safety classification.
    #[must_use]
    pub fn safety(&self, topic: &str) -> PromptPayload {
        let system = "You review topics submitted to a long-form writing service. \
            Decide whether a helpful, harmless guide could be written about the topic. \
            Reject topics that seek instructions for violence, weapons, self-harm, \
            illegal activity, sexual content involving minors, or targeted harassment. \
            Answer with a JSON object: {\"allowed\": true|false, \"reason\": \"short explanation\"}.";
        PromptPayload::new(
            system,
            format!("Topic: {topic}"),
            GenerationParams {
                temperature: 0.0,
                max_output_tokens: 256,
                json_mode: self.backend.json_mode,
            },
        )
    }

    /// Prompt for the document shell: metadata, outline and first section.
    #[must_use]
    pub fn shell(&self, topic: &str, classification: &TopicClassification) -> PromptPayload {
        let count = self.chapter_count;
        let system = format!(
            "You are an expert author planning a {category} guide. \
             Respond with a single JSON object and nothing else, using exactly these keys:\n\
             - \"title\": the full document title\n\
             - \"subtitle\": one line expanding on the title\n\
             - \"tableOfContents\": an array of exactly {count} objects \
               {{\"index\": 1..{count}, \"title\": \"...\", \"imageHint\": \"a short photo search phrase\"}}\n\
             - \"firstChapterContent\": the complete text of chapter 1 in Markdown, 800-1200 words\n\
             - \"resources\": an array of 3-6 further-reading suggestions as plain strings\n\
             Escape newlines inside strings as \\n.",
            category = classification.category,
        );
        let user = format!(
            "Topic: {topic}\nSuggested subtitle: {subtitle}",
            subtitle = classification.subtitle
        );
        PromptPayload::new(
            system,
            user,
            GenerationParams {
                temperature: self.backend.temperature,
                max_output_tokens: self.backend.shell_max_output_tokens,
                json_mode: self.backend.json_mode,
            },
        )
    }

    /// Prompt for one background section.
    #[must_use]
    pub fn section(
        &self,
        document_title: &str,
        outline: &[OutlineEntry],
        entry: &OutlineEntry,
    ) -> PromptPayload {
        let contents = outline
            .iter()
            .map(|item| format!("{}. {}", item.index, item.title))
            .collect::<Vec<_>>()
            .join("\n");
        let system = "You are an expert author writing one chapter of a longer guide. \
            Write only the chapter body in Markdown, 800-1200 words. \
            Do not repeat the chapter title as a heading and do not wrap the answer in code fences.";
        let user = format!(
            "Document: {document_title}\n\nTable of contents:\n{contents}\n\n\
             Write chapter {index}: {title}",
            index = entry.index,
            title = entry.title,
        );
        PromptPayload::new(
            system,
            user,
            GenerationParams {
                temperature: self.backend.temperature,
                max_output_tokens: self.backend.section_max_output_tokens,
                json_mode: false,
            },
        )
    }
}
