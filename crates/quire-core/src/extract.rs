//! Resilient shell extraction.
//!
//! Turns a raw backend response into a complete [`DocumentShell`]. The
//! extractor never fails: it tries a strict parse, falls back to
//! field-by-field recovery with the [`scan`](crate::scan) helpers, and
//! finally synthesizes defaults. Each step that loses fidelity is recorded as
//! a [`ShellWarning`] on the result.
//!
//! ## Pipeline
//!
//! 1. Strip a byte-order mark and stray control characters
//! 2. Slice from the first `{` to the last `}` (or use the whole text)
//! 3. Strict JSON parse, reading fields by any of their accepted names
//! 4. On parse failure, recover each field with the tolerant scanner
//! 5. Fill whatever is still missing and renumber the outline `1..=n`

use serde_json::{Map, Value};

use crate::config::DocumentConfig;
use crate::scan;
use crate::{DocumentShell, OutlineEntry, ShellWarning};

const TITLE_KEYS: &[&str] = &["title", "documentTitle", "document_title", "bookTitle", "book_title"];
const DISPLAY_TITLE_KEYS: &[&str] = &["displayTitle", "display_title", "shortTitle", "short_title"];
const SUBTITLE_KEYS: &[&str] = &["subtitle", "subTitle", "sub_title"];
const OUTLINE_KEYS: &[&str] = &[
    "tableOfContents",
    "table_of_contents",
    "toc",
    "chapters",
    "outline",
];
const FIRST_SECTION_KEYS: &[&str] = &[
    "firstChapterContent",
    "first_chapter_content",
    "firstSectionContent",
    "first_section_content",
    "chapter1Content",
    "chapter_1_content",
];
const RESOURCE_KEYS: &[&str] = &[
    "resources",
    "auxiliaryResources",
    "auxiliary_resources",
    "furtherReading",
    "further_reading",
];
const ENTRY_TITLE_KEYS: &[&str] = &["title", "name", "chapterTitle", "chapter_title", "heading"];
const ENTRY_HINT_KEYS: &[&str] = &[
    "imageHint",
    "image_hint",
    "imageSearchTerm",
    "image_search_term",
    "image",
];
const ENTRY_INDEX_KEYS: &[&str] = &["index", "number", "chapter", "chapterNumber", "chapter_number"];
const RESOURCE_LABEL_KEYS: &[&str] = &["title", "name", "label", "text"];
const RESOURCE_URL_KEYS: &[&str] = &["url", "link", "href"];

/// Fields as read from the response, before defaults.
#[derive(Debug, Default)]
struct RawFields {
    title: Option<String>,
    display_title: Option<String>,
    subtitle: Option<String>,
    outline: Vec<RawEntry>,
    first_section: Option<String>,
    resources: Option<Vec<String>>,
}

#[derive(Debug)]
struct RawEntry {
    index: Option<u64>,
    title: String,
    image_hint: Option<String>,
}

/// Builds a [`DocumentShell`] from whatever the backend returned.
///
/// ```rust
/// use quire_core::config::DocumentConfig;
/// use quire_core::ShellExtractor;
///
/// let extractor = ShellExtractor::new(&DocumentConfig::default())
///     .with_subtitle("Your Everyday Guide to Tea");
/// let shell = extractor.extract("not json at all", "tea ceremonies");
///
/// assert_eq!(shell.title, "Tea Ceremonies");
/// assert_eq!(shell.table_of_contents.len(), 10);
/// assert!(shell.first_section_content.starts_with("[DRAFT]"));
/// assert!(!shell.warnings.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct ShellExtractor {
    chapter_count: u32,
    excerpt_chars: usize,
    draft_marker: String,
    display_title_max_chars: usize,
    subtitle: Option<String>,
}

impl ShellExtractor {
    /// Create an extractor.
    #[must_use]
    pub fn new(config: &DocumentConfig) -> Self {
        Self {
            chapter_count: config.chapter_count.max(1),
            excerpt_chars: config.excerpt_chars,
            draft_marker: config.draft_marker.clone(),
            display_title_max_chars: config.display_title_max_chars.max(1),
            subtitle: None,
        }
    }

    /// Subtitle used when the response has none.
    #[must_use]
    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Extract a complete shell. Never fails.
    pub fn extract(&self, raw: &str, topic: &str) -> DocumentShell {
        let topic = topic.trim();
        let mut warnings = Vec::new();

        let (clean, removed) = scan::sanitize(raw);
        if removed > 0 {
            warnings.push(ShellWarning::ControlCharactersStripped { count: removed });
        }

        let candidate = scan::json_object_slice(&clean).unwrap_or_else(|| {
            warnings.push(ShellWarning::NoJsonObject);
            clean.as_str()
        });

        // Truncated output may end inside the object, past the last `}`.
        let recovery_text = clean.find('{').map_or(clean.as_str(), |start| &clean[start..]);

        let fields = match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => fields_from_object(&map),
            Ok(other) => {
                warnings.push(ShellWarning::StrictParseFailed {
                    detail: format!("expected an object, found {}", json_kind(&other)),
                });
                recover_fields(recovery_text, &mut warnings)
            },
            Err(err) => {
                warnings.push(ShellWarning::StrictParseFailed {
                    detail: err.to_string(),
                });
                recover_fields(recovery_text, &mut warnings)
            },
        };

        self.assemble(fields, topic, &clean, warnings)
    }

    fn assemble(
        &self,
        fields: RawFields,
        topic: &str,
        clean: &str,
        mut warnings: Vec<ShellWarning>,
    ) -> DocumentShell {
        let title = fields.title.unwrap_or_else(|| {
            warnings.push(defaulted("title"));
            title_case(topic)
        });

        let display_title = shorten_on_word(
            fields.display_title.as_deref().unwrap_or(&title),
            self.display_title_max_chars,
        );

        let subtitle = fields.subtitle.unwrap_or_else(|| {
            warnings.push(defaulted("subtitle"));
            self.subtitle
                .clone()
                .unwrap_or_else(|| format!("A Complete Guide to {topic}"))
        });

        let table_of_contents = if fields.outline.is_empty() {
            warnings.push(defaulted("tableOfContents"));
            self.synthetic_outline(topic)
        } else {
            renumber(fields.outline, topic, &mut warnings)
        };

        let first_section_content = fields
            .first_section
            .map(|content| clean_section_content(&content))
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| {
                warnings.push(defaulted("firstSectionContent"));
                self.draft_excerpt(clean, topic)
            });

        let auxiliary_resources = fields.resources.unwrap_or_else(|| {
            warnings.push(defaulted("auxiliaryResources"));
            Vec::new()
        });

        DocumentShell {
            title,
            display_title,
            subtitle,
            table_of_contents,
            first_section_content,
            auxiliary_resources,
            warnings,
        }
    }

    fn synthetic_outline(&self, topic: &str) -> Vec<OutlineEntry> {
        let count = self.chapter_count;
        (1..=count)
            .map(|index| {
                let title = if index == 1 {
                    format!("Introduction to {topic}")
                } else if index == count {
                    "Conclusion and Next Steps".to_string()
                } else {
                    format!("Chapter {index}")
                };
                OutlineEntry {
                    index,
                    title,
                    image_hint: topic.to_string(),
                }
            })
            .collect()
    }

    fn draft_excerpt(&self, clean: &str, topic: &str) -> String {
        let excerpt: String = clean.trim().chars().take(self.excerpt_chars).collect();
        let excerpt = excerpt.trim();
        if excerpt.is_empty() {
            format!(
                "{} Content for \"{topic}\" is still being written.",
                self.draft_marker
            )
        } else {
            format!("{} {excerpt}", self.draft_marker)
        }
    }
}

/// Normalize generated section text.
///
/// Strips control characters and a Markdown code fence wrapped around the
/// whole body. Returns an empty string when nothing usable remains.
pub fn clean_section_content(raw: &str) -> String {
    let (clean, _) = scan::sanitize(raw);
    let trimmed = clean.trim();
    let unfenced = trimmed.strip_prefix("```").map_or(trimmed, |rest| {
        let body = rest.split_once('\n').map_or("", |(_, body)| body);
        let body = body.trim_end();
        body.strip_suffix("```").unwrap_or(body)
    });
    unfenced.trim().to_string()
}

fn defaulted(field: &str) -> ShellWarning {
    ShellWarning::FieldDefaulted {
        field: field.to_string(),
    }
}

fn recovered(field: &str) -> ShellWarning {
    ShellWarning::FieldRecovered {
        field: field.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Strict path
// ============================================================================

fn fields_from_object(map: &Map<String, Value>) -> RawFields {
    RawFields {
        title: string_field(map, TITLE_KEYS),
        display_title: string_field(map, DISPLAY_TITLE_KEYS),
        subtitle: string_field(map, SUBTITLE_KEYS),
        outline: first_present(map, OUTLINE_KEYS)
            .map(outline_from_value)
            .unwrap_or_default(),
        first_section: string_field(map, FIRST_SECTION_KEYS),
        resources: first_present(map, RESOURCE_KEYS).map(resources_from_value),
    }
}

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| map.get(*key).filter(|value| !value.is_null()))
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty(map.get(*key)?.as_str()?))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn outline_from_value(value: &Value) -> Vec<RawEntry> {
    match value {
        Value::Array(items) => items.iter().filter_map(entry_from_value).collect(),
        _ => Vec::new(),
    }
}

fn entry_from_value(value: &Value) -> Option<RawEntry> {
    match value {
        Value::String(title) => Some(RawEntry {
            index: None,
            title: non_empty(title)?,
            image_hint: None,
        }),
        Value::Object(map) => Some(RawEntry {
            index: ENTRY_INDEX_KEYS
                .iter()
                .find_map(|key| index_value(map.get(*key)?)),
            title: string_field(map, ENTRY_TITLE_KEYS)?,
            image_hint: string_field(map, ENTRY_HINT_KEYS),
        }),
        _ => None,
    }
}

fn index_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn resources_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(resource_from_value).collect(),
        other => resource_from_value(other).into_iter().collect(),
    }
}

fn resource_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(text),
        Value::Object(map) => {
            let label = string_field(map, RESOURCE_LABEL_KEYS);
            let url = string_field(map, RESOURCE_URL_KEYS);
            match (label, url) {
                (Some(label), Some(url)) => Some(format!("{label} ({url})")),
                (label, url) => label.or(url),
            }
        },
        _ => None,
    }
}

// ============================================================================
// Recovery path
// ============================================================================

fn recover_fields(candidate: &str, warnings: &mut Vec<ShellWarning>) -> RawFields {
    let top_level = scan::without_arrays(candidate);
    let mut note = |field: &str, found: bool| {
        if found {
            warnings.push(recovered(field));
        }
    };

    let title = scan::scan_string(&top_level, TITLE_KEYS).and_then(|s| non_empty(&s));
    note("title", title.is_some());

    let display_title =
        scan::scan_string(&top_level, DISPLAY_TITLE_KEYS).and_then(|s| non_empty(&s));

    let subtitle = scan::scan_string(&top_level, SUBTITLE_KEYS).and_then(|s| non_empty(&s));
    note("subtitle", subtitle.is_some());

    let outline = scan::scan_array(candidate, OUTLINE_KEYS)
        .map(recover_outline)
        .unwrap_or_default();
    note("tableOfContents", !outline.is_empty());

    let first_section =
        scan::scan_string(&top_level, FIRST_SECTION_KEYS).and_then(|s| non_empty(&s));
    note("firstSectionContent", first_section.is_some());

    let resources = scan::scan_array(candidate, RESOURCE_KEYS).map(recover_resources);
    note("auxiliaryResources", resources.is_some());

    RawFields {
        title,
        display_title,
        subtitle,
        outline,
        first_section,
        resources,
    }
}

fn recover_outline(array: &str) -> Vec<RawEntry> {
    if let Ok(value) = serde_json::from_str::<Value>(array) {
        return outline_from_value(&value);
    }
    scan::split_elements(array)
        .into_iter()
        .filter_map(|element| {
            if let Ok(value) = serde_json::from_str::<Value>(element) {
                return entry_from_value(&value);
            }
            if element.starts_with('"') {
                return Some(RawEntry {
                    index: None,
                    title: non_empty(&scan::string_literal(element)?)?,
                    image_hint: None,
                });
            }
            Some(RawEntry {
                index: None,
                title: non_empty(&scan::scan_string(element, ENTRY_TITLE_KEYS)?)?,
                image_hint: scan::scan_string(element, ENTRY_HINT_KEYS)
                    .and_then(|hint| non_empty(&hint)),
            })
        })
        .collect()
}

fn recover_resources(array: &str) -> Vec<String> {
    if let Ok(value) = serde_json::from_str::<Value>(array) {
        return resources_from_value(&value);
    }
    scan::split_elements(array)
        .into_iter()
        .filter_map(|element| {
            if let Ok(value) = serde_json::from_str::<Value>(element) {
                return resource_from_value(&value);
            }
            scan::string_literal(element)
                .or_else(|| scan::scan_string(element, RESOURCE_LABEL_KEYS))
                .and_then(|text| non_empty(&text))
        })
        .collect()
}

// ============================================================================
// Normalization
// ============================================================================

/// Assign indices `1..=n` in response order.
///
/// Entries that carried an index different from their position trigger a
/// single [`ShellWarning::OutlineRenumbered`].
fn renumber(entries: Vec<RawEntry>, topic: &str, warnings: &mut Vec<ShellWarning>) -> Vec<OutlineEntry> {
    let mut changed = false;
    let outline = entries
        .into_iter()
        .zip(1u32..)
        .map(|(entry, position)| {
            if entry.index.is_some_and(|index| index != u64::from(position)) {
                changed = true;
            }
            OutlineEntry {
                index: position,
                title: entry.title,
                image_hint: entry.image_hint.unwrap_or_else(|| topic.to_string()),
            }
        })
        .collect();
    if changed {
        warnings.push(ShellWarning::OutlineRenumbered);
    }
    outline
}

fn title_case(topic: &str) -> String {
    topic
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shorten to at most `max` characters, cutting at a word boundary when one
/// exists.
fn shorten_on_word(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let hard: String = text.chars().take(max).collect();
    let next_is_break = text.chars().nth(max).is_some_and(char::is_whitespace);
    if next_is_break {
        return hard.trim_end().to_string();
    }
    let on_word = match hard.rfind(char::is_whitespace) {
        Some(cut) if cut > 0 => hard[..cut]
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ':' | ',' | '-' | ';')),
        _ => "",
    };
    if on_word.is_empty() {
        hard.trim_end().to_string()
    } else {
        on_word.to_string()
    }
}
