//! Heuristic topic classification.
//!
//! Topics are matched against keyword patterns in a fixed order (technical,
//! then academic, then lifestyle). The first category with a matching pattern
//! wins; topics that match nothing are treated as lifestyle. Classification
//! is pure and makes no backend calls.

use regex::Regex;
use tracing::debug;

use crate::config::{CategoryRule, ClassifierConfig};
use crate::{Error, Result, TopicCategory, TopicClassification};

const TOPIC_PLACEHOLDER: &str = "{topic}";

struct CompiledRule {
    category: TopicCategory,
    patterns: Vec<Regex>,
    subtitle: String,
}

impl CompiledRule {
    fn compile(category: TopicCategory, rule: &CategoryRule) -> Result<Self> {
        let patterns = rule
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?i){pattern}")).map_err(|e| {
                    Error::Config(format!(
                        "invalid {category} classifier pattern {pattern:?}: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            category,
            patterns,
            subtitle: rule.subtitle.clone(),
        })
    }

    fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(topic))
    }

    fn classification(&self, topic: &str) -> TopicClassification {
        TopicClassification {
            category: self.category,
            subtitle: self.subtitle.replace(TOPIC_PLACEHOLDER, topic),
        }
    }
}

/// Keyword classifier built from [`ClassifierConfig`].
///
/// ```rust
/// use quire_core::{TopicCategory, TopicClassifier};
/// use quire_core::config::ClassifierConfig;
///
/// let classifier = TopicClassifier::new(&ClassifierConfig::default())?;
/// let result = classifier.classify("Intermittent Fasting 16:8 Schedule");
/// assert_eq!(result.category, TopicCategory::Lifestyle);
/// # Ok::<(), quire_core::Error>(())
/// ```
pub struct TopicClassifier {
    // Checked in order: technical, academic, lifestyle.
    rules: [CompiledRule; 3],
}

impl TopicClassifier {
    /// Compile the pattern table.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            rules: [
                CompiledRule::compile(TopicCategory::Technical, &config.technical)?,
                CompiledRule::compile(TopicCategory::Academic, &config.academic)?,
                CompiledRule::compile(TopicCategory::Lifestyle, &config.lifestyle)?,
            ],
        })
    }

    /// Classify a topic and render its subtitle.
    pub fn classify(&self, topic: &str) -> TopicClassification {
        let topic = topic.trim();
        let rule = self.matching_rule(topic).unwrap_or_else(|| {
            debug!(topic, "no classifier pattern matched; defaulting to lifestyle");
            &self.rules[2]
        });
        rule.classification(topic)
    }

    /// Category whose patterns match the topic, if any.
    ///
    /// `None` means [`classify`](Self::classify) fell back to lifestyle.
    pub fn matched_category(&self, topic: &str) -> Option<TopicCategory> {
        self.matching_rule(topic.trim()).map(|rule| rule.category)
    }

    fn matching_rule(&self, topic: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(topic))
    }
}

impl std::fmt::Debug for TopicClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<_> = self
            .rules
            .iter()
            .map(|rule| (rule.category, rule.patterns.len()))
            .collect();
        f.debug_struct("TopicClassifier")
            .field("patterns", &counts)
            .finish()
    }
}
