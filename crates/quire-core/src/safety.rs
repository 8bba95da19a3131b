//! Intent safety gate.
//!
//! Topics containing an allow-listed phrase as a whole word pass without a
//! backend call, unless they also mention a review term. Everything else gets exactly one classification call (no retries, short
//! timeout). If that call fails or its answer cannot be read, the gate fails
//! open: the topic is allowed and the verdict is marked
//! [`VerdictSource::FailOpen`](crate::VerdictSource::FailOpen) so the outcome
//! stays visible in logs and responses.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{GenerationClient, RetryPolicy};
use crate::config::SafetyConfig;
use crate::prompt::PromptBuilder;
use crate::scan;
use crate::{Error, Result, SafetyVerdict, ShellWarning};

/// Allow-list check plus a single backend classification.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    client: GenerationClient,
    prompts: PromptBuilder,
    policy: RetryPolicy,
    lists: TopicLists,
}

impl SafetyGate {
    /// Create a gate. List entries are matched case-insensitively as whole words.
    pub fn new(
        client: GenerationClient,
        prompts: PromptBuilder,
        config: &SafetyConfig,
    ) -> Result<Self> {
        Ok(Self {
            client,
            prompts,
            policy: RetryPolicy::single_attempt(config.classifier_timeout()),
            lists: TopicLists::new(config)?,
        })
    }

    /// Allow-listed phrase that lets the topic skip classification.
    #[must_use]
    pub fn allow_list_match(&self, topic: &str) -> Option<String> {
        self.lists.allow_list_match(topic)
    }

    /// Decide whether the topic may be processed. Never fails.
    pub async fn evaluate(&self, topic: &str) -> SafetyVerdict {
        if let Some(term) = self.allow_list_match(topic) {
            info!(%term, "topic allow-listed; skipping safety classification");
            return SafetyVerdict::allow_listed();
        }

        let payload = self.prompts.safety(topic);
        let raw = match self.client.generate_with(&payload, self.policy).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "safety classification failed; failing open");
                return SafetyVerdict::fail_open(format!("classifier unavailable: {err}"));
            },
        };

        match parse_verdict(&raw) {
            Some(verdict) => {
                info!(
                    allowed = verdict.allowed,
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "safety classification complete"
                );
                verdict
            },
            None => {
                warn!(
                    response_chars = raw.chars().count(),
                    "unreadable safety classification; failing open"
                );
                SafetyVerdict::fail_open("classifier response could not be parsed")
            },
        }
    }

    /// Warnings for watch-listed trademark terms in the topic.
    #[must_use]
    pub fn trademark_warnings(&self, topic: &str) -> Vec<ShellWarning> {
        self.lists
            .trademarks
            .matches(topic)
            .into_iter()
            .map(|term| ShellWarning::TrademarkReference { term })
            .collect()
    }
}

/// Case-insensitive whole-word matcher over a list of phrases.
#[derive(Debug, Clone)]
struct TermMatcher {
    pattern: Option<Regex>,
}

impl TermMatcher {
    fn new(terms: &[String]) -> Result<Self> {
        let alternatives: Vec<String> = terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .map_err(|e| Error::Config(format!("Invalid safety term list: {e}")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    fn first_match(&self, topic: &str) -> Option<String> {
        self.pattern
            .as_ref()?
            .find(topic)
            .map(|found| found.as_str().to_lowercase())
    }

    /// Distinct matches in topic order.
    fn matches(&self, topic: &str) -> Vec<String> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };
        let mut found: Vec<String> = Vec::new();
        for term in pattern.find_iter(topic).map(|m| m.as_str().to_lowercase()) {
            if !found.contains(&term) {
                found.push(term);
            }
        }
        found
    }
}

/// Compiled safety lists.
#[derive(Debug, Clone)]
struct TopicLists {
    allow_list: TermMatcher,
    review_terms: TermMatcher,
    trademarks: TermMatcher,
}

impl TopicLists {
    fn new(config: &SafetyConfig) -> Result<Self> {
        Ok(Self {
            allow_list: TermMatcher::new(&config.allow_list)?,
            review_terms: TermMatcher::new(&config.review_terms)?,
            trademarks: TermMatcher::new(&config.trademark_watchlist)?,
        })
    }

    fn allow_list_match(&self, topic: &str) -> Option<String> {
        let term = self.allow_list.first_match(topic)?;
        if let Some(review) = self.review_terms.first_match(topic) {
            debug!(%term, %review, "allow-listed topic mentions a review term");
            return None;
        }
        Some(term)
    }
}

/// List matches for a topic, computed without a backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicScreen {
    /// Allow-listed phrase that would skip classification.
    pub allow_listed: Option<String>,
    /// Watch-listed trademark terms mentioned by the topic.
    pub trademarks: Vec<String>,
}

/// Check a topic against the configured lists only.
pub fn screen_topic(config: &SafetyConfig, topic: &str) -> Result<TopicScreen> {
    let lists = TopicLists::new(config)?;
    Ok(TopicScreen {
        allow_listed: lists.allow_list_match(topic),
        trademarks: lists.trademarks.matches(topic),
    })
}

/// Read `{"allowed": bool, "reason": string}` from a classifier answer.
///
/// `allowed` may also arrive as the string `"true"`/`"false"`.
fn parse_verdict(raw: &str) -> Option<SafetyVerdict> {
    let (clean, _) = scan::sanitize(raw);
    let candidate = scan::json_object_slice(&clean)?;
    let value: Value = serde_json::from_str(candidate).ok()?;

    let allowed = match value.get("allowed")? {
        Value::Bool(flag) => *flag,
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => true,
            "false" | "no" => false,
            _ => return None,
        },
        _ => return None,
    };
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string);

    Some(SafetyVerdict::classified(allowed, reason))
}
