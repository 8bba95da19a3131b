//! Configuration management for quire.
//!
//! Configuration is a single TOML file. Every section has defaults, so a
//! missing file (or a file that only sets a couple of keys) is valid.
//!
//! ## Resolution order
//!
//! 1. Built-in defaults
//! 2. The config file: `$QUIRE_CONFIG`, or `config.toml` in the platform config directory
//! 3. Environment variables: `QUIRE_API_URL`, `QUIRE_API_KEY`, `QUIRE_MODEL`, `QUIRE_DATA_DIR`
//!
//! Keyword tables (the safety allow-list, the trademark watchlist and the
//! topic classification patterns) live here as data so they can be tuned
//! without touching control flow.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [backend]
//! api_url = "https://api.openai.com/v1/chat/completions"
//! model = "gpt-4o-mini"
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 5000
//! call_timeout_secs = 120
//!
//! [burst]
//! group_size = 2
//! inter_burst_delay_ms = 3000
//!
//! [safety]
//! allow_list = ["fasting", "gardening"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QUIRE_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Text-generation backend endpoint and generation parameters.
    pub backend: BackendConfig,
    /// Timeout and retry policy for backend calls.
    pub retry: RetryConfig,
    /// Intent safety gate settings.
    pub safety: SafetyConfig,
    /// Topic classification table.
    pub classifier: ClassifierConfig,
    /// Document shape and fallback content.
    pub document: DocumentConfig,
    /// Background burst scheduling.
    pub burst: BurstConfig,
    /// Persistence location.
    pub storage: StorageConfig,
}

/// Backend endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Chat-completions style endpoint.
    pub api_url: String,
    /// Bearer token, usually provided via `QUIRE_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model name sent with every request.
    pub model: String,
    /// Sampling temperature for content generation.
    pub temperature: f32,
    /// Output ceiling for the shell call.
    pub shell_max_output_tokens: u32,
    /// Output ceiling for each background section call.
    pub section_max_output_tokens: u32,
    /// Ask the backend for strict JSON on structured calls.
    pub json_mode: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            shell_max_output_tokens: 8192,
            section_max_output_tokens: 4096,
            json_mode: true,
        }
    }
}

/// Retry policy for backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls allowed per generation, including the first.
    pub max_attempts: u32,
    /// First backoff wait; each later wait doubles it.
    pub base_delay_ms: u64,
    /// Overall timeout applied to each individual call.
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 5_000,
            call_timeout_secs: 120,
        }
    }
}

impl RetryConfig {
    /// First backoff wait.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Intent safety gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Timeout for the single classification call.
    pub classifier_timeout_secs: u64,
    /// Case-insensitive phrases naming known-safe categories.
    pub allow_list: Vec<String>,
    /// Phrases that send a topic to the classifier even when it is allow-listed.
    pub review_terms: Vec<String>,
    /// Case-insensitive trademark terms that earn a shell warning.
    pub trademark_watchlist: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            classifier_timeout_secs: 15,
            allow_list: strings(&[
                "fasting",
                "nutrition",
                "meal prep",
                "recipe",
                "cooking",
                "baking",
                "sourdough",
                "fitness",
                "yoga",
                "meditation",
                "gardening",
                "houseplants",
                "travel",
                "parenting",
                "productivity",
                "budgeting",
                "personal finance",
                "language learning",
                "photography",
                "programming",
                "web development",
                "woodworking",
                "knitting",
            ]),
            review_terms: strings(&[
                "bomb",
                "explosive",
                "explosives",
                "weapon",
                "weapons",
                "firearm",
                "gun",
                "poison",
                "meth",
                "methamphetamine",
                "fentanyl",
                "drug synthesis",
                "overdose",
                "suicide",
                "self-harm",
                "kill",
                "malware",
                "ransomware",
            ]),
            trademark_watchlist: strings(&[
                "disney",
                "marvel",
                "pokemon",
                "harry potter",
                "star wars",
                "lego",
                "nintendo",
                "barbie",
            ]),
        }
    }
}

impl SafetyConfig {
    /// Classification call timeout.
    #[must_use]
    pub const fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }
}

/// Patterns and subtitle for one topic category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Regular expressions, matched case-insensitively against the topic.
    pub patterns: Vec<String>,
    /// Subtitle template; `{topic}` is replaced with the trimmed topic.
    pub subtitle: String,
}

/// Topic classification table.
///
/// Categories are always checked technical, then academic, then lifestyle;
/// unmatched topics fall back to lifestyle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Software and engineering topics.
    pub technical: CategoryRule,
    /// Scholarly topics.
    pub academic: CategoryRule,
    /// Everyday practical topics.
    pub lifestyle: CategoryRule,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            technical: CategoryRule {
                patterns: strings(&[
                    r"\b(programming|software|coding|developer|devops|kubernetes|docker)\b",
                    r"\b(python|rust|javascript|typescript|golang|java|c\+\+|sql)\b",
                    r"\b(api|apis|database|databases|algorithm|algorithms|compiler)\b",
                    r"\b(machine learning|deep learning|neural networks?|llms?|ai)\b",
                    r"\b(cloud|cybersecurity|blockchain|networking|linux|microservices)\b",
                ]),
                subtitle: "A Practical Technical Guide to {topic}".to_string(),
            },
            academic: CategoryRule {
                patterns: strings(&[
                    r"\b(history|philosophy|theology|linguistics|anthropology|sociology)\b",
                    r"\b(physics|chemistry|biology|mathematics|calculus|statistics)\b",
                    r"\b(economics|psychology|literature|political science|archaeology)\b",
                    r"\b(theory|theorem|research|dissertation|thesis)\b",
                ]),
                subtitle: "A Scholarly Introduction to {topic}".to_string(),
            },
            lifestyle: CategoryRule {
                patterns: strings(&[
                    r"\b(fasting|diet|nutrition|recipes?|cooking|baking|meal)\b",
                    r"\b(fitness|workout|yoga|running|wellness|sleep|meditation)\b",
                    r"\b(travel|parenting|gardening|decluttering|habits?|budget(ing)?)\b",
                ]),
                subtitle: "Your Everyday Guide to {topic}".to_string(),
            },
        }
    }
}

/// Document shape and fallback content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Number of sections requested and synthesized on fallback.
    pub chapter_count: u32,
    /// Maximum characters of raw text kept as a fallback first section.
    pub excerpt_chars: usize,
    /// Prefix marking fallback first-section content as a draft.
    pub draft_marker: String,
    /// Maximum characters in the display title.
    pub display_title_max_chars: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            chapter_count: 10,
            excerpt_chars: 1_200,
            draft_marker: "[DRAFT]".to_string(),
            display_title_max_chars: 60,
        }
    }
}

/// Background burst scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Sections generated concurrently per group.
    pub group_size: usize,
    /// Pause between consecutive groups.
    pub inter_burst_delay_ms: u64,
    /// Fold a trailing single-section group into the group before it.
    pub merge_trailing_singleton: bool,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            group_size: 2,
            inter_burst_delay_ms: 3_000,
            merge_trailing_singleton: true,
        }
    }
}

impl BurstConfig {
    /// Pause between consecutive groups.
    #[must_use]
    pub const fn inter_burst_delay(&self) -> Duration {
        Duration::from_millis(self.inter_burst_delay_ms)
    }
}

/// Persistence location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory; defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the data directory.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("dev", "quire", "quire")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| Error::Config("Failed to determine data directory".into()))
    }
}

impl Config {
    /// Load configuration from `$QUIRE_CONFIG` or the default location, then
    /// apply environment overrides.
    ///
    /// A missing file yields defaults. A malformed or invalid file is an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::resolve_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;
        Ok(())
    }

    /// Config file in effect: `$QUIRE_CONFIG` when set, else [`Self::default_path`].
    pub fn resolve_path() -> Result<PathBuf> {
        match std::env::var(CONFIG_ENV) {
            Ok(explicit) if !explicit.trim().is_empty() => Ok(PathBuf::from(explicit.trim())),
            _ => Self::default_path(),
        }
    }

    /// Platform default config file path.
    pub fn default_path() -> Result<PathBuf> {
        directories::ProjectDirs::from("dev", "quire", "quire")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))
    }

    /// Apply `QUIRE_*` overrides using the given lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty("QUIRE_API_URL") {
            self.backend.api_url = url;
        }
        if let Some(key) = non_empty("QUIRE_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(model) = non_empty("QUIRE_MODEL") {
            self.backend.model = model;
        }
        if let Some(dir) = non_empty("QUIRE_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.call_timeout_secs == 0 {
            return Err(Error::Config("retry.call_timeout_secs must be positive".into()));
        }
        if self.burst.group_size == 0 {
            return Err(Error::Config("burst.group_size must be at least 1".into()));
        }
        if self.document.chapter_count == 0 {
            return Err(Error::Config("document.chapter_count must be at least 1".into()));
        }
        for (name, rule) in [
            ("technical", &self.classifier.technical),
            ("academic", &self.classifier.academic),
            ("lifestyle", &self.classifier.lifestyle),
        ] {
            for pattern in &rule.patterns {
                Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("classifier.{name} pattern {pattern:?} is invalid: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Copy with secrets removed, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.backend.api_key.is_some() {
            copy.backend.api_key = Some("***".to_string());
        }
        copy
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(5));
        assert_eq!(config.retry.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.safety.classifier_timeout(), Duration::from_secs(15));
        assert_eq!(config.burst.group_size, 2);
        assert_eq!(config.document.chapter_count, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load_roundtrip() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.backend.model = "local-model".into();
        config.burst.inter_burst_delay_ms = 10;
        config.save(&path)?;

        let loaded = Config::load_from(&path)?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[test]
    fn test_config_load_missing_file_yields_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let loaded = Config::load_from(&temp.path().join("absent.toml"))?;
        assert_eq!(loaded, Config::default());
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("config.toml");
        fs::write(&path, "[burst]\ngroup_size = 3\n")?;

        let loaded = Config::load_from(&path)?;
        assert_eq!(loaded.burst.group_size, 3);
        assert_eq!(loaded.burst.inter_burst_delay_ms, 3_000);
        assert_eq!(loaded.retry, RetryConfig::default());
        Ok(())
    }

    #[test]
    fn test_config_parse_invalid_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[burst\ngroup_size = ").unwrap();

        match Config::load_from(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("Failed to parse config")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_overrides_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("QUIRE_API_URL", "http://localhost:9000/v1/chat/completions"),
            ("QUIRE_API_KEY", "secret"),
            ("QUIRE_MODEL", "  "),
            ("QUIRE_DATA_DIR", "/tmp/quire-data"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(
            config.backend.api_url,
            "http://localhost:9000/v1/chat/completions"
        );
        assert_eq!(config.backend.api_key.as_deref(), Some("secret"));
        assert_eq!(config.backend.model, "gpt-4o-mini");
        assert_eq!(
            config.storage.data_dir,
            Some(PathBuf::from("/tmp/quire-data"))
        );
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.burst.group_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.classifier.academic.patterns.push("(unclosed".into());
        match config.validate() {
            Err(Error::Config(msg)) => assert!(msg.contains("academic")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = Config::default();
        config.backend.api_key = Some("sk-live".into());
        let shown = config.redacted();
        assert_eq!(shown.backend.api_key.as_deref(), Some("***"));
        assert_eq!(config.backend.api_key.as_deref(), Some("sk-live"));
    }
}
