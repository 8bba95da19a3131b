//! Offline topic classification and list screening.

use anyhow::Result;
use quire_core::validation::validate_topic;
use quire_core::{Config, TopicClassification, TopicClassifier, TopicScreen, screen_topic};
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyOutput<'a> {
    topic: &'a str,
    matched_pattern: bool,
    #[serde(flatten)]
    classification: &'a TopicClassification,
    #[serde(flatten)]
    screen: &'a TopicScreen,
}

/// Execute the classify command.
pub fn execute(topic: &str, format: OutputFormat) -> Result<()> {
    let topic = validate_topic(topic)?;
    let config = Config::load()?;
    let classifier = TopicClassifier::new(&config.classifier)?;
    let classification = classifier.classify(&topic);
    let matched_pattern = classifier.matched_category(&topic).is_some();
    let screen = screen_topic(&config.safety, &topic)?;

    match format {
        OutputFormat::Json => output::print_json(&ClassifyOutput {
            topic: &topic,
            matched_pattern,
            classification: &classification,
            screen: &screen,
        })?,
        OutputFormat::Text => {
            output::print_classification(&topic, &classification, matched_pattern, &screen);
        },
    }
    Ok(())
}
