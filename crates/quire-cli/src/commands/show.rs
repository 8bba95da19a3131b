//! Show a stored document.

use anyhow::Result;
use quire_core::{BurstSupervisor, Config, DocumentId, GenerationService};

use crate::output::{self, OutputFormat};

/// Execute the show command.
pub async fn execute(id: &str, with_content: bool, format: OutputFormat) -> Result<()> {
    let id = DocumentId::parse(id)?;
    let config = Config::load()?;
    let service = GenerationService::from_config(&config, BurstSupervisor::new())?;
    let document = service.load(&id).await?;

    match format {
        OutputFormat::Json => output::print_json(&document)?,
        OutputFormat::Text => output::print_document(&document, with_content),
    }
    Ok(())
}
