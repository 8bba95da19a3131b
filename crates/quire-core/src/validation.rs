//! Request validation.
//!
//! Runs before the safety gate; a request that fails here never reaches the
//! backend.

use crate::{DocumentId, Error, GenerationRequest, Result};

/// Maximum topic length, in characters, after trimming.
pub const MAX_TOPIC_CHARS: usize = 200;

/// Minimum session token length, in characters.
pub const MIN_SESSION_TOKEN_CHARS: usize = 10;

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Trimmed topic.
    pub topic: String,
    /// Session token, as supplied.
    pub session_token: String,
    /// Whether background sections should be generated.
    pub full_document_requested: bool,
    /// Parsed existing document id.
    pub existing_document_id: Option<DocumentId>,
}

/// Validate a generation request.
///
/// Lengths are counted in characters, not bytes, so multi-byte topics get
/// the same 200-character allowance.
pub fn validate_request(request: &GenerationRequest) -> Result<ValidatedRequest> {
    let topic = validate_topic(&request.topic)?;

    let token = request.session_token.as_str();
    if token.chars().count() < MIN_SESSION_TOKEN_CHARS {
        return Err(Error::InvalidInput(format!(
            "Session token must be at least {MIN_SESSION_TOKEN_CHARS} characters"
        )));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(
            "Session token must not contain whitespace".into(),
        ));
    }

    let existing_document_id = request
        .existing_document_id
        .as_deref()
        .map(DocumentId::parse)
        .transpose()?;

    Ok(ValidatedRequest {
        topic,
        session_token: token.to_string(),
        full_document_requested: request.full_document_requested,
        existing_document_id,
    })
}

/// Trim and length-check a topic.
pub fn validate_topic(raw: &str) -> Result<String> {
    let topic = raw.trim();
    if topic.is_empty() {
        return Err(Error::InvalidInput("Topic must not be empty".into()));
    }
    if topic.chars().count() > MAX_TOPIC_CHARS {
        return Err(Error::InvalidInput(format!(
            "Topic must be at most {MAX_TOPIC_CHARS} characters"
        )));
    }
    Ok(topic.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TOKEN: &str = "session-0123456789";

    #[test]
    fn test_topic_is_trimmed() {
        let req = GenerationRequest::new("   Sourdough Baking  ", TOKEN);
        let validated = validate_request(&req).unwrap();
        assert_eq!(validated.topic, "Sourdough Baking");
        assert!(!validated.full_document_requested);
        assert!(validated.existing_document_id.is_none());
    }

    #[test]
    fn test_topic_length_boundaries() {
        assert!(validate_topic(&"a".repeat(200)).is_ok());
        assert!(matches!(
            validate_topic(&"a".repeat(201)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(validate_topic(" \t\n"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_topic_length_counts_characters() {
        // 200 two-byte characters are 400 bytes but still within the limit.
        assert!(validate_topic(&"é".repeat(200)).is_ok());
        assert!(validate_topic(&"é".repeat(201)).is_err());
    }

    #[test]
    fn test_session_token_rules() {
        let short = GenerationRequest::new("Topic", "short");
        assert!(matches!(
            validate_request(&short),
            Err(Error::InvalidInput(_))
        ));

        let spaced = GenerationRequest::new("Topic", "has a space in it");
        assert!(matches!(
            validate_request(&spaced),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_existing_document_id_is_parsed() {
        let req = GenerationRequest::new("Topic", TOKEN).with_existing_document("doc_abc123");
        let validated = validate_request(&req).unwrap();
        assert_eq!(
            validated.existing_document_id.unwrap().as_str(),
            "doc_abc123"
        );

        let bad = GenerationRequest::new("Topic", TOKEN).with_existing_document("../../etc");
        assert!(matches!(validate_request(&bad), Err(Error::InvalidInput(_))));
    }
}
