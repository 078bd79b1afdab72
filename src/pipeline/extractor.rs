//! Candidate extractor — structured extraction from accepted resume text.
//!
//! **Core invariant: no partial records.** `name`, `email`, and
//! `summary` must validate or the whole extraction fails; the sink
//! never sees a half-filled row. `phone`, `skills`, and `experience`
//! are taken as given.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::error::ExtractError;
use crate::llm::extract_json_object;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{CandidateRecord, CandidateStatus};

/// Max tokens for the extraction call.
const EXTRACT_MAX_TOKENS: u32 = 1024;

/// Temperature for extraction (deterministic-ish).
const EXTRACT_TEMPERATURE: f32 = 0.0;

/// Resume text length sent to the model. Covers several pages; anything
/// longer is almost never a resume anyway.
const EXTRACT_INPUT_CHARS: usize = 15_000;

/// Address-shape check, not RFC 5322. Catches "N/A", "not provided",
/// and bare names the model sometimes puts in the email field.
static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Extracts a validated `CandidateRecord` from rendered resume text.
pub struct CandidateExtractor {
    llm: Arc<dyn LlmProvider>,
}

impl CandidateExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Extract a candidate record from resume text.
    ///
    /// One model call, no internal retries — the orchestrator owns
    /// retry policy, and every error from here is one failed attempt.
    pub async fn extract(
        &self,
        text: &str,
        source_message_id: &str,
    ) -> Result<CandidateRecord, ExtractError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extract_system_prompt()),
            ChatMessage::user(build_extract_user_prompt(text)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let record = parse_extract_response(&response.content, source_message_id)?;

        debug!(
            email = %record.email,
            skills = record.skills.len(),
            "Extracted candidate record"
        );
        Ok(record)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the extraction system prompt.
fn build_extract_system_prompt() -> String {
    "You are a resume data extractor. Pull structured fields from the resume text.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"name\": \"...\", \"email\": \"...\", \"phone\": \"...\", \"skills\": [\"...\"], \"experience\": \"...\", \"summary\": \"...\"}\n\n\
     Rules:\n\
     - \"name\" and \"email\": exactly as written in the resume. NEVER invent contact data; use \"\" when absent\n\
     - \"phone\": as written, or \"\" when absent\n\
     - \"skills\": up to 10 top skills, in resume order\n\
     - \"experience\": short descriptor like \"5 years\", \"fresher\", \"senior backend\"\n\
     - \"summary\": 1-3 sentences you write describing the candidate"
        .to_string()
}

/// Build the extraction user prompt (truncated body).
fn build_extract_user_prompt(text: &str) -> String {
    let body: String = text.chars().take(EXTRACT_INPUT_CHARS).collect();
    format!("Resume text:\n{body}")
}

// ── Response parsing ────────────────────────────────────────────────

/// LLM extraction response structure.
#[derive(Debug, serde::Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    experience: String,
    #[serde(default)]
    summary: String,
}

/// Parse and validate the model output into a `CandidateRecord`.
fn parse_extract_response(
    raw: &str,
    source_message_id: &str,
) -> Result<CandidateRecord, ExtractError> {
    let json_str = extract_json_object(raw);
    let response: ExtractResponse = serde_json::from_str(&json_str)
        .map_err(|e| ExtractError::Unparseable(format!("JSON parse error: {e}")))?;

    let name = response.name.trim().to_string();
    let email = response.email.trim().to_string();
    let summary = response.summary.trim().to_string();

    if name.is_empty() {
        return Err(schema("name", "must be present and non-empty"));
    }
    if email.is_empty() {
        return Err(schema("email", "must be present and non-empty"));
    }
    if !EMAIL_SHAPE.is_match(&email) {
        return Err(schema("email", format!("'{email}' is not an address")));
    }
    if summary.is_empty() {
        return Err(schema("summary", "must be present and non-empty"));
    }

    let skills: Vec<String> = response
        .skills
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(CandidateRecord {
        name,
        email,
        phone: response.phone.trim().to_string(),
        skills,
        experience: response.experience.trim().to_string(),
        summary,
        status: CandidateStatus::New,
        source_message_id: source_message_id.to_string(),
        extracted_at: Utc::now(),
    })
}

fn schema(field: &str, message: impl Into<String>) -> ExtractError {
    ExtractError::SchemaViolation {
        field: field.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::CompletionResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockExtractLlm {
        response: String,
        calls: AtomicUsize,
    }

    impl MockExtractLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for MockExtractLlm {
        fn model_name(&self) -> &str {
            "mock-extractor"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 500,
                output_tokens: 200,
            })
        }
    }

    const FULL_RESPONSE: &str = r#"{
        "name": "Rahul Kumar",
        "email": "rahul@email.com",
        "phone": "+91 98765 43210",
        "skills": ["Rust", "SQL", "Docker"],
        "experience": "3 years",
        "summary": "Backend engineer with a systems focus and production Rust experience."
    }"#;

    #[tokio::test]
    async fn full_response_becomes_record() {
        let llm = Arc::new(MockExtractLlm::new(FULL_RESPONSE));
        let extractor = CandidateExtractor::new(llm.clone());

        let record = extractor.extract("Rahul Kumar\nrahul@email.com\n...", "m-1").await.unwrap();
        assert_eq!(record.name, "Rahul Kumar");
        assert_eq!(record.email, "rahul@email.com");
        assert_eq!(record.phone, "+91 98765 43210");
        assert_eq!(record.skills, vec!["Rust", "SQL", "Docker"]);
        assert_eq!(record.experience, "3 years");
        assert_eq!(record.status, CandidateStatus::New);
        assert_eq!(record.source_message_id, "m-1");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fenced_response_parses() {
        let fenced = format!("```json\n{FULL_RESPONSE}\n```");
        let extractor = CandidateExtractor::new(Arc::new(MockExtractLlm::new(&fenced)));

        let record = extractor.extract("resume text", "m-2").await.unwrap();
        assert_eq!(record.name, "Rahul Kumar");
    }

    #[tokio::test]
    async fn missing_name_is_schema_violation() {
        let raw = r#"{"name": "", "email": "rahul@email.com", "summary": "An engineer."}"#;
        let extractor = CandidateExtractor::new(Arc::new(MockExtractLlm::new(raw)));

        let err = extractor.extract("text", "m-1").await.unwrap_err();
        match err {
            ExtractError::SchemaViolation { field, .. } => assert_eq!(field, "name"),
            other => panic!("Expected SchemaViolation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn placeholder_email_is_schema_violation() {
        let raw = r#"{"name": "Rahul Kumar", "email": "N/A", "summary": "An engineer."}"#;
        let extractor = CandidateExtractor::new(Arc::new(MockExtractLlm::new(raw)));

        let err = extractor.extract("text", "m-1").await.unwrap_err();
        match err {
            ExtractError::SchemaViolation { field, message } => {
                assert_eq!(field, "email");
                assert!(message.contains("N/A"));
            }
            other => panic!("Expected SchemaViolation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_summary_is_schema_violation() {
        let raw = r#"{"name": "Rahul Kumar", "email": "rahul@email.com"}"#;
        let extractor = CandidateExtractor::new(Arc::new(MockExtractLlm::new(raw)));

        let err = extractor.extract("text", "m-1").await.unwrap_err();
        assert!(matches!(err, ExtractError::SchemaViolation { ref field, .. } if field == "summary"));
    }

    #[tokio::test]
    async fn prose_response_is_unparseable() {
        let extractor = CandidateExtractor::new(Arc::new(MockExtractLlm::new(
            "The candidate seems qualified but I cannot extract fields.",
        )));

        let err = extractor.extract("text", "m-1").await.unwrap_err();
        assert!(matches!(err, ExtractError::Unparseable(_)));
    }

    #[tokio::test]
    async fn transport_fault_maps_to_transport_variant() {
        struct FailingLlm;

        #[async_trait::async_trait]
        impl LlmProvider for FailingLlm {
            fn model_name(&self) -> &str {
                "mock-failing"
            }
            async fn complete(
                &self,
                _request: CompletionRequest,
            ) -> Result<CompletionResponse, LlmError> {
                Err(LlmError::RateLimited {
                    provider: "mock".into(),
                    retry_after: None,
                })
            }
        }

        let extractor = CandidateExtractor::new(Arc::new(FailingLlm));
        let err = extractor.extract("text", "m-1").await.unwrap_err();
        assert!(matches!(err, ExtractError::Transport(_)));
    }

    #[test]
    fn blank_skills_are_dropped() {
        let raw = r#"{"name": "Rahul Kumar", "email": "rahul@email.com", "summary": "Engineer.",
                      "skills": ["Rust", "  ", "", " SQL "]}"#;
        let record = parse_extract_response(raw, "m-1").unwrap();
        assert_eq!(record.skills, vec!["Rust", "SQL"]);
    }

    #[test]
    fn email_shape_check() {
        assert!(EMAIL_SHAPE.is_match("rahul@email.com"));
        assert!(EMAIL_SHAPE.is_match("a.b+tag@sub.domain.io"));
        assert!(!EMAIL_SHAPE.is_match("not provided"));
        assert!(!EMAIL_SHAPE.is_match("rahul at email.com"));
        assert!(!EMAIL_SHAPE.is_match("rahul@email"));
        assert!(!EMAIL_SHAPE.is_match("@email.com"));
    }

    #[test]
    fn user_prompt_truncates_long_input() {
        let long_text = "x".repeat(40_000);
        let prompt = build_extract_user_prompt(&long_text);
        assert!(prompt.len() < EXTRACT_INPUT_CHARS + 100);
    }
}
