//! Resume classifier — decides whether a rendered document is a resume.
//!
//! **Fail closed**: anything that is not an affirmative, confident
//! "this is a resume" verdict becomes a rejection. Only a transport
//! fault surfaces as an error, so the orchestrator can retry it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::extract_json_object;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Classification, RejectReason};

/// Max tokens for the classification call (kept tight — runs per attachment).
const CLASSIFY_MAX_TOKENS: u32 = 256;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Document preview length sent to the model. Enough to recognize a
/// resume header and first section without paying for the whole document.
const CLASSIFY_PREVIEW_CHARS: usize = 1200;

/// Classifies rendered attachment text as resume / not-a-resume.
pub struct DocumentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl DocumentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Classify one rendered document.
    ///
    /// Blank text short-circuits to `Unreadable` with no model call.
    /// A malformed or low-confidence verdict rejects as `NotAResume`.
    pub async fn classify(&self, text: &str) -> Result<Classification, LlmError> {
        if text.trim().is_empty() {
            debug!("Blank document, rejecting without model call");
            return Ok(Classification::rejected(
                RejectReason::Unreadable,
                "document rendered to empty text",
            ));
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(text)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        Ok(parse_classify_response(&response.content))
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the classification system prompt.
fn build_classify_system_prompt() -> String {
    "You are a document classifier for a recruiting inbox. Decide whether the \
     document is a candidate resume or CV.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"is_resume\": true, \"document_type\": \"...\", \"confidence\": \"...\", \"reason\": \"...\"}\n\n\
     Rules:\n\
     - \"document_type\" is a short noun: resume, cover_letter, invoice, certificate, job_description, other\n\
     - \"confidence\" is one of \"high\", \"medium\", \"low\"\n\
     - A resume lists a person's work history, education, or skills for a job application\n\
     - Cover letters, invoices, certificates, and job descriptions are NOT resumes\n\
     - \"reason\" is one short sentence naming what you saw"
        .to_string()
}

/// Build the classification user prompt (truncated preview).
fn build_classify_user_prompt(text: &str) -> String {
    let preview: String = text.chars().take(CLASSIFY_PREVIEW_CHARS).collect();
    format!("Document text:\n{preview}")
}

// ── Response parsing ────────────────────────────────────────────────

/// LLM classification response structure.
#[derive(Debug, serde::Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    is_resume: bool,
    #[serde(default)]
    document_type: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    reason: String,
}

/// Parse the model verdict into a `Classification`.
///
/// Anything short of "is_resume with high/medium confidence" rejects.
fn parse_classify_response(raw: &str) -> Classification {
    let json_str = extract_json_object(raw);
    let response: ClassifyResponse = match serde_json::from_str(&json_str) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(
                raw_response = %raw,
                error = %e,
                "Unparseable classification verdict, rejecting"
            );
            return Classification::rejected(
                RejectReason::NotAResume,
                format!("unparseable model verdict: {e}"),
            );
        }
    };

    let document_type = if response.document_type.is_empty() {
        "unknown".to_string()
    } else {
        response.document_type
    };
    let reason = if response.reason.is_empty() {
        "no reason given".to_string()
    } else {
        response.reason
    };
    let rationale = format!("{document_type}: {reason}");

    if !response.is_resume {
        return Classification::rejected(RejectReason::NotAResume, rationale);
    }

    match response.confidence.as_str() {
        "high" | "medium" => Classification::accepted(rationale),
        other => {
            warn!(
                confidence = %other,
                "Resume verdict without usable confidence, rejecting"
            );
            Classification::rejected(RejectReason::NotAResume, rationale)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::CompletionResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockClassifyLlm {
        response: String,
        calls: AtomicUsize,
    }

    impl MockClassifyLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for MockClassifyLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

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
            Err(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "connection reset".into(),
            })
        }
    }

    #[tokio::test]
    async fn blank_text_rejects_without_model_call() {
        let llm = Arc::new(MockClassifyLlm::new(
            r#"{"is_resume": true, "confidence": "high"}"#,
        ));
        let classifier = DocumentClassifier::new(llm.clone());

        let verdict = classifier.classify("   \n\t ").await.unwrap();
        assert!(!verdict.is_resume);
        assert_eq!(verdict.reject_reason, Some(RejectReason::Unreadable));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confident_resume_verdict_is_accepted() {
        let llm = Arc::new(MockClassifyLlm::new(
            r#"{"is_resume": true, "document_type": "resume", "confidence": "high", "reason": "work history and skills sections"}"#,
        ));
        let classifier = DocumentClassifier::new(llm.clone());

        let verdict = classifier
            .classify("Rahul Kumar\nSoftware Engineer\nExperience: ...")
            .await
            .unwrap();
        assert!(verdict.is_resume);
        assert!(verdict.rationale.contains("resume"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invoice_is_rejected() {
        let llm = Arc::new(MockClassifyLlm::new(
            r#"{"is_resume": false, "document_type": "invoice", "confidence": "high", "reason": "billing line items and totals"}"#,
        ));
        let classifier = DocumentClassifier::new(llm);

        let verdict = classifier
            .classify("INVOICE #1042\nAmount due: $500")
            .await
            .unwrap();
        assert!(!verdict.is_resume);
        assert_eq!(verdict.reject_reason, Some(RejectReason::NotAResume));
        assert!(verdict.rationale.contains("invoice"));
    }

    #[tokio::test]
    async fn fenced_json_verdict_parses() {
        let llm = Arc::new(MockClassifyLlm::new(
            "```json\n{\"is_resume\": true, \"document_type\": \"resume\", \"confidence\": \"medium\", \"reason\": \"education section\"}\n```",
        ));
        let classifier = DocumentClassifier::new(llm);

        let verdict = classifier.classify("B.Tech 2021, skills: Rust").await.unwrap();
        assert!(verdict.is_resume);
    }

    #[tokio::test]
    async fn malformed_verdict_fails_closed() {
        let llm = Arc::new(MockClassifyLlm::new(
            "I believe this document is probably a resume.",
        ));
        let classifier = DocumentClassifier::new(llm);

        let verdict = classifier.classify("some document text").await.unwrap();
        assert!(!verdict.is_resume);
        assert_eq!(verdict.reject_reason, Some(RejectReason::NotAResume));
    }

    #[tokio::test]
    async fn low_confidence_resume_fails_closed() {
        let llm = Arc::new(MockClassifyLlm::new(
            r#"{"is_resume": true, "document_type": "resume", "confidence": "low", "reason": "fragmentary text"}"#,
        ));
        let classifier = DocumentClassifier::new(llm);

        let verdict = classifier.classify("...skills?...").await.unwrap();
        assert!(!verdict.is_resume);
    }

    #[tokio::test]
    async fn transport_fault_propagates() {
        let classifier = DocumentClassifier::new(Arc::new(FailingLlm));
        let err = classifier.classify("resume text").await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }

    #[test]
    fn user_prompt_truncates_long_documents() {
        let long_text = "x".repeat(5000);
        let prompt = build_classify_user_prompt(&long_text);
        assert!(prompt.len() < CLASSIFY_PREVIEW_CHARS + 100);
    }

    #[test]
    fn system_prompt_demands_json() {
        let prompt = build_classify_system_prompt();
        assert!(prompt.contains("is_resume"));
        assert!(prompt.contains("confidence"));
        assert!(prompt.contains("JSON"));
    }
}
