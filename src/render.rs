//! Attachment-to-text rendering.
//!
//! Best-effort plain-text extraction from attachment bytes. PDF parsing is
//! CPU-bound; the orchestrator runs this under `spawn_blocking`.

use crate::error::RenderError;

/// Render attachment bytes to plain text.
///
/// PDFs go through `pdf-extract`; `text/*` types are decoded as UTF-8
/// (lossy). Anything else is refused as unsupported — the caller treats
/// both failure modes as an unreadable document, not a pipeline fault.
/// Output is whitespace-normalized; an empty result is returned as-is
/// (the classifier short-circuits on blank text).
pub fn render_text(bytes: &[u8], mime_type: &str, filename: &str) -> Result<String, RenderError> {
    if is_pdf(mime_type, filename) {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| RenderError::Unreadable {
                filename: filename.to_string(),
                reason: e.to_string(),
            })?;
        return Ok(normalize_whitespace(&text));
    }

    if is_plain_text(mime_type, filename) {
        return Ok(normalize_whitespace(&String::from_utf8_lossy(bytes)));
    }

    Err(RenderError::UnsupportedType {
        filename: filename.to_string(),
        mime_type: mime_type.to_string(),
    })
}

fn is_pdf(mime_type: &str, filename: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    if mime == "application/pdf" {
        return true;
    }
    // Some senders ship PDFs as octet-stream; trust the extension then.
    mime == "application/octet-stream" && has_extension(filename, "pdf")
}

fn is_plain_text(mime_type: &str, filename: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    mime.starts_with("text/") || has_extension(filename, "txt") || has_extension(filename, "md")
}

fn has_extension(filename: &str, ext: &str) -> bool {
    filename
        .rsplit('.')
        .next()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Collapse runs of whitespace (PDF extraction is full of layout artifacts).
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_text() {
        let text = render_text(b"Rahul Kumar\nBackend Engineer", "text/plain", "resume.txt")
            .unwrap();
        assert_eq!(text, "Rahul Kumar Backend Engineer");
    }

    #[test]
    fn normalizes_layout_whitespace() {
        let text = render_text(
            b"Name:   Rahul\t\tKumar \r\n\r\n Skills:  Rust",
            "text/plain",
            "resume.txt",
        )
        .unwrap();
        assert_eq!(text, "Name: Rahul Kumar Skills: Rust");
    }

    #[test]
    fn empty_text_renders_empty() {
        let text = render_text(b"   \n\t ", "text/plain", "blank.txt").unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn garbage_pdf_is_unreadable() {
        let err = render_text(b"not a pdf at all", "application/pdf", "resume.pdf").unwrap_err();
        assert!(matches!(err, RenderError::Unreadable { .. }));
    }

    #[test]
    fn octet_stream_with_pdf_extension_is_treated_as_pdf() {
        let err = render_text(b"junk", "application/octet-stream", "cv.PDF").unwrap_err();
        // Routed through the PDF parser, which rejects the bytes.
        assert!(matches!(err, RenderError::Unreadable { .. }));
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let err = render_text(b"PK\x03\x04", "application/zip", "archive.zip").unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedType { .. }));
    }

    #[test]
    fn markdown_extension_counts_as_text() {
        let text = render_text(b"# Resume", "application/octet-stream", "cv.md").unwrap();
        assert_eq!(text, "# Resume");
    }
}
