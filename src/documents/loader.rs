use crate::core::errors::ApiError;

const MAX_FILENAME_BYTES: usize = 255;

/// Reduces a client-supplied upload name to a bare file name.
///
/// Browsers may send a full client path, so everything up to the last `/` or
/// `\` is dropped. Hidden names, `..` and control characters are rejected.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty()
        || base.starts_with('.')
        || base.contains("..")
        || base.len() > MAX_FILENAME_BYTES
        || base.chars().any(|c| c.is_control() || c == ':')
    {
        return None;
    }
    Some(base.to_string())
}

/// Document names arriving in a URL must already be bare file names.
pub fn validate_document_name(name: &str) -> Option<&str> {
    match sanitize_filename(name) {
        Some(clean) if clean == name => Some(name),
        _ => None,
    }
}

pub fn is_pdf(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Extracts the text layer of a PDF on the blocking pool.
pub async fn extract_pdf_text(filename: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
    let unreadable = || ApiError::BadRequest(format!("Could not read PDF '{}'", filename));

    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| {
            // pdf-extract panics on some malformed inputs
            tracing::warn!(file = %filename, "PDF extraction aborted: {}", e);
            unreadable()
        })?;

    extracted.map_err(|e| {
        tracing::warn!(file = %filename, "PDF extraction failed: {}", e);
        unreadable()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_plain_names_and_strips_client_paths() {
        assert_eq!(sanitize_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\Q3 report.pdf").as_deref(),
            Some("Q3 report.pdf")
        );
        assert_eq!(sanitize_filename("/tmp/upload/a.pdf").as_deref(), Some("a.pdf"));
    }

    #[test]
    fn sanitize_rejects_traversal_and_hidden_names() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("docs/"), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename(".env"), None);
        assert_eq!(sanitize_filename("a..pdf"), None);
        assert_eq!(sanitize_filename("bad\u{0}name.pdf"), None);
        assert_eq!(sanitize_filename(&"x".repeat(300)), None);
    }

    #[test]
    fn document_names_must_be_bare() {
        assert_eq!(validate_document_name("a.pdf"), Some("a.pdf"));
        assert_eq!(validate_document_name("dir/a.pdf"), None);
        assert_eq!(validate_document_name("../a.pdf"), None);
    }

    #[test]
    fn pdf_detection_is_case_insensitive() {
        assert!(is_pdf("paper.pdf"));
        assert!(is_pdf("PAPER.PDF"));
        assert!(!is_pdf("paper.pdf.txt"));
        assert!(!is_pdf("pdf"));
    }

    #[tokio::test]
    async fn extracts_text_layer() {
        let bytes = include_bytes!("../../tests/fixtures/rust-notes.pdf").to_vec();

        let text = extract_pdf_text("rust-notes.pdf", bytes).await.unwrap();

        assert!(text.contains("memory safety"), "{text:?}");
        assert!(text.contains("asynchronous runtime"), "{text:?}");
    }

    #[tokio::test]
    async fn garbage_bytes_are_a_bad_request() {
        let err = extract_pdf_text("junk.pdf", b"definitely not a pdf".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
