//! PDF document adapter.

use super::{DocumentAdapter, ExtractedDocument};
use digestkit_shared::{ContentType, FetchError};
use url::Url;

/// A leading paragraph this short is taken to be the document title.
const MAX_TITLE_WORDS: usize = 15;

/// Extracts the text layer of a PDF.
pub struct PdfAdapter;

impl DocumentAdapter for PdfAdapter {
    fn content_type(&self) -> ContentType {
        ContentType::Pdf
    }

    fn extract(&self, url: &Url, body: &[u8]) -> Result<ExtractedDocument, FetchError> {
        let text = digestkit_extract::pdf_to_text(body).map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(ExtractedDocument {
            title: title_from_text(&text),
            text,
            raw: None,
        })
    }

    fn name(&self) -> &str {
        "pdf"
    }
}

/// First paragraph, when it is short enough to be a heading.
fn title_from_text(text: &str) -> Option<String> {
    let first = text.split("\n\n").next()?.trim();
    let words = digestkit_extract::count_words(first);
    (words > 0 && words <= MAX_TITLE_WORDS).then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_first_paragraph_is_title() {
        let text = "Attention Is All You Need\n\nThe dominant sequence transduction models are based on recurrent networks.";
        assert_eq!(
            title_from_text(text).as_deref(),
            Some("Attention Is All You Need")
        );
    }

    #[test]
    fn long_first_paragraph_is_not_title() {
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen fifteen sixteen";
        assert!(title_from_text(text).is_none());
        assert!(title_from_text("").is_none());
    }

    #[test]
    fn invalid_pdf_is_parse_error() {
        let url = Url::parse("https://example.com/paper.pdf").unwrap();
        let err = PdfAdapter.extract(&url, b"<html>not a pdf</html>").unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert_eq!(err.url(), "https://example.com/paper.pdf");
    }
}
