//! HTML article adapter.

use super::{DocumentAdapter, ExtractedDocument};
use digestkit_shared::{ContentType, FetchError};
use url::Url;

/// Extracts the main readable content of an HTML page.
pub struct WebAdapter;

impl DocumentAdapter for WebAdapter {
    fn content_type(&self) -> ContentType {
        ContentType::Web
    }

    fn extract(&self, url: &Url, body: &[u8]) -> Result<ExtractedDocument, FetchError> {
        let html = String::from_utf8_lossy(body).into_owned();

        let extracted = digestkit_extract::html_to_text(&html).map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(ExtractedDocument {
            title: extracted.title,
            text: extracted.text,
            raw: Some(html),
        })
    }

    fn name(&self) -> &str {
        "web"
    }
}
