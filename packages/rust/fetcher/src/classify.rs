//! Content-type classification from URLs and response metadata.

use digestkit_shared::ContentType;
use url::Url;

/// Hosts whose pages are treated as video. Subdomains match too.
const VIDEO_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com", "vimeo.com"];

/// PDF magic bytes.
const PDF_MAGIC: &[u8] = b"%PDF-";

fn host_is(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Classify a URL before fetching it.
///
/// Priority: known video host, then a `.pdf` path, then web.
pub fn classify(url: &Url) -> ContentType {
    if let Some(host) = url.host_str() {
        let host = host.to_ascii_lowercase();
        if VIDEO_HOSTS.iter().any(|d| host_is(&host, d)) {
            return ContentType::Video;
        }
    }

    if url.path().to_ascii_lowercase().ends_with(".pdf") {
        return ContentType::Pdf;
    }

    ContentType::Web
}

/// Refine the classification of a non-video URL once its response is in.
///
/// A `.pdf` path, an `application/pdf` content type, a `.pdf` attachment
/// filename, or the PDF magic prefix all mean PDF.
pub fn classify_response(
    url: &Url,
    content_type: Option<&str>,
    content_disposition: Option<&str>,
    body: &[u8],
) -> ContentType {
    match classify(url) {
        ContentType::Video => return ContentType::Video,
        ContentType::Pdf => return ContentType::Pdf,
        ContentType::Web => {}
    }

    let is_pdf_mime = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/pdf"))
        .unwrap_or(false);

    let is_pdf_attachment = content_disposition
        .map(|cd| {
            let cd = cd.to_ascii_lowercase();
            cd.contains(".pdf\"") || cd.trim_end().ends_with(".pdf")
        })
        .unwrap_or(false);

    if is_pdf_mime || is_pdf_attachment || body.starts_with(PDF_MAGIC) {
        ContentType::Pdf
    } else {
        ContentType::Web
    }
}
