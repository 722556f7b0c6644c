//! URL canonicalization used for deduplication and cache keys.

use url::Url;

/// Query parameters that only carry attribution, never content.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_hsenc",
    "_hsmi", "mkt_tok", "ref", "ref_src", "ref_url", "spm", "si",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical form of an HTTP(S) URL, or `None` when it is not fetchable.
///
/// Scheme and host are lowercased and default ports dropped by [`Url`]
/// itself; on top of that the fragment, tracking parameters, an empty query
/// and a trailing slash on non-root paths are removed.
pub fn normalize_url(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().filter(|h| !h.is_empty())?;

    url.set_fragment(None);

    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let kept: Vec<&(String, String)> =
            pairs.iter().filter(|(k, _)| !is_tracking_param(k)).collect();

        if kept.is_empty() {
            url.set_query(None);
        } else if kept.len() != pairs.len() {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        normalize_url(s).expect("valid url").to_string()
    }

    #[test]
    fn lowercases_and_drops_fragment_and_default_port() {
        assert_eq!(
            norm("HTTPS://Example.COM:443/Post#comments"),
            "https://example.com/Post"
        );
    }

    #[test]
    fn strips_tracking_params_only() {
        assert_eq!(
            norm("https://example.com/a?utm_source=x&id=7&fbclid=abc"),
            "https://example.com/a?id=7"
        );
        assert_eq!(
            norm("https://example.com/a?utm_medium=email&UTM_campaign=y"),
            "https://example.com/a"
        );
    }

    #[test]
    fn keeps_untouched_query_verbatim() {
        assert_eq!(
            norm("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn trims_trailing_slash_except_root() {
        assert_eq!(norm("https://example.com/blog/"), "https://example.com/blog");
        assert_eq!(norm("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_none());
        assert!(normalize_url("not a url").is_none());
    }
}
