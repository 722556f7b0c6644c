//! Video transcript retrieval.
//!
//! YouTube publishes caption tracks for most videos. The watch page embeds
//! a `captionTracks` JSON array whose entries carry a signed `baseUrl`; that
//! URL returns the timed text as XML cues. Other video hosts are classified
//! as video but have no transcript source, which is an ordinary fetch
//! failure.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use digestkit_shared::FetchError;

use super::ExtractedDocument;
use crate::rate_limit::HostRateLimiter;

/// Default watch-page origin.
const YOUTUBE_BASE: &str = "https://www.youtube.com";

/// Transcript cues grouped per paragraph.
const SENTENCES_PER_PARAGRAPH: usize = 5;

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{6,20}$").expect("video id regex"));

static CUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:text|p)\b[^>]*>(.*?)</(?:text|p)>").expect("cue regex")
});

static INNER_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("inner tag regex"));

/// One entry of the watch page's `captionTracks` array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrack {
    base_url: String,
    #[serde(default)]
    language_code: String,
    /// `"asr"` for auto-generated captions.
    #[serde(default)]
    kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Fetches and flattens video transcripts.
pub struct TranscriptClient {
    client: Client,
    base_url: String,
}

impl TranscriptClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: YOUTUBE_BASE.to_string(),
        }
    }

    /// Point watch-page requests at another origin (mirrors, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch the transcript for a video URL.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &Url,
        limiter: &HostRateLimiter,
    ) -> Result<ExtractedDocument, FetchError> {
        let transcript_err = |message: &str| FetchError::Transcript {
            url: url.to_string(),
            message: message.to_string(),
        };

        let video_id = youtube_video_id(url)
            .ok_or_else(|| transcript_err("no transcript source for this video URL"))?;

        let mut watch_url = Url::parse(&format!("{}/watch", self.base_url))
            .map_err(|e| transcript_err(&e.to_string()))?;
        watch_url.query_pairs_mut().append_pair("v", &video_id);

        let page = self.get_text(url, &watch_url, limiter).await?;
        let title = watch_page_title(&page);

        let tracks = caption_tracks(&page);
        let track = pick_track(&tracks).ok_or_else(|| transcript_err("video has no captions"))?;
        debug!(video_id = %video_id, language = %track.language_code, "caption track selected");

        let track_url = Url::parse(&track.base_url)
            .or_else(|_| Url::parse(&format!("{}{}", self.base_url, track.base_url)))
            .map_err(|e| transcript_err(&format!("bad caption url: {e}")))?;
        let xml = self.get_text(url, &track_url, limiter).await?;

        let cues = parse_cues(&xml);
        let text = digestkit_extract::transcript_to_text(&cues, SENTENCES_PER_PARAGRAPH);

        Ok(ExtractedDocument {
            title,
            text,
            raw: None,
        })
    }

    async fn get_text(
        &self,
        article_url: &Url,
        target: &Url,
        limiter: &HostRateLimiter,
    ) -> Result<String, FetchError> {
        if let Some(host) = target.host_str() {
            limiter.acquire(host).await;
        }

        let response = self
            .client
            .get(target.as_str())
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.8")
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: article_url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transcript {
                url: article_url.to_string(),
                message: format!("{target} returned HTTP {status}"),
            });
        }

        response.text().await.map_err(|e| FetchError::Network {
            url: article_url.to_string(),
            message: format!("body read failed: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// The video id of a YouTube URL, in any of its common shapes.
pub fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut segments = url.path_segments()?;

    let candidate = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else if host == "youtube.com"
        || host.ends_with(".youtube.com")
        || host.ends_with("youtube-nocookie.com")
    {
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| VIDEO_ID_RE.is_match(id))
}

/// Parse the `captionTracks` array embedded in a watch page.
fn caption_tracks(page: &str) -> Vec<CaptionTrack> {
    const KEY: &str = "\"captionTracks\":";
    let Some(start) = page.find(KEY) else {
        return Vec::new();
    };

    // The array is followed by more player JSON; only the first value is read.
    let json = &page[start + KEY.len()..];
    serde_json::Deserializer::from_str(json)
        .into_iter::<Vec<CaptionTrack>>()
        .next()
        .and_then(|r| r.ok())
        .unwrap_or_default()
}

/// Prefer manual English captions, then any English, then the first track.
fn pick_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    let english = |t: &&CaptionTrack| t.language_code.starts_with("en");
    tracks
        .iter()
        .filter(english)
        .find(|t| t.kind.as_deref() != Some("asr"))
        .or_else(|| tracks.iter().find(english))
        .or_else(|| tracks.first())
}

fn watch_page_title(page: &str) -> Option<String> {
    let doc = Html::parse_document(page);
    let meta = |selector: &str| {
        Selector::parse(selector)
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .and_then(|el| el.value().attr("content").map(str::to_string))
    };

    meta("meta[name=\"title\"]")
        .or_else(|| meta("meta[property=\"og:title\"]"))
        .or_else(|| {
            Selector::parse("title")
                .ok()
                .and_then(|sel| doc.select(&sel).next())
                .map(|el| el.text().collect::<String>())
                .map(|t| t.trim_end_matches(" - YouTube").to_string())
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Text of every cue in a timed-text document, entities decoded.
fn parse_cues(xml: &str) -> Vec<String> {
    CUE_RE
        .captures_iter(xml)
        .map(|caps| {
            let inner = INNER_TAG_RE.replace_all(&caps[1], "");
            // Timed text is frequently entity-encoded twice (`&amp;#39;`).
            let once = decode_entities(&inner);
            if once.contains('&') {
                decode_entities(&once)
            } else {
                once
            }
        })
        .map(|cue| cue.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|cue| !cue.is_empty())
        .collect()
}

fn decode_entities(s: &str) -> String {
    Html::parse_fragment(s).root_element().text().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn video_id_shapes() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(youtube_video_id(&url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42")), id);
        assert_eq!(youtube_video_id(&url("https://youtu.be/dQw4w9WgXcQ")), id);
        assert_eq!(youtube_video_id(&url("https://youtube.com/shorts/dQw4w9WgXcQ")), id);
        assert_eq!(youtube_video_id(&url("https://m.youtube.com/embed/dQw4w9WgXcQ")), id);
        assert_eq!(youtube_video_id(&url("https://www.youtube.com/channel/UCxyz")), None);
        assert_eq!(youtube_video_id(&url("https://vimeo.com/12345678")), None);
    }

    #[test]
    fn caption_tracks_from_watch_page() {
        let page = r#"<script>var ytInitialPlayerResponse = {"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=x&lang=de","name":{"runs":[{"text":"German"}]},"languageCode":"de"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=x&lang=en&kind=asr","languageCode":"en","kind":"asr"}],"audioTracks":[]}}};</script>"#;

        let tracks = caption_tracks(page);
        assert_eq!(tracks.len(), 2);
        assert_eq!(
            tracks[1].base_url,
            "https://www.youtube.com/api/timedtext?v=x&lang=en&kind=asr"
        );

        let picked = pick_track(&tracks).unwrap();
        assert_eq!(picked.language_code, "en");
    }

    #[test]
    fn no_caption_tracks() {
        assert!(caption_tracks("<html>no captions here</html>").is_empty());
        assert!(pick_track(&[]).is_none());
    }

    #[test]
    fn cues_are_decoded() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript><text start="0" dur="1.2">it&amp;#39;s   a</text><text start="1.2" dur="2">test &amp;amp; more</text><text start="3" dur="1"></text></transcript>"#;
        assert_eq!(parse_cues(xml), vec!["it's a", "test & more"]);
    }

    #[test]
    fn srv3_cues_with_inner_segments() {
        let xml = r#"<timedtext><body><p t="0" d="900"><s>hello</s><s> world</s></p></body></timedtext>"#;
        assert_eq!(parse_cues(xml), vec!["hello world"]);
    }

    #[test]
    fn title_from_watch_page() {
        let page = r#"<html><head><title>My Talk - YouTube</title><meta name="title" content="My Talk"></head></html>"#;
        assert_eq!(watch_page_title(page).as_deref(), Some("My Talk"));

        let page = r#"<html><head><title>Other Talk - YouTube</title></head></html>"#;
        assert_eq!(watch_page_title(page).as_deref(), Some("Other Talk"));
    }
}
