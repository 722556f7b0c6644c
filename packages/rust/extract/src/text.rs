//! Plain-text helpers shared by extractors, the summarizer fallback and
//! prompt building.

use crate::cleanup::collapse_whitespace;

/// Whitespace-separated word count.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The first `n` words, single-space joined.
pub fn first_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Up to `n` leading sentences. A sentence ends at `.`, `!` or `?`
/// followed by whitespace or end of text.
pub fn first_sentences(text: &str, n: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if sentences.len() == n {
            return sentences;
        }
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + c.len_utf8();
                let sentence = collapse_whitespace(&text[start..end]);
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    if sentences.len() < n {
        let tail = collapse_whitespace(&text[start..]);
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

/// Cut `text` to at most `max_chars` characters on a char boundary,
/// preferring the last whitespace before the limit.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        None => text,
        Some((byte_idx, _)) => {
            let head = &text[..byte_idx];
            match head.rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => &head[..ws],
                _ => head,
            }
        }
    }
}

/// Join timed transcript cues into readable text.
///
/// Cues are short caption fragments; they are joined with spaces and
/// regrouped into paragraphs of `sentences_per_paragraph` sentences.
pub fn transcript_to_text(cues: &[String], sentences_per_paragraph: usize) -> String {
    let joined = cues
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let joined = collapse_whitespace(&joined);
    if joined.is_empty() {
        return joined;
    }

    let sentences = first_sentences(&joined, usize::MAX);
    sentences
        .chunks(sentences_per_paragraph.max(1))
        .map(|chunk| chunk.join(" "))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_helpers() {
        let text = "one two\n\nthree   four five";
        assert_eq!(count_words(text), 5);
        assert_eq!(first_words(text, 3), "one two three");
        assert_eq!(first_words(text, 50), "one two three four five");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let text = "Rust 1.85 shipped. It adds edition 2024! Is it good? Yes";
        assert_eq!(
            first_sentences(text, 10),
            vec![
                "Rust 1.85 shipped.",
                "It adds edition 2024!",
                "Is it good?",
                "Yes"
            ]
        );
        assert_eq!(first_sentences(text, 2).len(), 2);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("héllo wörld again", 9), "héllo");
        assert_eq!(truncate_chars("ééééé", 3), "ééé");
    }

    #[test]
    fn transcript_cues_become_paragraphs() {
        let cues: Vec<String> = ["hello and", "welcome back.", "today we look", "at borrowing.", "", "enjoy."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            transcript_to_text(&cues, 2),
            "hello and welcome back. today we look at borrowing.\n\nenjoy."
        );
    }
}
