//! Cross-article narrative synthesis.
//!
//! Each cluster gets its own narrative grounded in the summary of every
//! member, with a few articles singled out as highlights. A second pass
//! turns the cluster narratives into the executive summary. Collaborator
//! failures never abort: the affected text is rebuilt from key points and
//! the result is marked degraded.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use digestkit_extract::first_sentences;
use digestkit_llm::TextGenerator;
use digestkit_shared::{Article, ArticleId, NarrativeConfig, Summary, TopicCluster};

use crate::retry::{RetryPolicy, with_retries};

/// Narrative text for a digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub executive_summary: String,
    /// One narrative per cluster, in cluster order.
    pub cluster_narratives: Vec<String>,
    /// Some text came from the key-point fallback.
    pub degraded: bool,
}

/// Writes narrative text that ties clustered articles together.
#[async_trait]
pub trait NarrativeSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        clusters: &[TopicCluster],
        articles: &[Article],
        summaries: &[Summary],
    ) -> Narrative;
}

/// [`NarrativeSynthesizer`] backed by a [`TextGenerator`].
pub struct LlmNarrativeSynthesizer {
    generator: Arc<dyn TextGenerator>,
    config: NarrativeConfig,
}

impl LlmNarrativeSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: NarrativeConfig) -> Self {
        Self { generator, config }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            initial: self.config.retry_initial,
        }
    }

    async fn generate(&self, prompt: &str, what: &'static str) -> Option<String> {
        match with_retries(self.policy(), what, || self.generator.generate_narrative(prompt)).await
        {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!(what, "empty narrative reply, using fallback");
                None
            }
            Err(e) => {
                warn!(what, error = %e, "narrative generation failed, using fallback");
                None
            }
        }
    }
}

/// A cluster's members with their summaries, highlights first.
struct Section<'a> {
    cluster: &'a TopicCluster,
    members: Vec<(&'a Article, Option<&'a Summary>)>,
    highlights: Vec<usize>,
}

#[async_trait]
impl NarrativeSynthesizer for LlmNarrativeSynthesizer {
    #[instrument(skip_all, fields(clusters = clusters.len(), articles = articles.len()))]
    async fn synthesize(
        &self,
        clusters: &[TopicCluster],
        articles: &[Article],
        summaries: &[Summary],
    ) -> Narrative {
        let sections = build_sections(clusters, articles, summaries, self.config.highlights);
        if sections.is_empty() {
            return Narrative::default();
        }

        let mut degraded = false;
        let mut cluster_narratives = Vec::with_capacity(sections.len());
        for section in &sections {
            let prompt = cluster_prompt(section, self.config.target_words);
            match self.generate(&prompt, "cluster narrative").await {
                Some(text) => cluster_narratives.push(text),
                None => {
                    degraded = true;
                    cluster_narratives.push(cluster_fallback(section));
                }
            }
        }

        let prompt = executive_prompt(&sections, &cluster_narratives, self.config.target_words);
        let executive_summary = match self.generate(&prompt, "executive summary").await {
            Some(text) => text,
            None => {
                degraded = true;
                sections
                    .iter()
                    .map(cluster_fallback)
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        };

        debug!(degraded, "narrative synthesized");
        Narrative {
            executive_summary,
            cluster_narratives,
            degraded,
        }
    }
}

// ---------------------------------------------------------------------------
// Sections and highlights
// ---------------------------------------------------------------------------

fn build_sections<'a>(
    clusters: &'a [TopicCluster],
    articles: &'a [Article],
    summaries: &'a [Summary],
    highlights: usize,
) -> Vec<Section<'a>> {
    let by_id: HashMap<ArticleId, (usize, &Article)> = articles
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id, (i, a)))
        .collect();
    let mut summary_for: HashMap<ArticleId, &Summary> = HashMap::new();
    for s in summaries {
        for id in &s.article_ids {
            summary_for.entry(*id).or_insert(s);
        }
    }

    clusters
        .iter()
        .map(|cluster| {
            let mut positioned: Vec<(usize, &Article)> = cluster
                .article_ids
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            positioned.sort_by_key(|(i, _)| *i);

            let highlights = highlight_order(&positioned)
                .into_iter()
                .take(highlights)
                .collect();
            let members = positioned
                .into_iter()
                .map(|(_, a)| (a, summary_for.get(&a.id).copied()))
                .collect();
            Section {
                cluster,
                members,
                highlights,
            }
        })
        .collect()
}

/// Member positions ranked by cluster confidence, then recency, then input
/// order. Articles without a confidence rank after those with one.
fn highlight_order(members: &[(usize, &Article)]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by(|&a, &b| {
        let (ia, aa) = members[a];
        let (ib, ab) = members[b];
        let conf = |x: &Article| x.cluster_confidence.unwrap_or(f32::NEG_INFINITY);
        conf(ab)
            .partial_cmp(&conf(aa))
            .unwrap_or(Ordering::Equal)
            .then_with(|| ab.fetched_at.cmp(&aa.fetched_at))
            .then_with(|| ia.cmp(&ib))
    });
    order
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn cluster_prompt(section: &Section<'_>, target_words: usize) -> String {
    let highlighted: Vec<&str> = section
        .highlights
        .iter()
        .map(|&i| section.members[i].0.display_title())
        .collect();

    let mut prompt = format!(
        "Write a narrative of about {target_words} words for the \"{label}\" section of a \
         reading digest. Connect the articles below: shared themes, points of disagreement \
         and what is new. Give particular attention to: {highlights}.\n\n\
         Articles in this section:\n",
        label = section.cluster.label,
        highlights = highlighted.join("; "),
    );

    for (article, summary) in &section.members {
        prompt.push_str(&format!("\n### {}\nSource: {}\n", article.display_title(), article.url));
        match summary {
            Some(s) => {
                prompt.push_str(&s.text);
                prompt.push('\n');
                for point in &s.key_points {
                    prompt.push_str(&format!("- {point}\n"));
                }
            }
            None => {
                prompt.push_str(&first_sentences(&article.text, 3).join(" "));
                prompt.push('\n');
            }
        }
    }
    prompt
}

fn executive_prompt(sections: &[Section<'_>], narratives: &[String], target_words: usize) -> String {
    let mut prompt = format!(
        "Write an executive summary of about {target_words} words for a reading digest. \
         It introduces the sections below and what ties them together.\n"
    );
    for (section, narrative) in sections.iter().zip(narratives) {
        prompt.push_str(&format!("\n## {}\n{narrative}\n", section.cluster.label));
    }
    prompt
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Cluster label followed by one bullet per highlighted article.
fn cluster_fallback(section: &Section<'_>) -> String {
    let mut text = section.cluster.label.clone();
    for &i in &section.highlights {
        let (article, summary) = section.members[i];
        text.push_str("\n- ");
        text.push_str(&top_point(article, summary));
    }
    text
}

fn top_point(article: &Article, summary: Option<&Summary>) -> String {
    summary
        .and_then(|s| {
            s.key_points
                .first()
                .cloned()
                .or_else(|| first_sentences(&s.text, 1).into_iter().next())
        })
        .unwrap_or_else(|| article.display_title().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGenerator, sample_article, sample_summary};
    use chrono::Duration as ChronoDuration;
    use digestkit_shared::GenerationError;
    use std::time::Duration;

    fn config() -> NarrativeConfig {
        NarrativeConfig {
            highlights: 3,
            target_words: 200,
            max_retries: 1,
            retry_initial: Duration::from_millis(10),
        }
    }

    fn fixture(n: usize) -> (Vec<Article>, Vec<Summary>, Vec<TopicCluster>) {
        let fetched_at = chrono::Utc::now();
        let articles: Vec<Article> = (0..n)
            .map(|i| {
                let mut a = sample_article(
                    &format!("https://example.com/{i}"),
                    &format!("Article {i}"),
                    "Body text.",
                );
                a.fetched_at = fetched_at;
                a
            })
            .collect();
        let summaries = articles.iter().map(|a| sample_summary(a, "m")).collect();
        let cluster = TopicCluster {
            label: "Async Rust".into(),
            article_ids: articles.iter().map(|a| a.id).collect(),
            centroid: vec![1.0],
            cohesion: 0.9,
        };
        (articles, summaries, vec![cluster])
    }

    #[tokio::test]
    async fn prompt_contains_every_member_summary() {
        let (articles, summaries, clusters) = fixture(5);
        let generator = Arc::new(ScriptedGenerator::new());
        let synth = LlmNarrativeSynthesizer::new(generator.clone(), config());

        let narrative = synth.synthesize(&clusters, &articles, &summaries).await;
        assert!(!narrative.degraded);
        assert_eq!(narrative.cluster_narratives, vec!["A scripted narrative."]);
        assert_eq!(narrative.executive_summary, "A scripted narrative.");

        let prompts = generator.narrative_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        for s in &summaries {
            assert!(prompts[0].contains(&s.text), "missing {}", s.text);
        }
        assert!(prompts[1].contains("## Async Rust"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_falls_back_to_bullets() {
        let (articles, summaries, clusters) = fixture(4);
        let failures = (0..4)
            .map(|_| Err(GenerationError::Transient("503".into())))
            .collect();
        let generator = Arc::new(ScriptedGenerator::new().with_narratives(failures));
        let synth = LlmNarrativeSynthesizer::new(generator, config());

        let narrative = synth.synthesize(&clusters, &articles, &summaries).await;
        assert!(narrative.degraded);

        let text = &narrative.cluster_narratives[0];
        assert!(text.starts_with("Async Rust\n- "));
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("- Point about Article 0"));
        assert_eq!(narrative.executive_summary, *text);
    }

    #[tokio::test]
    async fn global_failure_alone_is_degraded() {
        let (articles, summaries, clusters) = fixture(2);
        let generator = Arc::new(ScriptedGenerator::new().with_narratives(vec![
            Ok("Cluster story.".into()),
            Err(GenerationError::Permanent("rejected".into())),
        ]));
        let synth = LlmNarrativeSynthesizer::new(generator, config());

        let narrative = synth.synthesize(&clusters, &articles, &summaries).await;
        assert!(narrative.degraded);
        assert_eq!(narrative.cluster_narratives, vec!["Cluster story."]);
        assert!(narrative.executive_summary.starts_with("Async Rust\n- "));
    }

    #[test]
    fn highlights_rank_confidence_then_recency_then_position() {
        let now = chrono::Utc::now();
        let mut a = sample_article("https://example.com/a", "a", "x");
        let mut b = sample_article("https://example.com/b", "b", "x");
        let mut c = sample_article("https://example.com/c", "c", "x");
        let mut d = sample_article("https://example.com/d", "d", "x");
        a.cluster_confidence = Some(0.5);
        b.cluster_confidence = Some(0.9);
        c.cluster_confidence = Some(0.5);
        d.cluster_confidence = Some(0.5);
        a.fetched_at = now - ChronoDuration::hours(1);
        c.fetched_at = now;
        d.fetched_at = now;

        let members = vec![(0, &a), (1, &b), (2, &c), (3, &d)];
        assert_eq!(highlight_order(&members), vec![1, 2, 3, 0]);
    }

    #[test]
    fn fallback_point_prefers_key_point_then_sentence_then_title() {
        let article = sample_article("https://example.com/a", "Title", "x");
        let mut summary = sample_summary(&article, "m");
        assert_eq!(top_point(&article, Some(&summary)), "Point about Title");

        summary.key_points.clear();
        summary.text = "First sentence. Second one.".into();
        assert_eq!(top_point(&article, Some(&summary)), "First sentence.");

        assert_eq!(top_point(&article, None), "Title");
    }
}
