//! Digest assembly.
//!
//! Pure aggregation of clusters, articles, summaries and narrative text into
//! a [`Digest`]. Writing the result to disk is a separate step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, instrument};

use digestkit_shared::{
    Article, ArticleId, Digest, DigestError, DigestMetadata, DigestSection, Result, Summary,
    TopicCluster,
};

use crate::narrative::Narrative;

/// Decides the order of digest sections.
pub trait OrderingPolicy: Send + Sync {
    fn order(&self, sections: &mut Vec<DigestSection>);
}

/// Keeps the clusterer's order (first member's input position).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOrdering;

impl OrderingPolicy for IdentityOrdering {
    fn order(&self, _sections: &mut Vec<DigestSection>) {}
}

/// Largest sections first; equal sizes keep their previous order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirst;

impl OrderingPolicy for LargestFirst {
    fn order(&self, sections: &mut Vec<DigestSection>) {
        sections.sort_by(|a, b| b.articles.len().cmp(&a.articles.len()));
    }
}

/// Build the digest. Articles appear in their cluster's member order and
/// each carries the summary generated for it, when there is one.
#[instrument(skip_all, fields(clusters = clusters.len(), articles = articles.len()))]
pub fn assemble(
    title: &str,
    clusters: &[TopicCluster],
    articles: &[Article],
    summaries: &[Summary],
    narrative: &Narrative,
    ordering: &dyn OrderingPolicy,
) -> Digest {
    let by_id: HashMap<ArticleId, &Article> = articles.iter().map(|a| (a.id, a)).collect();
    let mut summary_for: HashMap<ArticleId, &Summary> = HashMap::new();
    for s in summaries {
        for id in &s.article_ids {
            summary_for.entry(*id).or_insert(s);
        }
    }

    let mut sections: Vec<DigestSection> = clusters
        .iter()
        .enumerate()
        .map(|(i, cluster)| {
            let members: Vec<Article> = cluster
                .article_ids
                .iter()
                .filter_map(|id| by_id.get(id).map(|a| (*a).clone()))
                .collect();
            let member_summaries = members
                .iter()
                .filter_map(|a| summary_for.get(&a.id).map(|s| (*s).clone()))
                .collect();
            DigestSection {
                cluster: cluster.clone(),
                articles: members,
                summaries: member_summaries,
                narrative: narrative
                    .cluster_narratives
                    .get(i)
                    .cloned()
                    .unwrap_or_default(),
            }
        })
        .collect();
    ordering.order(&mut sections);

    let metadata = DigestMetadata {
        article_count: sections.iter().map(|s| s.articles.len()).sum(),
        section_count: sections.len(),
        total_word_count: sections
            .iter()
            .flat_map(|s| &s.articles)
            .map(|a| a.word_count)
            .sum(),
        fallback_summaries: sections
            .iter()
            .flat_map(|s| &s.summaries)
            .filter(|s| s.is_fallback())
            .count(),
    };
    debug!(
        sections = metadata.section_count,
        words = metadata.total_word_count,
        "digest assembled"
    );

    Digest {
        title: title.to_string(),
        generated_at: Utc::now(),
        executive_summary: narrative.executive_summary.clone(),
        sections,
        narrative_degraded: narrative.degraded,
        metadata,
    }
}

/// Write the digest as pretty JSON, replacing `path` atomically.
pub fn write_digest(digest: &Digest, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(digest)
        .map_err(|e| DigestError::validation(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "digest.json".into());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp, json).map_err(|e| DigestError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| DigestError::io(path, e))?;

    info!(path = %path.display(), sections = digest.sections.len(), "digest written");
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_article, sample_summary};
    use digestkit_shared::FALLBACK_MODEL;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dk-assembler-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cluster(label: &str, members: &[&Article]) -> TopicCluster {
        TopicCluster {
            label: label.into(),
            article_ids: members.iter().map(|a| a.id).collect(),
            centroid: vec![1.0, 0.0],
            cohesion: 0.8,
        }
    }

    struct Fixture {
        articles: Vec<Article>,
        summaries: Vec<Summary>,
        clusters: Vec<TopicCluster>,
        narrative: Narrative,
    }

    fn fixture() -> Fixture {
        let a = sample_article("https://example.com/a", "Tokio tasks", "one two three");
        let b = sample_article("https://example.com/b", "Gardening", "four five");
        let c = sample_article("https://example.com/c", "Tokio timers", "six seven eight nine");
        let summaries = vec![
            sample_summary(&a, "m"),
            sample_summary(&b, FALLBACK_MODEL),
            sample_summary(&c, "m"),
        ];
        let clusters = vec![cluster("Tokio", &[&a, &c]), cluster("Gardening", &[&b])];
        Fixture {
            articles: vec![a, b, c],
            summaries,
            clusters,
            narrative: Narrative {
                executive_summary: "Two topics this week.".into(),
                cluster_narratives: vec!["Tokio story.".into(), "Garden story.".into()],
                degraded: false,
            },
        }
    }

    #[test]
    fn assemble_keeps_cluster_order_and_members() {
        let f = fixture();
        let digest = assemble(
            "Weekly",
            &f.clusters,
            &f.articles,
            &f.summaries,
            &f.narrative,
            &IdentityOrdering,
        );

        assert_eq!(digest.title, "Weekly");
        assert_eq!(digest.executive_summary, "Two topics this week.");
        assert_eq!(digest.sections.len(), 2);

        let tokio = &digest.sections[0];
        assert_eq!(tokio.cluster.label, "Tokio");
        assert_eq!(tokio.narrative, "Tokio story.");
        let urls: Vec<&str> = tokio.articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/c"]);
        assert_eq!(tokio.summaries.len(), 2);
        assert_eq!(tokio.summaries[1].source_url, "https://example.com/c");

        assert_eq!(
            digest.metadata,
            DigestMetadata {
                article_count: 3,
                section_count: 2,
                total_word_count: 9,
                fallback_summaries: 1,
            }
        );
    }

    #[test]
    fn largest_first_reorders_sections() {
        let mut f = fixture();
        f.clusters.reverse();
        f.narrative.cluster_narratives.reverse();

        let digest = assemble(
            "Weekly",
            &f.clusters,
            &f.articles,
            &f.summaries,
            &f.narrative,
            &LargestFirst,
        );
        assert_eq!(digest.sections[0].cluster.label, "Tokio");
        assert_eq!(digest.sections[0].narrative, "Tokio story.");
        assert_eq!(digest.sections[1].cluster.label, "Gardening");
    }

    #[test]
    fn write_digest_replaces_file_without_leftovers() {
        let f = fixture();
        let digest = assemble(
            "Weekly",
            &f.clusters,
            &f.articles,
            &f.summaries,
            &f.narrative,
            &IdentityOrdering,
        );
        let tmp = temp_dir();
        let path = tmp.join("out").join("digest.json");

        write_digest(&digest, &path).unwrap();
        write_digest(&digest, &path).unwrap();

        let parsed: Digest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, digest);

        let leftovers: Vec<_> = std::fs::read_dir(tmp.join("out"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        std::fs::remove_dir_all(&tmp).ok();
    }
}
