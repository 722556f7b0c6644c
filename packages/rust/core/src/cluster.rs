//! Topic clustering over article embeddings.
//!
//! Vectors are L2-normalized up front so every similarity below is a plain
//! dot product. k-means is seeded by farthest-point selection starting at
//! the first article, which keeps the result a pure function of the input
//! order: no randomness, ties always resolve to the lowest index.

use std::collections::HashMap;

use tracing::{debug, instrument};

use digestkit_shared::{
    Article, ArticleId, ClusterConfig, ClusterError, MAX_CLUSTERS, TopicCluster,
};

/// Vectors closer than this (in cosine) count as the same point.
const SAME_POINT: f32 = 1e-6;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "was", "are", "your", "into", "about",
    "what", "when", "how", "why", "have", "will", "their", "more", "than", "part",
];

/// Groups articles into topic clusters.
pub trait Clusterer: Send + Sync {
    /// Partition `articles` by their `embeddings` (same length, same order).
    /// Every article lands in exactly one cluster; clusters are ordered by
    /// the input position of their first member.
    fn cluster(
        &self,
        articles: &[Article],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<TopicCluster>, ClusterError>;
}

/// Deterministic k-means [`Clusterer`] with cohesion-driven k selection.
#[derive(Debug, Clone)]
pub struct KMeansClusterer {
    config: ClusterConfig,
}

impl KMeansClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Member indices per group, groups in first-member order.
    fn select_groups(&self, vectors: &[Vec<f32>], distinct: usize) -> Vec<Vec<usize>> {
        let all: Vec<usize> = (0..vectors.len()).collect();
        if distinct <= 1 {
            return vec![all];
        }

        let iterations = self.config.max_iterations;
        let max_k = self.config.max_k.clamp(1, MAX_CLUSTERS);
        if let Some(k) = self.config.k {
            let k = k.clamp(1, max_k).min(distinct);
            return kmeans(vectors, k, iterations);
        }

        let threshold = self.config.similarity_threshold;
        if cohesion(vectors, &all) > threshold {
            debug!("input already cohesive, keeping one cluster");
            return vec![all];
        }

        let upper = max_k.min(distinct);
        let lower = self.config.min_k.clamp(1, upper);
        let mut best: Option<(f32, Vec<Vec<usize>>)> = None;
        for k in lower..=upper {
            let groups = kmeans(vectors, k, iterations);
            let worst = groups
                .iter()
                .filter(|g| g.len() > 1)
                .map(|g| cohesion(vectors, g))
                .fold(1.0_f32, f32::min);
            if worst > threshold {
                debug!(k, "every cluster cohesive");
                return groups;
            }
            if best.as_ref().is_none_or(|(b, _)| worst > *b) {
                best = Some((worst, groups));
            }
        }
        best.map(|(_, groups)| groups).unwrap_or_else(|| vec![all])
    }
}

impl Clusterer for KMeansClusterer {
    #[instrument(skip_all, fields(articles = articles.len()))]
    fn cluster(
        &self,
        articles: &[Article],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<TopicCluster>, ClusterError> {
        if articles.is_empty() {
            return Err(ClusterError::EmptyInput);
        }
        if articles.len() != embeddings.len() {
            return Err(ClusterError::CountMismatch {
                articles: articles.len(),
                embeddings: embeddings.len(),
            });
        }

        let vectors = normalize_all(embeddings)?;
        let distinct = distinct_count(&vectors);
        let clusters: Vec<TopicCluster> = self
            .select_groups(&vectors, distinct)
            .into_iter()
            .map(|members| build_cluster(articles, &vectors, &members))
            .collect();

        debug!(distinct, clusters = clusters.len(), "clustering complete");
        Ok(clusters)
    }
}

// ---------------------------------------------------------------------------
// Degraded path
// ---------------------------------------------------------------------------

/// One cluster holding every article, used when clustering cannot run.
///
/// Usable vectors among `embeddings` still contribute a centroid and
/// cohesion; with none the centroid is empty and cohesion is 0.
pub fn single_cluster(articles: &[Article], embeddings: &[Vec<f32>]) -> TopicCluster {
    let dim = embeddings.first().map_or(0, Vec::len);
    let vectors: Vec<Vec<f32>> = embeddings
        .iter()
        .filter(|v| v.len() == dim)
        .filter_map(|v| normalized(v))
        .collect();
    let members: Vec<usize> = (0..vectors.len()).collect();

    TopicCluster {
        label: cluster_label(articles.iter().filter_map(|a| a.title.as_deref())),
        article_ids: articles.iter().map(|a| a.id).collect(),
        centroid: mean_direction(&vectors, &members).unwrap_or_default(),
        cohesion: if vectors.is_empty() {
            0.0
        } else {
            cohesion(&vectors, &members)
        },
    }
}

/// Record each article's cluster label, its embedding, and its cosine
/// similarity to the cluster centroid. `embeddings` is either empty or
/// aligned with `articles`.
pub fn annotate_articles(
    articles: &mut [Article],
    clusters: &[TopicCluster],
    embeddings: &[Vec<f32>],
) {
    let positions: HashMap<ArticleId, usize> =
        articles.iter().enumerate().map(|(i, a)| (a.id, i)).collect();

    for cluster in clusters {
        for id in &cluster.article_ids {
            let Some(&i) = positions.get(id) else {
                continue;
            };
            let article = &mut articles[i];
            article.cluster_label = Some(cluster.label.clone());

            let embedding = embeddings.get(i);
            article.cluster_confidence = embedding
                .and_then(|e| normalized(e))
                .filter(|v| v.len() == cluster.centroid.len())
                .map(|v| dot(&v, &cluster.centroid));
            article.embedding = embedding.cloned();
        }
    }
}

// ---------------------------------------------------------------------------
// k-means
// ---------------------------------------------------------------------------

fn kmeans(vectors: &[Vec<f32>], k: usize, max_iterations: usize) -> Vec<Vec<usize>> {
    let mut centroids: Vec<Vec<f32>> = farthest_point_seeds(vectors, k)
        .into_iter()
        .map(|i| vectors[i].clone())
        .collect();
    let mut assignment = vec![usize::MAX; vectors.len()];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let nearest = nearest_centroid(v, &centroids);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<usize> = (0..vectors.len())
                .filter(|&i| assignment[i] == c)
                .collect();
            if let Some(mean) = mean_direction(vectors, &members) {
                *centroid = mean;
            }
        }
    }

    // Regroup in first-member order; empty clusters never appear.
    let mut order: Vec<usize> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, &c) in assignment.iter().enumerate() {
        match order.iter().position(|&o| o == c) {
            Some(g) => groups[g].push(i),
            None => {
                order.push(c);
                groups.push(vec![i]);
            }
        }
    }
    groups
}

/// Seed indices: the first vector, then repeatedly the vector least similar
/// to every seed so far.
fn farthest_point_seeds(vectors: &[Vec<f32>], k: usize) -> Vec<usize> {
    let mut seeds = vec![0];
    let mut closest: Vec<f32> = vectors.iter().map(|v| dot(v, &vectors[0])).collect();

    while seeds.len() < k {
        let mut pick = 0;
        let mut lowest = f32::INFINITY;
        for (i, &sim) in closest.iter().enumerate() {
            if sim < lowest {
                lowest = sim;
                pick = i;
            }
        }
        if lowest >= 1.0 - SAME_POINT {
            break;
        }
        seeds.push(pick);
        for (i, v) in vectors.iter().enumerate() {
            closest[i] = closest[i].max(dot(v, &vectors[pick]));
        }
    }
    seeds
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let sim = dot(v, centroid);
        if sim > best_sim {
            best_sim = sim;
            best = c;
        }
    }
    best
}

fn build_cluster(articles: &[Article], vectors: &[Vec<f32>], members: &[usize]) -> TopicCluster {
    TopicCluster {
        label: cluster_label(members.iter().filter_map(|&i| articles[i].title.as_deref())),
        article_ids: members.iter().map(|&i| articles[i].id).collect(),
        centroid: mean_direction(vectors, members).unwrap_or_else(|| vectors[members[0]].clone()),
        cohesion: cohesion(vectors, members),
    }
}

// ---------------------------------------------------------------------------
// Vector math
// ---------------------------------------------------------------------------

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Unit-length copy, or `None` for zero or non-finite vectors.
fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    if v.is_empty() || v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = dot(v, v).sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

fn normalize_all(embeddings: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ClusterError> {
    let dim = embeddings.first().map_or(0, Vec::len);
    embeddings
        .iter()
        .enumerate()
        .map(|(index, v)| {
            if v.len() != dim {
                return Err(ClusterError::InvalidVector { index });
            }
            normalized(v).ok_or(ClusterError::InvalidVector { index })
        })
        .collect()
}

/// Normalized mean of the member vectors, `None` if they cancel out.
fn mean_direction(vectors: &[Vec<f32>], members: &[usize]) -> Option<Vec<f32>> {
    let first = members.first()?;
    let mut sum = vec![0.0_f32; vectors[*first].len()];
    for &i in members {
        for (s, x) in sum.iter_mut().zip(&vectors[i]) {
            *s += x;
        }
    }
    normalized(&sum)
}

/// Mean pairwise cosine similarity; 1.0 for a single member.
fn cohesion(vectors: &[Vec<f32>], members: &[usize]) -> f32 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (n, &i) in members.iter().enumerate() {
        for &j in &members[n + 1..] {
            total += dot(&vectors[i], &vectors[j]);
            pairs += 1;
        }
    }
    total / pairs as f32
}

fn distinct_count(vectors: &[Vec<f32>]) -> usize {
    let mut reps: Vec<&Vec<f32>> = Vec::new();
    for v in vectors {
        if !reps.iter().any(|r| dot(r, v) >= 1.0 - SAME_POINT) {
            reps.push(v);
        }
    }
    reps.len()
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Up to three most frequent title words longer than three characters,
/// capitalized. Equal counts keep first-appearance order.
fn cluster_label<'a>(titles: impl Iterator<Item = &'a str>) -> String {
    let mut freq: Vec<(String, usize)> = Vec::new();
    for title in titles {
        for word in title.split_whitespace() {
            let w = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if w.chars().count() <= 3 || STOPWORDS.contains(&w.as_str()) {
                continue;
            }
            match freq.iter_mut().find(|(seen, _)| *seen == w) {
                Some(entry) => entry.1 += 1,
                None => freq.push((w, 1)),
            }
        }
    }
    freq.sort_by(|a, b| b.1.cmp(&a.1));

    let top: Vec<String> = freq
        .into_iter()
        .take(3)
        .map(|(w, _)| {
            let mut c = w.chars();
            match c.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
            }
        })
        .collect();

    if top.is_empty() {
        "Cluster".to_string()
    } else {
        top.join(" ")
    }
}
