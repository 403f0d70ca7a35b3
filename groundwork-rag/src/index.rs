//! Distance metrics, index parameters, and the in-memory IVF-flat index.
//!
//! All metrics are expressed as non-negative distances: lower means more
//! similar.
//!
//! - **L2**: Euclidean distance, the default
//! - **COSINE**: `1 - cosine_similarity`, in `[0, 2]`

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Distance metric used to build and query an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MetricType {
    /// Euclidean (L2) distance.
    #[default]
    #[serde(rename = "L2")]
    L2,
    /// Cosine distance.
    #[serde(rename = "COSINE")]
    Cosine,
}

impl MetricType {
    /// The metric name used by Milvus.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "L2",
            Self::Cosine => "COSINE",
        }
    }

    /// Distance between two equal-length vectors.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => euclidean_distance(a, b),
            Self::Cosine => cosine_distance(a, b),
        }
    }
}

/// The similarity index built over a collection's embedding field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "index_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexKind {
    /// Inverted-file index with `nlist` k-means partitions and flat lists.
    IvfFlat {
        /// Number of partitions computed at build time.
        nlist: usize,
    },
    /// Exhaustive scan, kept as an explicit index type.
    Flat,
}

impl Default for IndexKind {
    fn default() -> Self {
        Self::IvfFlat { nlist: 128 }
    }
}

impl IndexKind {
    /// The index type name used by Milvus.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IvfFlat { .. } => "IVF_FLAT",
            Self::Flat => "FLAT",
        }
    }
}

/// Euclidean (L2) distance: `sqrt(sum((a[i] - b[i])^2))`.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Squared Euclidean distance, enough for relative ordering.
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Dot product of two vectors.
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine distance: `1 - (a · b) / (||a|| * ||b||)`.
///
/// Returns 1.0 (orthogonal) if either vector has zero magnitude.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = inner_product(a, a).sqrt();
    let norm_b = inner_product(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - inner_product(a, b) / (norm_a * norm_b)).max(0.0)
}

/// Order `(distance, id)` pairs ascending by distance, then by id.
pub(crate) fn rank_order(a: (f32, i64), b: (f32, i64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

const KMEANS_MAX_ITERATIONS: usize = 16;

/// Inverted-file index over row positions of a collection.
///
/// Partitions are computed with k-means under L2 regardless of the search
/// metric, so a stored vector always lands in the list of the centroid a
/// query equal to it probes first.
#[derive(Debug, Clone)]
pub(crate) struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
}

impl IvfIndex {
    /// Train `min(nlist, rows)` partitions over `vectors` and assign every row.
    pub(crate) fn build<'a, I>(vectors: I, nlist: usize) -> Self
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let vectors: Vec<&[f32]> = vectors.into_iter().collect();
        let k = nlist.min(vectors.len());
        if k == 0 {
            return Self { centroids: Vec::new(), lists: Vec::new() };
        }

        // Evenly spaced seeds keep the build deterministic.
        let mut centroids: Vec<Vec<f32>> =
            (0..k).map(|i| vectors[i * vectors.len() / k].to_vec()).collect();
        let mut assignment = vec![usize::MAX; vectors.len()];

        for _ in 0..KMEANS_MAX_ITERATIONS {
            let mut changed = false;
            for (pos, vector) in vectors.iter().enumerate() {
                let nearest = nearest_centroid(&centroids, vector);
                if assignment[pos] != nearest {
                    assignment[pos] = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let dim = centroids[0].len();
            let mut sums = vec![vec![0.0f32; dim]; k];
            let mut counts = vec![0usize; k];
            for (pos, vector) in vectors.iter().enumerate() {
                let cluster = assignment[pos];
                counts[cluster] += 1;
                for (acc, v) in sums[cluster].iter_mut().zip(vector.iter()) {
                    *acc += v;
                }
            }
            for (cluster, sum) in sums.into_iter().enumerate() {
                // Empty partitions keep their previous centroid.
                if counts[cluster] > 0 {
                    let n = counts[cluster] as f32;
                    centroids[cluster] = sum.into_iter().map(|v| v / n).collect();
                }
            }
        }

        // Final assignment against the converged centroids.
        let mut lists = vec![Vec::new(); k];
        for (pos, vector) in vectors.iter().enumerate() {
            lists[nearest_centroid(&centroids, vector)].push(pos);
        }
        Self { centroids, lists }
    }

    /// Assign a row inserted after the build to its nearest partition.
    pub(crate) fn add(&mut self, pos: usize, vector: &[f32]) {
        if self.centroids.is_empty() {
            self.centroids.push(vector.to_vec());
            self.lists.push(vec![pos]);
            return;
        }
        let nearest = nearest_centroid(&self.centroids, vector);
        self.lists[nearest].push(pos);
    }

    /// Number of partitions.
    pub(crate) fn nlist(&self) -> usize {
        self.centroids.len()
    }

    /// Collect candidate row positions from the `nprobe` partitions nearest
    /// to `query`, probing further partitions until at least `min_candidates`
    /// rows are gathered or every partition has been probed.
    pub(crate) fn candidates(
        &self,
        query: &[f32],
        nprobe: usize,
        min_candidates: usize,
    ) -> Vec<usize> {
        let mut order: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (euclidean_distance_squared(query, c), i))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut out = Vec::new();
        for (probed, (_, cluster)) in order.into_iter().enumerate() {
            if probed >= nprobe && out.len() >= min_candidates {
                break;
            }
            out.extend_from_slice(&self.lists[cluster]);
        }
        out
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = euclidean_distance_squared(vector, c);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}
