//! Grouped k-nearest-neighbor selection.

use std::collections::HashMap;

use ndarray::ArrayView2;
use tracing::trace;

use crate::batch::FrameBatch;
use crate::candidates::CandidateSet;
use crate::config::CausalPolicy;
use crate::edge::EdgeIndex;
use crate::error::{Result, TemporalGnnError};

/// Squared Euclidean distance between two rows.
#[inline]
fn squared_distance(a: ndarray::ArrayView1<f32>, b: ndarray::ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// For every row of `y`, select the `k` nearest rows of `x` in the same group.
///
/// Returns edges `(y index, x index)`, sorted by `y` index, nearest first.
/// Equal distances keep the lower `x` index first.
///
/// # Arguments
/// * `x` - Candidate target rows
/// * `y` - Source rows
/// * `k` - Neighbors per source
/// * `batch_x` - Group id of each `x` row
/// * `batch_y` - Group id of each `y` row; only equal ids are eligible
///
/// # Errors
/// Returns `ShapeMismatch` on inconsistent inputs and `InsufficientNeighbors`
/// when a source has fewer than `k` eligible candidates.
pub fn knn(
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    k: usize,
    batch_x: &[usize],
    batch_y: &[usize],
) -> Result<EdgeIndex> {
    if x.ncols() != y.ncols() {
        return Err(TemporalGnnError::shape_mismatch(
            "knn feature width",
            x.ncols(),
            y.ncols(),
        ));
    }
    if batch_x.len() != x.nrows() || batch_y.len() != y.nrows() {
        return Err(TemporalGnnError::shape_mismatch(
            "knn group ids",
            format!("{} and {}", x.nrows(), y.nrows()),
            format!("{} and {}", batch_x.len(), batch_y.len()),
        ));
    }
    if k == 0 {
        return Err(TemporalGnnError::invalid_config("k must be positive"));
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (j, &g) in batch_x.iter().enumerate() {
        groups.entry(g).or_default().push(j);
    }

    let mut edges = EdgeIndex::with_capacity(y.nrows() * k);
    let mut scored: Vec<(f32, usize)> = Vec::new();
    for (i, &g) in batch_y.iter().enumerate() {
        let candidates = groups.get(&g).map(Vec::as_slice).unwrap_or(&[]);
        if candidates.len() < k {
            return Err(TemporalGnnError::InsufficientNeighbors {
                point: i,
                available: candidates.len(),
                k,
            });
        }

        let query = y.row(i);
        scored.clear();
        scored.extend(
            candidates
                .iter()
                .map(|&j| (squared_distance(query, x.row(j)), j)),
        );
        let by_distance =
            |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        for &(_, j) in scored.iter() {
            edges.push(i, j);
        }
    }

    trace!(sources = y.nrows(), k, edges = edges.len(), "knn selection");
    Ok(edges)
}

/// Windowed causal k-NN over a flattened batch.
///
/// Builds the candidate set for `window` and `policy`, selects `k` neighbors
/// per point within its frame group, and maps candidate indices back to
/// flattened point indices.
pub fn windowed_knn(
    data: ArrayView2<f32>,
    batch: &FrameBatch,
    k: usize,
    window: usize,
    policy: CausalPolicy,
) -> Result<EdgeIndex> {
    let candidates = CandidateSet::build(data, batch, window, policy)?;
    let mut edges = knn(
        candidates.target.view(),
        candidates.source.view(),
        k,
        &candidates.target_group,
        &candidates.source_group,
    )?;
    edges.remap_targets(&candidates.index_mapper)?;
    Ok(edges)
}
