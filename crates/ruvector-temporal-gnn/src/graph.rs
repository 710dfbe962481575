//! Dynamic graph creation: learned attention top-k and k-NN strategies.
//!
//! Every strategy yields exactly `k` edges per source point, grouped in
//! contiguous source-sorted blocks.

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rand::{Rng, RngCore};
use tracing::trace;

use crate::batch::FrameBatch;
use crate::config::{BoundaryPolicy, CausalPolicy};
use crate::edge::EdgeIndex;
use crate::error::{Result, TemporalGnnError};
use crate::knn::{knn, windowed_knn};
use crate::layer::{Linear, Reset};
use crate::mask::TemporalMask;

/// Learned replacement for fixed-metric k-NN.
///
/// Scores every pair of points of one sample with multi-head scaled
/// dot-product attention (heads averaged) and keeps the `k` best allowed
/// targets per row.
#[derive(Debug, Clone)]
pub struct SelfAttentionGraphCreator {
    num_heads: usize,
    head_dim: usize,
    k: usize,
    q_linear: Linear,
    k_linear: Linear,
}

impl SelfAttentionGraphCreator {
    /// Create a graph creator over `in_features`-wide inputs.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `k` is zero or `in_features` is not
    /// divisible by `num_heads`.
    pub fn new(in_features: usize, num_heads: usize, k: usize) -> Result<Self> {
        Self::with_rng(in_features, num_heads, k, &mut rand::thread_rng())
    }

    /// Create a graph creator drawing weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        in_features: usize,
        num_heads: usize,
        k: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if k == 0 {
            return Err(TemporalGnnError::invalid_config("k must be positive"));
        }
        if num_heads == 0 || in_features == 0 || in_features % num_heads != 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "graph creation width {in_features} must be divisible by {num_heads} heads"
            )));
        }
        Ok(Self {
            num_heads,
            head_dim: in_features / num_heads,
            k,
            q_linear: Linear::with_rng(in_features, in_features, &mut *rng),
            k_linear: Linear::with_rng(in_features, in_features, &mut *rng),
        })
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Edges per source point.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Pairwise scores `[P, P]`, averaged over heads.
    pub fn scores(&self, points: ArrayView2<f32>) -> Result<Array2<f32>> {
        let q = self.q_linear.forward(points)?;
        let k = self.k_linear.forward(points)?;
        let n = points.nrows();
        let scale = (self.head_dim as f32).sqrt();

        let mut scores = Array2::<f32>::zeros((n, n));
        for h in 0..self.num_heads {
            let cols = h * self.head_dim..(h + 1) * self.head_dim;
            let q_h = q.slice(s![.., cols.clone()]);
            let k_h = k.slice(s![.., cols]);
            scores += &(q_h.dot(&k_h.t()) / scale);
        }
        scores /= self.num_heads as f32;
        Ok(scores)
    }

    /// Select `k` edges per point of one sample.
    ///
    /// Edges are local to the sample (`0..P`). Masked pairs score negative
    /// infinity and are never selected.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the sample does not match the mask, and
    /// `InsufficientNeighbors` if a row has fewer than `k` allowed targets.
    pub fn select(&self, points: ArrayView2<f32>, mask: &TemporalMask) -> Result<EdgeIndex> {
        if points.nrows() != mask.num_points() {
            return Err(TemporalGnnError::shape_mismatch(
                "graph creator sample",
                format!("{} points", mask.num_points()),
                points.nrows(),
            ));
        }

        let mut scores = self.scores(points)?;
        mask.apply(&mut scores)?;

        let n = points.nrows();
        let mut edges = EdgeIndex::with_capacity(n * self.k);
        let mut ranked: Vec<(f32, usize)> = Vec::with_capacity(n);
        for (i, row) in scores.outer_iter().enumerate() {
            let available = mask.allowed_in_row(i);
            if available < self.k {
                return Err(TemporalGnnError::InsufficientNeighbors {
                    point: i,
                    available,
                    k: self.k,
                });
            }

            ranked.clear();
            ranked.extend(
                row.iter()
                    .enumerate()
                    .filter(|&(j, _)| mask.is_allowed(i, j))
                    .map(|(j, &score)| (score, j)),
            );
            let by_score =
                |a: &(f32, usize), b: &(f32, usize)| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1));
            if ranked.len() > self.k {
                ranked.select_nth_unstable_by(self.k - 1, by_score);
                ranked.truncate(self.k);
            }
            ranked.sort_unstable_by(by_score);

            for &(_, j) in ranked.iter() {
                edges.push(i, j);
            }
        }

        trace!(points = n, k = self.k, "attention graph for sample");
        Ok(edges)
    }
}

impl Reset for SelfAttentionGraphCreator {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        self.q_linear.reset(rng);
        self.k_linear.reset(rng);
    }
}

/// Which frames a k-NN strategy searches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KnnNeighborhood {
    /// Causal window of earlier frames, see [`crate::candidates`].
    Windowed {
        /// Frames to look back.
        window: usize,
        /// Whether the current frame is included.
        policy: CausalPolicy,
        /// Weight of the normalized sequence column relative to space.
        spatio_temporal_factor: f32,
    },
    /// Only the immediately preceding frame.
    PreviousFrame {
        /// Fallback at sequence boundaries.
        boundary: BoundaryPolicy,
    },
    /// Every point of the same sample, in any frame. Time only enters
    /// through the weighted sequence column.
    Sample {
        /// Weight of the normalized sequence column relative to space.
        spatio_temporal_factor: f32,
    },
}

/// Fixed-metric k-NN graph strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnnGraphCreator {
    k: usize,
    neighborhood: KnnNeighborhood,
}

impl KnnGraphCreator {
    /// Create a k-NN strategy.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `k` is zero.
    pub fn new(k: usize, neighborhood: KnnNeighborhood) -> Result<Self> {
        if k == 0 {
            return Err(TemporalGnnError::invalid_config("k must be positive"));
        }
        Ok(Self { k, neighborhood })
    }

    /// Edges per source point.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Build global edges for the whole batch.
    pub fn create(&self, x: ArrayView2<f32>, batch: &FrameBatch) -> Result<EdgeIndex> {
        match self.neighborhood {
            KnnNeighborhood::Windowed {
                window,
                policy,
                spatio_temporal_factor,
            } => {
                let input = spatio_temporal_input(x, batch, spatio_temporal_factor)?;
                windowed_knn(input.view(), batch, self.k, window, policy)
            }
            KnnNeighborhood::PreviousFrame { boundary } => knn(
                x,
                x,
                self.k,
                &batch.frame_group_ids(),
                &batch.previous_frame_group_ids(boundary),
            ),
            KnnNeighborhood::Sample {
                spatio_temporal_factor,
            } => {
                let input = spatio_temporal_input(x, batch, spatio_temporal_factor)?;
                knn(input.view(), input.view(), self.k, batch.sample(), batch.sample())
            }
        }
    }
}

/// `[x, sequence]` min-max scaled per column, with the sequence column
/// weighted by `factor * sqrt(D)`.
pub fn spatio_temporal_input(
    x: ArrayView2<f32>,
    batch: &FrameBatch,
    factor: f32,
) -> Result<Array2<f32>> {
    if x.nrows() != batch.len() {
        return Err(TemporalGnnError::shape_mismatch(
            "spatio-temporal input",
            format!("{} rows", batch.len()),
            x.nrows(),
        ));
    }
    let sequence = Array2::from_shape_fn((batch.len(), 1), |(i, _)| batch.sequence()[i] as f32);
    let mut input = concatenate(Axis(1), &[x.view(), sequence.view()])?;

    for mut column in input.axis_iter_mut(Axis(1)) {
        let min = column.iter().copied().fold(f32::INFINITY, f32::min);
        column.mapv_inplace(|v| v - min);
        let max = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if max > 0.0 {
            column.mapv_inplace(|v| v / max);
        }
    }

    let weight = factor * (x.ncols() as f32).sqrt();
    input.column_mut(x.ncols()).mapv_inplace(|v| v * weight);
    Ok(input)
}

/// How a convolution layer builds its graph.
#[derive(Debug, Clone)]
pub enum GraphStrategy {
    /// Learned attention scores under the temporal mask.
    SelfAttention(SelfAttentionGraphCreator),
    /// Fixed-metric k-NN.
    Knn(KnnGraphCreator),
}

impl GraphStrategy {
    /// Edges per source point.
    pub fn k(&self) -> usize {
        match self {
            GraphStrategy::SelfAttention(creator) => creator.k(),
            GraphStrategy::Knn(creator) => creator.k(),
        }
    }
}

impl Reset for GraphStrategy {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        if let GraphStrategy::SelfAttention(creator) = self {
            creator.reset(rng);
        }
    }
}
