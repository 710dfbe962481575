//! Candidate target construction for temporally causal k-NN.
//!
//! Each source frame may only connect to a window of earlier frames of the
//! same sample. The candidate target set replicates every sample's frames
//! once per source frame, keeps the allowed (source frame, target frame)
//! pairs, and records where each replicated row came from.

use ndarray::{Array2, ArrayView2, Axis};

use crate::batch::FrameBatch;
use crate::config::CausalPolicy;
use crate::error::{Result, TemporalGnnError};

/// Allowed `(source frame, target frame)` pairs as a 0/1 matrix.
///
/// Row `s` is the source frame, column `t` the target frame (both 0-based).
/// A target is allowed when `s - window <= t <= s` (`Inclusive`) or
/// `s - window <= t < s` (`Strict`). Under `Strict` the first frame may
/// connect to itself so that it always has candidates.
pub fn frame_mask(num_frames: usize, window: usize, policy: CausalPolicy) -> Array2<u8> {
    // lower triangle up to (and maybe including) the diagonal
    let upper_bound = match policy {
        CausalPolicy::Inclusive => 0isize,
        CausalPolicy::Strict => -1,
    };
    let mut allowed = tril(num_frames, upper_bound);
    if policy == CausalPolicy::Strict && num_frames > 0 {
        allowed[[0, 0]] = 1;
    }

    // minus everything more than `window` frames back
    let too_old = tril(num_frames, -(window as isize) - 1);
    allowed - too_old
}

/// Lower-triangular ones with the given diagonal offset.
fn tril(n: usize, diagonal: isize) -> Array2<u8> {
    Array2::from_shape_fn((n, n), |(r, c)| {
        u8::from((c as isize) - (r as isize) <= diagonal)
    })
}

/// Source and candidate target rows for windowed k-NN.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    /// Source rows, in flattened order.
    pub source: Array2<f32>,
    /// Frame group id of each source row.
    pub source_group: Vec<usize>,
    /// Candidate target rows: sample, source frame, allowed target frame, point.
    pub target: Array2<f32>,
    /// Group id of each candidate, equal to its source frame's group.
    pub target_group: Vec<usize>,
    /// Flattened point index each candidate row was copied from.
    pub index_mapper: Vec<usize>,
}

impl CandidateSet {
    /// Build the candidate set for `data` laid out as described by `batch`.
    ///
    /// The result depends only on the batch geometry, `window` and `policy`;
    /// feature values are copied, never inspected.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `data` does not have one row per point.
    pub fn build(
        data: ArrayView2<f32>,
        batch: &FrameBatch,
        window: usize,
        policy: CausalPolicy,
    ) -> Result<Self> {
        let layout = batch.layout();
        if data.nrows() != layout.total_points() {
            return Err(TemporalGnnError::shape_mismatch(
                "candidate data",
                format!("{} rows", layout.total_points()),
                data.nrows(),
            ));
        }

        let mask = frame_mask(layout.num_frames, window, policy);
        let frames = layout.num_frames;
        let ppf = layout.points_per_frame;

        let mut index_mapper = Vec::new();
        let mut target_group = Vec::new();
        for sample in 0..layout.batch_size {
            for src in 0..frames {
                let group = sample * frames + src;
                for tgt in (0..frames).filter(|&tgt| mask[[src, tgt]] == 1) {
                    let start = layout.index(sample, tgt, 0);
                    index_mapper.extend(start..start + ppf);
                    target_group.extend(std::iter::repeat(group).take(ppf));
                }
            }
        }

        Ok(Self {
            source: data.to_owned(),
            source_group: batch.frame_group_ids(),
            target: data.select(Axis(0), &index_mapper),
            target_group,
            index_mapper,
        })
    }

    /// Number of candidate rows.
    pub fn len(&self) -> usize {
        self.index_mapper.len()
    }

    /// Whether no candidates were produced.
    pub fn is_empty(&self) -> bool {
        self.index_mapper.is_empty()
    }
}
