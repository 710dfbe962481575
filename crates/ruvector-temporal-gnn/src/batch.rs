//! Batch indexing over the flattened point space.
//!
//! Points of a batch are laid out sample-major, then frame-major, then
//! point-major. Sequence numbers are 1-based within each sample.

use ndarray::Array1;

use crate::config::BoundaryPolicy;
use crate::error::{Result, TemporalGnnError};

/// Geometry of one batch, inferred from the per-point ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    /// Samples in this batch.
    pub batch_size: usize,
    /// Frames per sample.
    pub num_frames: usize,
    /// Points per frame.
    pub points_per_frame: usize,
}

impl BatchLayout {
    /// Infer the layout from distinct sequence numbers and sample ids.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the arrays differ in length or the point
    /// count does not divide into `batch_size * num_frames`.
    pub fn infer(sequence: &[usize], sample: &[usize]) -> Result<Self> {
        if sequence.len() != sample.len() {
            return Err(TemporalGnnError::shape_mismatch(
                "batch ids",
                format!("{} sample ids", sequence.len()),
                sample.len(),
            ));
        }
        if sequence.is_empty() {
            return Err(TemporalGnnError::shape_mismatch("batch ids", "non-empty batch", 0));
        }

        let num_frames = count_distinct(sequence);
        let batch_size = count_distinct(sample);
        let groups = batch_size * num_frames;
        if sequence.len() % groups != 0 {
            return Err(TemporalGnnError::shape_mismatch(
                "batch layout",
                format!("multiple of {batch_size} samples x {num_frames} frames"),
                sequence.len(),
            ));
        }

        Ok(Self {
            batch_size,
            num_frames,
            points_per_frame: sequence.len() / groups,
        })
    }

    /// Points per sample.
    pub fn points_per_sample(&self) -> usize {
        self.num_frames * self.points_per_frame
    }

    /// Points in the whole batch.
    pub fn total_points(&self) -> usize {
        self.batch_size * self.points_per_sample()
    }

    /// Flattened index of `(sample, frame, point)`; `frame` is 0-based.
    #[inline]
    pub fn index(&self, sample: usize, frame: usize, point: usize) -> usize {
        (sample * self.num_frames + frame) * self.points_per_frame + point
    }
}

fn count_distinct(values: &[usize]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len()
}

/// Per-point frame and sample ids with their validated layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBatch {
    sequence: Vec<usize>,
    sample: Vec<usize>,
    layout: BatchLayout,
}

impl FrameBatch {
    /// Build a batch from parallel id arrays.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the ids do not follow the flattened
    /// sample/frame/point order.
    pub fn new(sequence: Vec<usize>, sample: Vec<usize>) -> Result<Self> {
        let layout = BatchLayout::infer(&sequence, &sample)?;

        for (i, (&seq, &s)) in sequence.iter().zip(sample.iter()).enumerate() {
            let expected_sample = i / layout.points_per_sample();
            let expected_seq = (i / layout.points_per_frame) % layout.num_frames + 1;
            if s != expected_sample || seq != expected_seq {
                return Err(TemporalGnnError::shape_mismatch(
                    format!("batch order at point {i}"),
                    format!("(sample {expected_sample}, frame {expected_seq})"),
                    format!("(sample {s}, frame {seq})"),
                ));
            }
        }

        Ok(Self {
            sequence,
            sample,
            layout,
        })
    }

    /// Build the ids for a regular layout.
    pub fn regular(batch_size: usize, num_frames: usize, points_per_frame: usize) -> Result<Self> {
        let total = batch_size * num_frames * points_per_frame;
        let mut sequence = Vec::with_capacity(total);
        let mut sample = Vec::with_capacity(total);
        for b in 0..batch_size {
            for f in 1..=num_frames {
                sequence.extend(std::iter::repeat(f).take(points_per_frame));
                sample.extend(std::iter::repeat(b).take(points_per_frame));
            }
        }
        Self::new(sequence, sample)
    }

    /// Inferred layout.
    pub fn layout(&self) -> BatchLayout {
        self.layout
    }

    /// 1-based sequence numbers.
    pub fn sequence(&self) -> &[usize] {
        &self.sequence
    }

    /// Sample ids.
    pub fn sample(&self) -> &[usize] {
        &self.sample
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the batch has no points.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// `sample * num_frames + sequence - 1`, unique per (sample, frame).
    pub fn frame_group_ids(&self) -> Vec<usize> {
        let frames = self.layout.num_frames;
        self.sequence
            .iter()
            .zip(self.sample.iter())
            .map(|(&seq, &s)| s * frames + seq - 1)
            .collect()
    }

    /// Group id of the previous frame, for adjacent-frame pairing.
    ///
    /// Frame 1 has no previous frame and keeps its own group. Under
    /// [`BoundaryPolicy::FirstAndLast`] the last frame keeps its own group too.
    pub fn previous_frame_group_ids(&self, policy: BoundaryPolicy) -> Vec<usize> {
        let frames = self.layout.num_frames;
        self.sequence
            .iter()
            .zip(self.sample.iter())
            .map(|(&seq, &s)| {
                let own = s * frames + seq - 1;
                let at_boundary = seq == 1
                    || (policy == BoundaryPolicy::FirstAndLast && seq == frames);
                if at_boundary {
                    own
                } else {
                    own - 1
                }
            })
            .collect()
    }

    /// Sequence numbers min-max scaled to `[0, 1]`.
    pub fn normalized_sequence(&self) -> Array1<f32> {
        let min = self.sequence.iter().copied().min().unwrap_or(1);
        let max = self.sequence.iter().copied().max().unwrap_or(1);
        let span = (max - min) as f32;
        self.sequence
            .iter()
            .map(|&seq| {
                if span > 0.0 {
                    (seq - min) as f32 / span
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// The first `n` samples of this batch.
    pub fn truncate_samples(&self, n: usize) -> Result<Self> {
        if n == 0 || n > self.layout.batch_size {
            return Err(TemporalGnnError::shape_mismatch(
                "truncate samples",
                format!("1..={}", self.layout.batch_size),
                n,
            ));
        }
        let end = n * self.layout.points_per_sample();
        Self::new(self.sequence[..end].to_vec(), self.sample[..end].to_vec())
    }
}
