//! Collation of gesture samples into flattened batches.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::batch::FrameBatch;
use crate::error::{Result, TemporalGnnError};

/// One recorded gesture: a fixed number of frames of 3D points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureSample {
    /// Frames in temporal order, each `[points_per_frame, 3]`.
    pub frames: Vec<Array2<f32>>,
    /// Class label.
    pub label: usize,
}

impl GestureSample {
    /// Create a sample.
    pub fn new(frames: Vec<Array2<f32>>, label: usize) -> Self {
        Self { frames, label }
    }

    /// Number of frames.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn points_per_frame(&self) -> Option<usize> {
        self.frames.first().map(|f| f.nrows())
    }
}

/// Samples flattened into the sample/frame/point order.
#[derive(Debug, Clone)]
pub struct GestureBatch {
    /// Positions `[N, 3]`.
    pub positions: Array2<f32>,
    /// Frame and sample ids of every position.
    pub batch: FrameBatch,
    /// Label per sample.
    pub labels: Vec<usize>,
}

impl GestureBatch {
    /// Flatten `samples` into one batch.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the samples disagree on frames per sample
    /// or points per frame, or a frame is not 3D.
    pub fn collate(samples: &[GestureSample]) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| TemporalGnnError::shape_mismatch("collate", "at least one sample", 0))?;
        let num_frames = first.num_frames();
        let ppf = first.points_per_frame().unwrap_or(0);
        if num_frames == 0 || ppf == 0 {
            return Err(TemporalGnnError::shape_mismatch(
                "collate",
                "non-empty frames",
                format!("{num_frames} frames of {ppf} points"),
            ));
        }

        let mut views: Vec<ArrayView2<f32>> = Vec::with_capacity(samples.len() * num_frames);
        for (s, sample) in samples.iter().enumerate() {
            if sample.num_frames() != num_frames {
                return Err(TemporalGnnError::shape_mismatch(
                    format!("frames of sample {s}"),
                    num_frames,
                    sample.num_frames(),
                ));
            }
            for (f, frame) in sample.frames.iter().enumerate() {
                if frame.dim() != (ppf, 3) {
                    return Err(TemporalGnnError::shape_mismatch(
                        format!("sample {s} frame {f}"),
                        format!("({ppf}, 3)"),
                        format!("{:?}", frame.dim()),
                    ));
                }
                views.push(frame.view());
            }
        }

        Ok(Self {
            positions: concatenate(Axis(0), &views)?,
            batch: FrameBatch::regular(samples.len(), num_frames, ppf)?,
            labels: samples.iter().map(|s| s.label).collect(),
        })
    }

    /// Collate consecutive chunks of `batch_size`; the last may be shorter.
    pub fn batches(samples: &[GestureSample], batch_size: usize) -> Result<Vec<Self>> {
        if batch_size == 0 {
            return Err(TemporalGnnError::invalid_config("batch_size must be positive"));
        }
        samples.chunks(batch_size).map(Self::collate).collect()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
