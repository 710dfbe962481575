//! Frame-window mask for attention-based graph creation.

use ndarray::Array2;

use crate::error::{Result, TemporalGnnError};

/// `num_points x num_points` mask over one sample.
///
/// Entry `(i, j)` is allowed when the frames of points `i` and `j` are at
/// most `t / 2` apart. Built once per layer; a new layout needs a new mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalMask {
    allowed: Array2<bool>,
    num_frames: usize,
    t: usize,
}

impl TemporalMask {
    /// Build the mask for `num_points` points split evenly over `num_frames`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an even `t` and `ShapeMismatch` if the
    /// points do not divide evenly into frames.
    pub fn new(num_points: usize, num_frames: usize, t: usize) -> Result<Self> {
        if t % 2 == 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "t should be an odd number, got {t}"
            )));
        }
        if num_frames == 0 || num_points % num_frames != 0 {
            return Err(TemporalGnnError::shape_mismatch(
                "temporal mask",
                format!("points divisible by {num_frames} frames"),
                num_points,
            ));
        }

        let ppf = num_points / num_frames;
        let half = t / 2;
        let allowed = Array2::from_shape_fn((num_points, num_points), |(i, j)| {
            (i / ppf).abs_diff(j / ppf) <= half
        });

        Ok(Self {
            allowed,
            num_frames,
            t,
        })
    }

    /// Whether points `i` and `j` may form an edge.
    #[inline]
    pub fn is_allowed(&self, i: usize, j: usize) -> bool {
        self.allowed[[i, j]]
    }

    /// Points per sample covered by the mask.
    pub fn num_points(&self) -> usize {
        self.allowed.nrows()
    }

    /// Frames per sample.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Window size.
    pub fn window(&self) -> usize {
        self.t
    }

    /// Allowed entries in row `i`.
    pub fn allowed_in_row(&self, i: usize) -> usize {
        self.allowed.row(i).iter().filter(|&&a| a).count()
    }

    /// Replace disallowed scores with negative infinity.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `scores` is not `num_points x num_points`.
    pub fn apply(&self, scores: &mut Array2<f32>) -> Result<()> {
        if scores.dim() != self.allowed.dim() {
            return Err(TemporalGnnError::shape_mismatch(
                "mask scores",
                format!("{:?}", self.allowed.dim()),
                format!("{:?}", scores.dim()),
            ));
        }
        ndarray::Zip::from(scores)
            .and(&self.allowed)
            .for_each(|s, &ok| {
                if !ok {
                    *s = f32::NEG_INFINITY;
                }
            });
        Ok(())
    }

    /// Dense 0/1 view of the mask.
    pub fn to_array(&self) -> Array2<u8> {
        self.allowed.mapv(u8::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_one_is_block_diagonal() {
        let mask = TemporalMask::new(8, 4, 1).unwrap();
        assert!(mask.is_allowed(0, 1));
        assert!(!mask.is_allowed(1, 2));
        assert_eq!(mask.allowed_in_row(5), 2);
    }

    #[test]
    fn test_window_three() {
        let mask = TemporalMask::new(4, 4, 3).unwrap();
        let dense = mask.to_array();
        assert_eq!(dense.row(0).to_vec(), vec![1, 1, 0, 0]);
        assert_eq!(dense.row(2).to_vec(), vec![0, 1, 1, 1]);
        assert_eq!(dense, dense.t());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            TemporalMask::new(8, 4, 2),
            Err(TemporalGnnError::InvalidConfig(_))
        ));
        assert!(matches!(
            TemporalMask::new(9, 4, 3),
            Err(TemporalGnnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_uses_negative_infinity() {
        let mask = TemporalMask::new(2, 2, 1).unwrap();
        let mut scores = Array2::zeros((2, 2));
        mask.apply(&mut scores).unwrap();
        assert_eq!(scores[[0, 0]], 0.0);
        assert_eq!(scores[[0, 1]], f32::NEG_INFINITY);
    }
}
