//! Per-sample 3x3 alignment of raw positions.

use std::fmt;

use ndarray::{Array2, ArrayView2, Axis};
use rand::{Rng, RngCore};

use crate::config::StnConfig;
use crate::error::{Result, TemporalGnnError};
use crate::layer::{BatchNorm1d, Linear, Reset};

/// Predicts a 3x3 transform for one sample's points.
///
/// The classifier multiplies each sample's `[P, 3]` positions on the right
/// by the returned matrix.
pub trait Align: Reset + fmt::Debug + Send + Sync {
    /// Transform for `points` of shape `[P, 3]`.
    fn align(&self, points: ArrayView2<f32>) -> Result<Array2<f32>>;
}

/// Leaves positions unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityAlign;

impl Reset for IdentityAlign {
    fn reset(&mut self, _rng: &mut dyn RngCore) {}
}

impl Align for IdentityAlign {
    fn align(&self, points: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_positions(&points)?;
        Ok(Array2::eye(3))
    }
}

fn check_positions(points: &ArrayView2<f32>) -> Result<()> {
    if points.ncols() != 3 || points.nrows() == 0 {
        return Err(TemporalGnnError::shape_mismatch(
            "alignment input",
            "[P > 0, 3]",
            format!("{:?}", points.shape()),
        ));
    }
    Ok(())
}

/// `Linear -> BatchNorm -> ReLU`.
#[derive(Debug, Clone)]
struct NormedLinear {
    linear: Linear,
    norm: BatchNorm1d,
}

impl NormedLinear {
    fn with_rng<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        Self {
            linear: Linear::with_rng(input_dim, output_dim, rng),
            norm: BatchNorm1d::new(output_dim, 1e-5),
        }
    }

    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let projected = self.linear.forward(input)?;
        let mut out = self.norm.forward(projected.view())?;
        out.mapv_inplace(|x| x.max(0.0));
        Ok(out)
    }
}

impl Reset for NormedLinear {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        self.linear.reset(rng);
        self.norm.reset(rng);
    }
}

/// Spatial transformer network predicting a 3x3 alignment.
///
/// Shared per-point layers, max pooling over the sample, a fully connected
/// head to nine values, plus the identity.
#[derive(Debug, Clone)]
pub struct Stn3d {
    point_layers: Vec<NormedLinear>,
    head_layers: Vec<NormedLinear>,
    output: Linear,
}

impl Stn3d {
    /// Build with thread-local randomness.
    pub fn new(config: &StnConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Build drawing weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(config: &StnConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let mut width = 3;
        let mut point_layers = Vec::with_capacity(config.point_widths.len());
        for &w in &config.point_widths {
            point_layers.push(NormedLinear::with_rng(width, w, &mut *rng));
            width = w;
        }
        let mut head_layers = Vec::with_capacity(config.head_widths.len());
        for &w in &config.head_widths {
            head_layers.push(NormedLinear::with_rng(width, w, &mut *rng));
            width = w;
        }

        Ok(Self {
            point_layers,
            head_layers,
            output: Linear::with_rng(width, 9, rng),
        })
    }
}

impl Reset for Stn3d {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        for layer in self.point_layers.iter_mut().chain(self.head_layers.iter_mut()) {
            layer.reset(rng);
        }
        self.output.reset(rng);
    }
}

impl Align for Stn3d {
    fn align(&self, points: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_positions(&points)?;

        let mut hidden = points.to_owned();
        for layer in &self.point_layers {
            hidden = layer.forward(hidden.view())?;
        }
        let mut pooled = hidden
            .fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &b| a.max(b))
            .insert_axis(Axis(0));
        for layer in &self.head_layers {
            pooled = layer.forward(pooled.view())?;
        }

        let raw = self.output.forward(pooled.view())?;
        let matrix = raw.into_shape((3, 3))?;
        Ok(matrix + Array2::<f32>::eye(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> StnConfig {
        StnConfig {
            point_widths: vec![8, 16],
            head_widths: vec![8],
        }
    }

    #[test]
    fn test_identity_align() {
        let points = array![[1.0, 2.0, 3.0], [0.0, 0.0, 1.0]];
        assert_eq!(IdentityAlign.align(points.view()).unwrap(), Array2::<f32>::eye(3));
        assert!(IdentityAlign.align(array![[1.0, 2.0]].view()).is_err());
    }

    #[test]
    fn test_stn_output_shape_and_determinism() {
        let mut rng = StdRng::seed_from_u64(3);
        let stn = Stn3d::with_rng(&small_config(), &mut rng).unwrap();
        let points = Array2::from_shape_fn((10, 3), |(i, j)| (i as f32 - j as f32) * 0.1);
        let a = stn.align(points.view()).unwrap();
        let b = stn.align(points.view()).unwrap();
        assert_eq!(a.shape(), &[3, 3]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_stn_is_order_invariant() {
        let mut rng = StdRng::seed_from_u64(4);
        let stn = Stn3d::with_rng(&small_config(), &mut rng).unwrap();
        let points = array![[0.1, 0.2, 0.3], [0.5, -0.1, 0.0], [-0.3, 0.4, 0.2]];
        let shuffled = array![[-0.3, 0.4, 0.2], [0.1, 0.2, 0.3], [0.5, -0.1, 0.0]];
        let a = stn.align(points.view()).unwrap();
        let b = stn.align(shuffled.view()).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_stn_rejects_bad_config() {
        let config = StnConfig {
            point_widths: vec![],
            head_widths: vec![8],
        };
        assert!(Stn3d::new(&config).is_err());
    }
}
