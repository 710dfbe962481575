//! Neural building blocks for the temporal edge convolution.
//!
//! All layers operate on row-major batches `[rows, features]` and keep their
//! parameters as `ndarray` matrices. Initialization is Xavier/Glorot.

use std::fmt;

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::config::Activation;
use crate::error::{Result, TemporalGnnError};

/// Re-initialization of learned parameters.
///
/// Components compose this explicitly: a container resets each child it owns.
pub trait Reset {
    /// Draw fresh parameters from `rng`.
    fn reset(&mut self, rng: &mut dyn RngCore);
}

/// A pure feature transform `[N, D] -> [N, D']`.
pub trait Transform: Reset + fmt::Debug + Send + Sync {
    /// Apply the transform to every row.
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Expected input width.
    fn input_dim(&self) -> usize;

    /// Produced output width.
    fn output_dim(&self) -> usize;
}

fn check_width(context: &str, input: &ArrayView2<f32>, expected: usize) -> Result<()> {
    if input.ncols() != expected {
        return Err(TemporalGnnError::shape_mismatch(
            context,
            format!("{expected} columns"),
            input.ncols(),
        ));
    }
    Ok(())
}

fn xavier<R: Rng + ?Sized>(output_dim: usize, input_dim: usize, rng: &mut R) -> Array2<f32> {
    // Xavier initialization: scale = sqrt(2.0 / (input_dim + output_dim))
    let scale = (2.0 / (input_dim + output_dim) as f32).sqrt();
    Array2::from_shape_fn((output_dim, input_dim), |_| {
        let z: f32 = StandardNormal.sample(rng);
        z * scale
    })
}

/// Linear transformation layer (weight matrix multiplication)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    /// Create a new linear layer with Xavier/Glorot initialization
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self::with_rng(input_dim, output_dim, &mut rand::thread_rng())
    }

    /// Create a new linear layer drawing weights from `rng`
    pub fn with_rng<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        Self {
            weights: xavier(output_dim, input_dim, rng),
            bias: Array1::zeros(output_dim),
        }
    }

    /// Forward pass: Y = X W^T + b
    pub fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_width("linear", &input, self.input_dim())?;
        Ok(input.dot(&self.weights.t()) + &self.bias)
    }

    /// Get input dimension
    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Get output dimension
    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }
}

impl Reset for Linear {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        self.weights = xavier(self.output_dim(), self.input_dim(), rng);
        self.bias.fill(0.0);
    }
}

impl Transform for Linear {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        Linear::forward(self, input)
    }

    fn input_dim(&self) -> usize {
        Linear::input_dim(self)
    }

    fn output_dim(&self) -> usize {
        Linear::output_dim(self)
    }
}

/// Batch normalization in inference mode (running statistics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm1d {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    eps: f32,
}

impl BatchNorm1d {
    /// Create a normalization layer with unit statistics
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            running_mean: Array1::zeros(dim),
            running_var: Array1::ones(dim),
            eps,
        }
    }

    /// Forward pass: normalize each column with the running statistics, then scale and shift
    pub fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_width("batch norm", &input, self.gamma.len())?;
        let inv_std = self.running_var.mapv(|v| 1.0 / (v + self.eps).sqrt());
        let scale = &self.gamma * &inv_std;
        let shift = &self.beta - &(&self.running_mean * &scale);
        Ok(&input * &scale + &shift)
    }
}

impl Reset for BatchNorm1d {
    fn reset(&mut self, _rng: &mut dyn RngCore) {
        self.gamma.fill(1.0);
        self.beta.fill(0.0);
        self.running_mean.fill(0.0);
        self.running_var.fill(1.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MlpBlock {
    linear: Linear,
    norm: BatchNorm1d,
}

/// Stack of `Linear -> ReLU -> BatchNorm` blocks.
///
/// Deserialization rejects an empty stack and blocks whose widths do not
/// chain, so a loaded `Mlp` upholds the same invariants as a built one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MlpRepr")]
pub struct Mlp {
    blocks: Vec<MlpBlock>,
}

#[derive(Deserialize)]
struct MlpRepr {
    blocks: Vec<MlpBlock>,
}

impl TryFrom<MlpRepr> for Mlp {
    type Error = TemporalGnnError;

    fn try_from(repr: MlpRepr) -> Result<Self> {
        if repr.blocks.is_empty() {
            return Err(TemporalGnnError::invalid_config("mlp has no blocks"));
        }
        for (i, block) in repr.blocks.iter().enumerate() {
            let width = block.linear.output_dim();
            if block.norm.gamma.len() != width {
                return Err(TemporalGnnError::shape_mismatch(
                    format!("mlp block {i} norm"),
                    width,
                    block.norm.gamma.len(),
                ));
            }
            if let Some(next) = repr.blocks.get(i + 1) {
                if next.linear.input_dim() != width {
                    return Err(TemporalGnnError::shape_mismatch(
                        format!("mlp block {} input", i + 1),
                        width,
                        next.linear.input_dim(),
                    ));
                }
            }
        }
        Ok(Self {
            blocks: repr.blocks,
        })
    }
}

impl Mlp {
    /// Build an MLP from channel widths, e.g. `[3, 16]` or `[32, 64, 64, 64]`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for fewer than two widths or a zero width.
    pub fn new(channels: &[usize]) -> Result<Self> {
        Self::with_rng(channels, &mut rand::thread_rng())
    }

    /// Build an MLP drawing weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(channels: &[usize], rng: &mut R) -> Result<Self> {
        if channels.len() < 2 || channels.iter().any(|&c| c == 0) {
            return Err(TemporalGnnError::invalid_config(format!(
                "mlp channels must have at least two positive widths, got {channels:?}"
            )));
        }
        let blocks = channels
            .windows(2)
            .map(|pair| MlpBlock {
                linear: Linear::with_rng(pair[0], pair[1], &mut *rng),
                norm: BatchNorm1d::new(pair[1], 1e-5),
            })
            .collect();
        Ok(Self { blocks })
    }
}

impl Reset for Mlp {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        for block in &mut self.blocks {
            block.linear.reset(rng);
            block.norm.reset(rng);
        }
    }
}

impl Transform for Mlp {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut hidden = input.to_owned();
        for block in &self.blocks {
            let mut projected = block.linear.forward(hidden.view())?;
            projected.mapv_inplace(|x| x.max(0.0));
            hidden = block.norm.forward(projected.view())?;
        }
        Ok(hidden)
    }

    fn input_dim(&self) -> usize {
        self.blocks[0].linear.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.blocks[self.blocks.len() - 1].linear.output_dim()
    }
}

/// Pass-through transform; the default when no pre-transform is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    dim: usize,
}

impl Identity {
    /// Identity over `dim` features.
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Reset for Identity {
    fn reset(&mut self, _rng: &mut dyn RngCore) {}
}

impl Transform for Identity {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_width("identity", &input, self.dim)?;
        Ok(input.to_owned())
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }
}

/// Row-wise softmax in place, stable against large scores.
///
/// Rows that are entirely `-inf` become uniform zeros.
pub fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            row.fill(0.0);
            continue;
        }
        row.mapv_inplace(|s| (s - max).exp());
        // Softmax with epsilon guard against division by zero
        let sum = row.sum().max(1e-10);
        row.mapv_inplace(|e| e / sum);
    }
}

/// Multi-head self-attention over fixed-size blocks of rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHeadAttention {
    num_heads: usize,
    head_dim: usize,
    activation: Activation,
    q_linear: Linear,
    k_linear: Linear,
    v_linear: Linear,
    out_linear: Linear,
}

impl MultiHeadAttention {
    /// Create a new multi-head attention layer
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `embed_dim` is not divisible by `num_heads`.
    pub fn new(embed_dim: usize, num_heads: usize) -> Result<Self> {
        Self::with_rng(embed_dim, num_heads, Activation::Relu, &mut rand::thread_rng())
    }

    /// Create a layer with an explicit activation, drawing weights from `rng`
    pub fn with_rng<R: Rng + ?Sized>(
        embed_dim: usize,
        num_heads: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        if num_heads == 0 || embed_dim == 0 || embed_dim % num_heads != 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "embedding dimension {embed_dim} must be divisible by {num_heads} heads"
            )));
        }

        Ok(Self {
            num_heads,
            head_dim: embed_dim / num_heads,
            activation,
            q_linear: Linear::with_rng(embed_dim, embed_dim, &mut *rng),
            k_linear: Linear::with_rng(embed_dim, embed_dim, &mut *rng),
            v_linear: Linear::with_rng(embed_dim, embed_dim, &mut *rng),
            out_linear: Linear::with_rng(embed_dim, embed_dim, &mut *rng),
        })
    }

    /// Embedding width.
    pub fn embed_dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn project(&self, linear: &Linear, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let activation = self.activation;
        let mut out = linear.forward(input)?;
        out.mapv_inplace(|x| activation.apply(x));
        Ok(out)
    }

    /// Self-attention (query = key = value) within consecutive blocks of `block` rows.
    ///
    /// # Arguments
    /// * `input` - `[blocks * block, embed_dim]` rows, block-contiguous
    /// * `block` - Rows per block (the neighborhood size k)
    ///
    /// # Returns
    /// Attention-refined rows with the input's shape
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the row count is not a multiple of `block`
    /// or the width differs from the embedding dimension.
    pub fn forward_blocks(&self, input: ArrayView2<f32>, block: usize) -> Result<Array2<f32>> {
        check_width("multi-head attention", &input, self.embed_dim())?;
        if block == 0 || input.nrows() % block != 0 {
            return Err(TemporalGnnError::shape_mismatch(
                "attention blocks",
                format!("rows divisible by {block}"),
                input.nrows(),
            ));
        }

        let q = self.project(&self.q_linear, input)?;
        let k = self.project(&self.k_linear, input)?;
        let v = self.project(&self.v_linear, input)?;

        let scale = (self.head_dim as f32).sqrt();
        let mut concat = Array2::<f32>::zeros(input.raw_dim());
        for start in (0..input.nrows()).step_by(block) {
            let rows = start..start + block;
            for h in 0..self.num_heads {
                let cols = h * self.head_dim..(h + 1) * self.head_dim;
                let q_h = q.slice(s![rows.clone(), cols.clone()]);
                let k_h = k.slice(s![rows.clone(), cols.clone()]);
                let v_h = v.slice(s![rows.clone(), cols.clone()]);

                let mut scores = q_h.dot(&k_h.t()) / scale;
                softmax_rows(&mut scores);
                concat
                    .slice_mut(s![rows.clone(), cols])
                    .assign(&scores.dot(&v_h));
            }
        }

        self.project(&self.out_linear, concat.view())
    }
}

impl Reset for MultiHeadAttention {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        self.q_linear.reset(rng);
        self.k_linear.reset(rng);
        self.v_linear.reset(rng);
        self.out_linear.reset(rng);
    }
}
