//! End-to-end gesture classifier.
//!
//! Aligns each sample, runs two temporal edge convolutions, projects the
//! concatenated point features, max-pools per sample and scores the classes.

use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::debug;

use crate::align::{Align, Stn3d};
use crate::batch::FrameBatch;
use crate::config::{ClassifierConfig, StageConfig};
use crate::conv::TemporalEdgeConv;
use crate::edge::EdgeIndex;
use crate::error::{Result, TemporalGnnError};
use crate::graph::{GraphStrategy, SelfAttentionGraphCreator};
use crate::layer::{Linear, Mlp, Reset, Transform};

/// Result of a classifier forward pass.
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    /// Log-probabilities `[B, C]`.
    pub log_probs: Array2<f32>,
    /// Projected per-point features `[N, projection_width]` before pooling.
    pub point_features: Array2<f32>,
    /// Edges of the first and second convolution.
    pub edges: [EdgeIndex; 2],
    /// Sequence numbers rescaled to `1..=num_frames`.
    pub sequence: Array1<f32>,
}

/// Temporal edge convolution classifier over point-cloud frames.
#[derive(Debug)]
pub struct GestureClassifier {
    config: ClassifierConfig,
    align: Box<dyn Align>,
    conv1: TemporalEdgeConv,
    conv2: TemporalEdgeConv,
    projection: Mlp,
    head: Option<Mlp>,
    output: Linear,
}

impl GestureClassifier {
    /// Build a classifier with the given alignment network.
    ///
    /// Parameters come from `config.seed` when set, else from OS entropy.
    ///
    /// # Errors
    /// Returns the first validation or construction error of any component.
    pub fn new(config: ClassifierConfig, align: Box<dyn Align>) -> Result<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, align, &mut rng)
    }

    /// Build a classifier with a spatial transformer from `config.stn`.
    pub fn with_stn(config: ClassifierConfig) -> Result<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let stn = Stn3d::with_rng(&config.stn, &mut rng)?;
        Self::with_rng(config, Box::new(stn), &mut rng)
    }

    /// Build a classifier drawing all parameters from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        config: ClassifierConfig,
        align: Box<dyn Align>,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;

        let conv1 = build_stage(&config, &config.stage1, 3, &mut *rng)?;
        let width1 = conv1.output_dim();
        let conv2 = build_stage(&config, &config.stage2, width1, &mut *rng)?;
        let width2 = conv2.output_dim();

        let projection = Mlp::with_rng(&[width1 + width2, config.projection_width], &mut *rng)?;

        let mut head_channels = vec![config.projection_width];
        head_channels.extend_from_slice(&config.head_widths);
        let head = if head_channels.len() > 1 {
            Some(Mlp::with_rng(&head_channels, &mut *rng)?)
        } else {
            None
        };
        let last = head_channels.last().copied().unwrap_or(config.projection_width);
        let output = Linear::with_rng(last, config.num_classes, rng);

        debug!(
            num_classes = config.num_classes,
            k = config.k,
            t = config.t,
            stage1_width = width1,
            stage2_width = width2,
            "built gesture classifier"
        );

        Ok(Self {
            config,
            align,
            conv1,
            conv2,
            projection,
            head,
            output,
        })
    }

    /// The configuration the classifier was built from.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a batch.
    ///
    /// # Arguments
    /// * `pos` - Positions `[N, 3]` in flattened sample/frame/point order
    /// * `batch` - Frame and sample ids of the same points
    ///
    /// # Errors
    /// Propagates shape, neighbor and invariant errors from every stage.
    pub fn forward(&self, pos: ArrayView2<f32>, batch: &FrameBatch) -> Result<ClassifierOutput> {
        if pos.ncols() != 3 || pos.nrows() != batch.len() {
            return Err(TemporalGnnError::shape_mismatch(
                "classifier positions",
                format!("[{}, 3]", batch.len()),
                format!("{:?}", pos.shape()),
            ));
        }

        let aligned = self.align_samples(pos, batch)?;
        let first = self.conv1.forward(aligned.view(), batch)?;
        let second = self.conv2.forward(first.features.view(), batch)?;

        let joined = concatenate(Axis(1), &[first.features.view(), second.features.view()])?;
        let point_features = self.projection.forward(joined.view())?;
        let pooled = max_pool(point_features.view(), batch);

        let hidden = match &self.head {
            Some(head) => head.forward(pooled.view())?,
            None => pooled,
        };
        let logits = self.output.forward(hidden.view())?;

        let frames = batch.layout().num_frames;
        let sequence = batch
            .normalized_sequence()
            .mapv(|s| (frames - 1) as f32 * s + 1.0);

        Ok(ClassifierOutput {
            log_probs: log_softmax(logits),
            point_features,
            edges: [first.edges, second.edges],
            sequence,
        })
    }

    /// Most likely class of each sample.
    pub fn predict(&self, pos: ArrayView2<f32>, batch: &FrameBatch) -> Result<Vec<usize>> {
        let output = self.forward(pos, batch)?;
        Ok(output
            .log_probs
            .outer_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (c, &p)| {
                        if p > best.1 {
                            (c, p)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }

    fn align_samples(&self, pos: ArrayView2<f32>, batch: &FrameBatch) -> Result<Array2<f32>> {
        let per_sample = batch.layout().points_per_sample();
        let mut aligned = Array2::<f32>::zeros(pos.raw_dim());
        for b in 0..batch.layout().batch_size {
            let rows = b * per_sample..(b + 1) * per_sample;
            let points = pos.slice(s![rows.clone(), ..]);
            let transform = self.align.align(points)?;
            if transform.dim() != (3, 3) {
                return Err(TemporalGnnError::shape_mismatch(
                    "alignment transform",
                    "(3, 3)",
                    format!("{:?}", transform.dim()),
                ));
            }
            aligned
                .slice_mut(s![rows, ..])
                .assign(&points.dot(&transform));
        }
        Ok(aligned)
    }
}

impl Reset for GestureClassifier {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        self.align.reset(rng);
        self.conv1.reset(rng);
        self.conv2.reset(rng);
        self.projection.reset(rng);
        if let Some(head) = &mut self.head {
            head.reset(rng);
        }
        self.output.reset(rng);
    }
}

fn build_stage<R: Rng + ?Sized>(
    config: &ClassifierConfig,
    stage: &StageConfig,
    input_width: usize,
    rng: &mut R,
) -> Result<TemporalEdgeConv> {
    let graph_width = stage.graph_width(input_width);
    let creator =
        SelfAttentionGraphCreator::with_rng(2 * graph_width, stage.heads, config.k, &mut *rng)?;
    let message = Mlp::with_rng(&stage.message, &mut *rng)?;

    let mut builder = TemporalEdgeConv::builder(input_width)
        .message(Box::new(message))
        .graph_strategy(GraphStrategy::SelfAttention(creator))
        .layout(config.layout)
        .heads(stage.heads)
        .window(config.t)
        .aggregation(config.aggregation);
    if let Some(widths) = &stage.pre_transform {
        builder = builder.pre_transform(Box::new(Mlp::with_rng(widths, &mut *rng)?));
    }
    builder.build_with_rng(rng)
}

/// Max over the points of each sample: `[N, D] -> [B, D]`.
fn max_pool(features: ArrayView2<f32>, batch: &FrameBatch) -> Array2<f32> {
    let layout = batch.layout();
    let per_sample = layout.points_per_sample();
    let mut pooled = Array2::<f32>::zeros((layout.batch_size, features.ncols()));
    for (b, mut row) in pooled.outer_iter_mut().enumerate() {
        let block = features.slice(s![b * per_sample..(b + 1) * per_sample, ..]);
        row.assign(&block.fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &x| a.max(x)));
    }
    pooled
}

/// Row-wise log-softmax.
///
/// The max is subtracted before the log-sum is taken so large logits keep
/// their low-order bits.
pub fn log_softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.outer_iter_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|x| (x - max) - log_sum);
    }
    logits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::IdentityAlign;
    use crate::config::{LayoutConfig, StnConfig};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig {
            num_classes: 4,
            layout: LayoutConfig {
                batch_size: 2,
                num_points: 15,
                num_frames: 3,
            },
            k: 2,
            t: 1,
            stage1: StageConfig {
                pre_transform: Some(vec![3, 4]),
                message: vec![8, 8],
                heads: 2,
            },
            stage2: StageConfig {
                pre_transform: None,
                message: vec![16, 8],
                heads: 2,
            },
            projection_width: 16,
            head_widths: vec![8],
            stn: StnConfig {
                point_widths: vec![8],
                head_widths: vec![4],
            },
            seed: Some(11),
            ..Default::default()
        }
    }

    fn positions(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 3), |(i, j)| ((i * 5 + j * 7) % 13) as f32 / 13.0 - 0.5)
    }

    #[test]
    fn test_log_softmax_rows_normalize() {
        let out = log_softmax(array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 0.0]]);
        for row in out.outer_iter() {
            assert_abs_diff_eq!(row.mapv(f32::exp).sum(), 1.0, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(out[[1, 0]], -(2f32.ln()), epsilon = 1e-5);
    }

    #[test]
    fn test_log_softmax_is_shift_invariant_for_large_logits() {
        let out = log_softmax(array![[1.0, 2.0, 3.0], [10001.0, 10002.0, 10003.0]]);
        for (a, b) in out.row(0).iter().zip(out.row(1).iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(out.row(1).mapv(f32::exp).sum(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_forward_shapes() {
        let model = GestureClassifier::new(tiny_config(), Box::new(IdentityAlign)).unwrap();
        let batch = FrameBatch::regular(2, 3, 5).unwrap();
        let out = model.forward(positions(30).view(), &batch).unwrap();
        assert_eq!(out.log_probs.shape(), &[2, 4]);
        assert_eq!(out.point_features.shape(), &[30, 16]);
        assert_eq!(out.edges[0].len(), 60);
        assert_eq!(out.edges[1].len(), 60);
        assert_eq!(out.sequence[0], 1.0);
        assert_eq!(out.sequence[29], 3.0);
    }

    #[test]
    fn test_seeded_models_agree() {
        let a = GestureClassifier::with_stn(tiny_config()).unwrap();
        let b = GestureClassifier::with_stn(tiny_config()).unwrap();
        let batch = FrameBatch::regular(2, 3, 5).unwrap();
        let pos = positions(30);
        let out_a = a.forward(pos.view(), &batch).unwrap();
        let out_b = b.forward(pos.view(), &batch).unwrap();
        assert_eq!(out_a.log_probs, out_b.log_probs);
        assert_eq!(a.predict(pos.view(), &batch).unwrap().len(), 2);
    }

    #[test]
    fn test_wrong_position_width() {
        let model = GestureClassifier::new(tiny_config(), Box::new(IdentityAlign)).unwrap();
        let batch = FrameBatch::regular(2, 3, 5).unwrap();
        let pos = Array2::<f32>::zeros((30, 2));
        assert!(matches!(
            model.forward(pos.view(), &batch),
            Err(TemporalGnnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_max_pool_per_sample() {
        let batch = FrameBatch::regular(2, 1, 2).unwrap();
        let features = array![[1.0, -2.0], [0.5, -1.0], [3.0, 0.0], [-3.0, 4.0]];
        let pooled = max_pool(features.view(), &batch);
        assert_eq!(pooled, array![[1.0, -1.0], [3.0, 4.0]]);
    }
}
