//! Temporal automated dynamic edge convolution.
//!
//! One forward pass:
//! 1. optional pre-transform of the point features,
//! 2. sequence-number embedding concatenated to the features,
//! 3. per-sample graph creation under the temporal mask,
//! 4. offset correction into the flattened index space,
//! 5. edge messages `nn([x_i, x_j - x_i])`,
//! 6. multi-head self-attention (or a softmax gate) over each block of k messages,
//! 7. reduction of each block into its source point.
//!
//! Steps 2 to 4 only apply to the attention graph; k-NN strategies build
//! global edges directly.

use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::{Rng, RngCore};
use tracing::{debug, warn};

use crate::batch::FrameBatch;
use crate::config::{Activation, Aggregation, LayoutConfig};
use crate::edge::{BatchOffsets, EdgeIndex};
use crate::error::{Result, TemporalGnnError};
use crate::graph::{GraphStrategy, KnnGraphCreator, SelfAttentionGraphCreator};
use crate::layer::{softmax_rows, Identity, Mlp, MultiHeadAttention, Reset, Transform};
use crate::mask::TemporalMask;

/// Output of one convolution pass.
#[derive(Debug, Clone)]
pub struct ConvOutput {
    /// Updated per-point features `[N, out]`.
    pub features: Array2<f32>,
    /// Global edges used for aggregation, returned for diagnostics.
    pub edges: EdgeIndex,
}

/// Builder for [`TemporalEdgeConv`].
///
/// The message network and graph strategy are always required. The layout
/// and odd window are required by the attention graph only.
#[derive(Debug)]
pub struct TemporalEdgeConvBuilder {
    in_features: usize,
    pre_transform: Option<Box<dyn Transform>>,
    message: Option<Box<dyn Transform>>,
    gate: Option<Box<dyn Transform>>,
    strategy: Option<GraphStrategy>,
    layout: Option<LayoutConfig>,
    heads: usize,
    t: usize,
    aggregation: Aggregation,
}

impl TemporalEdgeConvBuilder {
    /// Transform applied to the raw features before graph creation.
    pub fn pre_transform(mut self, transform: Box<dyn Transform>) -> Self {
        self.pre_transform = Some(transform);
        self
    }

    /// Message network over `[x_i, x_j - x_i]`.
    pub fn message(mut self, transform: Box<dyn Transform>) -> Self {
        self.message = Some(transform);
        self
    }

    /// Gate network `[message] -> [1]` replacing the block attention.
    ///
    /// Gate scores are softmaxed within each neighborhood and scale the
    /// messages before the reduction.
    pub fn gate(mut self, transform: Box<dyn Transform>) -> Self {
        self.gate = Some(transform);
        self
    }

    /// Neighbor selection strategy; also fixes `k`.
    pub fn graph_strategy(mut self, strategy: GraphStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Batch geometry the mask and offsets are built for.
    pub fn layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Attention heads of the aggregation.
    pub fn heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    /// Odd temporal window of the attention mask.
    pub fn window(mut self, t: usize) -> Self {
        self.t = t;
        self
    }

    /// Reduction over each neighborhood.
    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Build the layer with thread-local randomness.
    pub fn build(self) -> Result<TemporalEdgeConv> {
        self.build_with_rng(&mut rand::thread_rng())
    }

    /// Build the layer, drawing new parameters from `rng`.
    ///
    /// # Errors
    /// - `MissingDependency` if the message network or graph strategy is
    ///   absent, or the attention graph has no layout
    /// - `InvalidConfig` for an even window or indivisible attention widths
    /// - `ShapeMismatch` if component widths do not chain
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<TemporalEdgeConv> {
        let message = self
            .message
            .ok_or(TemporalGnnError::MissingDependency("message network"))?;
        let strategy = self
            .strategy
            .ok_or(TemporalGnnError::MissingDependency("graph creator"))?;

        let pre_transform = self
            .pre_transform
            .unwrap_or_else(|| Box::new(Identity::new(self.in_features)));
        if pre_transform.input_dim() != self.in_features {
            return Err(TemporalGnnError::shape_mismatch(
                "pre-transform input",
                self.in_features,
                pre_transform.input_dim(),
            ));
        }

        let graph_width = pre_transform.output_dim();
        if message.input_dim() != 2 * graph_width {
            return Err(TemporalGnnError::shape_mismatch(
                "message input",
                2 * graph_width,
                message.input_dim(),
            ));
        }

        let refinement = match self.gate {
            Some(gate) => {
                if gate.input_dim() != message.output_dim() || gate.output_dim() != 1 {
                    return Err(TemporalGnnError::shape_mismatch(
                        "gate network",
                        format!("[{}] -> [1]", message.output_dim()),
                        format!("[{}] -> [{}]", gate.input_dim(), gate.output_dim()),
                    ));
                }
                Refinement::Gate(gate)
            }
            None => Refinement::Attention(MultiHeadAttention::with_rng(
                message.output_dim(),
                self.heads,
                Activation::Relu,
                &mut *rng,
            )?),
        };

        let graph = match strategy {
            GraphStrategy::SelfAttention(creator) => {
                if creator.in_features() != 2 * graph_width {
                    return Err(TemporalGnnError::shape_mismatch(
                        "graph creator input",
                        2 * graph_width,
                        creator.in_features(),
                    ));
                }
                let layout = self
                    .layout
                    .ok_or(TemporalGnnError::MissingDependency("batch layout"))?;
                layout.validate()?;
                let mask = TemporalMask::new(layout.num_points, layout.num_frames, self.t)?;
                debug!(
                    k = creator.k(),
                    t = self.t,
                    heads = self.heads,
                    batch_size = layout.batch_size,
                    num_points = layout.num_points,
                    num_frames = layout.num_frames,
                    "built temporal edge convolution"
                );
                Graph::Attention(AttentionGraph {
                    creator,
                    sequence_embedding: Mlp::with_rng(&[1, graph_width], rng)?,
                    mask,
                    offsets: BatchOffsets::new(layout.batch_size, layout.num_points),
                    layout,
                })
            }
            GraphStrategy::Knn(creator) => {
                debug!(k = creator.k(), heads = self.heads, "built k-NN edge convolution");
                Graph::Knn(creator)
            }
        };

        Ok(TemporalEdgeConv {
            pre_transform,
            message,
            refinement,
            graph,
            aggregation: self.aggregation,
        })
    }
}

/// Attention graph state, fixed at construction for one layout.
#[derive(Debug)]
struct AttentionGraph {
    creator: SelfAttentionGraphCreator,
    sequence_embedding: Mlp,
    mask: TemporalMask,
    offsets: BatchOffsets,
    layout: LayoutConfig,
}

#[derive(Debug)]
enum Graph {
    Attention(AttentionGraph),
    Knn(KnnGraphCreator),
}

/// How the k messages of a neighborhood are weighted before reduction.
#[derive(Debug)]
enum Refinement {
    Attention(MultiHeadAttention),
    Gate(Box<dyn Transform>),
}

/// Edge convolution over a dynamic, temporally constrained graph.
#[derive(Debug)]
pub struct TemporalEdgeConv {
    pre_transform: Box<dyn Transform>,
    message: Box<dyn Transform>,
    refinement: Refinement,
    graph: Graph,
    aggregation: Aggregation,
}

impl TemporalEdgeConv {
    /// Start building a layer over `in_features`-wide points.
    pub fn builder(in_features: usize) -> TemporalEdgeConvBuilder {
        TemporalEdgeConvBuilder {
            in_features,
            pre_transform: None,
            message: None,
            gate: None,
            strategy: None,
            layout: None,
            heads: 1,
            t: 5,
            aggregation: Aggregation::Max,
        }
    }

    /// Convenience constructor for the attention-graph configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn with_self_attention<R: Rng + ?Sized>(
        pre_transform: Option<Box<dyn Transform>>,
        message: Box<dyn Transform>,
        in_features: usize,
        heads: usize,
        k: usize,
        t: usize,
        layout: LayoutConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let graph_width = pre_transform
            .as_ref()
            .map(|p| p.output_dim())
            .unwrap_or(in_features);
        let creator = SelfAttentionGraphCreator::with_rng(2 * graph_width, heads, k, &mut *rng)?;

        let mut builder = Self::builder(in_features)
            .message(message)
            .graph_strategy(GraphStrategy::SelfAttention(creator))
            .layout(layout)
            .heads(heads)
            .window(t);
        if let Some(pre) = pre_transform {
            builder = builder.pre_transform(pre);
        }
        builder.build_with_rng(rng)
    }

    /// Edges per point.
    pub fn k(&self) -> usize {
        match &self.graph {
            Graph::Attention(attention) => attention.creator.k(),
            Graph::Knn(creator) => creator.k(),
        }
    }

    /// Output feature width.
    pub fn output_dim(&self) -> usize {
        self.message.output_dim()
    }

    /// Layout of the attention graph; `None` for k-NN strategies.
    pub fn layout(&self) -> Option<LayoutConfig> {
        match &self.graph {
            Graph::Attention(attention) => Some(attention.layout),
            Graph::Knn(_) => None,
        }
    }

    /// Temporal mask of the attention graph; `None` for k-NN strategies.
    pub fn mask(&self) -> Option<&TemporalMask> {
        match &self.graph {
            Graph::Attention(attention) => Some(&attention.mask),
            Graph::Knn(_) => None,
        }
    }

    /// Run the convolution.
    ///
    /// # Arguments
    /// * `x` - Point features `[N, in_features]` in flattened order
    /// * `batch` - Frame and sample ids of the same points
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the batch does not fit the layer's layout,
    /// `InsufficientNeighbors` from graph creation, and `InvariantViolation`
    /// if edges are not grouped in source blocks of k.
    pub fn forward(&self, x: ArrayView2<f32>, batch: &FrameBatch) -> Result<ConvOutput> {
        if x.nrows() != batch.len() {
            return Err(TemporalGnnError::shape_mismatch(
                "conv input rows",
                batch.len(),
                x.nrows(),
            ));
        }

        let x = self.pre_transform.forward(x)?;
        let edges = match &self.graph {
            Graph::Attention(attention) => attention.edges(x.view(), batch)?,
            Graph::Knn(creator) => creator.create(x.view(), batch)?,
        };

        let k = self.k();
        let sources = edges.source_blocks(k)?;
        let messages = self.messages(x.view(), &edges)?;
        let refined = match &self.refinement {
            Refinement::Attention(attention) => attention.forward_blocks(messages.view(), k)?,
            Refinement::Gate(gate) => gated(gate.as_ref(), messages, k)?,
        };
        let features = self.aggregate(refined.view(), &sources, x.nrows(), k)?;

        debug!(points = x.nrows(), edges = edges.len(), "temporal edge convolution");
        Ok(ConvOutput { features, edges })
    }

    fn messages(&self, x: ArrayView2<f32>, edges: &EdgeIndex) -> Result<Array2<f32>> {
        if let Some(max) = edges.max_index() {
            if max >= x.nrows() {
                return Err(TemporalGnnError::shape_mismatch(
                    "edge endpoints",
                    format!("index < {}", x.nrows()),
                    max,
                ));
            }
        }

        let d = x.ncols();
        let mut input = Array2::<f32>::zeros((edges.len(), 2 * d));
        for (e, (i, j)) in edges.iter().enumerate() {
            let x_i = x.row(i);
            let x_j = x.row(j);
            let mut row = input.row_mut(e);
            row.slice_mut(s![..d]).assign(&x_i);
            row.slice_mut(s![d..]).assign(&(&x_j - &x_i));
        }
        self.message.forward(input.view())
    }

    fn aggregate(
        &self,
        refined: ArrayView2<f32>,
        sources: &[usize],
        num_points: usize,
        k: usize,
    ) -> Result<Array2<f32>> {
        let mut out = Array2::<f32>::zeros((num_points, refined.ncols()));
        let mut seen = vec![false; num_points];
        for (block, &source) in sources.iter().enumerate() {
            if std::mem::replace(&mut seen[source], true) {
                return Err(TemporalGnnError::invariant(format!(
                    "source {source} appears in more than one edge block"
                )));
            }
            let rows = refined.slice(s![block * k..(block + 1) * k, ..]);
            let reduced: Array1<f32> = match self.aggregation {
                Aggregation::Max => rows.fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &b| a.max(b)),
                Aggregation::Sum => rows.sum_axis(Axis(0)),
                Aggregation::Mean => rows.sum_axis(Axis(0)) / k as f32,
            };
            out.row_mut(source).assign(&reduced);
        }
        Ok(out)
    }
}

impl AttentionGraph {
    fn edges(&self, x: ArrayView2<f32>, batch: &FrameBatch) -> Result<EdgeIndex> {
        let layout = batch.layout();
        if layout.points_per_sample() != self.layout.num_points
            || layout.num_frames != self.layout.num_frames
        {
            return Err(TemporalGnnError::shape_mismatch(
                "conv layout",
                format!(
                    "{} points over {} frames per sample",
                    self.layout.num_points, self.layout.num_frames
                ),
                format!(
                    "{} points over {} frames per sample",
                    layout.points_per_sample(),
                    layout.num_frames
                ),
            ));
        }

        // A short final batch reads a prefix of the nominal table.
        let offsets = self.offsets.for_batch(layout.batch_size)?;
        if offsets.len() < self.offsets.batch_size() {
            warn!(
                actual = offsets.len(),
                nominal = self.offsets.batch_size(),
                "short batch, using truncated offsets"
            );
        }

        let sequence = batch.normalized_sequence().insert_axis(Axis(1));
        let embedded = self.sequence_embedding.forward(sequence.view())?;
        let input = concatenate(Axis(1), &[x.view(), embedded.view()])?;

        let p = self.layout.num_points;
        let mut edges = EdgeIndex::with_capacity(x.nrows() * self.creator.k());
        for (b, &offset) in offsets.iter().enumerate() {
            let local = self
                .creator
                .select(input.slice(s![b * p..(b + 1) * p, ..]), &self.mask)?;
            edges.extend_with_offset(&local, offset);
        }
        Ok(edges)
    }
}

/// Scale each message by its softmaxed gate score within its block of `k`.
fn gated(gate: &dyn Transform, mut messages: Array2<f32>, k: usize) -> Result<Array2<f32>> {
    if k == 0 || messages.nrows() % k != 0 {
        return Err(TemporalGnnError::shape_mismatch(
            "gate blocks",
            format!("rows divisible by {k}"),
            messages.nrows(),
        ));
    }
    let scores = gate.forward(messages.view())?;
    let mut weights = scores.into_shape((messages.nrows() / k, k))?;
    softmax_rows(&mut weights);
    for (mut row, &w) in messages.outer_iter_mut().zip(weights.iter()) {
        row.mapv_inplace(|v| v * w);
    }
    Ok(messages)
}

impl Reset for TemporalEdgeConv {
    fn reset(&mut self, rng: &mut dyn RngCore) {
        self.pre_transform.reset(rng);
        self.message.reset(rng);
        match &mut self.refinement {
            Refinement::Attention(attention) => attention.reset(rng),
            Refinement::Gate(gate) => gate.reset(rng),
        }
        if let Graph::Attention(attention) = &mut self.graph {
            attention.creator.reset(rng);
            attention.sequence_embedding.reset(rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundaryPolicy, CausalPolicy};
    use crate::graph::{KnnGraphCreator, KnnNeighborhood};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layout(batch_size: usize, frames: usize, ppf: usize) -> LayoutConfig {
        LayoutConfig {
            batch_size,
            num_points: frames * ppf,
            num_frames: frames,
        }
    }

    fn positions(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 3), |(i, j)| ((i * 7 + j * 3) % 10) as f32 * 0.1 - 0.5)
    }

    fn attention_conv(rng: &mut StdRng, layout: LayoutConfig, k: usize, t: usize) -> TemporalEdgeConv {
        TemporalEdgeConv::with_self_attention(
            Some(Box::new(Mlp::with_rng(&[3, 8], rng).unwrap())),
            Box::new(Mlp::with_rng(&[16, 16], rng).unwrap()),
            3,
            2,
            k,
            t,
            layout,
            rng,
        )
        .unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let mut rng = StdRng::seed_from_u64(5);
        let conv = attention_conv(&mut rng, layout(2, 3, 5), 2, 1);
        let batch = FrameBatch::regular(2, 3, 5).unwrap();
        let out = conv.forward(positions(30).view(), &batch).unwrap();
        assert_eq!(out.features.shape(), &[30, 16]);
        assert_eq!(out.edges.to_array().shape(), &[2, 60]);
        assert_eq!(out.edges.source_blocks(2).unwrap(), (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_edges_stay_within_samples() {
        let mut rng = StdRng::seed_from_u64(6);
        let conv = attention_conv(&mut rng, layout(3, 4, 2), 2, 3);
        let batch = FrameBatch::regular(3, 4, 2).unwrap();
        let out = conv.forward(positions(24).view(), &batch).unwrap();
        let sample = batch.sample();
        for (s, t) in out.edges.iter() {
            assert_eq!(sample[s], sample[t]);
        }
    }

    #[test]
    fn test_short_final_batch_uses_prefix_offsets() {
        let mut rng = StdRng::seed_from_u64(7);
        let conv = attention_conv(&mut rng, layout(3, 2, 4), 3, 1);
        let batch = FrameBatch::regular(2, 2, 4).unwrap();
        let out = conv.forward(positions(16).view(), &batch).unwrap();
        assert!(out.edges.max_index().unwrap() < 16);
        assert_eq!(out.features.nrows(), 16);
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let mut rng = StdRng::seed_from_u64(8);
        let conv = attention_conv(&mut rng, layout(1, 2, 4), 2, 1);
        let batch = FrameBatch::regular(2, 2, 4).unwrap();
        assert!(matches!(
            conv.forward(positions(16).view(), &batch),
            Err(TemporalGnnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut rng = StdRng::seed_from_u64(9);
        let conv = attention_conv(&mut rng, layout(2, 2, 4), 2, 1);
        let batch = FrameBatch::regular(2, 4, 2).unwrap();
        assert!(conv.forward(positions(16).view(), &batch).is_err());
        assert!(conv.forward(positions(15).view(), &batch).is_err());
    }

    #[test]
    fn test_missing_dependencies() {
        let err = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 8]).unwrap()))
            .layout(layout(1, 2, 2))
            .build()
            .unwrap_err();
        assert_eq!(err, TemporalGnnError::MissingDependency("graph creator"));

        let knn = KnnGraphCreator::new(
            1,
            KnnNeighborhood::PreviousFrame {
                boundary: BoundaryPolicy::FirstOnly,
            },
        )
        .unwrap();
        let err = TemporalEdgeConv::builder(3)
            .graph_strategy(GraphStrategy::Knn(knn))
            .layout(layout(1, 2, 2))
            .build()
            .unwrap_err();
        assert_eq!(err, TemporalGnnError::MissingDependency("message network"));

        let mut rng = StdRng::seed_from_u64(4);
        let creator = SelfAttentionGraphCreator::with_rng(6, 1, 1, &mut rng).unwrap();
        let err = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 8]).unwrap()))
            .graph_strategy(GraphStrategy::SelfAttention(creator))
            .window(1)
            .build()
            .unwrap_err();
        assert_eq!(err, TemporalGnnError::MissingDependency("batch layout"));
    }

    #[test]
    fn test_even_window_rejected() {
        let mut rng = StdRng::seed_from_u64(10);
        let result = TemporalEdgeConv::with_self_attention(
            None,
            Box::new(Mlp::with_rng(&[12, 8], &mut rng).unwrap()),
            6,
            2,
            1,
            4,
            layout(1, 2, 2),
            &mut rng,
        );
        assert!(matches!(result, Err(TemporalGnnError::InvalidConfig(_))));
    }

    #[test]
    fn test_message_width_must_chain() {
        let knn = KnnGraphCreator::new(
            1,
            KnnNeighborhood::PreviousFrame {
                boundary: BoundaryPolicy::FirstOnly,
            },
        )
        .unwrap();
        let result = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[4, 8]).unwrap()))
            .graph_strategy(GraphStrategy::Knn(knn))
            .layout(layout(1, 2, 2))
            .window(1)
            .build();
        assert!(matches!(result, Err(TemporalGnnError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_knn_strategy_forward() {
        let knn = KnnGraphCreator::new(
            2,
            KnnNeighborhood::Windowed {
                window: 1,
                policy: CausalPolicy::Strict,
                spatio_temporal_factor: 0.5,
            },
        )
        .unwrap();
        let conv = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 8]).unwrap()))
            .graph_strategy(GraphStrategy::Knn(knn))
            .heads(2)
            .window(4)
            .aggregation(Aggregation::Mean)
            .build()
            .unwrap();
        assert!(conv.layout().is_none());
        assert!(conv.mask().is_none());

        // No layout is bound, so any regular batch goes through
        for batch_size in [1, 2, 5] {
            let batch = FrameBatch::regular(batch_size, 3, 2).unwrap();
            let out = conv.forward(positions(batch.len()).view(), &batch).unwrap();
            assert_eq!(out.features.shape(), &[batch.len(), 8]);
            assert_eq!(out.edges.len(), 2 * batch.len());
        }
    }

    #[test]
    fn test_aggregations() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut conv = attention_conv(&mut rng, layout(1, 1, 2), 2, 1);
        let refined = ndarray::array![[1.0, -1.0], [3.0, -5.0], [0.0, 2.0], [4.0, 2.0]];

        let max = conv.aggregate(refined.view(), &[1, 0], 2, 2).unwrap();
        assert_eq!(max, ndarray::array![[4.0, 2.0], [3.0, -1.0]]);

        conv.aggregation = Aggregation::Sum;
        let sum = conv.aggregate(refined.view(), &[0, 1], 2, 2).unwrap();
        assert_eq!(sum, ndarray::array![[4.0, -6.0], [4.0, 4.0]]);

        conv.aggregation = Aggregation::Mean;
        let mean = conv.aggregate(refined.view(), &[0, 1], 2, 2).unwrap();
        assert_eq!(mean, ndarray::array![[2.0, -3.0], [2.0, 2.0]]);

        assert!(conv.aggregate(refined.view(), &[0, 0], 2, 2).is_err());
    }

    /// Scores every message zero, so softmax weights are uniform.
    #[derive(Debug)]
    struct ZeroGate {
        dim: usize,
    }

    impl Reset for ZeroGate {
        fn reset(&mut self, _rng: &mut dyn RngCore) {}
    }

    impl Transform for ZeroGate {
        fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
            Ok(Array2::zeros((input.nrows(), 1)))
        }

        fn input_dim(&self) -> usize {
            self.dim
        }

        fn output_dim(&self) -> usize {
            1
        }
    }

    fn windowed_knn_strategy(k: usize) -> GraphStrategy {
        GraphStrategy::Knn(
            KnnGraphCreator::new(
                k,
                KnnNeighborhood::Windowed {
                    window: 2,
                    policy: CausalPolicy::Inclusive,
                    spatio_temporal_factor: 0.5,
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_uniform_gate_sums_to_block_mean() {
        let mut rng = StdRng::seed_from_u64(14);
        let conv = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::with_rng(&[6, 4], &mut rng).unwrap()))
            .gate(Box::new(ZeroGate { dim: 4 }))
            .graph_strategy(windowed_knn_strategy(3))
            .aggregation(Aggregation::Sum)
            .build_with_rng(&mut rng)
            .unwrap();
        let batch = FrameBatch::regular(2, 3, 3).unwrap();
        let x = positions(18);
        let out = conv.forward(x.view(), &batch).unwrap();

        let messages = conv.messages(x.view(), &out.edges).unwrap();
        let sources = out.edges.source_blocks(3).unwrap();
        for (block, &source) in sources.iter().enumerate() {
            let mean = messages
                .slice(s![block * 3..(block + 1) * 3, ..])
                .mean_axis(Axis(0))
                .unwrap();
            for (a, b) in out.features.row(source).iter().zip(mean.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_gate_weights_normalize_per_block() {
        let messages = ndarray::array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];
        let weighted = gated(&ZeroGate { dim: 2 }, messages, 2).unwrap();
        assert_eq!(weighted, ndarray::array![[0.5, 1.0], [1.5, 2.0], [2.5, 3.0], [3.5, 4.0]]);

        let uneven = Array2::<f32>::zeros((3, 2));
        assert!(matches!(
            gated(&ZeroGate { dim: 2 }, uneven, 2),
            Err(TemporalGnnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gate_width_checked() {
        let result = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 4]).unwrap()))
            .gate(Box::new(Mlp::new(&[4, 2]).unwrap()))
            .graph_strategy(windowed_knn_strategy(2))
            .build();
        assert!(matches!(result, Err(TemporalGnnError::ShapeMismatch { .. })));

        let result = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 4]).unwrap()))
            .gate(Box::new(Mlp::new(&[8, 1]).unwrap()))
            .graph_strategy(windowed_knn_strategy(2))
            .build();
        assert!(matches!(result, Err(TemporalGnnError::ShapeMismatch { .. })));

        let conv = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 4]).unwrap()))
            .gate(Box::new(Mlp::new(&[4, 1]).unwrap()))
            .graph_strategy(windowed_knn_strategy(2))
            .build()
            .unwrap();
        let batch = FrameBatch::regular(1, 2, 3).unwrap();
        let out = conv.forward(positions(6).view(), &batch).unwrap();
        assert_eq!(out.features.shape(), &[6, 4]);
    }

    #[test]
    fn test_sample_neighborhood_crosses_frames_not_samples() {
        let knn = KnnGraphCreator::new(
            5,
            KnnNeighborhood::Sample {
                spatio_temporal_factor: 0.1,
            },
        )
        .unwrap();
        let conv = TemporalEdgeConv::builder(3)
            .message(Box::new(Mlp::new(&[6, 8]).unwrap()))
            .graph_strategy(GraphStrategy::Knn(knn))
            .build()
            .unwrap();
        // 3 points per frame, so 5 neighbors must reach into another frame
        let batch = FrameBatch::regular(2, 3, 3).unwrap();
        let out = conv.forward(positions(18).view(), &batch).unwrap();

        let sample = batch.sample();
        let seq = batch.sequence();
        assert!(out.edges.iter().all(|(s, t)| sample[s] == sample[t]));
        assert!(out.edges.iter().any(|(s, t)| seq[s] != seq[t]));
    }
}
