//! # RuVector Temporal GNN
//!
//! Gesture classification over sequences of 3D point-cloud frames with a
//! temporal, automatically constructed dynamic edge convolution.
//!
//! ## Pipeline
//!
//! - **Batching**: points are flattened sample-major, then frame-major, with
//!   1-based sequence numbers ([`FrameBatch`])
//! - **Graph creation**: learned attention top-k under a frame-window mask
//!   ([`SelfAttentionGraphCreator`]), or causal k-NN over earlier frames
//!   ([`KnnGraphCreator`])
//! - **Convolution**: edge messages `nn([x_i, x_j - x_i])`, refined by
//!   multi-head self-attention per neighborhood and reduced into the source
//!   ([`TemporalEdgeConv`])
//! - **Classification**: alignment, two convolutions, projection, per-sample
//!   max pooling and a log-softmax head ([`GestureClassifier`])
//!
//! ### Usage Example
//!
//! ```rust,ignore
//! use ruvector_temporal_gnn::{
//!     ClassifierConfig, GestureBatch, GestureClassifier, IdentityAlign,
//! };
//!
//! let config = ClassifierConfig { seed: Some(42), ..Default::default() };
//! let model = GestureClassifier::new(config, Box::new(IdentityAlign))?;
//!
//! let batch = GestureBatch::collate(&samples)?;
//! let out = model.forward(batch.positions.view(), &batch.batch)?;
//! let classes = model.predict(batch.positions.view(), &batch.batch)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod align;
pub mod batch;
pub mod candidates;
pub mod classifier;
pub mod config;
pub mod conv;
pub mod data;
pub mod edge;
pub mod error;
pub mod graph;
pub mod knn;
pub mod layer;
pub mod mask;

// Re-export commonly used types
pub use align::{Align, IdentityAlign, Stn3d};
pub use batch::{BatchLayout, FrameBatch};
pub use candidates::{frame_mask, CandidateSet};
pub use classifier::{log_softmax, ClassifierOutput, GestureClassifier};
pub use config::{
    Activation, Aggregation, BoundaryPolicy, CausalPolicy, ClassifierConfig, LayoutConfig,
    StageConfig, StnConfig,
};
pub use conv::{ConvOutput, TemporalEdgeConv, TemporalEdgeConvBuilder};
pub use data::{GestureBatch, GestureSample};
pub use edge::{BatchOffsets, EdgeIndex};
pub use error::{Result, TemporalGnnError};
pub use graph::{
    spatio_temporal_input, GraphStrategy, KnnGraphCreator, KnnNeighborhood,
    SelfAttentionGraphCreator,
};
pub use knn::{knn, windowed_knn};
pub use layer::{Identity, Linear, Mlp, MultiHeadAttention, Reset, Transform};
pub use mask::TemporalMask;
