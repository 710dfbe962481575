//! Configuration types for the temporal edge convolution and classifier.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TemporalGnnError};

/// Which past frames a point may connect to when building k-NN candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CausalPolicy {
    /// Frames `[f - t, f - 1]`; frame 1 connects to itself.
    #[default]
    Strict,
    /// Frames `[f - t, f]`.
    Inclusive,
}

/// Fallback rule for the adjacent-frame group ids at sequence boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Only frame 1 falls back to its own group.
    #[default]
    FirstOnly,
    /// Frame 1 and the last frame both fall back to their own group.
    FirstAndLast,
}

/// Reduction applied to the k refined messages of a source point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Element-wise maximum.
    #[default]
    Max,
    /// Element-wise mean.
    Mean,
    /// Element-wise sum.
    Sum,
}

/// Activation applied after the attention projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// No activation.
    Identity,
    /// Rectified linear unit.
    #[default]
    Relu,
}

impl Activation {
    /// Apply the activation to a scalar.
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
        }
    }
}

/// Fixed batch geometry a convolution layer is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Nominal number of samples per batch.
    pub batch_size: usize,
    /// Points per sample (all frames together).
    pub num_points: usize,
    /// Frames per sample.
    pub num_frames: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_points: 256,
            num_frames: 8,
        }
    }
}

impl LayoutConfig {
    /// Points in one frame.
    pub fn points_per_frame(&self) -> usize {
        self.num_points / self.num_frames.max(1)
    }

    /// Validate the layout.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.num_points == 0 || self.num_frames == 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "layout dimensions must be non-zero: {:?}",
                self
            )));
        }
        if self.num_points % self.num_frames != 0 {
            return Err(TemporalGnnError::shape_mismatch(
                "layout",
                format!("num_points divisible by {} frames", self.num_frames),
                self.num_points,
            ));
        }
        Ok(())
    }
}

/// One convolution stage of the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Widths of the optional pre-transform, input width first.
    pub pre_transform: Option<Vec<usize>>,
    /// Widths of the message network, `2 * graph width` first.
    pub message: Vec<usize>,
    /// Attention heads for graph creation and aggregation.
    pub heads: usize,
}

impl StageConfig {
    /// Width of the features the graph is built on.
    pub fn graph_width(&self, input_width: usize) -> usize {
        self.pre_transform
            .as_ref()
            .and_then(|w| w.last().copied())
            .unwrap_or(input_width)
    }

    /// Width of the stage output.
    pub fn output_width(&self) -> usize {
        self.message.last().copied().unwrap_or(0)
    }

    fn validate(&self, name: &str, input_width: usize) -> Result<()> {
        if let Some(widths) = &self.pre_transform {
            if widths.len() < 2 || widths[0] != input_width {
                return Err(TemporalGnnError::invalid_config(format!(
                    "{name}: pre-transform widths {widths:?} must start at input width {input_width}"
                )));
            }
        }
        let graph_width = self.graph_width(input_width);
        if self.message.len() < 2 || self.message[0] != 2 * graph_width {
            return Err(TemporalGnnError::invalid_config(format!(
                "{name}: message widths {:?} must start at {}",
                self.message,
                2 * graph_width
            )));
        }
        if self.heads == 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "{name}: heads must be positive"
            )));
        }
        if self.output_width() % self.heads != 0 || (2 * graph_width) % self.heads != 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "{name}: widths {} and {} must be divisible by {} heads",
                self.output_width(),
                2 * graph_width,
                self.heads
            )));
        }
        Ok(())
    }
}

/// Configuration of the spatial transformer used for alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StnConfig {
    /// Shared per-point widths after the 3D input.
    pub point_widths: Vec<usize>,
    /// Fully connected widths after max pooling.
    pub head_widths: Vec<usize>,
}

impl Default for StnConfig {
    fn default() -> Self {
        Self {
            point_widths: vec![64, 128, 1024],
            head_widths: vec![512, 256],
        }
    }
}

impl StnConfig {
    /// Validate the widths.
    pub fn validate(&self) -> Result<()> {
        if self.point_widths.is_empty() || self.point_widths.iter().any(|&w| w == 0) {
            return Err(TemporalGnnError::invalid_config(
                "stn point widths must be non-empty and positive",
            ));
        }
        if self.head_widths.iter().any(|&w| w == 0) {
            return Err(TemporalGnnError::invalid_config(
                "stn head widths must be positive",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration of the gesture classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Number of gesture classes.
    pub num_classes: usize,
    /// Batch geometry.
    pub layout: LayoutConfig,
    /// Edges per point.
    pub k: usize,
    /// Odd temporal window of the attention mask.
    pub t: usize,
    /// Reduction over each neighborhood.
    pub aggregation: Aggregation,
    /// First convolution stage (input is the 3D position).
    pub stage1: StageConfig,
    /// Second convolution stage (input is the first stage output).
    pub stage2: StageConfig,
    /// Width of the per-point projection before pooling.
    pub projection_width: usize,
    /// Hidden widths of the classification head.
    pub head_widths: Vec<usize>,
    /// Spatial transformer used by [`crate::align::Stn3d`].
    #[serde(default)]
    pub stn: StnConfig,
    /// Dropout rate of the head; identity at inference.
    pub dropout: f32,
    /// Optional seed for reproducible initialization.
    pub seed: Option<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            num_classes: 21,
            layout: LayoutConfig::default(),
            k: 8,
            t: 5,
            aggregation: Aggregation::Max,
            stage1: StageConfig {
                pre_transform: Some(vec![3, 16]),
                message: vec![32, 64, 64, 64],
                heads: 4,
            },
            stage2: StageConfig {
                pre_transform: None,
                message: vec![128, 128],
                heads: 8,
            },
            projection_width: 1024,
            head_widths: vec![512, 256],
            stn: StnConfig::default(),
            dropout: 0.5,
            seed: None,
        }
    }
}

impl ClassifierConfig {
    /// Validate all parameters.
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        if self.num_classes == 0 {
            return Err(TemporalGnnError::invalid_config("num_classes must be positive"));
        }
        if self.k == 0 {
            return Err(TemporalGnnError::invalid_config("k must be positive"));
        }
        if self.t % 2 == 0 {
            return Err(TemporalGnnError::invalid_config(format!(
                "t must be odd, got {}",
                self.t
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TemporalGnnError::invalid_config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.projection_width == 0 {
            return Err(TemporalGnnError::invalid_config(
                "projection_width must be positive",
            ));
        }
        if self.head_widths.iter().any(|&w| w == 0) {
            return Err(TemporalGnnError::invalid_config("head widths must be positive"));
        }
        self.stn.validate()?;
        self.stage1.validate("stage1", 3)?;
        self.stage2.validate("stage2", self.stage1.output_width())?;
        Ok(())
    }

    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TemporalGnnError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TemporalGnnError::invalid_config(e.to_string()))
    }
}
