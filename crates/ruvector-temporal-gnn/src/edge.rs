//! Edge lists produced by graph construction.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TemporalGnnError};

/// Directed edges `(source, target)`.
///
/// Messages flow from `target` into `source`: the source index is the
/// aggregation key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeIndex {
    source: Vec<usize>,
    target: Vec<usize>,
}

impl EdgeIndex {
    /// Create an edge list from parallel index vectors.
    pub fn new(source: Vec<usize>, target: Vec<usize>) -> Result<Self> {
        if source.len() != target.len() {
            return Err(TemporalGnnError::shape_mismatch(
                "edge index",
                format!("{} targets", source.len()),
                target.len(),
            ));
        }
        Ok(Self { source, target })
    }

    /// Empty edge list with room for `capacity` edges.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            source: Vec::with_capacity(capacity),
            target: Vec::with_capacity(capacity),
        }
    }

    /// Append one edge.
    #[inline]
    pub fn push(&mut self, source: usize, target: usize) {
        self.source.push(source);
        self.target.push(target);
    }

    /// Append all edges of `other`, shifting both ends by `offset`.
    pub fn extend_with_offset(&mut self, other: &EdgeIndex, offset: usize) {
        self.source.extend(other.source.iter().map(|&s| s + offset));
        self.target.extend(other.target.iter().map(|&t| t + offset));
    }

    /// Source (aggregation) indices.
    pub fn source(&self) -> &[usize] {
        &self.source
    }

    /// Target indices.
    pub fn target(&self) -> &[usize] {
        &self.target
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Whether there are no edges.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Iterate over `(source, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.source.iter().copied().zip(self.target.iter().copied())
    }

    /// Largest index referenced by either end.
    pub fn max_index(&self) -> Option<usize> {
        self.source.iter().chain(self.target.iter()).copied().max()
    }

    /// Translate target indices through `mapper`.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if a target lies outside the mapper.
    pub fn remap_targets(&mut self, mapper: &[usize]) -> Result<()> {
        for t in self.target.iter_mut() {
            *t = *mapper.get(*t).ok_or_else(|| {
                TemporalGnnError::shape_mismatch(
                    "index mapper",
                    format!("index < {}", mapper.len()),
                    *t,
                )
            })?;
        }
        Ok(())
    }

    /// Check that edges come in contiguous blocks of `k` sharing one source.
    ///
    /// Returns the source of each block.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the edge count is not a multiple of `k`,
    /// and `InvariantViolation` if a block mixes sources.
    pub fn source_blocks(&self, k: usize) -> Result<Vec<usize>> {
        if k == 0 || self.len() % k != 0 {
            return Err(TemporalGnnError::shape_mismatch(
                "edge blocks",
                format!("multiple of k = {k}"),
                self.len(),
            ));
        }
        self.source
            .chunks_exact(k)
            .enumerate()
            .map(|(block, chunk)| {
                let head = chunk[0];
                if chunk.iter().all(|&s| s == head) {
                    Ok(head)
                } else {
                    Err(TemporalGnnError::invariant(format!(
                        "edge block {block} mixes sources {chunk:?}"
                    )))
                }
            })
            .collect()
    }

    /// Dense `(2, E)` view: row 0 holds sources, row 1 targets.
    pub fn to_array(&self) -> Array2<usize> {
        let mut out = Array2::zeros((2, self.len()));
        for (e, (s, t)) in self.iter().enumerate() {
            out[[0, e]] = s;
            out[[1, e]] = t;
        }
        out
    }
}

/// Per-sample offsets that lift sample-local edges into the flattened space.
///
/// Built once for the nominal batch size; a shorter batch reads a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOffsets {
    offsets: Vec<usize>,
}

impl BatchOffsets {
    /// `offsets[b] = b * num_points` for `b < batch_size`.
    pub fn new(batch_size: usize, num_points: usize) -> Self {
        Self {
            offsets: (0..batch_size).map(|b| b * num_points).collect(),
        }
    }

    /// Nominal batch size.
    pub fn batch_size(&self) -> usize {
        self.offsets.len()
    }

    /// Offsets for a batch of `actual` samples.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `actual` exceeds the nominal batch size.
    pub fn for_batch(&self, actual: usize) -> Result<&[usize]> {
        self.offsets.get(..actual).ok_or_else(|| {
            TemporalGnnError::shape_mismatch(
                "batch offsets",
                format!("at most {} samples", self.offsets.len()),
                actual,
            )
        })
    }
}
