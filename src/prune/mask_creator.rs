//! Binary mask creation from importance scores.
//!
//! Elements (or groups of elements) are ranked by score in ascending order
//! and the lowest `round(sparsity * n)` are dropped. Equal scores keep
//! their flattened row-major position order, so the earlier element is
//! pruned first. Every tensor keeps at least its highest-scoring element
//! (or group), which makes `sparsity >= 1` mean "all but one".

use crate::error::{PodarError, Result};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Group size used by the `block` mask type.
pub const DEFAULT_BLOCK_SIZE: usize = 4;

/// Axis along which block groups are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAxis {
    /// Contiguous elements of the innermost (input) dimension.
    Last,
    /// Elements at the same position across consecutive output rows.
    First,
}

/// Sparsity requested from the mask creator.
#[derive(Debug, Clone, PartialEq)]
pub enum SparsityTarget {
    /// One value for every tensor (or the joint budget when global).
    Uniform(f64),
    /// One value per tensor, in tracked-parameter order.
    PerParam(Vec<f64>),
}

impl SparsityTarget {
    pub fn for_index(&self, index: usize) -> f64 {
        match self {
            SparsityTarget::Uniform(s) => *s,
            SparsityTarget::PerParam(values) => values.get(index).copied().unwrap_or(0.0),
        }
    }

    /// Mean of the per-tensor values, for logging.
    pub fn mean(&self) -> f64 {
        match self {
            SparsityTarget::Uniform(s) => *s,
            SparsityTarget::PerParam(values) if values.is_empty() => 0.0,
            SparsityTarget::PerParam(values) => values.iter().sum::<f64>() / values.len() as f64,
        }
    }
}

/// `mask_type` recipe field: a name or a block shape like `[1, 4]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaskTypeSpec {
    Name(String),
    Shape(Vec<usize>),
}

impl Default for MaskTypeSpec {
    fn default() -> Self {
        MaskTypeSpec::Name("unstructured".to_string())
    }
}

/// Mask creation strategy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MaskCreator {
    #[default]
    Unstructured,
    /// Whole groups of `size` elements along `axis` are kept or dropped.
    Block { size: usize, axis: BlockAxis },
}

impl TryFrom<&MaskTypeSpec> for MaskCreator {
    type Error = PodarError;

    fn try_from(spec: &MaskTypeSpec) -> Result<Self> {
        match spec {
            MaskTypeSpec::Name(name) => match name.as_str() {
                "unstructured" => Ok(MaskCreator::Unstructured),
                "block" => Ok(MaskCreator::Block { size: DEFAULT_BLOCK_SIZE, axis: BlockAxis::Last }),
                other => Err(PodarError::config(
                    "mask_type",
                    format!("unknown mask_type '{other}', expected 'unstructured', 'block' or [1, N]"),
                )),
            },
            MaskTypeSpec::Shape(shape) => match shape.as_slice() {
                [1, 1] => Ok(MaskCreator::Unstructured),
                [1, n] if *n > 1 => Ok(MaskCreator::Block { size: *n, axis: BlockAxis::Last }),
                [n, 1] if *n > 1 => Ok(MaskCreator::Block { size: *n, axis: BlockAxis::First }),
                other => Err(PodarError::config(
                    "mask_type",
                    format!("block shape {other:?} must be [1, N] or [N, 1] with N >= 1"),
                )),
            },
        }
    }
}

impl MaskCreator {
    /// Create one mask per score tensor.
    ///
    /// With `global` and a uniform target, all (grouped) scores share one
    /// ranking; otherwise each tensor is ranked on its own.
    ///
    /// # Errors
    ///
    /// Configuration error if a block axis is not divisible by the block
    /// size, or if a per-parameter target has the wrong length.
    pub fn create_masks(
        &self,
        scores: &[ArrayD<f32>],
        target: &SparsityTarget,
        global: bool,
    ) -> Result<Vec<ArrayD<f32>>> {
        if let SparsityTarget::PerParam(values) = target {
            if values.len() != scores.len() {
                return Err(PodarError::config(
                    "final_sparsity",
                    format!("{} sparsity values for {} parameters", values.len(), scores.len()),
                ));
            }
        }

        let grouped = scores
            .iter()
            .map(|s| self.group_scores(s))
            .collect::<Result<Vec<_>>>()?;

        let keep = match target {
            SparsityTarget::Uniform(sparsity) if global => select_global(&grouped, *sparsity),
            _ => grouped
                .iter()
                .enumerate()
                .map(|(i, g)| select_local(g, target.for_index(i)))
                .collect(),
        };

        scores
            .iter()
            .zip(keep)
            .map(|(s, keep)| self.expand(s.shape(), &keep))
            .collect()
    }

    /// Number of elements per group along the block axis.
    fn group_size(&self) -> usize {
        match self {
            MaskCreator::Unstructured => 1,
            MaskCreator::Block { size, .. } => *size,
        }
    }

    fn axis_len(&self, shape: &[usize]) -> usize {
        match self {
            MaskCreator::Unstructured => 1,
            MaskCreator::Block { axis: BlockAxis::Last, .. } => shape.last().copied().unwrap_or(1),
            MaskCreator::Block { axis: BlockAxis::First, .. } => shape.first().copied().unwrap_or(1),
        }
    }

    /// Group id of the element at row-major position `flat`.
    fn group_of(&self, shape: &[usize], flat: usize) -> usize {
        let size = self.group_size();
        match self {
            MaskCreator::Unstructured => flat,
            MaskCreator::Block { axis: BlockAxis::Last, .. } => {
                let len = self.axis_len(shape);
                let row = flat / len;
                let col = flat % len;
                row * (len / size) + col / size
            }
            MaskCreator::Block { axis: BlockAxis::First, .. } => {
                let total: usize = shape.iter().product();
                let inner = total / self.axis_len(shape).max(1);
                let outer = flat / inner;
                let rest = flat % inner;
                (outer / size) * inner + rest
            }
        }
    }

    /// Mean score per group, in group-id order.
    fn group_scores(&self, scores: &ArrayD<f32>) -> Result<Vec<f32>> {
        let size = self.group_size();
        if size == 1 {
            return Ok(scores.iter().copied().collect());
        }
        let shape = scores.shape();
        let axis_len = self.axis_len(shape);
        if axis_len % size != 0 {
            return Err(PodarError::config(
                "mask_type",
                format!("axis of length {axis_len} in shape {shape:?} is not divisible by block size {size}"),
            ));
        }

        let mut sums = vec![0.0f32; scores.len() / size];
        for (flat, &value) in scores.iter().enumerate() {
            sums[self.group_of(shape, flat)] += value;
        }
        Ok(sums.into_iter().map(|s| s / size as f32).collect())
    }

    fn expand(&self, shape: &[usize], keep: &[bool]) -> Result<ArrayD<f32>> {
        let total: usize = shape.iter().product();
        let values: Vec<f32> = (0..total)
            .map(|flat| if keep[self.group_of(shape, flat)] { 1.0 } else { 0.0 })
            .collect();
        ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| PodarError::ShapeMismatch {
            name: "mask".to_string(),
            expected: shape.to_vec(),
            actual: vec![keep.len()],
        })
    }
}

/// Number of entries to drop out of `n`, never all of them.
pub fn prune_count(sparsity: f64, n: usize) -> usize {
    if n == 0 || sparsity.is_nan() || sparsity <= 0.0 {
        return 0;
    }
    let k = (sparsity.min(1.0) * n as f64).round() as usize;
    k.min(n - 1)
}

/// Positions sorted by ascending score, ties by position.
fn ascending_order(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    order
}

fn select_local(scores: &[f32], sparsity: f64) -> Vec<bool> {
    let mut keep = vec![true; scores.len()];
    let k = prune_count(sparsity, scores.len());
    for &i in ascending_order(scores).iter().take(k) {
        keep[i] = false;
    }
    keep
}

fn select_global(grouped: &[Vec<f32>], sparsity: f64) -> Vec<Vec<bool>> {
    let flat: Vec<f32> = grouped.iter().flatten().copied().collect();
    let owners: Vec<(usize, usize)> = grouped
        .iter()
        .enumerate()
        .flat_map(|(t, g)| (0..g.len()).map(move |i| (t, i)))
        .collect();

    let mut keep: Vec<Vec<bool>> = grouped.iter().map(|g| vec![true; g.len()]).collect();
    let k = prune_count(sparsity, flat.len());
    for &pos in ascending_order(&flat).iter().take(k) {
        let (t, i) = owners[pos];
        keep[t][i] = false;
    }

    // a shared cutoff may empty a small tensor; keep its best entry
    for (t, tensor_keep) in keep.iter_mut().enumerate() {
        if !tensor_keep.is_empty() && tensor_keep.iter().all(|k| !k) {
            if let Some(&best) = ascending_order(&grouped[t]).last() {
                tensor_keep[best] = true;
            }
        }
    }
    keep
}
