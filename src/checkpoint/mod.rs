//! Mask checkpoints with a sparsity sidecar.
//!
//! A checkpoint directory holds:
//! - `masks.safetensors`: every mask as an F32 tensor under its
//!   `<param>.sparsity_mask` key, with the recipe text in the header
//!   metadata
//! - `sparsity_metadata.json`: per-mask sparsity statistics

use crate::error::{PodarError, Result};
use crate::prune::MaskState;
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Mask file name inside a checkpoint directory.
pub const MASKS_FILE: &str = "masks.safetensors";
/// Sidecar file name inside a checkpoint directory.
pub const METADATA_FILE: &str = "sparsity_metadata.json";
/// Header metadata key holding the recipe text.
pub const RECIPE_METADATA_KEY: &str = "recipe";
/// Header metadata key holding the mask order as a JSON list.
const ORDER_METADATA_KEY: &str = "mask_order";
const FORMAT_VERSION: &str = "1.0";

/// Files written by [`save_mask_checkpoint`].
#[derive(Debug, Clone)]
pub struct MaskCheckpoint {
    pub masks_path: PathBuf,
    pub metadata_path: PathBuf,
    pub num_masks: usize,
    /// Fraction of masked-out elements across every mask
    pub overall_sparsity: f32,
}

/// Contents of `sparsity_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsityMetadata {
    pub version: String,
    pub overall_sparsity: f32,
    pub masks: Vec<MaskSparsity>,
}

/// Statistics of one mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskSparsity {
    pub name: String,
    pub sparsity: f32,
    pub zero_count: usize,
    pub total_count: usize,
}

fn encode_error(context: &str, err: impl std::fmt::Display) -> PodarError {
    PodarError::Serialization(format!("{context}: {err}"))
}

/// Write `state` (and optionally the recipe that produced it) to `dir`.
pub fn save_mask_checkpoint(
    state: &MaskState,
    recipe_yaml: Option<&str>,
    dir: impl AsRef<Path>,
) -> Result<MaskCheckpoint> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| PodarError::io(dir, e))?;

    let mut masks = Vec::with_capacity(state.len());
    let mut total_zeros = 0usize;
    let mut total_elements = 0usize;
    let mut tensor_data: Vec<(String, Vec<u8>, Vec<usize>)> = Vec::with_capacity(state.len());
    for (name, mask) in state.iter() {
        let values: Vec<f32> = mask.iter().copied().collect();
        let zero_count = values.iter().filter(|&&v| v == 0.0).count();
        let total = values.len();
        masks.push(MaskSparsity {
            name: name.to_string(),
            sparsity: if total > 0 { zero_count as f32 / total as f32 } else { 0.0 },
            zero_count,
            total_count: total,
        });
        total_zeros += zero_count;
        total_elements += total;
        tensor_data.push((name.to_string(), bytemuck::cast_slice(&values).to_vec(), mask.shape().to_vec()));
    }
    let overall_sparsity =
        if total_elements > 0 { total_zeros as f32 / total_elements as f32 } else { 0.0 };

    let mut header = HashMap::new();
    let order: Vec<&str> = state.keys().collect();
    header.insert(
        ORDER_METADATA_KEY.to_string(),
        serde_json::to_string(&order).map_err(|e| encode_error("mask order", e))?,
    );
    if let Some(recipe) = recipe_yaml {
        header.insert(RECIPE_METADATA_KEY.to_string(), recipe.to_string());
    }

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| encode_error(name, e))
        })
        .collect::<Result<Vec<_>>>()?;
    let bytes = safetensors::serialize(views, &Some(header)).map_err(|e| encode_error("masks", e))?;

    let masks_path = dir.join(MASKS_FILE);
    std::fs::write(&masks_path, bytes).map_err(|e| PodarError::io(&masks_path, e))?;

    let metadata = SparsityMetadata { version: FORMAT_VERSION.to_string(), overall_sparsity, masks };
    let metadata_path = dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(&metadata).map_err(|e| encode_error("sparsity metadata", e))?;
    std::fs::write(&metadata_path, json).map_err(|e| PodarError::io(&metadata_path, e))?;

    tracing::info!(path = %masks_path.display(), masks = state.len(), overall_sparsity, "mask checkpoint saved");
    Ok(MaskCheckpoint { masks_path, metadata_path, num_masks: state.len(), overall_sparsity })
}

/// Read masks and the embedded recipe text.
///
/// `path` is either a checkpoint directory or the mask file itself.
pub fn load_mask_checkpoint(path: impl AsRef<Path>) -> Result<(MaskState, Option<String>)> {
    let path = path.as_ref();
    let file = if path.is_dir() { path.join(MASKS_FILE) } else { path.to_path_buf() };
    let buffer = std::fs::read(&file).map_err(|e| PodarError::io(&file, e))?;

    let (_, header) = SafeTensors::read_metadata(&buffer).map_err(|e| encode_error("mask header", e))?;
    let extra = header.metadata().clone().unwrap_or_default();
    let tensors = SafeTensors::deserialize(&buffer).map_err(|e| encode_error("masks", e))?;

    let order: Vec<String> = match extra.get(ORDER_METADATA_KEY) {
        Some(json) => serde_json::from_str(json).map_err(|e| encode_error("mask order", e))?,
        None => {
            let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
            names.sort();
            names
        }
    };

    let mut state = MaskState::new();
    for name in order {
        let view = tensors.tensor(&name).map_err(|e| encode_error(&name, e))?;
        if view.dtype() != Dtype::F32 {
            return Err(PodarError::Serialization(format!("{name}: expected F32, got {:?}", view.dtype())));
        }
        let values: Vec<f32> = view.data().chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
        let mask = ArrayD::from_shape_vec(IxDyn(view.shape()), values).map_err(|e| encode_error(&name, e))?;
        state.insert(name, mask);
    }
    tracing::info!(path = %file.display(), masks = state.len(), "mask checkpoint loaded");
    Ok((state, extra.get(RECIPE_METADATA_KEY).cloned()))
}

/// Read `sparsity_metadata.json` from a checkpoint directory.
pub fn load_sparsity_metadata(dir: impl AsRef<Path>) -> Result<SparsityMetadata> {
    let path = dir.as_ref().join(METADATA_FILE);
    let json = std::fs::read_to_string(&path).map_err(|e| PodarError::io(&path, e))?;
    serde_json::from_str(&json).map_err(|e| encode_error("sparsity metadata", e))
}

/// Run `fetch(force_refresh = false)`; on a transient failure run it once
/// more with `force_refresh = true`. A second transient failure surfaces
/// as the fatal [`PodarError::RetryExhausted`].
pub fn fetch_with_refresh<T>(mut fetch: impl FnMut(bool) -> Result<T>) -> Result<T> {
    match fetch(false) {
        Err(err) if err.is_transient() => {
            tracing::warn!(error = %err, "transient load failure; retrying with a forced refresh");
            fetch(true).map_err(|retry_err| match retry_err {
                PodarError::TransientLoad { source_name, message } => {
                    PodarError::RetryExhausted { source_name, message }
                }
                other => other,
            })
        }
        outcome => outcome,
    }
}
