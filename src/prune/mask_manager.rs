//! Owns the masks of one pruning modifier and enforces them on the module.

use super::mask_creator::{MaskCreator, SparsityTarget};
use super::scorer::ParamScorer;
use crate::error::{PodarError, Result};
use crate::model::{Module, ParamRef};
use ndarray::{ArrayD, Zip};

/// Per-parameter binary masks (`1.0` kept, `0.0` pruned) plus the scorer
/// and creator used to recompute them.
///
/// While enabled, [`apply`](Self::apply) forces every pruned element to
/// exactly zero. Disabling keeps the masks for a later re-enable but stops
/// enforcing them; existing zeros stay until training moves them.
#[derive(Debug)]
pub struct ParamMaskManager {
    params: Vec<ParamRef>,
    masks: Vec<ArrayD<f32>>,
    creator: MaskCreator,
    scorer: Box<dyn ParamScorer>,
    global_sparsity: bool,
    allow_reintroduction: bool,
    enabled: bool,
}

impl ParamMaskManager {
    /// Start with all-ones masks shaped like each parameter, disabled.
    pub fn new(
        module: &Module,
        params: Vec<ParamRef>,
        creator: MaskCreator,
        scorer: Box<dyn ParamScorer>,
        global_sparsity: bool,
        allow_reintroduction: bool,
    ) -> Result<Self> {
        let masks = params
            .iter()
            .map(|handle| Ok(ArrayD::ones(module.require_param(handle)?.data.raw_dim())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            params,
            masks,
            creator,
            scorer,
            global_sparsity,
            allow_reintroduction,
            enabled: false,
        })
    }

    pub fn params(&self) -> &[ParamRef] {
        &self.params
    }

    /// Full parameter names, in mask order.
    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(ParamRef::full_name).collect()
    }

    pub fn param_masks(&self) -> &[ArrayD<f32>] {
        &self.masks
    }

    pub fn creator(&self) -> &MaskCreator {
        &self.creator
    }

    pub fn scorer(&self) -> &dyn ParamScorer {
        self.scorer.as_ref()
    }

    pub fn global_sparsity(&self) -> bool {
        self.global_sparsity
    }

    pub fn allow_reintroduction(&self) -> bool {
        self.allow_reintroduction
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Fraction of pruned entries in each mask.
    pub fn mask_sparsities(&self) -> Vec<f32> {
        self.masks
            .iter()
            .map(|m| {
                if m.is_empty() {
                    0.0
                } else {
                    m.iter().filter(|&&v| v == 0.0).count() as f32 / m.len() as f32
                }
            })
            .collect()
    }

    /// Score, build fresh masks for `target`, and apply them if enabled.
    ///
    /// Repeating the call with the same target and untouched parameters
    /// reproduces the same masks: pruned elements score zero and stay at
    /// the bottom of the ranking.
    pub fn set_param_masks_from_sparsity(&mut self, module: &mut Module, target: &SparsityTarget) -> Result<()> {
        let scores = self.scorer.score_parameters(module, &self.params)?;
        let masks = self.creator.create_masks(&scores, target, self.global_sparsity)?;
        self.set_param_masks(module, masks)
    }

    /// Replace every mask and apply if enabled.
    ///
    /// # Errors
    ///
    /// `MaskKeyMismatch` for a wrong mask count, `ShapeMismatch` when a
    /// mask's shape differs from its parameter.
    pub fn set_param_masks(&mut self, module: &mut Module, masks: Vec<ArrayD<f32>>) -> Result<()> {
        if masks.len() != self.params.len() {
            return Err(PodarError::MaskKeyMismatch {
                extra: (self.params.len()..masks.len()).map(|i| format!("#{i}")).collect(),
                missing: self.names().into_iter().skip(masks.len()).collect(),
            });
        }
        for (handle, mask) in self.params.iter().zip(&masks) {
            let param = module.require_param(handle)?;
            if param.shape() != mask.shape() {
                return Err(PodarError::ShapeMismatch {
                    name: handle.full_name(),
                    expected: param.shape().to_vec(),
                    actual: mask.shape().to_vec(),
                });
            }
        }
        self.masks = masks;
        self.apply(module)
    }

    /// Re-zero pruned elements without recomputing masks.
    pub fn apply(&self, module: &mut Module) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for (handle, mask) in self.params.iter().zip(&self.masks) {
            let param = module.require_param_mut(handle)?;
            if param.shape() != mask.shape() {
                return Err(PodarError::ShapeMismatch {
                    name: handle.full_name(),
                    expected: mask.shape().to_vec(),
                    actual: param.shape().to_vec(),
                });
            }
            Zip::from(&mut param.data).and(mask).for_each(|p, &m| {
                if m == 0.0 {
                    *p = 0.0;
                }
            });
        }
        Ok(())
    }

    /// Before the optimizer step: let the scorer observe gradients, then
    /// zero gradients of pruned elements unless reintroduction is allowed.
    pub fn pre_optim_step_update(&mut self, module: &mut Module) -> Result<()> {
        self.scorer.pre_optim_step_update(module, &self.params, &self.masks);
        if !self.enabled || self.allow_reintroduction {
            return Ok(());
        }
        for (handle, mask) in self.params.iter().zip(&self.masks) {
            let param = module.require_param_mut(handle)?;
            if let Some(grad) = param.grad.as_mut() {
                if grad.shape() == mask.shape() {
                    Zip::from(grad).and(mask).for_each(|g, &m| {
                        if m == 0.0 {
                            *g = 0.0;
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Terminal transition. Without `leave_enabled` masking stops for good
    /// and the masks reset to all-ones.
    pub fn pruning_end(&mut self, leave_enabled: bool) {
        if leave_enabled {
            return;
        }
        self.enabled = false;
        for mask in &mut self.masks {
            mask.fill(1.0);
        }
    }
}
