//! Core traits and types for the modifier lifecycle
//!
//! - `LossContext` - tensors available to loss-modifying modifiers
//! - `Modifier` - the capability interface every modifier implements

use crate::error::Result;
use crate::logging::SharedLogger;
use crate::model::Module;
use crate::optim::Optimizer;
use crate::prune::{MaskState, Schedule};
use crate::recipe::ModifierSpec;
use ndarray::Array2;
use std::fmt;

/// Extra inputs the trainer hands to `loss_update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossContext<'a> {
    /// Student logits `[batch, classes]`
    pub student_logits: Option<&'a Array2<f32>>,
    /// Teacher logits `[batch, classes]`
    pub teacher_logits: Option<&'a Array2<f32>>,
}

/// A scheduled change to training, driven by the external loop.
///
/// Call order within one step: `update` (when `update_ready`), then
/// `optimizer_pre_step`, the optimizer's own step, `optimizer_post_step`.
/// `initialize` comes before all of these and `finalize` after training.
/// Only `tag`, `schedule`, `initialize`, `initialized`, `finalize` and
/// `to_spec` are required.
pub trait Modifier: fmt::Debug + Send {
    /// Recipe tag, without the leading `!`.
    fn tag(&self) -> &str;

    fn schedule(&self) -> &Schedule;

    /// Bind to the module. Runs any update already due at `epoch`.
    fn initialize(&mut self, module: &mut Module, epoch: f64, loggers: &[SharedLogger]) -> Result<()>;

    fn initialized(&self) -> bool;

    /// Whether `update` should run at `epoch`.
    fn update_ready(&self, _epoch: f64, _steps_per_epoch: usize) -> bool {
        false
    }

    fn update(
        &mut self,
        _module: &mut Module,
        _optimizer: &mut dyn Optimizer,
        _epoch: f64,
        _steps_per_epoch: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Report scalars for the current tick.
    fn log_update(&mut self, _module: &Module, _optimizer: &dyn Optimizer, _epoch: f64, _steps_per_epoch: usize) -> Result<()> {
        Ok(())
    }

    fn optimizer_pre_step(
        &mut self,
        _module: &mut Module,
        _optimizer: &mut dyn Optimizer,
        _epoch: f64,
        _steps_per_epoch: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn optimizer_post_step(
        &mut self,
        _module: &mut Module,
        _optimizer: &mut dyn Optimizer,
        _epoch: f64,
        _steps_per_epoch: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Adjust the trainer's loss. Returns it unchanged by default.
    fn loss_update(&mut self, loss: f32, _ctx: &LossContext<'_>, _epoch: f64, _steps_per_epoch: usize) -> Result<f32> {
        Ok(loss)
    }

    /// Release runtime state. Safe to call without `initialize`.
    fn finalize(&mut self, module: &mut Module) -> Result<()>;

    /// Move the schedule later by `offset` epochs.
    fn shift_epochs(&mut self, offset: f64);

    /// Declarative form with resolved field values.
    fn to_spec(&self) -> Result<ModifierSpec>;

    fn affects_learning_rate(&self) -> bool {
        false
    }

    fn affects_distillation(&self) -> bool {
        false
    }

    /// Parameter tokens as declared, for pruning modifiers.
    fn pruning_targets(&self) -> Option<Vec<String>> {
        None
    }

    /// Full names of the parameters bound at `initialize`.
    fn tracked_param_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn state_dict(&self) -> MaskState {
        MaskState::new()
    }

    /// Restore masks. Modifiers without state ignore the call.
    fn load_state_dict(&mut self, _module: &mut Module, _state: &MaskState, _strict: bool) -> Result<()> {
        Ok(())
    }
}
