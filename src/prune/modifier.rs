//! Generic pruning modifier: schedule + policy + mask manager.

use super::analyzer::ParamAnalyzer;
use super::config::PruningConfig;
use super::mask_creator::{MaskCreator, SparsityTarget};
use super::mask_manager::ParamMaskManager;
use super::params::{resolve_targets, FinalSparsity, ParamSelector};
use super::policy::SparsityPolicy;
use super::schedule::{Schedule, ScheduleState};
use super::scorer::{MagnitudeScorer, ParamScorer};
use super::state::{mask_key, MaskState};
use crate::error::{PodarError, Result};
use crate::logging::{log_step, SharedLogger};
use crate::model::Module;
use crate::modifier::Modifier;
use crate::optim::Optimizer;
use crate::recipe::ModifierSpec;
use serde_yaml::Value;

/// Tag prefix of the per-parameter sparsity scalars.
pub const LOG_TAG_PREFIX: &str = "ParamPruning";

/// State that exists only between `initialize` and `finalize`.
#[derive(Debug)]
struct PruningRuntime {
    masks: ParamMaskManager,
    analyzers: Vec<ParamAnalyzer>,
    loggers: Vec<SharedLogger>,
}

/// Pruning modifier for every recipe tag that prunes.
///
/// The sparsity-over-time behavior comes from the injected
/// [`SparsityPolicy`]; everything else (parameter resolution, the
/// `pending -> active -> ended` transitions, mask enforcement around the
/// optimizer step, logging and checkpoint state) is shared.
#[derive(Debug)]
pub struct PruningModifier {
    tag: String,
    config: PruningConfig,
    schedule: Schedule,
    state: ScheduleState,
    global_sparsity: bool,
    mask_creator: MaskCreator,
    policy: Box<dyn SparsityPolicy>,
    runtime: Option<PruningRuntime>,
    applied_sparsity: Option<SparsityTarget>,
    pre_step_completed: bool,
    sparsity_applied: bool,
    last_logged_epoch: Option<i64>,
}

impl PruningModifier {
    /// Validate `config` and build an uninitialized modifier.
    ///
    /// `global_default` is the tag's global-ranking default, used when the
    /// recipe does not set `global_sparsity`.
    pub fn new(tag: impl Into<String>, mut config: PruningConfig, global_default: bool) -> Result<Self> {
        config.validate()?;
        let schedule = config.schedule()?;
        config.set_schedule(&schedule);
        let mask_creator = config.mask_creator()?;
        let policy = config.policy();
        let global_sparsity = config.global_sparsity(global_default);
        Ok(Self {
            tag: tag.into(),
            config,
            schedule,
            state: ScheduleState::default(),
            global_sparsity,
            mask_creator,
            policy,
            runtime: None,
            applied_sparsity: None,
            pre_step_completed: false,
            sparsity_applied: false,
            last_logged_epoch: None,
        })
    }

    /// Build from a recipe record's fields.
    pub fn from_value(
        tag: &str,
        fields: Value,
        parse: fn(Value) -> Result<PruningConfig>,
        global_default: bool,
    ) -> Result<Self> {
        Self::new(tag, parse(fields)?, global_default)
    }

    pub fn config(&self) -> &PruningConfig {
        &self.config
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn global_sparsity(&self) -> bool {
        self.global_sparsity
    }

    pub fn mask_creator(&self) -> &MaskCreator {
        &self.mask_creator
    }

    /// Scorer of the bound mask manager.
    pub fn scorer(&self) -> Option<&dyn ParamScorer> {
        self.runtime.as_ref().map(|rt| rt.masks.scorer())
    }

    pub fn mask_manager(&self) -> Option<&ParamMaskManager> {
        self.runtime.as_ref().map(|rt| &rt.masks)
    }

    pub fn policy(&self) -> &dyn SparsityPolicy {
        self.policy.as_ref()
    }

    /// Target pushed into the masks by the most recent update.
    pub fn applied_sparsity(&self) -> Option<&SparsityTarget> {
        self.applied_sparsity.as_ref()
    }

    /// Whether masks were recomputed since the last optimizer step.
    pub fn sparsity_applied(&self) -> bool {
        self.sparsity_applied
    }

    /// Replace `params` and/or `final_sparsity` in one step.
    ///
    /// Everything derived from the two fields is recomputed before any of
    /// it is stored, so a failure leaves the modifier unchanged.
    ///
    /// # Errors
    ///
    /// Configuration error on an initialized modifier or when the new
    /// fields do not validate.
    pub fn reconfigure(
        &mut self,
        params: Option<ParamSelector>,
        final_sparsity: Option<FinalSparsity>,
    ) -> Result<Schedule> {
        if self.runtime.is_some() {
            return Err(PodarError::config(
                "params",
                format!("{} is initialized; reconfigure before initialize", self.tag),
            ));
        }
        let config = self.config.reconfigure(params, final_sparsity)?;
        let schedule = config.schedule()?;
        let mask_creator = config.mask_creator()?;
        let policy = config.policy();

        self.config = config;
        self.config.set_schedule(&schedule);
        self.schedule = schedule.clone();
        self.mask_creator = mask_creator;
        self.policy = policy;
        Ok(schedule)
    }

    fn runtime_mut(&mut self, action: &str) -> Result<&mut PruningRuntime> {
        self.runtime
            .as_mut()
            .ok_or_else(|| PodarError::Uninitialized { action: action.to_string() })
    }

    /// Start, recompute and end transitions for `epoch`.
    fn check_mask_update(
        &mut self,
        module: &mut Module,
        epoch: f64,
        steps_per_epoch: usize,
        starting: bool,
        ending: bool,
    ) -> Result<()> {
        self.runtime_mut("update masks")?;
        let recompute = starting || (self.state.started && self.policy.recompute_after_start());
        let target = recompute.then(|| self.policy.applied_sparsity(&self.schedule, epoch, steps_per_epoch));
        let leave_enabled = self.config.leave_enabled();
        let pre_step_completed = self.pre_step_completed;
        let tag = self.tag.clone();

        let runtime = self.runtime_mut("update masks")?;
        if starting {
            runtime.masks.set_enabled(true);
            tracing::info!(modifier = %tag, epoch, "pruning started");
        }
        if !pre_step_completed {
            runtime.masks.pre_optim_step_update(module)?;
        }
        if let Some(target) = &target {
            runtime.masks.set_param_masks_from_sparsity(module, target)?;
            tracing::debug!(modifier = %tag, epoch, sparsity = target.mean(), "masks updated");
        }
        if ending {
            runtime.masks.pruning_end(leave_enabled);
            tracing::info!(modifier = %tag, epoch, leave_enabled, "pruning ended");
        }

        self.pre_step_completed = true;
        if let Some(target) = target {
            self.applied_sparsity = Some(target);
            self.sparsity_applied = true;
        }
        Ok(())
    }
}

impl Modifier for PruningModifier {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn initialize(&mut self, module: &mut Module, epoch: f64, loggers: &[SharedLogger]) -> Result<()> {
        let resolved = resolve_targets(module, self.config.params(), self.config.final_sparsity(), &self.tag)?;
        self.policy.bind(module, &resolved)?;

        let masks = ParamMaskManager::new(
            module,
            resolved.params.clone(),
            self.mask_creator.clone(),
            Box::new(MagnitudeScorer),
            self.global_sparsity,
            self.config.allow_reintroduction(),
        )?;
        let analyzers = resolved.params.iter().cloned().map(ParamAnalyzer::new).collect();
        let loggers = self.config.log_types().filter(loggers);
        tracing::debug!(
            modifier = %self.tag,
            params = resolved.params.len(),
            policy = self.policy.name(),
            global = self.global_sparsity,
            "pruning modifier initialized"
        );

        self.runtime = Some(PruningRuntime { masks, analyzers, loggers });
        self.state = ScheduleState::default();
        self.pre_step_completed = false;
        self.sparsity_applied = false;
        self.applied_sparsity = None;
        self.last_logged_epoch = None;

        // raw epochs: no step grid exists before training
        let starting = self.schedule.start_reached(epoch);
        let ending = starting && self.schedule.end_reached(epoch);
        if starting {
            self.check_mask_update(module, epoch, 1, starting, ending)?;
            self.state.record(starting, ending, epoch);
        }
        // initialize is not a training step
        self.pre_step_completed = false;
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.runtime.is_some()
    }

    fn update_ready(&self, epoch: f64, steps_per_epoch: usize) -> bool {
        self.runtime.is_some() && self.state.update_ready(&self.schedule, epoch, steps_per_epoch)
    }

    fn update(
        &mut self,
        module: &mut Module,
        _optimizer: &mut dyn Optimizer,
        epoch: f64,
        steps_per_epoch: usize,
    ) -> Result<()> {
        let starting = self.state.start_pending(&self.schedule, epoch, steps_per_epoch);
        let ending = self.state.end_pending(&self.schedule, epoch, steps_per_epoch);
        self.check_mask_update(module, epoch, steps_per_epoch, starting, ending)?;
        self.state.record(starting, ending, epoch);
        Ok(())
    }

    fn log_update(&mut self, module: &Module, _optimizer: &dyn Optimizer, epoch: f64, steps_per_epoch: usize) -> Result<()> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(());
        };
        let whole_epoch = epoch.floor() as i64;
        if !self.state.started || self.last_logged_epoch == Some(whole_epoch) {
            return Ok(());
        }
        let step = log_step(epoch, steps_per_epoch);
        for analyzer in &runtime.analyzers {
            let sparsity = analyzer.param_sparsity(module)?;
            let tag = format!("{LOG_TAG_PREFIX}/{}", analyzer.tag());
            for logger in &runtime.loggers {
                logger.log_scalar(&tag, sparsity, step);
            }
        }
        self.last_logged_epoch = Some(whole_epoch);
        Ok(())
    }

    fn optimizer_pre_step(
        &mut self,
        module: &mut Module,
        _optimizer: &mut dyn Optimizer,
        _epoch: f64,
        _steps_per_epoch: usize,
    ) -> Result<()> {
        let completed = self.pre_step_completed;
        let runtime = self.runtime_mut("run the pre-step update")?;
        if !completed {
            runtime.masks.pre_optim_step_update(module)?;
        }
        self.pre_step_completed = false;
        Ok(())
    }

    fn optimizer_post_step(
        &mut self,
        module: &mut Module,
        optimizer: &mut dyn Optimizer,
        epoch: f64,
        _steps_per_epoch: usize,
    ) -> Result<()> {
        let runtime = self.runtime_mut("apply masks")?;
        if !runtime.masks.allow_reintroduction() {
            runtime.masks.apply(module)?;
        }
        self.sparsity_applied = false;
        if self.policy.after_optimizer_step(optimizer) {
            tracing::info!(modifier = %self.tag, epoch, "optimizer momentum reset");
        }
        Ok(())
    }

    fn finalize(&mut self, module: &mut Module) -> Result<()> {
        if let Some(mut runtime) = self.runtime.take() {
            runtime.masks.apply(module)?;
            runtime.masks.set_enabled(false);
            tracing::debug!(modifier = %self.tag, "pruning modifier finalized");
        }
        self.policy.release();
        self.applied_sparsity = None;
        self.sparsity_applied = false;
        self.pre_step_completed = false;
        Ok(())
    }

    fn shift_epochs(&mut self, offset: f64) {
        self.schedule.shift(offset);
        self.config.set_schedule(&self.schedule);
    }

    fn to_spec(&self) -> Result<ModifierSpec> {
        match self.config.to_value()? {
            Value::Mapping(fields) => Ok(ModifierSpec::new(self.tag.clone(), fields)),
            other => Err(PodarError::Serialization(format!(
                "!{} fields serialized to {other:?}",
                self.tag
            ))),
        }
    }

    fn pruning_targets(&self) -> Option<Vec<String>> {
        Some(self.config.declared_params())
    }

    fn tracked_param_names(&self) -> Vec<String> {
        self.runtime.as_ref().map(|rt| rt.masks.names()).unwrap_or_default()
    }

    fn state_dict(&self) -> MaskState {
        let Some(runtime) = self.runtime.as_ref() else {
            return MaskState::new();
        };
        runtime
            .masks
            .names()
            .into_iter()
            .zip(runtime.masks.param_masks().iter().cloned())
            .map(|(name, mask)| (mask_key(&name), mask))
            .collect()
    }

    fn load_state_dict(&mut self, module: &mut Module, state: &MaskState, strict: bool) -> Result<()> {
        let runtime = self.runtime_mut("load mask state")?;
        let names = runtime.masks.names();
        let selected = state.select(&names, strict)?;
        let masks: Vec<_> = selected
            .into_iter()
            .zip(runtime.masks.param_masks())
            .map(|(loaded, current)| loaded.unwrap_or_else(|| current.clone()))
            .collect();
        runtime.masks.set_param_masks(module, masks)?;
        tracing::debug!(modifier = %self.tag, masks = names.len(), strict, "mask state loaded");
        Ok(())
    }
}
