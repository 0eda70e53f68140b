//! Learning-rate modifiers.

use super::{spec_from_config, Modifier};
use crate::error::{PodarError, Result};
use crate::logging::{log_step, LogTypes, SharedLogger};
use crate::model::Module;
use crate::optim::Optimizer;
use crate::prune::{EndComparator, Schedule, ScheduleState};
use crate::recipe::ModifierSpec;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Tag of the logged learning-rate scalar.
pub const LR_LOG_TAG: &str = "LearningRate/lr";

fn immediate() -> f64 {
    -1.0
}

/// Curve between `init_lr` and `final_lr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrFunction {
    Linear,
    Cosine,
}

impl LrFunction {
    /// Learning rate at progress `t` in `[0, 1]`.
    pub fn value(&self, init_lr: f64, final_lr: f64, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            LrFunction::Linear => init_lr + (final_lr - init_lr) * t,
            LrFunction::Cosine => final_lr + 0.5 * (init_lr - final_lr) * (1.0 + (PI * t).cos()),
        }
    }
}

/// `LearningRateFunctionModifier` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearningRateFunctionConfig {
    pub lr_func: LrFunction,
    pub init_lr: f64,
    pub final_lr: f64,
    pub start_epoch: f64,
    pub end_epoch: f64,
    #[serde(default)]
    pub log_types: LogTypes,
}

/// Moves the optimizer's learning rate from `init_lr` to `final_lr` over
/// `[start_epoch, end_epoch]`, updating on every step.
#[derive(Debug)]
pub struct LearningRateFunctionModifier {
    config: LearningRateFunctionConfig,
    schedule: Schedule,
    state: ScheduleState,
    initialized: bool,
    loggers: Vec<SharedLogger>,
    last_logged_epoch: Option<i64>,
}

impl LearningRateFunctionModifier {
    pub const TAG: &'static str = "LearningRateFunctionModifier";

    pub fn new(config: LearningRateFunctionConfig) -> Result<Self> {
        if config.init_lr <= 0.0 || config.final_lr < 0.0 {
            return Err(PodarError::config(
                "init_lr",
                format!("learning rates must be positive, got {} -> {}", config.init_lr, config.final_lr),
            ));
        }
        let schedule = Schedule::new(config.start_epoch, config.end_epoch, -1.0)
            .with_end_comparator(EndComparator::Greater)
            .with_min_end(0.0);
        schedule.validate()?;
        Ok(Self {
            config,
            schedule,
            state: ScheduleState::default(),
            initialized: false,
            loggers: Vec::new(),
            last_logged_epoch: None,
        })
    }

    pub fn from_spec(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
        let config = serde_yaml::from_value(serde_yaml::Value::Mapping(spec.fields.clone()))?;
        Ok(Box::new(Self::new(config)?))
    }

    /// Learning rate this modifier sets at `epoch`.
    pub fn lr_at(&self, epoch: f64) -> f64 {
        let start = self.schedule.start_epoch.max(0.0);
        let span = self.schedule.end_epoch - start;
        let t = if span > 0.0 { (epoch - start) / span } else { 1.0 };
        self.config.lr_func.value(self.config.init_lr, self.config.final_lr, t)
    }
}

impl Modifier for LearningRateFunctionModifier {
    fn tag(&self) -> &str {
        Self::TAG
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn initialize(&mut self, _module: &mut Module, _epoch: f64, loggers: &[SharedLogger]) -> Result<()> {
        self.loggers = self.config.log_types.filter(loggers);
        self.state = ScheduleState::default();
        self.last_logged_epoch = None;
        self.initialized = true;
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn update_ready(&self, epoch: f64, steps_per_epoch: usize) -> bool {
        self.initialized && self.state.update_ready(&self.schedule, epoch, steps_per_epoch)
    }

    fn update(
        &mut self,
        _module: &mut Module,
        optimizer: &mut dyn Optimizer,
        epoch: f64,
        steps_per_epoch: usize,
    ) -> Result<()> {
        if !self.initialized {
            return Err(PodarError::Uninitialized { action: "set the learning rate".into() });
        }
        let lr = self.lr_at(epoch);
        optimizer.set_lr(lr as f32);
        tracing::debug!(modifier = Self::TAG, epoch, lr, "learning rate updated");
        self.state.mark_updated(&self.schedule, epoch, steps_per_epoch);
        Ok(())
    }

    fn log_update(&mut self, _module: &Module, optimizer: &dyn Optimizer, epoch: f64, steps_per_epoch: usize) -> Result<()> {
        let whole_epoch = epoch.floor() as i64;
        if !self.state.started || self.last_logged_epoch == Some(whole_epoch) {
            return Ok(());
        }
        let step = log_step(epoch, steps_per_epoch);
        for logger in &self.loggers {
            logger.log_scalar(LR_LOG_TAG, optimizer.lr(), step);
        }
        self.last_logged_epoch = Some(whole_epoch);
        Ok(())
    }

    fn finalize(&mut self, _module: &mut Module) -> Result<()> {
        self.loggers.clear();
        self.initialized = false;
        Ok(())
    }

    fn shift_epochs(&mut self, offset: f64) {
        self.schedule.shift(offset);
        self.config.start_epoch = self.schedule.start_epoch;
        self.config.end_epoch = self.schedule.end_epoch;
    }

    fn to_spec(&self) -> Result<ModifierSpec> {
        spec_from_config(Self::TAG, &self.config)
    }

    fn affects_learning_rate(&self) -> bool {
        true
    }
}

/// `SetLearningRateModifier` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetLearningRateConfig {
    pub learning_rate: f64,
    #[serde(default = "immediate")]
    pub start_epoch: f64,
    #[serde(default = "immediate")]
    pub end_epoch: f64,
}

/// Sets a fixed learning rate once, at `start_epoch`.
#[derive(Debug)]
pub struct SetLearningRateModifier {
    config: SetLearningRateConfig,
    schedule: Schedule,
    state: ScheduleState,
    initialized: bool,
}

impl SetLearningRateModifier {
    pub const TAG: &'static str = "SetLearningRateModifier";

    pub fn new(config: SetLearningRateConfig) -> Result<Self> {
        if config.learning_rate <= 0.0 {
            return Err(PodarError::config(
                "learning_rate",
                format!("must be positive, got {}", config.learning_rate),
            ));
        }
        let schedule = Schedule::new(config.start_epoch, config.end_epoch, -1.0)
            .with_end_comparator(EndComparator::Fixed);
        schedule.validate()?;
        Ok(Self { config, schedule, state: ScheduleState::default(), initialized: false })
    }

    pub fn from_spec(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
        let config = serde_yaml::from_value(serde_yaml::Value::Mapping(spec.fields.clone()))?;
        Ok(Box::new(Self::new(config)?))
    }
}

impl Modifier for SetLearningRateModifier {
    fn tag(&self) -> &str {
        Self::TAG
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn initialize(&mut self, _module: &mut Module, _epoch: f64, _loggers: &[SharedLogger]) -> Result<()> {
        self.state = ScheduleState::default();
        self.initialized = true;
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn update_ready(&self, epoch: f64, steps_per_epoch: usize) -> bool {
        self.initialized && self.state.start_pending(&self.schedule, epoch, steps_per_epoch)
    }

    fn update(
        &mut self,
        _module: &mut Module,
        optimizer: &mut dyn Optimizer,
        epoch: f64,
        steps_per_epoch: usize,
    ) -> Result<()> {
        if !self.initialized {
            return Err(PodarError::Uninitialized { action: "set the learning rate".into() });
        }
        optimizer.set_lr(self.config.learning_rate as f32);
        tracing::debug!(modifier = Self::TAG, epoch, lr = self.config.learning_rate, "learning rate set");
        self.state.mark_updated(&self.schedule, epoch, steps_per_epoch);
        Ok(())
    }

    fn finalize(&mut self, _module: &mut Module) -> Result<()> {
        self.initialized = false;
        Ok(())
    }

    fn shift_epochs(&mut self, offset: f64) {
        self.schedule.shift(offset);
        self.config.start_epoch = self.schedule.start_epoch;
    }

    fn to_spec(&self) -> Result<ModifierSpec> {
        spec_from_config(Self::TAG, &self.config)
    }

    fn affects_learning_rate(&self) -> bool {
        true
    }
}
