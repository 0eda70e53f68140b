//! Run-length modifier.

use super::{spec_from_config, Modifier};
use crate::error::Result;
use crate::logging::SharedLogger;
use crate::model::Module;
use crate::prune::{EndComparator, Schedule};
use crate::recipe::ModifierSpec;
use serde::{Deserialize, Serialize};

fn zero() -> f64 {
    0.0
}

/// `EpochRangeModifier` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpochRangeConfig {
    #[serde(default = "zero")]
    pub start_epoch: f64,
    pub end_epoch: f64,
}

/// Declares the training window; contributes `end_epoch` to
/// `max_epochs` and changes nothing else.
#[derive(Debug, Clone)]
pub struct EpochRangeModifier {
    config: EpochRangeConfig,
    schedule: Schedule,
    initialized: bool,
}

impl EpochRangeModifier {
    pub const TAG: &'static str = "EpochRangeModifier";

    pub fn new(config: EpochRangeConfig) -> Result<Self> {
        let schedule = Schedule::new(config.start_epoch, config.end_epoch, -1.0)
            .with_end_comparator(EndComparator::GreaterOrEqual)
            .with_min_end(0.0);
        schedule.validate()?;
        Ok(Self { config, schedule, initialized: false })
    }

    pub fn from_spec(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
        let config = serde_yaml::from_value(serde_yaml::Value::Mapping(spec.fields.clone()))?;
        Ok(Box::new(Self::new(config)?))
    }
}

impl Modifier for EpochRangeModifier {
    fn tag(&self) -> &str {
        Self::TAG
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn initialize(&mut self, _module: &mut Module, _epoch: f64, _loggers: &[SharedLogger]) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn finalize(&mut self, _module: &mut Module) -> Result<()> {
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
}
