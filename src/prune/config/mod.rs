//! Typed recipe fields of the pruning modifiers.
//!
//! A recipe record such as
//!
//! ```yaml
//! !GMPruningModifier
//!   params: ["re:.*conv.*weight"]
//!   init_sparsity: 0.05
//!   final_sparsity: 0.85
//!   start_epoch: 0.0
//!   end_epoch: 10.0
//!   update_frequency: 1.0
//! ```
//!
//! deserializes into one of the structs below with `serde_yaml::from_value`.
//! Unknown fields are rejected so a typo never silently falls back to a
//! default.


use super::mask_creator::{MaskCreator, MaskTypeSpec};
use super::params::{check_fraction, FinalSparsity, InitSparsity, ParamSelector, ALL_PRUNABLE_TOKEN};
use super::policy::{finish_on_compression, AlternatingPolicy, ConstantPolicy, GradualPolicy, SparsityPolicy};
use super::schedule::{EndComparator, InterpolationFn, Schedule};
use crate::error::{PodarError, Result};
use crate::logging::LogTypes;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

fn immediate() -> f64 {
    -1.0
}

fn yes() -> bool {
    true
}

fn cubic() -> InterpolationFn {
    InterpolationFn::Cubic
}

/// Gradual magnitude pruning (`GMPruningModifier` and its aliases).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradualPruningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamSelector>,
    #[serde(default)]
    pub init_sparsity: InitSparsity,
    pub final_sparsity: FinalSparsity,
    #[serde(default = "immediate")]
    pub start_epoch: f64,
    pub end_epoch: f64,
    #[serde(default = "immediate")]
    pub update_frequency: f64,
    #[serde(default = "cubic")]
    pub inter_func: InterpolationFn,
    #[serde(default = "yes")]
    pub leave_enabled: bool,
    #[serde(default)]
    pub mask_type: MaskTypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_sparsity: Option<bool>,
    #[serde(default)]
    pub allow_reintroduction: bool,
    #[serde(default)]
    pub log_types: LogTypes,
}

/// Alternating compressed/decompressed training (`ACDCPruningModifier`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcdcPruningConfig {
    pub compression_sparsity: f64,
    pub start_epoch: f64,
    pub end_epoch: f64,
    pub update_frequency: f64,
    #[serde(default)]
    pub params: ParamSelector,
    #[serde(default = "yes")]
    pub global_sparsity: bool,
    #[serde(default = "yes")]
    pub leave_enabled: bool,
    #[serde(default = "yes")]
    pub momentum_buffer_reset: bool,
    #[serde(default)]
    pub mask_type: MaskTypeSpec,
    #[serde(default)]
    pub log_types: LogTypes,
}

/// Keeps the zeros already present in the tracked parameters
/// (`ConstantPruningModifier`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantPruningConfig {
    pub params: ParamSelector,
    #[serde(default = "immediate")]
    pub start_epoch: f64,
    #[serde(default = "immediate")]
    pub end_epoch: f64,
    #[serde(default)]
    pub log_types: LogTypes,
}

/// Configuration of any pruning modifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PruningConfig {
    Gradual(GradualPruningConfig),
    Acdc(AcdcPruningConfig),
    Constant(ConstantPruningConfig),
}

impl PruningConfig {
    /// Deserialize the fields of a record into the given variant's struct.
    pub fn gradual_from_value(value: Value) -> Result<Self> {
        Ok(PruningConfig::Gradual(serde_yaml::from_value(value)?))
    }

    pub fn acdc_from_value(value: Value) -> Result<Self> {
        Ok(PruningConfig::Acdc(serde_yaml::from_value(value)?))
    }

    pub fn constant_from_value(value: Value) -> Result<Self> {
        Ok(PruningConfig::Constant(serde_yaml::from_value(value)?))
    }

    /// Field mapping for re-serialization.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            PruningConfig::Gradual(c) => serde_yaml::to_value(c)?,
            PruningConfig::Acdc(c) => serde_yaml::to_value(c)?,
            PruningConfig::Constant(c) => serde_yaml::to_value(c)?,
        };
        Ok(value)
    }

    /// Check field ranges and cross-field rules.
    pub fn validate(&self) -> Result<()> {
        match self {
            PruningConfig::Gradual(c) => {
                c.init_sparsity.validate()?;
                c.final_sparsity.validate()?;
                if c.final_sparsity.is_per_param() && c.params.as_ref().is_some_and(|p| !p.is_empty()) {
                    return Err(PodarError::config(
                        "params",
                        "params must be empty when final_sparsity maps sparsities to parameters",
                    ));
                }
                MaskCreator::try_from(&c.mask_type)?;
            }
            PruningConfig::Acdc(c) => {
                check_fraction("compression_sparsity", &[c.compression_sparsity])?;
                match &c.mask_type {
                    MaskTypeSpec::Name(name) if name == "unstructured" || name == "block" => {}
                    other => {
                        return Err(PodarError::config(
                            "mask_type",
                            format!("ACDC supports 'unstructured' or 'block', got {other:?}"),
                        ))
                    }
                }
                if c.update_frequency <= 0.0 {
                    return Err(PodarError::config(
                        "update_frequency",
                        "phase length must be a positive number of epochs",
                    ));
                }
            }
            PruningConfig::Constant(c) => {
                if c.params.is_empty() {
                    return Err(PodarError::config("params", "at least one parameter is required"));
                }
            }
        }
        self.schedule()?.validate()
    }

    /// Schedule value object for this configuration.
    ///
    /// The AC/DC end is truncated so the last phase compresses.
    pub fn schedule(&self) -> Result<Schedule> {
        let schedule = match self {
            PruningConfig::Gradual(c) => Schedule::new(c.start_epoch, c.end_epoch, c.update_frequency)
                .with_end_comparator(EndComparator::Unconstrained),
            PruningConfig::Acdc(c) => {
                let end = finish_on_compression(c.start_epoch, c.end_epoch, c.update_frequency)?;
                Schedule::new(c.start_epoch, end, c.update_frequency)
                    .with_end_comparator(EndComparator::GreaterOrEqual)
            }
            PruningConfig::Constant(c) => Schedule::new(c.start_epoch, c.end_epoch, -1.0)
                .with_end_comparator(EndComparator::Unconstrained),
        };
        Ok(schedule)
    }

    /// Parameter tokens as declared in the recipe.
    pub fn declared_params(&self) -> Vec<String> {
        match self {
            PruningConfig::Gradual(c) => match (&c.final_sparsity, &c.params) {
                (FinalSparsity::PerParam(groups), _) => {
                    groups.iter().flat_map(|(_, names)| names.iter().cloned()).collect()
                }
                (_, Some(params)) => params.tokens(),
                (_, None) => vec![ALL_PRUNABLE_TOKEN.to_string()],
            },
            PruningConfig::Acdc(c) => c.params.tokens(),
            PruningConfig::Constant(c) => c.params.tokens(),
        }
    }

    pub fn params(&self) -> Option<&ParamSelector> {
        match self {
            PruningConfig::Gradual(c) => c.params.as_ref(),
            PruningConfig::Acdc(c) => Some(&c.params),
            PruningConfig::Constant(c) => Some(&c.params),
        }
    }

    pub fn final_sparsity(&self) -> Option<&FinalSparsity> {
        match self {
            PruningConfig::Gradual(c) => Some(&c.final_sparsity),
            _ => None,
        }
    }

    pub fn mask_creator(&self) -> Result<MaskCreator> {
        match self {
            PruningConfig::Gradual(c) => MaskCreator::try_from(&c.mask_type),
            PruningConfig::Acdc(c) => MaskCreator::try_from(&c.mask_type),
            PruningConfig::Constant(_) => Ok(MaskCreator::Unstructured),
        }
    }

    /// Whether masks share one global ranking, given the tag's default.
    pub fn global_sparsity(&self, tag_default: bool) -> bool {
        match self {
            PruningConfig::Gradual(c) => c.global_sparsity.unwrap_or(tag_default),
            PruningConfig::Acdc(c) => c.global_sparsity,
            PruningConfig::Constant(_) => false,
        }
    }

    pub fn leave_enabled(&self) -> bool {
        match self {
            PruningConfig::Gradual(c) => c.leave_enabled,
            PruningConfig::Acdc(c) => c.leave_enabled,
            PruningConfig::Constant(_) => true,
        }
    }

    pub fn allow_reintroduction(&self) -> bool {
        match self {
            PruningConfig::Gradual(c) => c.allow_reintroduction,
            _ => false,
        }
    }

    pub fn log_types(&self) -> &LogTypes {
        match self {
            PruningConfig::Gradual(c) => &c.log_types,
            PruningConfig::Acdc(c) => &c.log_types,
            PruningConfig::Constant(c) => &c.log_types,
        }
    }

    /// Fresh sparsity policy for this configuration.
    pub fn policy(&self) -> Box<dyn SparsityPolicy> {
        match self {
            PruningConfig::Gradual(c) => Box::new(GradualPolicy::new(
                c.init_sparsity.clone(),
                c.final_sparsity.clone(),
                c.inter_func,
            )),
            PruningConfig::Acdc(c) => {
                Box::new(AlternatingPolicy::new(c.compression_sparsity, c.momentum_buffer_reset))
            }
            PruningConfig::Constant(_) => Box::new(ConstantPolicy::new()),
        }
    }

    /// Write a validated schedule back into the fields.
    pub(crate) fn set_schedule(&mut self, schedule: &Schedule) {
        match self {
            PruningConfig::Gradual(c) => {
                c.start_epoch = schedule.start_epoch;
                c.end_epoch = schedule.end_epoch;
                c.update_frequency = schedule.update_frequency;
            }
            PruningConfig::Acdc(c) => {
                c.start_epoch = schedule.start_epoch;
                c.end_epoch = schedule.end_epoch;
                c.update_frequency = schedule.update_frequency;
            }
            PruningConfig::Constant(c) => {
                c.start_epoch = schedule.start_epoch;
                c.end_epoch = schedule.end_epoch;
            }
        }
    }

    /// Replace the parameter selection and (for gradual configs) the final
    /// sparsity, returning the revalidated schedule.
    pub(crate) fn reconfigure(
        &self,
        params: Option<ParamSelector>,
        final_sparsity: Option<FinalSparsity>,
    ) -> Result<PruningConfig> {
        let mut next = self.clone();
        match &mut next {
            PruningConfig::Gradual(c) => {
                if let Some(final_sparsity) = final_sparsity {
                    c.final_sparsity = final_sparsity;
                }
                if params.is_some() {
                    c.params = params;
                }
            }
            PruningConfig::Acdc(c) => {
                if final_sparsity.is_some() {
                    return Err(PodarError::config("final_sparsity", "ACDC uses compression_sparsity"));
                }
                if let Some(params) = params {
                    c.params = params;
                }
            }
            PruningConfig::Constant(c) => {
                if final_sparsity.is_some() {
                    return Err(PodarError::config("final_sparsity", "constant pruning has no target"));
                }
                if let Some(params) = params {
                    c.params = params;
                }
            }
        }
        next.validate()?;
        Ok(next)
    }
}
