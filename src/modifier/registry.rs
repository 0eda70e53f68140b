//! Tag to constructor mapping.

use super::{
    DistillationModifier, EpochRangeModifier, LearningRateFunctionModifier, Modifier,
    SetLearningRateModifier,
};
use crate::error::{PodarError, Result};
use crate::prune::{PruningConfig, PruningModifier};
use crate::recipe::ModifierSpec;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Builds a live modifier from its evaluated record.
pub type ModifierConstructor = fn(&ModifierSpec) -> Result<Box<dyn Modifier>>;

/// Known modifier tags.
///
/// An explicit value rather than a process-wide table: callers that need
/// custom modifiers start from [`ModifierRegistry::with_defaults`] and
/// [`register`](ModifierRegistry::register) their own.
#[derive(Clone, Default)]
pub struct ModifierRegistry {
    constructors: BTreeMap<String, ModifierConstructor>,
}

impl ModifierRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in modifier.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("GMPruningModifier", gm_pruning);
        registry.register("MagnitudePruningModifier", magnitude_pruning);
        registry.register("GlobalMagnitudePruningModifier", global_magnitude_pruning);
        registry.register("ACDCPruningModifier", acdc_pruning);
        registry.register("ConstantPruningModifier", constant_pruning);
        registry.register(EpochRangeModifier::TAG, EpochRangeModifier::from_spec);
        registry.register(LearningRateFunctionModifier::TAG, LearningRateFunctionModifier::from_spec);
        registry.register(SetLearningRateModifier::TAG, SetLearningRateModifier::from_spec);
        registry.register(DistillationModifier::TAG, DistillationModifier::from_spec);
        registry
    }

    /// Add or replace the constructor for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, constructor: ModifierConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Construct the modifier for one record.
    ///
    /// # Errors
    ///
    /// `UnknownModifier` for an unregistered tag, otherwise whatever the
    /// modifier's own validation raises.
    pub fn build(&self, spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
        let constructor = self.constructors.get(&spec.tag).ok_or_else(|| PodarError::UnknownModifier {
            tag: spec.tag.clone(),
            known: self.tags().join(", "),
        })?;
        let modifier = constructor(spec)?;
        tracing::debug!(tag = %spec.tag, "modifier constructed");
        Ok(modifier)
    }
}

impl fmt::Debug for ModifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierRegistry").field("tags", &self.tags()).finish()
    }
}

fn fields(spec: &ModifierSpec) -> Value {
    Value::Mapping(spec.fields.clone())
}

fn pruning(spec: &ModifierSpec, parse: fn(Value) -> Result<PruningConfig>, global: bool) -> Result<Box<dyn Modifier>> {
    Ok(Box::new(PruningModifier::from_value(&spec.tag, fields(spec), parse, global)?))
}

fn gm_pruning(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
    pruning(spec, PruningConfig::gradual_from_value, false)
}

fn magnitude_pruning(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
    pruning(spec, PruningConfig::gradual_from_value, false)
}

fn global_magnitude_pruning(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
    pruning(spec, PruningConfig::gradual_from_value, true)
}

fn acdc_pruning(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
    pruning(spec, PruningConfig::acdc_from_value, true)
}

fn constant_pruning(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
    pruning(spec, PruningConfig::constant_from_value, false)
}
