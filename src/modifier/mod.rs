//! Modifiers and the manager that drives them.
//!
//! A modifier is one `!Tag` record of a recipe turned into a live object
//! implementing [`Modifier`]. The [`ModifierRegistry`] maps tags to
//! constructors and the [`ModifierManager`] forwards every lifecycle call
//! of the external training loop to its modifiers in document order.
//!
//! # Example
//!
//! ```
//! use podar::model::{Layer, Module, Parameter};
//! use podar::modifier::{ModifierManager, ModifierRegistry};
//! use podar::optim::{Optimizer, SGD};
//! use podar::recipe::Recipe;
//!
//! let recipe = Recipe::parse(
//!     "modifiers:\n  - !EpochRangeModifier\n    end_epoch: 4\n  - !SetLearningRateModifier\n    learning_rate: 0.01\n",
//! )
//! .unwrap();
//! let mut manager = ModifierManager::from_recipe(&recipe, &ModifierRegistry::with_defaults()).unwrap();
//! assert_eq!(manager.max_epochs(), 4.0);
//!
//! let mut module = Module::new()
//!     .with_layer("fc", Layer::linear(Parameter::zeros(&[2, 2]), None));
//! let mut sgd = SGD::new(0.1, 0.0);
//! manager.initialize(&mut module, 0.0, &[]).unwrap();
//! manager.update(&mut module, &mut sgd, 0.0, 10).unwrap();
//! assert_eq!(sgd.lr(), 0.01);
//! ```

mod distill;
mod epoch;
mod learning_rate;
mod manager;
mod registry;
mod traits;

#[cfg(test)]
mod tests;

pub use distill::{DistillationConfig, DistillationModifier};
pub use epoch::{EpochRangeConfig, EpochRangeModifier};
pub use learning_rate::{
    LearningRateFunctionConfig, LearningRateFunctionModifier, LrFunction, SetLearningRateConfig,
    SetLearningRateModifier, LR_LOG_TAG,
};
pub use manager::ModifierManager;
pub use registry::{ModifierConstructor, ModifierRegistry};
pub use traits::{LossContext, Modifier};

use crate::error::{PodarError, Result};
use crate::recipe::ModifierSpec;
use serde::Serialize;
use serde_yaml::Value;

/// Serialize a typed config back into a tagged record.
pub(crate) fn spec_from_config<T: Serialize>(tag: &str, config: &T) -> Result<ModifierSpec> {
    match serde_yaml::to_value(config)? {
        Value::Mapping(fields) => Ok(ModifierSpec::new(tag, fields)),
        other => Err(PodarError::Serialization(format!("!{tag} fields serialized to {other:?}"))),
    }
}
