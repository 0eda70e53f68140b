//! Podar: recipe-driven sparsification for training loops
//!
//! Podar schedules and applies pruning to the parameters of a model while an
//! external training loop runs. It provides:
//! - Recipes: YAML documents with variables, `eval(...)` expressions and
//!   ordered stages
//! - Modifiers: gradual magnitude (GMP), global magnitude, AC/DC and constant
//!   pruning, plus learning-rate, epoch-range and distillation modifiers
//! - Masks: unstructured and block masks enforced around every optimizer step
//! - Checkpoints: name to mask mappings in safetensors with a sparsity sidecar
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
//!     r#"
//! end: 2
//! modifiers:
//!   - !GMPruningModifier
//!     params: __ALL_PRUNABLE__
//!     final_sparsity: 0.75
//!     start_epoch: 0
//!     end_epoch: eval(end)
//!     update_frequency: 1
//! "#,
//! )
//! .unwrap();
//! let mut manager = ModifierManager::from_recipe(&recipe, &ModifierRegistry::with_defaults()).unwrap();
//!
//! let weight = Parameter::try_from_shape_vec(&[2, 4], (1..=8).map(|v| v as f32).collect()).unwrap();
//! let mut module = Module::new().with_layer("fc", Layer::linear(weight, None));
//! let mut sgd = SGD::new(0.0, 0.0);
//!
//! manager.initialize(&mut module, 0.0, &[]).unwrap();
//! for epoch in 0..=2 {
//!     let epoch = epoch as f64;
//!     manager.update(&mut module, &mut sgd, epoch, 1).unwrap();
//!     manager.optimizer_pre_step(&mut module, &mut sgd, epoch, 1).unwrap();
//!     sgd.step(&mut module);
//!     manager.optimizer_post_step(&mut module, &mut sgd, epoch, 1).unwrap();
//! }
//! manager.finalize(&mut module).unwrap();
//!
//! let sparsity = module.layer("fc").unwrap().param("weight").unwrap().sparsity();
//! assert_eq!(sparsity, 0.75);
//! ```

pub mod checkpoint;
pub mod error;
pub mod logging;
pub mod model;
pub mod modifier;
pub mod optim;
pub mod prune;
pub mod recipe;

pub use error::{PodarError, Result};
pub use model::{Layer, LayerKind, Module, ParamRef, Parameter};
pub use modifier::{Modifier, ModifierManager, ModifierRegistry};
pub use prune::{MaskState, PruningModifier};
pub use recipe::Recipe;
