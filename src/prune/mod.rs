//! Scheduled pruning of module parameters.
//!
//! This module provides the training-time pruning core:
//!
//! - **Schedules**: epoch windows, update timing and interpolation curves
//! - **Mask creation**: unstructured and block masks from importance scores
//! - **Mask management**: enforcing masks on parameters and gradients
//!   around every optimizer step
//! - **Policies**: gradual, alternating (AC/DC) and constant sparsity
//! - **Pruning modifier**: the `pending -> active -> ended` state machine
//!   driven by the training loop
//!
//! # Example
//!
//! ```
//! use podar::model::{Layer, Module, Parameter};
//! use podar::modifier::Modifier;
//! use podar::optim::SGD;
//! use podar::prune::{PruningConfig, PruningModifier};
//!
//! let weight = Parameter::try_from_shape_vec(&[2, 4], (1..=8).map(|v| v as f32).collect()).unwrap();
//! let mut module = Module::new().with_layer("fc", Layer::linear(weight, None));
//!
//! let fields = serde_yaml::from_str(
//!     "params: [fc.weight]\nfinal_sparsity: 0.5\nstart_epoch: 0\nend_epoch: 2\nupdate_frequency: 1\ninter_func: linear\n",
//! )
//! .unwrap();
//! let config = PruningConfig::gradual_from_value(fields).unwrap();
//! let mut gmp = PruningModifier::new("GMPruningModifier", config, false).unwrap();
//! let mut sgd = SGD::new(0.1, 0.0);
//!
//! gmp.initialize(&mut module, 0.0, &[]).unwrap();
//! gmp.update(&mut module, &mut sgd, 2.0, 1).unwrap();
//! let sparsity = module.layer("fc").unwrap().param("weight").unwrap().sparsity();
//! assert_eq!(sparsity, 0.5);
//! ```
//!
//! # References
//!
//! - Han, S., et al. (2015). Learning both weights and connections. NeurIPS.
//! - Zhu, M., & Gupta, S. (2017). To prune, or not to prune. arXiv:1710.01878.
//! - Peste, A., et al. (2021). AC/DC: Alternating Compressed/DeCompressed
//!   Training of Deep Neural Networks. NeurIPS.

mod analyzer;
mod config;
mod mask_creator;
mod mask_manager;
mod modifier;
mod params;
mod policy;
mod schedule;
mod scorer;
mod state;

#[cfg(test)]
mod proptests;

pub use analyzer::ParamAnalyzer;
pub use config::{AcdcPruningConfig, ConstantPruningConfig, GradualPruningConfig, PruningConfig};
pub use mask_creator::{prune_count, BlockAxis, MaskCreator, MaskTypeSpec, SparsityTarget, DEFAULT_BLOCK_SIZE};
pub use mask_manager::ParamMaskManager;
pub use modifier::{PruningModifier, LOG_TAG_PREFIX};
pub use params::{
    resolve_targets, FinalSparsity, InitSparsity, ParamSelector, ResolvedParams, ALL_PRUNABLE_TOKEN,
    ALL_TOKEN, FROM_PARAM_TOKEN,
};
pub use policy::{finish_on_compression, AlternatingPolicy, ConstantPolicy, GradualPolicy, SparsityPolicy};
pub use schedule::{
    epoch_to_step, interpolate, EndComparator, InterpolationFn, Schedule, ScheduleState,
};
pub use scorer::{MagnitudeScorer, ParamScorer};
pub use state::{mask_key, MaskState, MASK_SUFFIX};
