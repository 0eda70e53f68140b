//! Optimizer trait

use crate::model::Module;

/// Trait for optimization algorithms
pub trait Optimizer {
    /// Perform a single optimization step over every parameter with a gradient
    fn step(&mut self, module: &mut Module);

    /// Zero out all gradients
    fn zero_grad(&mut self, module: &mut Module) {
        let handles: Vec<_> = module.named_parameters().into_iter().map(|(h, _)| h).collect();
        for handle in handles {
            if let Some(param) = module.param_mut(&handle) {
                param.zero_grad();
            }
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);

    /// Zero any momentum accumulators. Optimizers without momentum ignore it.
    fn reset_momentum(&mut self) {}
}
