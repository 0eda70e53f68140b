//! Stochastic Gradient Descent optimizer

use super::Optimizer;
use crate::model::{Module, ParamRef};
use ndarray::ArrayD;
use std::collections::HashMap;

/// SGD optimizer with optional momentum
///
/// Velocities are keyed by parameter handle so the optimizer survives
/// parameters being added between steps.
#[derive(Debug, Clone)]
pub struct SGD {
    lr: f32,
    momentum: f32,
    velocities: HashMap<ParamRef, ArrayD<f32>>,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocities: HashMap::new(),
        }
    }

    /// Momentum buffer for a parameter, if one has been accumulated
    pub fn velocity(&self, handle: &ParamRef) -> Option<&ArrayD<f32>> {
        self.velocities.get(handle)
    }
}

impl Optimizer for SGD {
    fn step(&mut self, module: &mut Module) {
        let handles: Vec<ParamRef> =
            module.named_parameters().into_iter().map(|(h, _)| h).collect();

        for handle in handles {
            let Some(param) = module.param_mut(&handle) else {
                continue;
            };
            let Some(grad) = param.grad.as_ref() else {
                continue;
            };

            if self.momentum > 0.0 {
                // v = momentum * v - lr * grad
                let velocity = match self.velocities.get(&handle) {
                    Some(v) if v.shape() == grad.shape() => v * self.momentum - grad * self.lr,
                    _ => grad * (-self.lr),
                };
                param.data += &velocity;
                self.velocities.insert(handle, velocity);
            } else {
                // param -= lr * grad
                let update = grad * self.lr;
                param.data -= &update;
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset_momentum(&mut self) {
        for velocity in self.velocities.values_mut() {
            velocity.fill(0.0);
        }
    }
}
