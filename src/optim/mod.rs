//! Optimizer interface driven by the external training loop.
//!
//! Modifiers touch the optimizer in two ways: learning-rate modifiers call
//! [`Optimizer::set_lr`], and the alternating (AC/DC) schedule calls
//! [`Optimizer::reset_momentum`] when a dense phase begins.

mod optimizer;
mod sgd;

pub use optimizer::Optimizer;
pub use sgd::SGD;
