//! Recipe parsing and variable evaluation.
//!
//! A recipe is YAML: variables, then lists of `!Tag` modifier records
//! under keys ending in `modifiers`, optionally grouped into named stages.
//! Values written as `eval(<expr>)` are computed from variables before any
//! modifier is constructed.
//!
//! ```yaml
//! num_epochs: 10
//! end: eval(num_epochs - 2)
//! modifiers:
//!   - !GMPruningModifier
//!     params: __ALL_PRUNABLE__
//!     start_epoch: 0.0
//!     end_epoch: eval(end)
//!     update_frequency: 1.0
//!     init_sparsity: 0.05
//!     final_sparsity: 0.8
//! ```

mod document;
mod expr;
mod variables;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod tests;

pub use document::{
    is_modifier_group_key, ModifierGroup, ModifierSpec, Recipe, RecipeStage, MODIFIERS_KEY_SUFFIX,
};
pub use expr::{strip_eval, Evaluated, Expr, Scalar};
pub use variables::{evaluate_value, resolve_variables, Scope};
