//! Modifier manager for dispatching lifecycle calls to every modifier

use super::{LossContext, Modifier, ModifierRegistry};
use crate::error::{PodarError, Result};
use crate::logging::SharedLogger;
use crate::model::Module;
use crate::optim::Optimizer;
use crate::prune::{mask_key, MaskState};
use crate::recipe::{ModifierGroup, ModifierSpec, Recipe};
use serde_yaml::Mapping;
use std::collections::BTreeSet;
use std::fmt;

/// Group key used when a manager writes its modifiers back out.
const MANAGER_GROUP_KEY: &str = "modifiers";

/// Owns the modifiers of a recipe and forwards every lifecycle call to
/// them in document order.
#[derive(Default)]
pub struct ModifierManager {
    modifiers: Vec<Box<dyn Modifier>>,
}

impl ModifierManager {
    /// Wrap already constructed modifiers.
    ///
    /// # Errors
    ///
    /// Configuration error when two pruning modifiers with intersecting
    /// windows declare the same parameter token.
    pub fn new(modifiers: Vec<Box<dyn Modifier>>) -> Result<Self> {
        let manager = Self { modifiers };
        manager.check_declared_overlap()?;
        Ok(manager)
    }

    /// Build every modifier of `recipe`.
    ///
    /// Stages run back to back: each stage after the first is shifted by
    /// the largest epoch of the stages before it.
    pub fn from_recipe(recipe: &Recipe, registry: &ModifierRegistry) -> Result<Self> {
        let build = |specs: Vec<&ModifierSpec>| -> Result<Self> {
            let modifiers = specs
                .into_iter()
                .map(|spec| registry.build(spec))
                .collect::<Result<Vec<_>>>()?;
            Self::new(modifiers)
        };

        if !recipe.is_staged() {
            return build(recipe.modifiers().collect());
        }
        let mut stages = recipe.stages.iter();
        let mut manager = match stages.next() {
            Some(first) => build(first.modifiers().collect())?,
            None => Self::default(),
        };
        for stage in stages {
            let next = build(stage.modifiers().collect())?;
            manager = manager.compose(next, false)?;
            tracing::debug!(stage = %stage.name, max_epochs = manager.max_epochs(), "stage composed");
        }
        Ok(manager)
    }

    /// Append the modifiers of `other`.
    ///
    /// Unless `keep_original_epochs`, `other` is shifted to start where
    /// this manager ends. Modifiers of `other` equal (tag and resolved
    /// fields) to one already present are dropped.
    pub fn compose(mut self, other: ModifierManager, keep_original_epochs: bool) -> Result<Self> {
        let offset = (!keep_original_epochs).then(|| self.max_epochs());
        let mut existing = self.specs()?;
        for mut modifier in other.modifiers {
            if let Some(offset) = offset {
                modifier.shift_epochs(offset);
            }
            let spec = modifier.to_spec()?;
            if existing.contains(&spec) {
                tracing::debug!(tag = %spec.tag, "dropping duplicate modifier");
                continue;
            }
            existing.push(spec);
            self.modifiers.push(modifier);
        }
        self.check_declared_overlap()?;
        Ok(self)
    }

    pub fn modifiers(&self) -> &[Box<dyn Modifier>] {
        &self.modifiers
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Largest start or end epoch of any modifier.
    pub fn max_epochs(&self) -> f64 {
        self.modifiers
            .iter()
            .map(|m| m.schedule().start_epoch.max(m.schedule().end_epoch))
            .fold(0.0, f64::max)
    }

    pub fn affects_learning_rate(&self) -> bool {
        self.modifiers.iter().any(|m| m.affects_learning_rate())
    }

    pub fn affects_distillation(&self) -> bool {
        self.modifiers.iter().any(|m| m.affects_distillation())
    }

    pub fn learning_rate_modifiers(&self) -> Vec<&dyn Modifier> {
        self.select(|m| m.affects_learning_rate())
    }

    pub fn distillation_modifiers(&self) -> Vec<&dyn Modifier> {
        self.select(|m| m.affects_distillation())
    }

    pub fn pruning_modifiers(&self) -> Vec<&dyn Modifier> {
        self.select(|m| m.pruning_targets().is_some())
    }

    fn select(&self, keep: impl Fn(&dyn Modifier) -> bool) -> Vec<&dyn Modifier> {
        self.modifiers.iter().map(|m| m.as_ref()).filter(|m| keep(*m)).collect()
    }

    // ===== Lifecycle =====

    /// Initialize every modifier, then reject pruning modifiers with
    /// intersecting windows that resolved to the same parameter.
    pub fn initialize(&mut self, module: &mut Module, epoch: f64, loggers: &[SharedLogger]) -> Result<()> {
        for modifier in &mut self.modifiers {
            modifier.initialize(module, epoch, loggers)?;
        }
        self.check_resolved_overlap()?;
        tracing::info!(modifiers = self.modifiers.len(), epoch, "modifiers initialized");
        Ok(())
    }

    pub fn initialized(&self) -> bool {
        !self.modifiers.is_empty() && self.modifiers.iter().all(|m| m.initialized())
    }

    /// Run `update` on every ready modifier, then `log_update` on all.
    pub fn update(
        &mut self,
        module: &mut Module,
        optimizer: &mut dyn Optimizer,
        epoch: f64,
        steps_per_epoch: usize,
    ) -> Result<()> {
        for modifier in &mut self.modifiers {
            if modifier.update_ready(epoch, steps_per_epoch) {
                modifier.update(module, optimizer, epoch, steps_per_epoch)?;
            }
        }
        for modifier in &mut self.modifiers {
            modifier.log_update(module, &*optimizer, epoch, steps_per_epoch)?;
        }
        Ok(())
    }

    pub fn optimizer_pre_step(
        &mut self,
        module: &mut Module,
        optimizer: &mut dyn Optimizer,
        epoch: f64,
        steps_per_epoch: usize,
    ) -> Result<()> {
        for modifier in &mut self.modifiers {
            modifier.optimizer_pre_step(module, optimizer, epoch, steps_per_epoch)?;
        }
        Ok(())
    }

    pub fn optimizer_post_step(
        &mut self,
        module: &mut Module,
        optimizer: &mut dyn Optimizer,
        epoch: f64,
        steps_per_epoch: usize,
    ) -> Result<()> {
        for modifier in &mut self.modifiers {
            modifier.optimizer_post_step(module, optimizer, epoch, steps_per_epoch)?;
        }
        Ok(())
    }

    /// Pass the loss through every modifier in order.
    pub fn loss_update(&mut self, loss: f32, ctx: &LossContext<'_>, epoch: f64, steps_per_epoch: usize) -> Result<f32> {
        self.modifiers
            .iter_mut()
            .try_fold(loss, |loss, m| m.loss_update(loss, ctx, epoch, steps_per_epoch))
    }

    /// Finalize every modifier, even after one fails; the first error is
    /// returned.
    pub fn finalize(&mut self, module: &mut Module) -> Result<()> {
        let mut first_error = None;
        for modifier in &mut self.modifiers {
            if let Err(err) = modifier.finalize(module) {
                tracing::warn!(tag = modifier.tag(), error = %err, "finalize failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ===== State =====

    /// Masks of every modifier keyed by `<param>.sparsity_mask`.
    pub fn state_dict(&self) -> MaskState {
        let mut state = MaskState::new();
        for modifier in &self.modifiers {
            state.extend(modifier.state_dict());
        }
        state
    }

    /// Hand each modifier the masks of the parameters it tracks.
    ///
    /// Every pruning modifier must be initialized. With `strict`, every key
    /// must belong to some modifier and every tracked parameter must have a
    /// key; both are checked before any modifier is touched.
    pub fn load_state_dict(&mut self, module: &mut Module, state: &MaskState, strict: bool) -> Result<()> {
        if let Some(pending) = self.pruning_modifiers().into_iter().find(|m| !m.initialized()) {
            return Err(PodarError::Uninitialized {
                action: format!("load mask state (!{})", pending.tag()),
            });
        }
        let claimed: Vec<Vec<String>> =
            self.modifiers.iter().map(|m| m.tracked_param_names()).collect();

        if strict {
            let wanted: BTreeSet<String> = claimed.iter().flatten().map(|n| mask_key(n)).collect();
            let extra: Vec<String> =
                state.keys().filter(|k| !wanted.contains(*k)).map(str::to_string).collect();
            let missing: Vec<String> =
                wanted.iter().filter(|k| !state.contains_key(k)).cloned().collect();
            if !extra.is_empty() || !missing.is_empty() {
                return Err(PodarError::MaskKeyMismatch { extra, missing });
            }
        }

        for (modifier, names) in self.modifiers.iter_mut().zip(&claimed) {
            if names.is_empty() {
                continue;
            }
            let own: MaskState = names
                .iter()
                .map(|n| mask_key(n))
                .filter_map(|key| state.get(&key).map(|mask| (key, mask.clone())))
                .collect();
            modifier.load_state_dict(module, &own, strict)?;
        }
        Ok(())
    }

    // ===== Serialization =====

    fn specs(&self) -> Result<Vec<ModifierSpec>> {
        self.modifiers.iter().map(|m| m.to_spec()).collect()
    }

    /// Flat recipe holding every modifier with its current field values.
    pub fn to_recipe(&self) -> Result<Recipe> {
        Ok(Recipe {
            variables: Mapping::new(),
            groups: vec![ModifierGroup { key: MANAGER_GROUP_KEY.to_string(), modifiers: self.specs()? }],
            stages: Vec::new(),
        })
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        self.to_recipe()?.to_yaml_string()
    }

    // ===== Overlap rules =====

    /// Declared tokens, checked at construction.
    fn check_declared_overlap(&self) -> Result<()> {
        self.check_overlap(|m| m.pruning_targets().unwrap_or_default(), "declare")
    }

    /// Resolved parameter names, checked at initialize.
    fn check_resolved_overlap(&self) -> Result<()> {
        self.check_overlap(|m| m.tracked_param_names(), "resolve to")
    }

    /// Reject two pruning modifiers sharing a parameter name.
    ///
    /// Only pairs whose windows intersect (see [`Schedule::overlaps`]) are
    /// compared: stages shifted back to back may prune the same parameter
    /// one after the other, since at any epoch a single modifier owns it.
    ///
    /// [`Schedule::overlaps`]: crate::prune::Schedule::overlaps
    fn check_overlap(&self, names: impl Fn(&dyn Modifier) -> Vec<String>, verb: &str) -> Result<()> {
        let pruning = self.pruning_modifiers();
        for (i, a) in pruning.iter().enumerate() {
            let a_names: BTreeSet<String> = names(*a).into_iter().collect();
            for b in &pruning[i + 1..] {
                if !a.schedule().overlaps(b.schedule()) {
                    continue;
                }
                if let Some(shared) = names(*b).into_iter().find(|n| a_names.contains(n)) {
                    return Err(PodarError::config(
                        "params",
                        format!(
                            "!{} and !{} both {verb} '{shared}' in overlapping epochs",
                            a.tag(),
                            b.tag()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModifierManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.modifiers.iter().map(|m| m.tag())).finish()
    }
}

impl PartialEq for ModifierManager {
    fn eq(&self, other: &Self) -> bool {
        match (self.specs(), other.specs()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
