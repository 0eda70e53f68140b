//! Sparsity-over-time strategies injected into [`PruningModifier`].
//!
//! [`PruningModifier`]: super::PruningModifier

use super::mask_creator::SparsityTarget;
use super::params::{FinalSparsity, InitSparsity, ResolvedParams};
use super::schedule::{epoch_to_step, interpolate, InterpolationFn, Schedule};
use crate::error::{PodarError, Result};
use crate::model::Module;
use crate::optim::Optimizer;
use std::fmt;

/// Decides the sparsity a pruning modifier applies at each update.
pub trait SparsityPolicy: fmt::Debug + Send {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Capture per-parameter state once the tracked set is known.
    fn bind(&mut self, module: &Module, resolved: &ResolvedParams) -> Result<()>;

    /// Target to apply at `epoch` while the modifier is active.
    fn applied_sparsity(&mut self, schedule: &Schedule, epoch: f64, steps_per_epoch: usize) -> SparsityTarget;

    /// Whether masks are recomputed on updates after the first one.
    fn recompute_after_start(&self) -> bool {
        true
    }

    /// Runs after the optimizer step; returns true if optimizer state was reset.
    fn after_optimizer_step(&mut self, _optimizer: &mut dyn Optimizer) -> bool {
        false
    }

    /// Drop per-run state captured by `bind`.
    fn release(&mut self) {}
}

// =============================================================================
// Gradual
// =============================================================================

/// Interpolates from `init_sparsity` at `start_epoch` to `final_sparsity`
/// at `end_epoch`.
#[derive(Debug, Clone)]
pub struct GradualPolicy {
    init: InitSparsity,
    final_sparsity: FinalSparsity,
    inter_func: InterpolationFn,
    init_per_param: Option<Vec<f64>>,
    final_per_param: Option<Vec<f64>>,
}

impl GradualPolicy {
    pub fn new(init: InitSparsity, final_sparsity: FinalSparsity, inter_func: InterpolationFn) -> Self {
        Self { init, final_sparsity, inter_func, init_per_param: None, final_per_param: None }
    }
}

impl SparsityPolicy for GradualPolicy {
    fn name(&self) -> &'static str {
        "gradual"
    }

    fn bind(&mut self, module: &Module, resolved: &ResolvedParams) -> Result<()> {
        self.final_per_param = resolved.final_per_param.clone();
        self.init_per_param = match self.init {
            InitSparsity::FromParam => Some(
                resolved
                    .params
                    .iter()
                    .map(|h| Ok(f64::from(module.require_param(h)?.sparsity())))
                    .collect::<Result<Vec<_>>>()?,
            ),
            InitSparsity::Fraction(_) => None,
        };
        Ok(())
    }

    fn applied_sparsity(&mut self, schedule: &Schedule, epoch: f64, _steps_per_epoch: usize) -> SparsityTarget {
        let start = schedule.start_epoch.max(0.0);
        let end = if schedule.has_end() { schedule.end_epoch } else { start };
        let at = |init: f64, fin: f64| interpolate(epoch, start, end, init, fin, self.inter_func);

        let uniform_init = match self.init {
            InitSparsity::Fraction(s) => Some(s),
            InitSparsity::FromParam => None,
        };
        let uniform_final = match self.final_sparsity {
            FinalSparsity::Uniform(s) => Some(s),
            FinalSparsity::PerParam(_) => None,
        };

        if let (Some(init), Some(fin)) = (uniform_init, uniform_final) {
            return SparsityTarget::Uniform(at(init, fin));
        }

        let count = self
            .init_per_param
            .as_ref()
            .or(self.final_per_param.as_ref())
            .map_or(0, Vec::len);
        let values = (0..count)
            .map(|i| {
                let init = uniform_init
                    .or_else(|| self.init_per_param.as_ref().and_then(|v| v.get(i).copied()))
                    .unwrap_or(0.0);
                let fin = uniform_final
                    .or_else(|| self.final_per_param.as_ref().and_then(|v| v.get(i).copied()))
                    .unwrap_or(0.0);
                at(init, fin)
            })
            .collect();
        SparsityTarget::PerParam(values)
    }

    fn release(&mut self) {
        self.init_per_param = None;
        self.final_per_param = None;
    }
}

// =============================================================================
// Alternating (AC/DC)
// =============================================================================

/// Alternates dense (decompression) and sparse (compression) phases of
/// `update_frequency` epochs each, starting dense.
#[derive(Debug, Clone)]
pub struct AlternatingPolicy {
    compression_sparsity: f64,
    momentum_buffer_reset: bool,
    is_decompression: bool,
    momentum_buffer_empty: bool,
    phase: Option<i64>,
}

impl AlternatingPolicy {
    pub fn new(compression_sparsity: f64, momentum_buffer_reset: bool) -> Self {
        Self {
            compression_sparsity,
            momentum_buffer_reset,
            is_decompression: true,
            momentum_buffer_empty: true,
            phase: None,
        }
    }

    pub fn is_decompression(&self) -> bool {
        self.is_decompression
    }

    /// Index of the phase computed by the last update.
    pub fn phase(&self) -> Option<i64> {
        self.phase
    }

    /// Phase index at `epoch`, clamped to the last phase before `end_epoch`.
    pub fn phase_at(schedule: &Schedule, epoch: f64, steps_per_epoch: usize) -> i64 {
        let start = epoch_to_step(schedule.start_epoch.max(0.0), steps_per_epoch);
        let mut step = epoch_to_step(epoch, steps_per_epoch);
        if schedule.has_end() {
            // the end tick closes the final compression phase
            step = step.min(epoch_to_step(schedule.end_epoch, steps_per_epoch) - 1);
        }
        let freq = schedule.frequency_steps(steps_per_epoch).unwrap_or(1) as i64;
        (step - start).max(0).div_euclid(freq)
    }
}

impl SparsityPolicy for AlternatingPolicy {
    fn name(&self) -> &'static str {
        "alternating"
    }

    fn bind(&mut self, _module: &Module, _resolved: &ResolvedParams) -> Result<()> {
        self.is_decompression = true;
        self.momentum_buffer_empty = true;
        self.phase = None;
        Ok(())
    }

    fn applied_sparsity(&mut self, schedule: &Schedule, epoch: f64, steps_per_epoch: usize) -> SparsityTarget {
        let phase = Self::phase_at(schedule, epoch, steps_per_epoch);
        self.phase = Some(phase);
        if phase % 2 == 0 {
            self.is_decompression = true;
            SparsityTarget::Uniform(0.0)
        } else {
            self.is_decompression = false;
            self.momentum_buffer_empty = false;
            SparsityTarget::Uniform(self.compression_sparsity)
        }
    }

    fn after_optimizer_step(&mut self, optimizer: &mut dyn Optimizer) -> bool {
        if self.momentum_buffer_reset && self.is_decompression && !self.momentum_buffer_empty {
            optimizer.reset_momentum();
            self.momentum_buffer_empty = true;
            return true;
        }
        false
    }
}

/// Shrink `end_epoch` so the schedule finishes on a compression phase.
///
/// Whole trailing epochs that fall in a decompression phase are dropped.
/// `start = 0, end = 9, update_frequency = 2` gives phases
/// `D D C C D D C C D`, so the end moves to 8.
pub fn finish_on_compression(start_epoch: f64, end_epoch: f64, update_frequency: f64) -> Result<f64> {
    if update_frequency <= 0.0 {
        return Err(PodarError::config(
            "update_frequency",
            format!("phase length must be positive, got {update_frequency}"),
        ));
    }
    let start = start_epoch.max(0.0);
    let mut end = end_epoch;
    while end - 1.0 >= start {
        let phase = ((end - 1.0 - start) / update_frequency).floor() as i64;
        if phase % 2 == 1 {
            break;
        }
        end -= 1.0;
    }
    if end - start < update_frequency {
        return Err(PodarError::config(
            "end_epoch",
            format!(
                "window [{start_epoch}, {end_epoch}) with phase length {update_frequency} has no compression phase"
            ),
        ));
    }
    Ok(end)
}

// =============================================================================
// Constant
// =============================================================================

/// Holds each parameter at the sparsity it had when pruning started.
#[derive(Debug, Clone, Default)]
pub struct ConstantPolicy {
    current: Option<Vec<f64>>,
}

impl ConstantPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SparsityPolicy for ConstantPolicy {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn bind(&mut self, module: &Module, resolved: &ResolvedParams) -> Result<()> {
        self.current = Some(
            resolved
                .params
                .iter()
                .map(|h| Ok(f64::from(module.require_param(h)?.sparsity())))
                .collect::<Result<Vec<_>>>()?,
        );
        Ok(())
    }

    fn applied_sparsity(&mut self, _schedule: &Schedule, _epoch: f64, _steps_per_epoch: usize) -> SparsityTarget {
        SparsityTarget::PerParam(self.current.clone().unwrap_or_default())
    }

    fn recompute_after_start(&self) -> bool {
        false
    }

    fn release(&mut self) {
        self.current = None;
    }
}
