//! Epoch windows and update timing for scheduled modifiers.
//!
//! A [`Schedule`] is the declarative part: when a modifier starts, when it
//! ends and how often it updates in between. [`ScheduleState`] is the
//! mutable part a running modifier owns: whether it has started or ended
//! and when it last updated.
//!
//! Epochs are fractional. `start_epoch = -1` starts at the first call,
//! `end_epoch = -1` never ends and `update_frequency = -1` updates on every
//! call. Timing decisions convert epochs to integer step ticks with the
//! caller's `steps_per_epoch`, so `epoch = step / steps_per_epoch` never
//! misses a boundary through float drift.

mod interpolate;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod tests;

pub use interpolate::{interpolate, InterpolationFn};

use crate::error::{PodarError, Result};

/// How `end_epoch` must relate to `start_epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndComparator {
    /// Any value; `-1` in recipes.
    #[default]
    Unconstrained,
    /// `end_epoch >= start_epoch`; `0` in recipes.
    GreaterOrEqual,
    /// `end_epoch > start_epoch`; `1` in recipes.
    Greater,
    /// The modifier has no configurable end; `end_epoch` must stay `-1`.
    Fixed,
}

impl EndComparator {
    /// Decode the integer form (`None` is `Fixed`).
    pub fn from_code(code: Option<i64>) -> Result<Self> {
        match code {
            None => Ok(EndComparator::Fixed),
            Some(-1) => Ok(EndComparator::Unconstrained),
            Some(0) => Ok(EndComparator::GreaterOrEqual),
            Some(1) => Ok(EndComparator::Greater),
            Some(other) => Err(PodarError::config(
                "end_comparator",
                format!("must be one of -1, 0, 1 or null, got {other}"),
            )),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            EndComparator::Unconstrained => Some(-1),
            EndComparator::GreaterOrEqual => Some(0),
            EndComparator::Greater => Some(1),
            EndComparator::Fixed => None,
        }
    }
}

/// Start, end and update frequency with their validation bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub start_epoch: f64,
    pub end_epoch: f64,
    pub update_frequency: f64,
    pub min_start: f64,
    pub min_end: f64,
    pub min_frequency: f64,
    pub end_comparator: EndComparator,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            start_epoch: -1.0,
            end_epoch: -1.0,
            update_frequency: -1.0,
            min_start: -1.0,
            min_end: -1.0,
            min_frequency: -1.0,
            end_comparator: EndComparator::Unconstrained,
        }
    }
}

impl Schedule {
    pub fn new(start_epoch: f64, end_epoch: f64, update_frequency: f64) -> Self {
        Self { start_epoch, end_epoch, update_frequency, ..Self::default() }
    }

    pub fn with_end_comparator(mut self, comparator: EndComparator) -> Self {
        self.end_comparator = comparator;
        self
    }

    pub fn with_min_end(mut self, min_end: f64) -> Self {
        self.min_end = min_end;
        self
    }

    pub fn with_min_frequency(mut self, min_frequency: f64) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    /// Check the window against its bounds and comparator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let Self { start_epoch: start, end_epoch: end, .. } = *self;

        if !start.is_finite() || start < self.min_start {
            return Err(PodarError::config(
                "start_epoch",
                format!("start_epoch ({start}) must be >= {}", self.min_start),
            ));
        }
        if !end.is_finite() || end < self.min_end {
            return Err(PodarError::config(
                "end_epoch",
                format!("end_epoch ({end}) must be >= {}", self.min_end),
            ));
        }

        let has_end = end >= 0.0;
        match self.end_comparator {
            EndComparator::Unconstrained => {}
            EndComparator::GreaterOrEqual if has_end && end < start => {
                return Err(PodarError::config(
                    "end_epoch",
                    format!("end_epoch ({end}) must be >= start_epoch ({start})"),
                ));
            }
            EndComparator::Greater if has_end && end <= start => {
                return Err(PodarError::config(
                    "end_epoch",
                    format!("end_epoch ({end}) must be > start_epoch ({start})"),
                ));
            }
            EndComparator::Fixed if end != -1.0 => {
                return Err(PodarError::config(
                    "end_epoch",
                    format!("end_epoch is fixed for this modifier and cannot be set to {end}"),
                ));
            }
            _ => {}
        }

        if !self.update_frequency.is_finite() || self.update_frequency < self.min_frequency {
            return Err(PodarError::config(
                "update_frequency",
                format!(
                    "update_frequency ({}) must be >= {}",
                    self.update_frequency, self.min_frequency
                ),
            ));
        }
        Ok(())
    }

    pub fn has_end(&self) -> bool {
        self.end_epoch >= 0.0
    }

    /// Whether `epoch` falls inside `[start, end)`.
    pub fn is_active(&self, epoch: f64) -> bool {
        epoch >= self.start_epoch.max(0.0) && (!self.has_end() || epoch < self.end_epoch)
    }

    /// `epoch` is at or past the start, compared without a step grid.
    pub fn start_reached(&self, epoch: f64) -> bool {
        self.start_epoch < 0.0 || epoch >= self.start_epoch
    }

    /// `epoch` is at or past a defined end, compared without a step grid.
    pub fn end_reached(&self, epoch: f64) -> bool {
        self.has_end() && epoch >= self.end_epoch
    }

    /// Whether `[start, end)` of two schedules intersect.
    pub fn overlaps(&self, other: &Schedule) -> bool {
        let a_start = self.start_epoch.max(0.0);
        let b_start = other.start_epoch.max(0.0);
        let a_end = if self.has_end() { self.end_epoch } else { f64::INFINITY };
        let b_end = if other.has_end() { other.end_epoch } else { f64::INFINITY };
        // one-shot windows still occupy their start epoch
        let a_end = if a_end <= a_start { a_start + f64::EPSILON } else { a_end };
        let b_end = if b_end <= b_start { b_start + f64::EPSILON } else { b_end };
        a_start < b_end && b_start < a_end
    }

    /// Move the window later by `offset` epochs.
    ///
    /// An immediate start (`-1`) becomes `offset`; an open end stays open.
    pub fn shift(&mut self, offset: f64) {
        self.start_epoch = self.start_epoch.max(0.0) + offset;
        if self.has_end() {
            self.end_epoch += offset;
        }
    }

    /// Frequency in whole steps, at least one.
    pub fn frequency_steps(&self, steps_per_epoch: usize) -> Option<u64> {
        if self.update_frequency <= 0.0 {
            return None;
        }
        let steps = (self.update_frequency * steps_per_epoch.max(1) as f64).round();
        Some(steps.max(1.0) as u64)
    }
}

/// Convert an epoch to its step tick.
pub fn epoch_to_step(epoch: f64, steps_per_epoch: usize) -> i64 {
    (epoch * steps_per_epoch.max(1) as f64).round() as i64
}

/// Lifecycle flags of a running scheduled modifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    pub started: bool,
    pub ended: bool,
    pub last_update_epoch: Option<f64>,
}

impl ScheduleState {
    /// `epoch` has reached the start and the modifier has not started.
    pub fn start_pending(&self, schedule: &Schedule, epoch: f64, steps_per_epoch: usize) -> bool {
        if self.started || self.ended {
            return false;
        }
        schedule.start_epoch < 0.0
            || epoch_to_step(epoch, steps_per_epoch)
                >= epoch_to_step(schedule.start_epoch, steps_per_epoch)
    }

    /// `epoch` has reached the end of a started (or starting) modifier.
    pub fn end_pending(&self, schedule: &Schedule, epoch: f64, steps_per_epoch: usize) -> bool {
        if self.ended || !schedule.has_end() {
            return false;
        }
        let active = self.started || self.start_pending(schedule, epoch, steps_per_epoch);
        active
            && epoch_to_step(epoch, steps_per_epoch)
                >= epoch_to_step(schedule.end_epoch, steps_per_epoch)
    }

    /// Whether `update` should run at `epoch`.
    pub fn update_ready(&self, schedule: &Schedule, epoch: f64, steps_per_epoch: usize) -> bool {
        if self.start_pending(schedule, epoch, steps_per_epoch)
            || self.end_pending(schedule, epoch, steps_per_epoch)
        {
            return true;
        }
        if !self.started || self.ended {
            return false;
        }
        let Some(freq_steps) = schedule.frequency_steps(steps_per_epoch) else {
            return true;
        };
        match self.last_update_epoch {
            None => true,
            Some(last) => {
                let elapsed = epoch_to_step(epoch, steps_per_epoch)
                    - epoch_to_step(last, steps_per_epoch);
                elapsed >= freq_steps as i64
            }
        }
    }

    /// Record that `update` ran at `epoch`.
    pub fn mark_updated(&mut self, schedule: &Schedule, epoch: f64, steps_per_epoch: usize) {
        let starting = self.start_pending(schedule, epoch, steps_per_epoch);
        let ending = self.end_pending(schedule, epoch, steps_per_epoch);
        self.record(starting, ending, epoch);
    }

    /// Record an update at `epoch` with transitions already decided.
    pub fn record(&mut self, starting: bool, ending: bool, epoch: f64) {
        if starting {
            self.started = true;
        }
        if ending {
            self.ended = true;
        }
        self.last_update_epoch = Some(epoch);
    }
}
