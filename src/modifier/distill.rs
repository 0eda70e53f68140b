//! Knowledge distillation through `loss_update`.

use super::{spec_from_config, LossContext, Modifier};
use crate::error::{PodarError, Result};
use crate::logging::SharedLogger;
use crate::model::Module;
use crate::prune::Schedule;
use crate::recipe::ModifierSpec;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

fn default_hardness() -> f32 {
    0.5
}

fn default_temperature() -> f32 {
    2.0
}

fn immediate() -> f64 {
    -1.0
}

/// `DistillationModifier` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistillationConfig {
    /// Weight of the soft (teacher) term; the trainer's loss gets `1 - hardness`
    #[serde(default = "default_hardness")]
    pub hardness: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "immediate")]
    pub start_epoch: f64,
    #[serde(default = "immediate")]
    pub end_epoch: f64,
}

/// Blends the trainer's loss with a temperature-scaled KL divergence
/// between teacher and student logits while its window is active.
///
/// ```text
/// L = h * T² * KL(softmax(teacher/T) || softmax(student/T)) + (1 - h) * loss
/// ```
#[derive(Debug, Clone)]
pub struct DistillationModifier {
    config: DistillationConfig,
    schedule: Schedule,
    initialized: bool,
}

impl DistillationModifier {
    pub const TAG: &'static str = "DistillationModifier";

    pub fn new(config: DistillationConfig) -> Result<Self> {
        if config.temperature.is_nan() || config.temperature <= 0.0 {
            return Err(PodarError::config(
                "temperature",
                format!("must be positive, got {}", config.temperature),
            ));
        }
        if !(0.0..=1.0).contains(&config.hardness) {
            return Err(PodarError::config(
                "hardness",
                format!("must be in [0, 1], got {}", config.hardness),
            ));
        }
        let schedule = Schedule::new(config.start_epoch, config.end_epoch, -1.0);
        schedule.validate()?;
        Ok(Self { config, schedule, initialized: false })
    }

    pub fn from_spec(spec: &ModifierSpec) -> Result<Box<dyn Modifier>> {
        let config = serde_yaml::from_value(serde_yaml::Value::Mapping(spec.fields.clone()))?;
        Ok(Box::new(Self::new(config)?))
    }

    /// Soft-target term `T² * KL(teacher || student)`, averaged over the batch.
    pub fn soft_loss(&self, student: &Array2<f32>, teacher: &Array2<f32>) -> Result<f32> {
        if student.shape() != teacher.shape() {
            return Err(PodarError::ShapeMismatch {
                name: "teacher_logits".into(),
                expected: student.shape().to_vec(),
                actual: teacher.shape().to_vec(),
            });
        }
        let t = self.config.temperature;
        let student_soft = softmax_2d(&(student / t));
        let teacher_soft = softmax_2d(&(teacher / t));
        Ok(kl_divergence(&teacher_soft, &student_soft) * t * t)
    }
}

impl Modifier for DistillationModifier {
    fn tag(&self) -> &str {
        Self::TAG
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn initialize(&mut self, _module: &mut Module, _epoch: f64, _loggers: &[SharedLogger]) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn loss_update(&mut self, loss: f32, ctx: &LossContext<'_>, epoch: f64, _steps_per_epoch: usize) -> Result<f32> {
        if !self.schedule.is_active(epoch) {
            return Ok(loss);
        }
        let (Some(student), Some(teacher)) = (ctx.student_logits, ctx.teacher_logits) else {
            return Err(PodarError::config(
                "teacher_logits",
                "distillation is active but student and teacher logits were not provided",
            ));
        };
        let soft = self.soft_loss(student, teacher)?;
        let hardness = self.config.hardness;
        Ok(hardness * soft + (1.0 - hardness) * loss)
    }

    fn finalize(&mut self, _module: &mut Module) -> Result<()> {
        self.initialized = false;
        Ok(())
    }

    fn shift_epochs(&mut self, offset: f64) {
        self.schedule.shift(offset);
        self.config.start_epoch = self.schedule.start_epoch;
        self.config.end_epoch = self.schedule.end_epoch;
    }

    fn to_spec(&self) -> Result<ModifierSpec> {
        spec_from_config(Self::TAG, &self.config)
    }

    fn affects_distillation(&self) -> bool {
        true
    }
}

/// Softmax along the last axis
fn softmax_2d(x: &Array2<f32>) -> Array2<f32> {
    let mut result = x.clone();
    for mut row in result.axis_iter_mut(Axis(0)) {
        let max_val = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max_val).exp());
        let sum: f32 = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    result
}

/// KL(p || q), averaged over rows
fn kl_divergence(p: &Array2<f32>, q: &Array2<f32>) -> f32 {
    let mut total = 0.0;
    for (p_row, q_row) in p.axis_iter(Axis(0)).zip(q.axis_iter(Axis(0))) {
        for (&p_i, &q_i) in p_row.iter().zip(q_row.iter()) {
            if p_i > 1e-10 {
                total += p_i * (p_i / q_i.max(1e-10)).ln();
            }
        }
    }
    total / p.nrows().max(1) as f32
}
