//! Importance scores for tracked parameters.

use crate::error::Result;
use crate::model::{Module, ParamRef};
use ndarray::ArrayD;
use std::fmt;

/// Produces one score tensor per tracked parameter.
///
/// Higher scores mean more important. Scoring must not mutate parameters;
/// it runs on every scheduled mask update.
pub trait ParamScorer: Send + fmt::Debug {
    /// Scorer name for logs.
    fn name(&self) -> &str;

    /// Scores in `params` order, each shaped like its parameter.
    fn score_parameters(&self, module: &Module, params: &[ParamRef]) -> Result<Vec<ArrayD<f32>>>;

    /// Bookkeeping before the optimizer consumes gradients.
    fn pre_optim_step_update(&mut self, _module: &Module, _params: &[ParamRef], _masks: &[ArrayD<f32>]) {}
}

/// Scores each element by its absolute value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagnitudeScorer;

impl ParamScorer for MagnitudeScorer {
    fn name(&self) -> &str {
        "magnitude"
    }

    fn score_parameters(&self, module: &Module, params: &[ParamRef]) -> Result<Vec<ArrayD<f32>>> {
        params
            .iter()
            .map(|handle| Ok(module.require_param(handle)?.data.mapv(f32::abs)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn test_magnitude_scores_are_absolute_values() {
        let module = fixtures::single_linear(2, 3);
        let handle = ParamRef::new("fc", "weight");
        let scores = MagnitudeScorer.score_parameters(&module, &[handle.clone()]).unwrap();
        let param = module.param(&handle).unwrap();
        assert_eq!(scores[0].shape(), param.shape());
        for (s, p) in scores[0].iter().zip(param.data.iter()) {
            assert_eq!(*s, p.abs());
        }
    }

    #[test]
    fn test_scoring_leaves_parameters_untouched() {
        let module = fixtures::single_linear(2, 3);
        let before = module.clone();
        let _ = MagnitudeScorer
            .score_parameters(&module, &[ParamRef::new("fc", "weight")])
            .unwrap();
        assert_eq!(module.param(&ParamRef::new("fc", "weight")), before.param(&ParamRef::new("fc", "weight")));
    }

    #[test]
    fn test_missing_param_is_an_error() {
        let module = fixtures::single_linear(2, 3);
        assert!(MagnitudeScorer
            .score_parameters(&module, &[ParamRef::new("fc", "nope")])
            .is_err());
    }
}
