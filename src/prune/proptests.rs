//! Property-based tests for masks and the pruning modifier.

use super::*;
use crate::model::{Layer, Module, Parameter, ParamRef};
use crate::modifier::Modifier;
use proptest::prelude::*;

fn weights() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(
        prop_oneof![0.001f32..10.0, -10.0f32..-0.001],
        2..96,
    )
}

fn module_with(values: Vec<f32>) -> Module {
    let n = values.len();
    Module::new().with_layer("fc", Layer::linear(Parameter::from_shape_vec(&[n], values), None))
}

fn one_shot(sparsity: f64) -> PruningModifier {
    let fields = serde_yaml::from_str(&format!(
        "params: [fc.weight]\nfinal_sparsity: {sparsity}\nstart_epoch: 0\nend_epoch: 0\n"
    ))
    .unwrap();
    PruningModifier::new("GMPruningModifier", PruningConfig::gradual_from_value(fields).unwrap(), false)
        .unwrap()
}

proptest! {
    /// Unstructured local masks hit the target within one element
    #[test]
    fn sparsity_within_one_element(values in weights(), target in 0.0f64..=1.0) {
        let n = values.len();
        let mut module = module_with(values);
        let mut gmp = one_shot(target);
        gmp.initialize(&mut module, 0.0, &[]).unwrap();

        let zeros = module.param(&ParamRef::new("fc", "weight")).unwrap().sparsity() as f64;
        prop_assert!((zeros - target).abs() <= 1.0 / n as f64 + 1e-6,
            "target {} got {} over {} elements", target, zeros, n);
    }

    /// Applying twice equals applying once
    #[test]
    fn apply_is_idempotent(values in weights(), target in 0.0f64..1.0) {
        let mut module = module_with(values);
        let mut gmp = one_shot(target);
        gmp.initialize(&mut module, 0.0, &[]).unwrap();
        let masks = gmp.mask_manager().unwrap();

        masks.apply(&mut module).unwrap();
        let once = module.clone();
        masks.apply(&mut module).unwrap();
        let handle = ParamRef::new("fc", "weight");
        prop_assert_eq!(module.param(&handle), once.param(&handle));
    }

    /// state_dict then load_state_dict restores masks and zero patterns
    #[test]
    fn state_round_trip(values in weights(), target in 0.0f64..1.0) {
        let handle = ParamRef::new("fc", "weight");
        let mut source = module_with(values.clone());
        let mut gmp = one_shot(target);
        gmp.initialize(&mut source, 0.0, &[]).unwrap();
        let state = gmp.state_dict();

        let mut restored_module = module_with(values.iter().map(|v| v * -3.0 + 0.5).collect());
        let mut restored = one_shot(0.0);
        restored.initialize(&mut restored_module, 0.0, &[]).unwrap();
        restored.load_state_dict(&mut restored_module, &state, true).unwrap();

        prop_assert_eq!(restored.state_dict(), state);
        let pattern = |m: &Module| -> Vec<bool> {
            m.param(&handle).unwrap().data.iter().map(|&v| v == 0.0).collect()
        };
        let mask_pattern: Vec<bool> = gmp.mask_manager().unwrap().param_masks()[0]
            .iter()
            .map(|&m| m == 0.0)
            .collect();
        prop_assert_eq!(pattern(&source), mask_pattern.clone());
        // the restored module can only hold extra zeros where -3v + 0.5 hit zero
        for (restored_zero, masked) in pattern(&restored_module).iter().zip(&mask_pattern) {
            prop_assert!(!masked || *restored_zero);
        }
    }
}
