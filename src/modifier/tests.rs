use super::*;
use crate::error::PodarError;
use crate::logging::{MemoryLogger, SharedLogger};
use crate::model::{fixtures, Module, ParamRef};
use crate::optim::{Optimizer, SGD};
use crate::prune::{mask_key, MaskState};
use crate::recipe::Recipe;
use ndarray::{array, ArrayD, IxDyn};
use std::sync::Arc;

fn manager(text: &str) -> Result<ModifierManager> {
    let recipe = Recipe::parse(text)?;
    ModifierManager::from_recipe(&recipe, &ModifierRegistry::with_defaults())
}

fn fc_sparsity(module: &Module) -> f32 {
    module.param(&ParamRef::new("fc", "weight")).unwrap().sparsity()
}

fn train_step(manager: &mut ModifierManager, module: &mut Module, sgd: &mut SGD, epoch: f64, spe: usize) {
    manager.update(module, sgd, epoch, spe).unwrap();
    manager.optimizer_pre_step(module, sgd, epoch, spe).unwrap();
    sgd.step(module);
    manager.optimizer_post_step(module, sgd, epoch, spe).unwrap();
}

const PRUNE_AND_LR: &str = r#"
num_epochs: 6
modifiers:
  - !EpochRangeModifier
    end_epoch: eval(num_epochs)
  - !LearningRateFunctionModifier
    lr_func: cosine
    init_lr: 0.1
    final_lr: 0.01
    start_epoch: 0
    end_epoch: eval(num_epochs)
  - !GMPruningModifier
    params: [fc.weight]
    final_sparsity: 0.5
    start_epoch: 1
    end_epoch: 3
    update_frequency: 1
    inter_func: linear
  - !ConstantPruningModifier
    params: [conv1.weight]
"#;

// ===== Construction =====

#[test]
fn test_from_recipe_keeps_document_order() {
    // TEST_ID: MGM-001
    let manager = manager(PRUNE_AND_LR).unwrap();
    let tags: Vec<&str> = manager.modifiers().iter().map(|m| m.tag()).collect();
    assert_eq!(
        tags,
        ["EpochRangeModifier", "LearningRateFunctionModifier", "GMPruningModifier", "ConstantPruningModifier"],
        "MGM-001 FALSIFIED: document order lost"
    );
    assert_eq!(manager.len(), 4);
    assert_eq!(manager.max_epochs(), 6.0);
    assert!(manager.affects_learning_rate());
    assert!(!manager.affects_distillation());
    assert_eq!(manager.learning_rate_modifiers().len(), 1);
    assert_eq!(manager.pruning_modifiers().len(), 2);
    assert!(manager.distillation_modifiers().is_empty());
}

#[test]
fn test_declared_overlap_rejected() {
    // TEST_ID: MGM-002
    let overlapping = r#"
modifiers:
  - !GMPruningModifier
    params: [fc.weight]
    final_sparsity: 0.5
    start_epoch: 0
    end_epoch: 5
  - !MagnitudePruningModifier
    params: [fc.weight, conv1.weight]
    final_sparsity: 0.7
    start_epoch: 2
    end_epoch: 8
"#;
    let err = manager(overlapping).unwrap_err();
    assert!(
        matches!(err, PodarError::Configuration { ref message, .. } if message.contains("fc.weight")),
        "MGM-002 FALSIFIED: {err:?}"
    );

    let sequential = overlapping.replace("start_epoch: 2\n    end_epoch: 8", "start_epoch: 5\n    end_epoch: 8");
    assert!(manager(&sequential).is_ok(), "MGM-002 FALSIFIED: disjoint windows must be allowed");
}

#[test]
fn test_resolved_overlap_rejected_at_initialize() {
    // TEST_ID: MGM-003
    let text = r#"
modifiers:
  - !GMPruningModifier
    params: __ALL_PRUNABLE__
    final_sparsity: 0.5
    start_epoch: 0
    end_epoch: 5
  - !ConstantPruningModifier
    params: [fc.weight]
"#;
    let mut manager = manager(text).unwrap();
    let mut module = fixtures::conv_net();
    let err = manager.initialize(&mut module, 0.0, &[]).unwrap_err();
    assert!(
        matches!(err, PodarError::Configuration { ref message, .. } if message.contains("resolve to")),
        "MGM-003 FALSIFIED: {err:?}"
    );
}

#[test]
fn test_disjoint_windows_may_share_parameters() {
    // TEST_ID: MGM-011
    let text = r#"
modifiers:
  - !GMPruningModifier
    params: __ALL_PRUNABLE__
    final_sparsity: 0.5
    start_epoch: 0
    end_epoch: 2
  - !ConstantPruningModifier
    params: [fc.weight]
    start_epoch: 2
    end_epoch: 4
"#;
    let mut manager = manager(text).unwrap();
    let mut module = fixtures::conv_net();
    assert!(
        manager.initialize(&mut module, 0.0, &[]).is_ok(),
        "MGM-011 FALSIFIED: back-to-back windows must not count as overlap"
    );
}

#[test]
fn test_staged_recipe_shifts_later_stages() {
    // TEST_ID: MGM-004
    let text = r#"
dense_stage:
  modifiers:
    - !EpochRangeModifier
      end_epoch: 5
prune_stage:
  modifiers:
    - !GMPruningModifier
      params: [fc.weight]
      final_sparsity: 0.8
      start_epoch: 0
      end_epoch: 3
    - !EpochRangeModifier
      end_epoch: 4
"#;
    let manager = manager(text).unwrap();
    let gmp = manager.pruning_modifiers()[0];
    assert_eq!(gmp.schedule().start_epoch, 5.0, "MGM-004 FALSIFIED: stage not shifted");
    assert_eq!(gmp.schedule().end_epoch, 8.0);
    assert_eq!(manager.max_epochs(), 9.0);
}

#[test]
fn test_compose_drops_equal_modifiers() {
    // TEST_ID: MGM-005
    let arch = manager(
        "modifiers:\n  - !ConstantPruningModifier\n    params: [fc.weight]\n",
    )
    .unwrap();
    let training = manager(
        "modifiers:\n  - !ConstantPruningModifier\n    params: [fc.weight]\n  - !EpochRangeModifier\n    end_epoch: 3\n",
    )
    .unwrap();
    let composed = arch.compose(training, true).unwrap();
    assert_eq!(composed.len(), 2, "MGM-005 FALSIFIED: duplicate kept: {composed:?}");
    assert_eq!(composed.modifiers()[1].tag(), "EpochRangeModifier");
}

#[test]
fn test_compose_shifts_unless_kept() {
    let first = manager("modifiers:\n  - !EpochRangeModifier\n    end_epoch: 4\n").unwrap();
    let second = manager("modifiers:\n  - !SetLearningRateModifier\n    learning_rate: 0.01\n").unwrap();
    let composed = first.compose(second, false).unwrap();
    assert_eq!(composed.modifiers()[1].schedule().start_epoch, 4.0);
}

// ===== Lifecycle =====

#[test]
fn test_lifecycle_dispatch() {
    // TEST_ID: MGM-006
    let mut manager = manager(PRUNE_AND_LR).unwrap();
    let mut module = fixtures::conv_net();
    let conv_zeros_before = module.param(&ParamRef::new("conv1", "weight")).unwrap().sparsity();
    let memory = Arc::new(MemoryLogger::default());
    let loggers: Vec<SharedLogger> = vec![memory.clone()];
    let mut sgd = SGD::new(0.5, 0.9);

    manager.initialize(&mut module, 0.0, &loggers).unwrap();
    assert!(manager.initialized());

    for tick in 0..8 {
        let epoch = tick as f64 * 0.5;
        let shapes: Vec<(ParamRef, Vec<usize>)> =
            module.named_parameters().into_iter().map(|(h, p)| (h, p.shape().to_vec())).collect();
        for (handle, shape) in shapes {
            module.param_mut(&handle).unwrap().set_grad(ArrayD::from_elem(IxDyn(&shape), 0.01));
        }
        train_step(&mut manager, &mut module, &mut sgd, epoch, 2);
    }

    assert_eq!(fc_sparsity(&module), 0.5, "MGM-006 FALSIFIED: GMP did not reach its target");
    assert_eq!(
        module.param(&ParamRef::new("conv1", "weight")).unwrap().sparsity(),
        conv_zeros_before,
        "MGM-006 FALSIFIED: constant pruning changed the zero pattern"
    );
    assert!(sgd.lr() < 0.1 && sgd.lr() > 0.01);
    assert!(!memory.records_with_prefix("ParamPruning/fc.weight").is_empty());
    assert!(!memory.records_with_prefix(LR_LOG_TAG).is_empty());

    manager.finalize(&mut module).unwrap();
    assert!(!manager.initialized());
}

#[test]
fn test_loss_update_folds_in_order() {
    // TEST_ID: MGM-007
    let text = "modifiers:\n  - !DistillationModifier\n    hardness: 1.0\n    start_epoch: 2\n";
    let mut manager = manager(text).unwrap();
    assert!(manager.affects_distillation());
    let mut module = fixtures::single_linear(2, 2);
    manager.initialize(&mut module, 0.0, &[]).unwrap();

    let logits = array![[1.0, 2.0, 3.0]];
    let ctx = LossContext { student_logits: Some(&logits), teacher_logits: Some(&logits) };
    assert_eq!(manager.loss_update(4.0, &ctx, 0.0, 1).unwrap(), 4.0);
    let loss = manager.loss_update(4.0, &ctx, 2.0, 1).unwrap();
    assert!(loss.abs() < 1e-6, "MGM-007 FALSIFIED: hardness 1 keeps only the soft term, got {loss}");
}

#[test]
fn test_finalize_without_initialize() {
    let mut manager = manager(PRUNE_AND_LR).unwrap();
    let mut module = fixtures::conv_net();
    assert!(manager.finalize(&mut module).is_ok());
    assert!(!ModifierManager::default().initialized());
}

// ===== State =====

#[test]
fn test_state_dict_round_trip_through_manager() {
    // TEST_ID: MGM-008
    let text = r#"
modifiers:
  - !GMPruningModifier
    params: [fc.weight]
    final_sparsity: 0.5
    start_epoch: 0
    end_epoch: 0
  - !GMPruningModifier
    params: [conv1.weight]
    final_sparsity: 0.25
    start_epoch: 0
    end_epoch: 0
"#;
    let mut source = manager(text).unwrap();
    let mut module = fixtures::conv_net();
    source.initialize(&mut module, 0.0, &[]).unwrap();
    let state = source.state_dict();
    assert_eq!(state.len(), 2);
    assert!(state.contains_key(&mask_key("conv1.weight")));

    let mut target = manager(&text.replace("0.5", "0.0").replace("0.25", "0.0")).unwrap();
    let mut fresh = fixtures::conv_net();
    target.initialize(&mut fresh, 0.0, &[]).unwrap();
    target.load_state_dict(&mut fresh, &state, true).unwrap();
    assert_eq!(target.state_dict(), state, "MGM-008 FALSIFIED: masks differ after load");
    assert_eq!(fc_sparsity(&fresh), fc_sparsity(&module));
}

#[test]
fn test_strict_load_rejects_unclaimed_keys() {
    let mut manager = manager(
        "modifiers:\n  - !GMPruningModifier\n    params: [fc.weight]\n    final_sparsity: 0.5\n    start_epoch: 0\n    end_epoch: 0\n",
    )
    .unwrap();
    let mut module = fixtures::conv_net();
    manager.initialize(&mut module, 0.0, &[]).unwrap();
    let before = fc_sparsity(&module);

    let mut state = manager.state_dict();
    state.insert(mask_key("bn1.weight"), ArrayD::ones(IxDyn(&[4])));
    match manager.load_state_dict(&mut module, &state, true) {
        Err(PodarError::MaskKeyMismatch { extra, missing }) => {
            assert_eq!(extra, vec![mask_key("bn1.weight")]);
            assert!(missing.is_empty());
        }
        other => panic!("expected a key mismatch, got {other:?}"),
    }
    assert_eq!(fc_sparsity(&module), before);

    assert!(manager.load_state_dict(&mut module, &state, false).is_ok());
    assert!(manager.load_state_dict(&mut module, &MaskState::new(), false).is_ok());
}

#[test]
fn test_load_before_initialize_is_a_state_error() {
    // TEST_ID: MGM-010
    let text = "modifiers:\n  - !GMPruningModifier\n    params: [fc.weight]\n    final_sparsity: 0.5\n    start_epoch: 0\n    end_epoch: 0\n";
    let mut source = manager(text).unwrap();
    let mut module = fixtures::conv_net();
    source.initialize(&mut module, 0.0, &[]).unwrap();
    let state = source.state_dict();

    let mut pending = manager(text).unwrap();
    let mut fresh = fixtures::conv_net();
    let before = fc_sparsity(&fresh);
    for strict in [false, true] {
        let err = pending.load_state_dict(&mut fresh, &state, strict).unwrap_err();
        assert!(
            matches!(err, PodarError::Uninitialized { .. }),
            "MGM-010 FALSIFIED: strict={strict} gave {err:?}"
        );
    }
    assert_eq!(fc_sparsity(&fresh), before);

    let mut lr_only = manager("modifiers:\n  - !SetLearningRateModifier\n    learning_rate: 0.1\n").unwrap();
    assert!(lr_only.load_state_dict(&mut fresh, &MaskState::new(), true).is_ok());
}

// ===== Serialization =====

#[test]
fn test_yaml_round_trip_equals_manager() {
    // TEST_ID: MGM-009
    let original = manager(PRUNE_AND_LR).unwrap();
    let text = original.to_yaml_string().unwrap();
    let reparsed = manager(&text).unwrap();
    assert_eq!(reparsed, original, "MGM-009 FALSIFIED: re-serialized recipe differs:\n{text}");
    assert_ne!(reparsed, ModifierManager::default());
}
