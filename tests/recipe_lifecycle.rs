//! Integration test: a staged recipe driven through a full training run,
//! checkpointed, and restored onto a fresh model.

use podar::checkpoint::{load_mask_checkpoint, load_sparsity_metadata, save_mask_checkpoint};
use podar::logging::{MemoryLogger, SharedLogger};
use podar::model::{Layer, Module, ParamRef, Parameter};
use podar::modifier::{ModifierManager, ModifierRegistry, LR_LOG_TAG};
use podar::optim::{Optimizer, SGD};
use podar::recipe::Recipe;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tempfile::TempDir;

const STEPS_PER_EPOCH: usize = 4;

const STAGED_RECIPE: &str = r#"
num_epochs: 10
warmup: 2

dense_stage:
  modifiers:
    - !EpochRangeModifier
      end_epoch: eval(warmup)
    - !SetLearningRateModifier
      learning_rate: 0.05

prune_stage:
  sparsity: 0.6
  training_modifiers:
    - !LearningRateFunctionModifier
      lr_func: linear
      init_lr: 0.05
      final_lr: 0.005
      start_epoch: 0
      end_epoch: eval(num_epochs - warmup)
  pruning_modifiers:
    - !GMPruningModifier
      params: [fc1.weight, "re:conv\\d+\\.weight"]
      final_sparsity: eval(sparsity)
      start_epoch: 0
      end_epoch: 4
      update_frequency: 1
    - !ACDCPruningModifier
      params: [fc2.weight]
      compression_sparsity: 0.5
      start_epoch: 0
      end_epoch: 9
      update_frequency: 2
"#;

fn random_param(rng: &mut StdRng, shape: &[usize]) -> Parameter {
    let n: usize = shape.iter().product();
    let values = (0..n)
        .map(|_| {
            let magnitude: f32 = rng.gen_range(0.01..1.0);
            if rng.gen_bool(0.5) { magnitude } else { -magnitude }
        })
        .collect();
    Parameter::try_from_shape_vec(shape, values).expect("values fill the shape")
}

fn build_module(seed: u64) -> Module {
    let mut rng = StdRng::seed_from_u64(seed);
    Module::new()
        .with_layer("conv1", Layer::conv(random_param(&mut rng, &[4, 2, 3, 3]), None))
        .with_layer(
            "fc1",
            Layer::linear(random_param(&mut rng, &[8, 16]), Some(random_param(&mut rng, &[8]))),
        )
        .with_layer("fc2", Layer::linear(random_param(&mut rng, &[4, 8]), None))
}

fn set_random_grads(module: &mut Module, rng: &mut StdRng) {
    let shapes: Vec<(ParamRef, Vec<usize>)> =
        module.named_parameters().into_iter().map(|(h, p)| (h, p.shape().to_vec())).collect();
    for (handle, shape) in shapes {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|_| rng.gen_range(-0.05..0.05)).collect();
        let grad = ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&shape), values)
            .expect("grad shape matches");
        module.param_mut(&handle).expect("param exists").set_grad(grad);
    }
}

fn sparsity(module: &Module, layer: &str) -> f32 {
    module.param(&ParamRef::new(layer, "weight")).expect("param exists").sparsity()
}

#[test]
fn test_staged_recipe_full_lifecycle() {
    let recipe = Recipe::parse(STAGED_RECIPE).expect("recipe parses");
    let registry = ModifierRegistry::with_defaults();
    let mut manager = ModifierManager::from_recipe(&recipe, &registry).expect("manager builds");
    assert_eq!(manager.len(), 5);
    assert_eq!(manager.max_epochs(), 10.0, "stage two ends at warmup + 8");

    let pruning = manager.pruning_modifiers();
    assert_eq!(pruning.len(), 2);
    assert_eq!(pruning[0].schedule().start_epoch, 2.0);
    assert_eq!(pruning[1].schedule().end_epoch, 10.0, "AC/DC end truncated to 8, then shifted");

    let mut module = build_module(11);
    let mut rng = StdRng::seed_from_u64(3);
    let memory = Arc::new(MemoryLogger::new("memory"));
    let loggers: Vec<SharedLogger> = vec![memory.clone()];
    let mut sgd = SGD::new(0.1, 0.9);
    let fc2 = ParamRef::new("fc2", "weight");

    manager.initialize(&mut module, 0.0, &loggers).expect("initialize");
    assert_eq!(sgd.lr(), 0.1, "initialize must not touch the optimizer");

    let total_steps = 10 * STEPS_PER_EPOCH;
    for step in 0..total_steps {
        let epoch = step as f64 / STEPS_PER_EPOCH as f64;
        set_random_grads(&mut module, &mut rng);

        manager.update(&mut module, &mut sgd, epoch, STEPS_PER_EPOCH).expect("update");
        manager.optimizer_pre_step(&mut module, &mut sgd, epoch, STEPS_PER_EPOCH).expect("pre step");
        sgd.step(&mut module);
        manager.optimizer_post_step(&mut module, &mut sgd, epoch, STEPS_PER_EPOCH).expect("post step");

        if epoch == 0.0 {
            assert_eq!(sgd.lr(), 0.05, "SetLearningRateModifier fires at the first step");
        }
        if (4.0..6.0).contains(&epoch) {
            assert_eq!(sparsity(&module, "fc2"), 0.5, "AC/DC compression phase at epoch {epoch}");
        }
        if epoch == 6.0 {
            let velocity = sgd.velocity(&fc2).expect("momentum accumulated");
            assert!(
                velocity.iter().all(|&v| v == 0.0),
                "momentum must be reset on the first dense step after compression"
            );
        }
    }

    // the run ends exactly at epoch 10, closing AC/DC's final compression phase
    manager.update(&mut module, &mut sgd, 10.0, STEPS_PER_EPOCH).expect("final update");

    let tolerance = |n: usize| 1.0 / n as f32 + 1e-6;
    assert!((sparsity(&module, "fc1") - 0.6).abs() <= tolerance(128));
    assert!((sparsity(&module, "conv1") - 0.6).abs() <= tolerance(72));
    assert_eq!(sparsity(&module, "fc2"), 0.5);
    assert_eq!(module.param(&ParamRef::new("fc1", "bias")).expect("bias").sparsity(), 0.0);
    assert!((sgd.lr() - 0.005).abs() < 1e-6);

    assert!(!memory.records_with_prefix("ParamPruning/fc1.weight").is_empty());
    assert!(!memory.records_with_prefix("ParamPruning/fc2.weight").is_empty());
    assert!(!memory.records_with_prefix(LR_LOG_TAG).is_empty());

    // ===== Checkpoint =====
    let state = manager.state_dict();
    assert_eq!(state.len(), 3);
    let recipe_text = manager.to_yaml_string().expect("recipe serializes");
    let tmp = TempDir::new().expect("tempdir");
    save_mask_checkpoint(&state, Some(&recipe_text), tmp.path()).expect("checkpoint saves");

    let metadata = load_sparsity_metadata(tmp.path()).expect("sidecar");
    assert_eq!(metadata.masks.len(), 3);

    let (loaded, stored_recipe) = load_mask_checkpoint(tmp.path()).expect("checkpoint loads");
    assert_eq!(loaded, state);
    let stored_recipe = stored_recipe.expect("recipe embedded in checkpoint");

    // ===== Restore onto a fresh model =====
    let restored_recipe = Recipe::parse(&stored_recipe).expect("stored recipe parses");
    let mut restored = ModifierManager::from_recipe(&restored_recipe, &registry).expect("restored manager");
    assert!(restored == manager, "re-serialized recipe must rebuild an equal manager");

    let mut fresh = build_module(99);
    restored.initialize(&mut fresh, 10.0, &[]).expect("restored initialize");
    restored.load_state_dict(&mut fresh, &loaded, true).expect("strict load");
    assert_eq!(restored.state_dict(), state);
    for layer in ["conv1", "fc1", "fc2"] {
        let mask = loaded.get(&format!("{layer}.weight.sparsity_mask")).expect("mask saved");
        let weight = &fresh.layer(layer).and_then(|l| l.param("weight")).expect("weight").data;
        let leaked = mask.iter().zip(weight.iter()).filter(|&(&m, &w)| m == 0.0 && w != 0.0).count();
        assert_eq!(leaked, 0, "{layer} holds weights the restored mask prunes");
    }

    manager.finalize(&mut module).expect("finalize");
    restored.finalize(&mut fresh).expect("finalize restored");
    assert!(!manager.initialized());
    assert_eq!(sparsity(&module, "fc2"), 0.5, "finalize leaves the last masks applied");
}

#[test]
fn test_overlapping_recipe_is_rejected() {
    let text = r#"
modifiers:
  - !GMPruningModifier
    params: __ALL_PRUNABLE__
    final_sparsity: 0.5
    start_epoch: 0
    end_epoch: 4
  - !GlobalMagnitudePruningModifier
    params: __ALL_PRUNABLE__
    final_sparsity: 0.7
    start_epoch: 2
    end_epoch: 6
"#;
    let recipe = Recipe::parse(text).expect("recipe parses");
    let err = ModifierManager::from_recipe(&recipe, &ModifierRegistry::with_defaults()).unwrap_err();
    assert!(err.is_fatal_config(), "overlap must be a configuration error, got {err:?}");
}

#[test]
fn test_unknown_tag_and_bad_variable_fail_before_training() {
    let registry = ModifierRegistry::with_defaults();
    let unknown = Recipe::parse("modifiers:\n  - !QuantizationModifier\n    start_epoch: 0\n").expect("parses");
    let err = ModifierManager::from_recipe(&unknown, &registry).unwrap_err();
    assert_eq!(err.code(), "P011");

    let err = Recipe::parse("end: eval(missing * 2)\nmodifiers: []\n").unwrap_err();
    assert_eq!(err.code(), "P012");
}
