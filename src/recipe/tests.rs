use super::*;
use crate::error::PodarError;
use serde_yaml::{Mapping, Value};

const STAGED_SIMPLE: &str = r#"
first_variable: 10
second_variable: 5
lr_multiplier: 2

first_stage:
  lr: 0.1
  num_epochs: 10
  init_lr: eval(lr * 2)
  final_lr: eval(lr)

  training_modifiers:
    - !EpochRangeModifier
        end_epoch: eval(num_epochs + first_variable)
        start_epoch: 0.0

    - !LearningRateFunctionModifier
      start_epoch: 0
      end_epoch: eval(num_epochs)
      lr_func: linear
      init_lr: eval(init_lr)
      final_lr: eval(final_lr)

next_stage:
  new_num_epochs: 15
  sparsity: 0.9

  modifiers:
    - !EpochRangeModifier
        end_epoch: eval(new_num_epochs)
        start_epoch: eval(second_variable)

    - !GMPruningModifier
        end_epoch: eval(second_variable + first_variable)
        final_sparsity: eval(sparsity)
        init_sparsity: eval(sparsity)
"#;

const FLAT_MULTI_EVAL: &str = r#"
num_epochs: 10.0
pruning_end_epoch: eval(pruning_start_epoch + num_pruning_epochs)
pruning_start_epoch: eval(num_epochs * 0.2)
num_pruning_epochs: 6
init_sparsity: 0.2

modifiers:
    - !EpochRangeModifier
        end_epoch: 1.0
        start_epoch: 0.0

    - !GMPruningModifier
        end_epoch: eval(pruning_end_epoch)
        final_sparsity: eval(init_sparsity + 0.7)
        init_sparsity: eval(init_sparsity)
        inter_func: cubic
        leave_enabled: True
        log_types: __ALL__
        mask_type: [1, 4]
        params: __ALL_PRUNABLE__
        start_epoch: eval(pruning_start_epoch)
        update_frequency: 0.01
"#;

fn field<'a>(spec: &'a ModifierSpec, name: &str) -> &'a Value {
    spec.field(name)
        .unwrap_or_else(|| panic!("FALSIFIED: field '{name}' missing on !{}", spec.tag))
}

#[test]
fn test_flat_recipe_evaluates_out_of_order_variables() {
    // TEST_ID: RCP-001
    let recipe = Recipe::parse(FLAT_MULTI_EVAL).unwrap();
    assert!(!recipe.is_staged());
    assert_eq!(recipe.variables["pruning_start_epoch"], Value::from(2.0));
    assert_eq!(recipe.variables["pruning_end_epoch"], Value::from(8.0));

    let specs: Vec<_> = recipe.modifiers().collect();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].tag, "EpochRangeModifier");
    let gmp = specs[1];
    assert_eq!(gmp.tag, "GMPruningModifier");
    assert_eq!(field(gmp, "end_epoch"), &Value::from(8.0));
    assert_eq!(field(gmp, "start_epoch"), &Value::from(2.0));
    assert_eq!(field(gmp, "final_sparsity"), &Value::from(0.2 + 0.7));
    assert_eq!(field(gmp, "leave_enabled"), &Value::Bool(true));
    assert_eq!(field(gmp, "mask_type"), &serde_yaml::from_str::<Value>("[1, 4]").unwrap());
}

#[test]
fn test_staged_recipe_scopes() {
    // TEST_ID: RCP-002
    let recipe = Recipe::parse(STAGED_SIMPLE).unwrap();
    assert!(recipe.is_staged());
    assert!(recipe.groups.is_empty());
    assert_eq!(recipe.stages.len(), 2);

    let first = &recipe.stages[0];
    assert_eq!(first.name, "first_stage");
    assert_eq!(first.groups[0].key, "training_modifiers");
    assert_eq!(first.variables["init_lr"], Value::from(0.2));
    let specs: Vec<_> = first.modifiers().collect();
    assert_eq!(field(specs[0], "end_epoch"), &Value::from(20));
    assert_eq!(field(specs[1], "init_lr"), &Value::from(0.2));
    assert_eq!(field(specs[1], "final_lr"), &Value::from(0.1));

    let next = &recipe.stages[1];
    let specs: Vec<_> = next.modifiers().collect();
    assert_eq!(field(specs[0], "start_epoch"), &Value::from(5));
    assert_eq!(field(specs[1], "end_epoch"), &Value::from(15));
    assert_eq!(field(specs[1], "init_sparsity"), &Value::from(0.9));
}

#[test]
fn test_stage_variables_do_not_leak() {
    // TEST_ID: RCP-003
    let text = r#"
stage_a:
  local_a: 3
  modifiers:
    - !EpochRangeModifier
      end_epoch: eval(local_a)
stage_b:
  modifiers:
    - !EpochRangeModifier
      end_epoch: eval(local_a)
"#;
    let err = Recipe::parse(text).unwrap_err();
    assert!(
        matches!(err, PodarError::UndefinedVariable { ref name, .. } if name == "local_a"),
        "FALSIFIED: stage_b must not see stage_a's variables, got {err:?}"
    );
}

#[test]
fn test_invalid_variable_graphs() {
    // TEST_ID: RCP-004
    let cycle = "val_1: eval(val_2)\nval_2: eval(val_1)\nmodifiers: []\n";
    assert!(matches!(Recipe::parse(cycle).unwrap_err(), PodarError::CircularReference { .. }));

    let undefined = "val_1: 1\nval_2: eval(val2)\nmodifiers: []\n";
    assert!(matches!(Recipe::parse(undefined).unwrap_err(), PodarError::UndefinedVariable { .. }));

    let dtype = "val_1: eval([1, 2])\nmodifiers: []\n";
    assert!(matches!(Recipe::parse(dtype).unwrap_err(), PodarError::NonScalarExpression { .. }));
}

#[test]
fn test_overrides_apply_before_evaluation() {
    // TEST_ID: RCP-005
    let mut overrides = Mapping::new();
    overrides.insert(Value::from("num_epochs"), Value::from(100.0));
    let recipe = Recipe::parse_with_overrides(FLAT_MULTI_EVAL, &overrides).unwrap();
    assert_eq!(recipe.variables["num_epochs"], Value::from(100.0));
    assert_eq!(recipe.variables["pruning_start_epoch"], Value::from(20.0));
    assert_eq!(recipe.variables["pruning_end_epoch"], Value::from(26.0));
}

#[test]
fn test_yaml_round_trip_preserves_object_graph() {
    // TEST_ID: RCP-006
    for text in [FLAT_MULTI_EVAL, STAGED_SIMPLE] {
        let recipe = Recipe::parse(text).unwrap();
        let serialized = recipe.to_yaml_string().unwrap();
        let reparsed = Recipe::parse(&serialized).unwrap();
        assert_eq!(recipe, reparsed, "FALSIFIED: round trip changed recipe:\n{serialized}");
    }
}

#[test]
fn test_untagged_modifier_rejected() {
    // TEST_ID: RCP-007
    let text = "modifiers:\n  - end_epoch: 3\n";
    assert!(matches!(Recipe::parse(text).unwrap_err(), PodarError::MalformedRecipe(_)));
}

#[test]
fn test_mixing_flat_and_staged_rejected() {
    // TEST_ID: RCP-008
    let text = r#"
modifiers:
  - !EpochRangeModifier
    end_epoch: 1
stage:
  modifiers:
    - !EpochRangeModifier
      end_epoch: 2
"#;
    assert!(matches!(Recipe::parse(text).unwrap_err(), PodarError::MalformedRecipe(_)));
}

#[test]
fn test_group_key_detection() {
    assert!(is_modifier_group_key("modifiers"));
    assert!(is_modifier_group_key("training_modifiers"));
    assert!(is_modifier_group_key("pruning_modifiers"));
    assert!(!is_modifier_group_key("num_modifiers_total"));
    assert!(!is_modifier_group_key("lr"));
}

#[test]
fn test_empty_modifier_body_and_empty_document() {
    let recipe = Recipe::parse("modifiers:\n  - !EpochRangeModifier {}\n").unwrap();
    let spec = recipe.modifiers().next().unwrap();
    assert!(spec.fields.is_empty());
    assert_eq!(Recipe::parse("{}").unwrap(), Recipe::default());
}

#[test]
fn test_from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recipe.yaml");
    std::fs::write(&path, FLAT_MULTI_EVAL).unwrap();
    let recipe = Recipe::from_path(&path).unwrap();
    assert_eq!(recipe.modifiers().count(), 2);

    let missing = Recipe::from_path(dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(missing, PodarError::Io { .. }));
}
