//! Recipe documents: variables, modifier groups and stages.

use super::variables::{apply_overrides, evaluate_value, resolve_variables, Scope};
use crate::error::{PodarError, Result};
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Suffix shared by every modifier group key (`modifiers`,
/// `training_modifiers`, `pruning_modifiers`, ...).
pub const MODIFIERS_KEY_SUFFIX: &str = "modifiers";

/// Whether a top-level or stage key names a modifier group.
pub fn is_modifier_group_key(key: &str) -> bool {
    key == MODIFIERS_KEY_SUFFIX || key.ends_with(&format!("_{MODIFIERS_KEY_SUFFIX}"))
}

/// One `!Tag` record with its evaluated fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierSpec {
    pub tag: String,
    pub fields: Mapping,
}

impl ModifierSpec {
    pub fn new(tag: impl Into<String>, fields: Mapping) -> Self {
        Self { tag: tag.into(), fields }
    }

    /// Parse a single tagged record, e.g. `!EpochRangeModifier {end_epoch: 5}`.
    fn from_value(value: &Value, scope: &Scope<'_>) -> Result<Self> {
        let Value::Tagged(tagged) = value else {
            return Err(PodarError::MalformedRecipe(format!(
                "modifier entries must be tagged records like `- !GMPruningModifier`, got {value:?}"
            )));
        };
        let tag = tagged.tag.to_string().trim_start_matches('!').to_string();
        let fields = match &tagged.value {
            Value::Mapping(map) => map.clone(),
            Value::Null => Mapping::new(),
            other => {
                return Err(PodarError::MalformedRecipe(format!(
                    "modifier !{tag} must hold a mapping of fields, got {other:?}"
                )))
            }
        };

        let mut evaluated = Mapping::new();
        for (key, raw) in &fields {
            let field = key.as_str().ok_or_else(|| {
                PodarError::MalformedRecipe(format!("modifier !{tag} has a non-string field name"))
            })?;
            evaluated.insert(key.clone(), evaluate_value(raw, field, scope)?);
        }
        Ok(Self { tag, fields: evaluated })
    }

    /// Typed view of one field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn to_value(&self) -> Value {
        Value::Tagged(Box::new(TaggedValue {
            tag: Tag::new(self.tag.clone()),
            value: Value::Mapping(self.fields.clone()),
        }))
    }
}

/// Modifiers listed under one group key.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierGroup {
    pub key: String,
    pub modifiers: Vec<ModifierSpec>,
}

impl ModifierGroup {
    fn parse(key: &str, value: &Value, scope: &Scope<'_>) -> Result<Self> {
        let items = match value {
            Value::Sequence(items) => items,
            Value::Null => return Ok(Self { key: key.to_string(), modifiers: Vec::new() }),
            other => {
                return Err(PodarError::MalformedRecipe(format!(
                    "'{key}' must be a list of modifiers, got {other:?}"
                )))
            }
        };
        let modifiers = items
            .iter()
            .map(|item| ModifierSpec::from_value(item, scope))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { key: key.to_string(), modifiers })
    }

    fn to_value(&self) -> Value {
        Value::Sequence(self.modifiers.iter().map(ModifierSpec::to_value).collect())
    }
}

/// A named phase of a staged recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeStage {
    pub name: String,
    pub variables: Mapping,
    pub groups: Vec<ModifierGroup>,
}

impl RecipeStage {
    /// Modifiers of every group in document order.
    pub fn modifiers(&self) -> impl Iterator<Item = &ModifierSpec> {
        self.groups.iter().flat_map(|g| g.modifiers.iter())
    }
}

/// Parsed recipe with all expressions evaluated.
///
/// A recipe is either flat (top-level modifier groups) or staged (named
/// stages, each with its own variables and groups), never both.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recipe {
    pub variables: Mapping,
    pub groups: Vec<ModifierGroup>,
    pub stages: Vec<RecipeStage>,
}

impl Recipe {
    /// Parse recipe text.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_overrides(text, &Mapping::new())
    }

    /// Parse recipe text, replacing global variables before evaluation.
    pub fn parse_with_overrides(text: &str, overrides: &Mapping) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text)?;
        let root = match root {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            other => {
                return Err(PodarError::MalformedRecipe(format!(
                    "recipe must be a mapping at the top level, got {other:?}"
                )))
            }
        };

        let mut raw_vars = Mapping::new();
        let mut raw_groups = Vec::new();
        let mut raw_stages = Vec::new();
        for (key, value) in &root {
            let name = key.as_str().ok_or_else(|| {
                PodarError::MalformedRecipe(format!("top-level keys must be strings, got {key:?}"))
            })?;
            if is_modifier_group_key(name) {
                raw_groups.push((name, value));
            } else if is_stage(value) {
                raw_stages.push((name, value));
            } else {
                raw_vars.insert(key.clone(), value.clone());
            }
        }

        if !raw_groups.is_empty() && !raw_stages.is_empty() {
            return Err(PodarError::MalformedRecipe(
                "a staged recipe cannot also declare top-level modifiers".to_string(),
            ));
        }

        apply_overrides(&mut raw_vars, overrides);
        let variables = resolve_variables(&raw_vars, None)?;
        let global = Scope::root(&variables);

        let groups = raw_groups
            .into_iter()
            .map(|(key, value)| ModifierGroup::parse(key, value, &global))
            .collect::<Result<Vec<_>>>()?;

        let mut stages = Vec::with_capacity(raw_stages.len());
        for (name, value) in raw_stages {
            stages.push(parse_stage(name, value, &global)?);
        }

        tracing::debug!(
            variables = variables.len(),
            groups = groups.len(),
            stages = stages.len(),
            "parsed recipe"
        );
        Ok(Self { variables, groups, stages })
    }

    /// Read and parse a recipe file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PodarError::io(path, e))?;
        Self::parse(&text)
    }

    pub fn is_staged(&self) -> bool {
        !self.stages.is_empty()
    }

    /// Every modifier spec, stage by stage, in document order.
    pub fn modifiers(&self) -> impl Iterator<Item = &ModifierSpec> {
        self.groups
            .iter()
            .flat_map(|g| g.modifiers.iter())
            .chain(self.stages.iter().flat_map(RecipeStage::modifiers))
    }

    /// Textual form that parses back to an equal recipe.
    pub fn to_value(&self) -> Value {
        let mut root = self.variables.clone();
        for group in &self.groups {
            root.insert(Value::from(group.key.clone()), group.to_value());
        }
        for stage in &self.stages {
            let mut body = stage.variables.clone();
            for group in &stage.groups {
                body.insert(Value::from(group.key.clone()), group.to_value());
            }
            root.insert(Value::from(stage.name.clone()), Value::Mapping(body));
        }
        Value::Mapping(root)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_value())?)
    }
}

fn is_stage(value: &Value) -> bool {
    match value {
        Value::Mapping(map) => map
            .iter()
            .any(|(k, v)| k.as_str().is_some_and(is_modifier_group_key) && v.is_sequence()),
        _ => false,
    }
}

fn parse_stage(name: &str, value: &Value, global: &Scope<'_>) -> Result<RecipeStage> {
    let Value::Mapping(body) = value else {
        return Err(PodarError::MalformedRecipe(format!("stage '{name}' must be a mapping")));
    };

    let mut raw_vars = Mapping::new();
    let mut raw_groups = Vec::new();
    for (key, value) in body {
        let key_name = key.as_str().ok_or_else(|| {
            PodarError::MalformedRecipe(format!("stage '{name}' has a non-string key {key:?}"))
        })?;
        if is_modifier_group_key(key_name) {
            raw_groups.push((key_name, value));
        } else {
            raw_vars.insert(key.clone(), value.clone());
        }
    }

    let variables = resolve_variables(&raw_vars, Some(global))?;
    let scope = Scope::child(&variables, global);
    let groups = raw_groups
        .into_iter()
        .map(|(key, value)| ModifierGroup::parse(key, value, &scope))
        .collect::<Result<Vec<_>>>()?;

    Ok(RecipeStage { name: name.to_string(), variables, groups })
}
