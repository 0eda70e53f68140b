//! Parameter selection and sparsity targets from recipe fields.

use crate::error::{PodarError, Result};
use crate::model::{Module, ParamRef};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

/// Selects every parameter of the module.
pub const ALL_TOKEN: &str = "__ALL__";
/// Selects the `weight` of every linear and convolution layer.
pub const ALL_PRUNABLE_TOKEN: &str = "__ALL_PRUNABLE__";
/// `init_sparsity` value meaning "start from each parameter's own sparsity".
pub const FROM_PARAM_TOKEN: &str = "__FROM_PARAM__";

/// `params` recipe field: a single token/name or a list of names and
/// `re:` patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSelector {
    Token(String),
    List(Vec<String>),
}

impl Default for ParamSelector {
    fn default() -> Self {
        ParamSelector::Token(ALL_PRUNABLE_TOKEN.to_string())
    }
}

impl ParamSelector {
    /// Declared entries as written.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            ParamSelector::Token(token) => vec![token.clone()],
            ParamSelector::List(list) => list.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ParamSelector::Token(token) => token.is_empty(),
            ParamSelector::List(list) => list.is_empty(),
        }
    }

    fn contains(&self, token: &str) -> bool {
        self.tokens().iter().any(|t| t == token)
    }

    /// Resolve to handles in module order.
    ///
    /// # Errors
    ///
    /// `NoMatchingParams` when the selection is empty or a name or
    /// pattern matches nothing.
    pub fn resolve(&self, module: &Module, modifier: &str) -> Result<Vec<ParamRef>> {
        let resolved = if self.contains(ALL_TOKEN) {
            module.named_parameters().into_iter().map(|(h, _)| h).collect()
        } else if self.contains(ALL_PRUNABLE_TOKEN) {
            module
                .prunable_layers()
                .filter(|(_, layer)| layer.param("weight").is_some())
                .map(|(name, _)| ParamRef::new(name, "weight"))
                .collect()
        } else {
            module.params_by_patterns(&self.tokens()).map_err(|e| match e {
                PodarError::NoMatchingParams { selector, .. } => PodarError::NoMatchingParams {
                    selector,
                    modifier: modifier.to_string(),
                },
                other => other,
            })?
        };

        if resolved.is_empty() {
            return Err(PodarError::NoMatchingParams {
                selector: format!("{:?}", self.tokens()),
                modifier: modifier.to_string(),
            });
        }
        Ok(resolved)
    }
}

/// `final_sparsity` recipe field: one value, or a mapping from sparsity
/// to the names and patterns that should reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum FinalSparsity {
    Uniform(f64),
    PerParam(Vec<(f64, Vec<String>)>),
}

impl TryFrom<Value> for FinalSparsity {
    type Error = PodarError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(FinalSparsity::Uniform)
                .ok_or_else(|| PodarError::config("final_sparsity", "not a number")),
            Value::Mapping(map) => {
                let mut groups = Vec::with_capacity(map.len());
                for (key, names) in map {
                    let sparsity = key.as_f64().ok_or_else(|| {
                        PodarError::config("final_sparsity", format!("mapping key {key:?} is not a number"))
                    })?;
                    let names: Vec<String> = serde_yaml::from_value(names).map_err(|e| {
                        PodarError::config("final_sparsity", format!("values must be lists of names: {e}"))
                    })?;
                    groups.push((sparsity, names));
                }
                Ok(FinalSparsity::PerParam(groups))
            }
            other => Err(PodarError::config(
                "final_sparsity",
                format!("expected a number or a mapping of sparsity to names, got {other:?}"),
            )),
        }
    }
}

impl From<FinalSparsity> for Value {
    fn from(value: FinalSparsity) -> Self {
        match value {
            FinalSparsity::Uniform(s) => Value::from(s),
            FinalSparsity::PerParam(groups) => {
                let mut map = Mapping::new();
                for (sparsity, names) in groups {
                    map.insert(
                        Value::from(sparsity),
                        Value::Sequence(names.into_iter().map(Value::from).collect()),
                    );
                }
                Value::Mapping(map)
            }
        }
    }
}

impl FinalSparsity {
    pub fn is_per_param(&self) -> bool {
        matches!(self, FinalSparsity::PerParam(_))
    }

    /// Range check on every value.
    pub fn validate(&self) -> Result<()> {
        let values: Vec<f64> = match self {
            FinalSparsity::Uniform(s) => vec![*s],
            FinalSparsity::PerParam(groups) => groups.iter().map(|(s, _)| *s).collect(),
        };
        check_fraction("final_sparsity", &values)
    }

    /// Resolve a per-parameter mapping to `(handle, sparsity)` pairs.
    ///
    /// Groups keep mapping order; a parameter claimed by two groups is a
    /// configuration error.
    pub fn resolve_per_param(&self, module: &Module, modifier: &str) -> Result<Vec<(ParamRef, f64)>> {
        let FinalSparsity::PerParam(groups) = self else {
            return Err(PodarError::config("final_sparsity", "not a per-parameter mapping"));
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (sparsity, names) in groups {
            let selector = ParamSelector::List(names.clone());
            for handle in selector.resolve(module, modifier)? {
                if !seen.insert(handle.clone()) {
                    return Err(PodarError::config(
                        "final_sparsity",
                        format!("{handle} is assigned more than one final sparsity"),
                    ));
                }
                out.push((handle, *sparsity));
            }
        }
        Ok(out)
    }
}

/// `init_sparsity` recipe field: a value or `__FROM_PARAM__`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum InitSparsity {
    Fraction(f64),
    FromParam,
}

impl Default for InitSparsity {
    fn default() -> Self {
        InitSparsity::Fraction(0.0)
    }
}

impl TryFrom<Value> for InitSparsity {
    type Error = PodarError;

    fn try_from(value: Value) -> Result<Self> {
        match &value {
            Value::Number(n) => n
                .as_f64()
                .map(InitSparsity::Fraction)
                .ok_or_else(|| PodarError::config("init_sparsity", "not a number")),
            Value::String(s) if s == FROM_PARAM_TOKEN => Ok(InitSparsity::FromParam),
            other => Err(PodarError::config(
                "init_sparsity",
                format!("expected a number or {FROM_PARAM_TOKEN}, got {other:?}"),
            )),
        }
    }
}

impl From<InitSparsity> for Value {
    fn from(value: InitSparsity) -> Self {
        match value {
            InitSparsity::Fraction(s) => Value::from(s),
            InitSparsity::FromParam => Value::from(FROM_PARAM_TOKEN),
        }
    }
}

impl InitSparsity {
    pub fn validate(&self) -> Result<()> {
        match self {
            InitSparsity::Fraction(s) => check_fraction("init_sparsity", &[*s]),
            InitSparsity::FromParam => Ok(()),
        }
    }
}

pub(crate) fn check_fraction(field: &str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        Some(bad) => Err(PodarError::config(field, format!("{bad} must be between 0.0 and 1.0"))),
        None => Ok(()),
    }
}

/// Parameters a pruning modifier tracks, with per-parameter final targets
/// when the recipe supplied a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub params: Vec<ParamRef>,
    pub final_per_param: Option<Vec<f64>>,
}

/// Resolve `params` / `final_sparsity` against the module.
///
/// A per-parameter mapping supplies the parameter list itself; `params`
/// must then be absent or empty.
pub fn resolve_targets(
    module: &Module,
    selector: Option<&ParamSelector>,
    final_sparsity: Option<&FinalSparsity>,
    modifier: &str,
) -> Result<ResolvedParams> {
    if let Some(final_sparsity @ FinalSparsity::PerParam(_)) = final_sparsity {
        if selector.is_some_and(|s| !s.is_empty()) {
            return Err(PodarError::config(
                "params",
                "params must be empty when final_sparsity maps sparsities to parameters",
            ));
        }
        let pairs = final_sparsity.resolve_per_param(module, modifier)?;
        let (params, finals) = pairs.into_iter().unzip();
        return Ok(ResolvedParams { params, final_per_param: Some(finals) });
    }

    let default = ParamSelector::default();
    let params = selector.unwrap_or(&default).resolve(module, modifier)?;
    Ok(ResolvedParams { params, final_per_param: None })
}
