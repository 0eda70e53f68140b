//! Variable scopes and dependency-ordered resolution.
//!
//! Variables may reference each other in any document order. Resolution
//! walks the reference graph depth-first, so `b: eval(a * 3)` works whether
//! `a` is written before or after `b`, and a loop is reported with every
//! hop of the cycle.

use super::expr::{strip_eval, Expr};
use crate::error::{PodarError, Result};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

/// Resolved variables visible to an expression.
///
/// A stage scope holds its own variables and falls back to the global
/// scope; local names shadow global ones.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    vars: &'a Mapping,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    /// Outermost scope.
    pub fn root(vars: &'a Mapping) -> Self {
        Self { vars, parent: None }
    }

    /// Nested scope whose lookups fall back to `parent`.
    pub fn child(vars: &'a Mapping, parent: &'a Scope<'a>) -> Self {
        Self { vars, parent: Some(parent) }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.vars
            .get(name)
            .or_else(|| self.parent.and_then(|p| p.get(name)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Resolver<'a> {
    raw: &'a Mapping,
    outer: Option<&'a Scope<'a>>,
    marks: HashMap<String, Mark>,
    resolved: HashMap<String, Value>,
    path: Vec<String>,
}

/// Resolve every `eval(...)` variable in `raw` against itself and `outer`.
///
/// Output keeps the key order of `raw`. Inside a stage, a variable whose
/// expression names itself (`lr: eval(lr * 0.1)`) reads the outer value.
pub fn resolve_variables(raw: &Mapping, outer: Option<&Scope<'_>>) -> Result<Mapping> {
    let mut resolver = Resolver {
        raw,
        outer,
        marks: HashMap::new(),
        resolved: HashMap::new(),
        path: Vec::new(),
    };

    let mut out = Mapping::new();
    for (key, _) in raw {
        let name = variable_name(key)?;
        let value = resolver.resolve(name)?;
        out.insert(key.clone(), value);
    }
    Ok(out)
}

fn variable_name(key: &Value) -> Result<&str> {
    key.as_str()
        .ok_or_else(|| PodarError::MalformedRecipe(format!("variable name must be a string, got {key:?}")))
}

impl<'a> Resolver<'a> {
    fn resolve(&mut self, name: &str) -> Result<Value> {
        if let Some(value) = self.resolved.get(name) {
            return Ok(value.clone());
        }
        if self.marks.get(name) == Some(&Mark::Visiting) {
            let start = self.path.iter().position(|n| n == name).unwrap_or(0);
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(PodarError::CircularReference { cycle });
        }

        let raw_value = self.raw.get(name).cloned().unwrap_or(Value::Null);
        let Some(source) = raw_value.as_str().and_then(strip_eval) else {
            self.marks.insert(name.to_string(), Mark::Done);
            self.resolved.insert(name.to_string(), raw_value.clone());
            return Ok(raw_value);
        };

        let expr = Expr::parse(source)?;
        self.marks.insert(name.to_string(), Mark::Visiting);
        self.path.push(name.to_string());

        for dep in expr.identifiers() {
            let self_ref_to_outer = dep == name && self.outer.is_some_and(|o| o.get(name).is_some());
            if self_ref_to_outer || !self.raw.contains_key(dep.as_str()) {
                continue;
            }
            self.resolve(&dep)?;
        }

        let outer = self.outer;
        let resolved = &self.resolved;
        let lookup = |ident: &str| -> Option<Value> {
            if ident == name {
                return outer.and_then(|o| o.get(ident)).cloned();
            }
            resolved
                .get(ident)
                .cloned()
                .or_else(|| outer.and_then(|o| o.get(ident)).cloned())
        };
        let value = expr.evaluate_scalar(name, &lookup)?.into_value();

        self.path.pop();
        self.marks.insert(name.to_string(), Mark::Done);
        self.resolved.insert(name.to_string(), value.clone());
        Ok(value)
    }
}

/// Evaluate `eval(...)` strings anywhere inside a field value.
///
/// Sequences and mappings are walked recursively; other values pass
/// through untouched. `field` names the value in error messages.
pub fn evaluate_value(value: &Value, field: &str, scope: &Scope<'_>) -> Result<Value> {
    match value {
        Value::String(s) => match strip_eval(s) {
            Some(source) => {
                let expr = Expr::parse(source)?;
                let lookup = |ident: &str| scope.get(ident).cloned();
                Ok(expr.evaluate_scalar(field, &lookup)?.into_value())
            }
            None => Ok(value.clone()),
        },
        Value::Sequence(items) => items
            .iter()
            .map(|item| evaluate_value(item, field, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Sequence),
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (k, v) in map {
                let key = evaluate_value(k, field, scope)?;
                out.insert(key, evaluate_value(v, field, scope)?);
            }
            Ok(Value::Mapping(out))
        }
        _ => Ok(value.clone()),
    }
}

/// Apply caller overrides to raw (unresolved) variables.
///
/// Overrides replace existing keys in place and append unknown ones.
pub fn apply_overrides(raw: &mut Mapping, overrides: &Mapping) {
    for (key, value) in overrides {
        raw.insert(key.clone(), value.clone());
    }
}
