//! Layer registry consumed by modifiers.
//!
//! podar does not own a tensor library. Parameters, gradients and masks are
//! plain `ndarray` buffers, and a [`Module`] is an ordered registry of
//! layers keyed by dotted name. Modifiers never hold references into the
//! module; they keep [`ParamRef`] handles and receive `&mut Module` on every
//! lifecycle call, so several modifiers can mutate the same parameters.

mod layer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use layer::{Layer, LayerKind, Parameter};

use crate::error::{PodarError, Result};
use regex::Regex;
use std::fmt;

/// Prefix marking a parameter selector as a regular expression.
pub const REGEX_PREFIX: &str = "re:";

/// Handle to one parameter of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamRef {
    pub layer: String,
    pub param: String,
}

impl ParamRef {
    pub fn new(layer: impl Into<String>, param: impl Into<String>) -> Self {
        Self { layer: layer.into(), param: param.into() }
    }

    /// Fully qualified name, `<layer>.<param>`.
    pub fn full_name(&self) -> String {
        if self.layer.is_empty() {
            self.param.clone()
        } else {
            format!("{}.{}", self.layer, self.param)
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Ordered registry of named layers.
#[derive(Debug, Clone, Default)]
pub struct Module {
    layers: Vec<(String, Layer)>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer under a dotted name. Replaces an existing layer
    /// with the same name in place.
    pub fn add_layer(&mut self, name: impl Into<String>, layer: Layer) -> &mut Self {
        let name = name.into();
        match self.layers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = layer,
            None => self.layers.push((name, layer)),
        }
        self
    }

    /// Builder form of [`Module::add_layer`].
    pub fn with_layer(mut self, name: impl Into<String>, layer: Layer) -> Self {
        self.add_layer(name, layer);
        self
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    /// Layers in registration order.
    pub fn layers(&self) -> impl Iterator<Item = (&str, &Layer)> {
        self.layers.iter().map(|(n, l)| (n.as_str(), l))
    }

    /// Layers classified as prunable (linear and convolution).
    pub fn prunable_layers(&self) -> impl Iterator<Item = (&str, &Layer)> {
        self.layers().filter(|(_, l)| l.kind().is_prunable())
    }

    pub fn param(&self, handle: &ParamRef) -> Option<&Parameter> {
        self.layer(&handle.layer).and_then(|l| l.param(&handle.param))
    }

    pub fn param_mut(&mut self, handle: &ParamRef) -> Option<&mut Parameter> {
        self.layer_mut(&handle.layer).and_then(|l| l.param_mut(&handle.param))
    }

    /// Like [`Module::param`] but reports a missing handle as an error.
    pub fn require_param(&self, handle: &ParamRef) -> Result<&Parameter> {
        self.param(handle).ok_or_else(|| PodarError::NoMatchingParams {
            selector: handle.full_name(),
            modifier: "Module".to_string(),
        })
    }

    /// Mutable form of [`Module::require_param`].
    pub fn require_param_mut(&mut self, handle: &ParamRef) -> Result<&mut Parameter> {
        self.param_mut(handle).ok_or_else(|| PodarError::NoMatchingParams {
            selector: handle.full_name(),
            modifier: "Module".to_string(),
        })
    }

    /// Every parameter as `(handle, parameter)` in registration order.
    pub fn named_parameters(&self) -> Vec<(ParamRef, &Parameter)> {
        self.layers
            .iter()
            .flat_map(|(layer_name, layer)| {
                layer
                    .params()
                    .map(move |(param_name, p)| (ParamRef::new(layer_name.clone(), param_name), p))
            })
            .collect()
    }

    /// Total number of parameter elements.
    pub fn num_elements(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.data.len()).sum()
    }

    /// Resolve a list of exact names and `re:` patterns to handles.
    ///
    /// Each selector must match at least one parameter; results keep module
    /// order and are deduplicated.
    pub fn params_by_patterns(&self, selectors: &[String]) -> Result<Vec<ParamRef>> {
        let matchers = selectors
            .iter()
            .map(|s| NameMatcher::parse(s))
            .collect::<Result<Vec<_>>>()?;
        let named = self.named_parameters();

        let mut hit = vec![false; matchers.len()];
        let mut resolved = Vec::new();
        for (handle, _) in named {
            let full = handle.full_name();
            let mut matched = false;
            for (i, m) in matchers.iter().enumerate() {
                if m.matches(&full) {
                    hit[i] = true;
                    matched = true;
                }
            }
            if matched {
                resolved.push(handle);
            }
        }

        if let Some(i) = hit.iter().position(|h| !h) {
            return Err(PodarError::NoMatchingParams {
                selector: selectors[i].clone(),
                modifier: "Module".to_string(),
            });
        }
        Ok(resolved)
    }
}

/// One exact-name or `re:` selector. Patterns are anchored at the start
/// of the name only, so `re:.*conv*` matches `block.conv1.weight`.
#[derive(Debug, Clone)]
pub(crate) enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    pub(crate) fn parse(selector: &str) -> Result<Self> {
        match selector.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => {
                let anchored = format!("^(?:{pattern})");
                Regex::new(&anchored)
                    .map(NameMatcher::Pattern)
                    .map_err(|e| PodarError::config("params", format!("bad regex '{pattern}': {e}")))
            }
            None => Ok(NameMatcher::Exact(selector.to_string())),
        }
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(exact) => exact == name,
            NameMatcher::Pattern(re) => re.is_match(name),
        }
    }
}
