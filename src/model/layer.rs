//! Layers and their parameters.

use crate::error::{PodarError, Result};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Layer classification used by the `__ALL_PRUNABLE__` selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Linear,
    Conv,
    Embedding,
    Norm,
    #[default]
    Other,
}

impl LayerKind {
    /// Convolution- and linear-like layers are prunable.
    pub fn is_prunable(&self) -> bool {
        matches!(self, LayerKind::Linear | LayerKind::Conv)
    }
}

/// A named, mutable numeric buffer with an optional gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub data: ArrayD<f32>,
    pub grad: Option<ArrayD<f32>>,
}

impl Parameter {
    pub fn new(data: ArrayD<f32>) -> Self {
        Self { data, grad: None }
    }

    /// Build from a flat vector and a shape.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when `values.len()` does not equal the product of
    /// `shape`.
    pub fn try_from_shape_vec(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        let len = values.len();
        ArrayD::from_shape_vec(IxDyn(shape), values).map(Self::new).map_err(|_| {
            PodarError::ShapeMismatch { name: "parameter".into(), expected: shape.to_vec(), actual: vec![len] }
        })
    }

    #[cfg(test)]
    pub(crate) fn from_shape_vec(shape: &[usize], values: Vec<f32>) -> Self {
        match Self::try_from_shape_vec(shape, values) {
            Ok(param) => param,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Fraction of elements that are exactly zero.
    pub fn sparsity(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let zeros = self.data.iter().filter(|&&v| v == 0.0).count();
        zeros as f32 / self.data.len() as f32
    }

    pub fn set_grad(&mut self, grad: ArrayD<f32>) {
        self.grad = Some(grad);
    }

    pub fn zero_grad(&mut self) {
        if let Some(grad) = self.grad.as_mut() {
            grad.fill(0.0);
        }
    }
}

/// A layer: a kind plus its parameters in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    kind: LayerKind,
    params: Vec<(String, Parameter)>,
}

impl Layer {
    pub fn new(kind: LayerKind) -> Self {
        Self { kind, params: Vec::new() }
    }

    /// Linear layer with `weight [out, in]` and `bias [out]`.
    pub fn linear(weight: Parameter, bias: Option<Parameter>) -> Self {
        let mut layer = Self::new(LayerKind::Linear).with_param("weight", weight);
        if let Some(bias) = bias {
            layer = layer.with_param("bias", bias);
        }
        layer
    }

    /// Convolution layer with `weight [out, in, kh, kw]` and optional bias.
    pub fn conv(weight: Parameter, bias: Option<Parameter>) -> Self {
        let mut layer = Self::new(LayerKind::Conv).with_param("weight", weight);
        if let Some(bias) = bias {
            layer = layer.with_param("bias", bias);
        }
        layer
    }

    pub fn with_param(mut self, name: impl Into<String>, param: Parameter) -> Self {
        self.set_param(name, param);
        self
    }

    /// Insert or replace a parameter by name.
    pub fn set_param(&mut self, name: impl Into<String>, param: Parameter) {
        let name = name.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = param,
            None => self.params.push((name, param)),
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(n, p)| (n.as_str(), p))
    }
}
