//! Per-parameter sparsity reporting.

use crate::error::Result;
use crate::model::{Module, ParamRef};

/// Reports the current sparsity of one tracked parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamAnalyzer {
    handle: ParamRef,
    tag: String,
}

impl ParamAnalyzer {
    pub fn new(handle: ParamRef) -> Self {
        let tag = handle.full_name();
        Self { handle, tag }
    }

    pub fn handle(&self) -> &ParamRef {
        &self.handle
    }

    /// Human-readable name used in log tags.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Fraction of exactly-zero elements right now.
    pub fn param_sparsity(&self, module: &Module) -> Result<f32> {
        Ok(module.require_param(&self.handle)?.sparsity())
    }
}
