//! Checkpointable mask state.

use crate::error::{PodarError, Result};
use ndarray::ArrayD;

/// Suffix appended to a full parameter name to form its mask key.
pub const MASK_SUFFIX: &str = ".sparsity_mask";

/// Mask key for a full parameter name.
pub fn mask_key(param_name: &str) -> String {
    format!("{param_name}{MASK_SUFFIX}")
}

/// Ordered `key -> mask` mapping produced by `state_dict`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskState {
    entries: Vec<(String, ArrayD<f32>)>,
}

impl MaskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the mask stored under `key`.
    pub fn insert(&mut self, key: impl Into<String>, mask: ArrayD<f32>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = mask,
            None => self.entries.push((key, mask)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, m)| m)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.entries.iter().map(|(k, m)| (k.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every entry of `other`, replacing duplicates.
    pub fn extend(&mut self, other: MaskState) {
        for (key, mask) in other.entries {
            self.insert(key, mask);
        }
    }

    /// Entries whose keys belong to `names`, in `names` order.
    ///
    /// With `strict`, the key set must equal the mask keys of `names`
    /// exactly. Otherwise missing keys are skipped and extra keys ignored.
    pub fn select(&self, names: &[String], strict: bool) -> Result<Vec<Option<ArrayD<f32>>>> {
        let wanted: Vec<String> = names.iter().map(|n| mask_key(n)).collect();
        if strict {
            let missing: Vec<String> =
                wanted.iter().filter(|k| !self.contains_key(k)).cloned().collect();
            let extra: Vec<String> = self
                .keys()
                .filter(|k| !wanted.iter().any(|w| w == k))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() || !extra.is_empty() {
                return Err(PodarError::MaskKeyMismatch { extra, missing });
            }
        }
        Ok(wanted.iter().map(|k| self.get(k).cloned()).collect())
    }
}

impl FromIterator<(String, ArrayD<f32>)> for MaskState {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        let mut state = MaskState::new();
        for (key, mask) in iter {
            state.insert(key, mask);
        }
        state
    }
}
