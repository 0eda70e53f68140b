//! Error types with actionable diagnostics.
//!
//! Every failure in podar is fatal to the run that triggered it: a modifier
//! either fully initializes or the caller aborts, because a partially
//! applied mask set silently corrupts training. Errors fall into four
//! families:
//!
//! - **Configuration**: invalid or contradictory recipe fields
//! - **Resolution**: names that do not resolve (params, tags, variables)
//! - **State**: lifecycle misuse and checkpoint mismatches
//! - **Transient**: load failures that may succeed on a forced refetch

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for podar operations.
pub type Result<T> = std::result::Result<T, PodarError>;

/// Errors raised while parsing recipes or driving modifiers.
#[derive(Error, Debug)]
pub enum PodarError {
    /// A recipe field is invalid or contradicts another field.
    #[error("Invalid configuration for '{field}': {message}")]
    Configuration { field: String, message: String },

    /// No parameter of the module matched the requested selector.
    #[error("Could not find any params matching {selector} in {modifier}\n  → Check the parameter names or `re:` patterns")]
    NoMatchingParams { selector: String, modifier: String },

    /// A modifier record carries a tag the registry does not know.
    #[error("Unknown modifier tag '!{tag}'\n  → Registered tags: {known}")]
    UnknownModifier { tag: String, known: String },

    /// An expression references a variable that is not defined in scope.
    #[error("Undefined variable '{name}' referenced by '{referenced_by}'")]
    UndefinedVariable { name: String, referenced_by: String },

    /// Variable expressions reference each other in a loop.
    #[error("Circular variable reference: {}", cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },

    /// An expression evaluated to something other than a scalar.
    #[error("Expression for '{name}' must evaluate to a scalar, got {found}")]
    NonScalarExpression { name: String, found: String },

    /// An expression could not be parsed or evaluated.
    #[error("Invalid expression '{expr}': {message}")]
    InvalidExpression { expr: String, message: String },

    /// The recipe text has the wrong shape.
    #[error("Malformed recipe: {0}")]
    MalformedRecipe(String),

    /// A stateful operation was requested before `initialize`.
    #[error("Cannot {action} for an uninitialized modifier")]
    Uninitialized { action: String },

    /// A checkpoint's mask keys differ from the resolved parameter set.
    #[error("Mask key mismatch: extra keys {extra:?}, missing keys {missing:?}")]
    MaskKeyMismatch {
        extra: Vec<String>,
        missing: Vec<String>,
    },

    /// A tensor's shape differs from the parameter it belongs to.
    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A load failed in a way a forced refetch may fix.
    #[error("Transient load failure for {source_name}: {message}")]
    TransientLoad {
        source_name: String,
        message: String,
    },

    /// A transient load failed again after its forced refetch.
    #[error("Load of {source_name} failed after a forced refresh: {message}")]
    RetryExhausted {
        source_name: String,
        message: String,
    },

    /// YAML (de)serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Checkpoint or sidecar encoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error with context.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PodarError {
    /// Create a configuration error for a named field.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration { field: field.into(), message: message.into() }
    }

    /// Create an IO error with the path that failed.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// True for errors raised while validating or resolving a recipe.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::NoMatchingParams { .. }
                | Self::UnknownModifier { .. }
                | Self::UndefinedVariable { .. }
                | Self::CircularReference { .. }
                | Self::NonScalarExpression { .. }
                | Self::InvalidExpression { .. }
                | Self::MalformedRecipe(_)
                | Self::Yaml(_)
        )
    }

    /// True for errors that may be retried with a forced refetch.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientLoad { .. })
    }

    /// Stable error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "P001",
            Self::MalformedRecipe(_) => "P002",
            Self::Yaml(_) => "P003",
            Self::NoMatchingParams { .. } => "P010",
            Self::UnknownModifier { .. } => "P011",
            Self::UndefinedVariable { .. } => "P012",
            Self::CircularReference { .. } => "P013",
            Self::NonScalarExpression { .. } => "P014",
            Self::InvalidExpression { .. } => "P015",
            Self::Uninitialized { .. } => "P020",
            Self::MaskKeyMismatch { .. } => "P021",
            Self::ShapeMismatch { .. } => "P022",
            Self::TransientLoad { .. } => "P030",
            Self::RetryExhausted { .. } => "P031",
            Self::Serialization(_) => "P040",
            Self::Io { .. } => "P050",
        }
    }
}
