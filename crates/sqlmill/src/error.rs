//! Error types for sqlmill

use thiserror::Error;

/// Result type alias for sqlmill operations
pub type SqlResult<T> = Result<T, SqlError>;

/// Error types for template compilation and statement synthesis
#[derive(Debug, Error)]
pub enum SqlError {
    /// None of the candidate template ids is registered
    #[error("Template not found: {}", .0.join("|"))]
    TemplateNotFound(Vec<String>),

    /// A `#{...}` / `${...}` marker is still present after substitution
    #[error("Parameter {} is not converted", .0.join(","))]
    UnconvertedParameter(Vec<String>),

    /// Unsupported tag name or missing required attribute
    #[error("Malformed tag <{tag}>: {message}")]
    MalformedTag { tag: String, message: String },

    /// A boolean test could not be evaluated against the parameter bag
    #[error("Condition evaluation failed for '{expr}': {message}")]
    ConditionEvaluation { expr: String, message: String },

    /// `<include refid>` matched nothing in the namespace chain
    #[error("Include refid '{refid}' not found in namespaces [{}]", .namespaces.join(", "))]
    IncludeResolution {
        refid: String,
        namespaces: Vec<String>,
    },

    /// Template or markup syntax error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Validation error (identifiers, descriptors, batch preconditions)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem error while loading templates or configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by an execution collaborator
    #[error("Execution error: {0}")]
    Execution(String),
}

impl SqlError {
    /// Create a malformed tag error
    pub fn malformed(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedTag {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Create a condition evaluation error
    pub fn condition(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConditionEvaluation {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Check if this is a template-not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TemplateNotFound(_))
    }

    /// Check if this error is caused by a template authoring defect.
    ///
    /// These surface at load/compile time and never depend on the runtime bag.
    pub fn is_authoring_defect(&self) -> bool {
        matches!(
            self,
            Self::MalformedTag { .. } | Self::IncludeResolution { .. } | Self::Parse(_)
        )
    }
}

impl From<quick_xml::Error> for SqlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SqlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for SqlError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
