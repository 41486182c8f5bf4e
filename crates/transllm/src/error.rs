//! Error taxonomy for the translation engine.
//!
//! Adapters raise; converters annotate with the conversion direction and
//! re-raise. Anything foreign escaping adapter code is wrapped as a
//! [`TransLLMError::Conversion`] with the cause folded into `details`.

use serde_json::Value;
use thiserror::Error;

use crate::ir::Provider;

pub type Result<T> = std::result::Result<T, TransLLMError>;

/// Every failure mode of the engine.
#[derive(Debug, Clone, Error)]
pub enum TransLLMError {
    /// Structurally impossible mapping, e.g. a tool result without a matching
    /// tool-call id, or a document that does not parse as the claimed dialect.
    #[error("conversion failed ({}): {details}", direction(.from, .to))]
    Conversion {
        from: Option<Provider>,
        to: Option<Provider>,
        details: String,
    },

    /// No adapter registered for the requested provider.
    #[error("unsupported provider: '{provider}'. Supported providers: {}", .supported.join(", "))]
    UnsupportedProvider {
        provider: String,
        supported: Vec<String>,
    },

    /// The target dialect has no representation for this capability.
    #[error("provider '{provider}' does not support feature: '{feature}'")]
    UnsupportedFeature { feature: String, provider: Provider },

    /// Input violates a documented invariant. Each entry is a
    /// `path: message` pair.
    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    /// An A → IR → A round-trip diverged from the source.
    #[error("round-trip diverged from the source:\n{}", .differences.join("\n"))]
    Idempotency {
        original: Box<Value>,
        converted: Box<Value>,
        differences: Vec<String>,
    },
}

impl TransLLMError {
    /// Conversion failure with a known direction.
    pub fn conversion(
        from: impl Into<Option<Provider>>,
        to: impl Into<Option<Provider>>,
        details: impl Into<String>,
    ) -> Self {
        TransLLMError::Conversion {
            from: from.into(),
            to: to.into(),
            details: details.into(),
        }
    }

    /// Missing-capability failure.
    pub fn unsupported_feature(feature: impl Into<String>, provider: Provider) -> Self {
        TransLLMError::UnsupportedFeature {
            feature: feature.into(),
            provider,
        }
    }

    /// Single-message validation failure at `path`.
    pub fn validation_at(path: impl Into<String>, message: impl Into<String>) -> Self {
        TransLLMError::Validation {
            errors: vec![format!("{}: {}", path.into(), message.into())],
        }
    }

    /// Fill in whichever side of a conversion error the adapter left blank.
    /// Other variants pass through untouched.
    pub fn annotate(self, from: Provider, to: Provider) -> Self {
        self.with_source(from).with_target(to)
    }

    /// Record the source dialect on a conversion error that lacks one.
    pub fn with_source(self, provider: Provider) -> Self {
        match self {
            TransLLMError::Conversion { from, to, details } => TransLLMError::Conversion {
                from: from.or(Some(provider)),
                to,
                details,
            },
            other => other,
        }
    }

    /// Record the target dialect on a conversion error that lacks one.
    pub fn with_target(self, provider: Provider) -> Self {
        match self {
            TransLLMError::Conversion { from, to, details } => TransLLMError::Conversion {
                from,
                to: to.or(Some(provider)),
                details,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for TransLLMError {
    fn from(err: serde_json::Error) -> Self {
        TransLLMError::Conversion {
            from: None,
            to: None,
            details: format!("malformed document: {err}"),
        }
    }
}

fn direction(from: &Option<Provider>, to: &Option<Provider>) -> String {
    match (from, to) {
        (Some(from), Some(to)) => format!("{from} -> {to}"),
        (Some(from), None) => format!("{from} -> unified"),
        (None, Some(to)) => format!("unified -> {to}"),
        (None, None) => "unified".to_string(),
    }
}
