//! Error types for jellysync-template.

use thiserror::Error;

/// Hard evaluation failures. An expression that is well formed but points at
/// something that does not exist yet is not an error; it evaluates to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The `$eval` expression could not be parsed.
    #[error("syntax error in `{expression}` at offset {offset}: {message}")]
    Syntax {
        expression: String,
        offset: usize,
        message: String,
    },

    /// `$eval` must hold a string expression.
    #[error("$eval expects a string expression, found {0}")]
    NotAnExpression(String),

    /// An `$eval` object may not carry other keys.
    #[error("$eval object has unexpected keys: {0}")]
    UnexpectedKeys(String),
}
