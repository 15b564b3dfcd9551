use thiserror::Error;

use crate::error::Error;

use super::token::Position;

#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: Position, message: String },

    #[error("name `{0}` is not defined")]
    Name(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("{0}")]
    Runtime(String),

    /// Failure while running a module's top-level statement.
    #[error("line {line}: {error}")]
    At { line: usize, error: Box<ScriptError> },

    /// A nested cross-runtime call failed; carried unchanged.
    #[error(transparent)]
    Bridge(#[from] Error),
}

impl ScriptError {
    pub fn syntax(position: Position, message: impl Into<String>) -> Self {
        ScriptError::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::Type(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }

    /// Tags `self` with the line it came from. Bridge and syntax errors
    /// already say where they happened.
    pub fn at(self, position: Option<Position>) -> Self {
        match (self, position) {
            (
                err @ (ScriptError::Bridge(_) | ScriptError::Syntax { .. } | ScriptError::At { .. }),
                _,
            ) => err,
            (err, Some(position)) => ScriptError::At {
                line: position.line,
                error: Box::new(err),
            },
            (err, None) => err,
        }
    }
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;
