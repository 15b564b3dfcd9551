//! Bridge error taxonomy.
//!
//! Every failure crossing the public surface is an [`Error`]. Dispatch failures
//! are wrapped in a [`CallError`] that records which stage of the call failed,
//! so callers can tell "nothing to call" from "the guest threw" from "the result
//! could not be represented".

use std::fmt;

use thiserror::Error;

use crate::value::Kind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("loader `{tag}` failed to initialize: {message}")]
    Init { tag: String, message: String },

    #[error("loader `{tag}` failed to load `{origin}`: {message}")]
    Load {
        tag: String,
        origin: String,
        message: String,
    },

    #[error("unknown symbol `{name}`")]
    UnknownSymbol { name: String },

    #[error("no loader registered for tag `{tag}`")]
    UnknownLoader { tag: String },

    #[error("invalid call target `{target}`")]
    InvalidTarget { target: String },

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("type mismatch: cannot convert {from} to {to}")]
    TypeMismatch { from: Kind, to: Kind },

    #[error("precision loss: cannot convert {from} to {to} without truncating")]
    PrecisionLoss { from: Kind, to: Kind },

    #[error("wrong number of arguments for `{name}`: expected {expected}, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("guest error in `{tag}`: {message}")]
    Guest { tag: String, message: String },

    #[error("stale handle `{name}`: loader `{tag}` is no longer alive")]
    StaleHandle { tag: String, name: String },

    #[error("call depth {depth} exceeds the limit of {limit}")]
    StackOverflow { depth: usize, limit: usize },

    #[error("cannot tear down loader `{tag}`: {frames} call frame(s) still active")]
    BusyTeardown { tag: String, frames: usize },

    #[error("cannot destroy while {frames} call frame(s) are active")]
    TeardownWhileActive { frames: usize },

    #[error("teardown failed: {}", join_errors(.0))]
    Teardown(Vec<Error>),

    #[error("bridge is not initialized")]
    NotInitialized,

    #[error("future did not resolve in time")]
    FutureTimeout,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl Error {
    /// Follows nested call errors down to the failure that started the chain.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::Call(call) = current {
            current = &call.cause;
        }
        current
    }

    /// Outermost dispatch stage, if this error came out of a call.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Call(call) => Some(call.stage),
            _ => None,
        }
    }

    pub(crate) fn guest(tag: &str, message: impl Into<String>) -> Self {
        Error::Guest {
            tag: tag.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn load(tag: &str, origin: &str, message: impl Into<String>) -> Self {
        Error::Load {
            tag: tag.to_string(),
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Dispatch stage a call failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Marshal,
    Invoke,
    Unmarshal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Marshal => "marshal",
            Stage::Invoke => "invoke",
            Stage::Unmarshal => "unmarshal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("call to `{target}` failed at {stage}: {cause}")]
pub struct CallError {
    pub stage: Stage,
    pub target: String,
    pub cause: Box<Error>,
}

impl CallError {
    pub fn new(stage: Stage, target: impl Into<String>, cause: Error) -> Self {
        Self {
            stage,
            target: target.into(),
            cause: Box::new(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_calls() {
        let inner = Error::StackOverflow { depth: 9, limit: 8 };
        let mid = Error::Call(CallError::new(Stage::Invoke, "py:f", inner));
        let outer = Error::Call(CallError::new(Stage::Invoke, "host:g", mid));

        assert!(matches!(
            outer.root_cause(),
            Error::StackOverflow { depth: 9, limit: 8 }
        ));
        assert_eq!(outer.stage(), Some(Stage::Invoke));
    }

    #[test]
    fn teardown_joins_messages() {
        let err = Error::Teardown(vec![
            Error::guest("py", "boom"),
            Error::NotInitialized,
        ]);
        insta::assert_snapshot!(
            err.to_string(),
            @"teardown failed: guest error in `py`: boom; bridge is not initialized"
        );
    }
}
