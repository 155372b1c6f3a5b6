use std::sync::Arc;

use thiserror::Error;

use crate::value::ValueType;

/// Errors raised synchronously by topology operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Cannot connect '{from}' ({from_type}) to '{to}' ({to_type})")]
    TypeMismatch {
        from: String,
        from_type: ValueType,
        to: String,
        to_type: ValueType,
    },

    #[error("Connecting '{from}' to '{to}' would create a dependency cycle")]
    CycleDetected { from: String, to: String },

    #[error("Plug '{0}' is read-only: it is an output or has an input connection")]
    ReadOnlyOutput(String),

    #[error("Stale graph: {0}")]
    StaleGraph(String),

    #[error("Plug '{0}' has no value of its own")]
    NoValue(String),

    #[error("Plug '{plug}' holds {expected} values, got {found}")]
    WrongValueType {
        plug: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("Node '{node}' already has a plug named '{name}'")]
    DuplicatePlug { node: String, name: String },

    #[error("Plug '{0}' cannot be promoted")]
    CannotPromote(String),

    #[error("Plug '{0}' is not promoted")]
    NotPromoted(String),
}

/// A node's `hash` or `compute` hook failed.
///
/// Carries the node, the plug and the context that triggered the failure so
/// the error can be diagnosed without re-running the graph.
#[derive(Debug, Error, Clone)]
#[error("Node '{node}', plug '{plug}', context {context}:\n{cause:#}")]
pub struct ComputeError {
    pub node: String,
    pub plug: String,
    pub context: String,
    pub cause: Arc<anyhow::Error>,
}

impl ComputeError {
    pub fn new(
        node: impl Into<String>,
        plug: impl Into<String>,
        context: impl Into<String>,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            node: node.into(),
            plug: plug.into(),
            context: context.into(),
            cause: Arc::new(cause.into()),
        }
    }
}

/// Errors returned by value and hash queries.
#[derive(Debug, Error, Clone)]
pub enum EvalError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("Evaluation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl EvalError {
    /// Recovers an `EvalError` that travelled through a node hook as an
    /// `anyhow::Error`, or attributes a fresh failure with `attribute`.
    pub(crate) fn from_hook(
        err: anyhow::Error,
        attribute: impl FnOnce(anyhow::Error) -> ComputeError,
    ) -> Self {
        match err.downcast::<EvalError>() {
            Ok(err) => err,
            Err(err) => EvalError::Compute(attribute(err)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EvalError::Cancelled)
    }
}

/// Result of topology operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result of evaluations.
pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_attribution_survives_hooks() {
        let upstream = EvalError::Compute(ComputeError::new(
            "reader",
            "reader.out.object",
            "{}",
            anyhow::anyhow!("unreadable"),
        ));

        let through_hook: anyhow::Error = upstream.into();
        let recovered = EvalError::from_hook(through_hook, |err| {
            ComputeError::new("stats", "stats.__stats", "{}", err)
        });

        match recovered {
            EvalError::Compute(err) => assert_eq!(err.node, "reader"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fresh_failure_is_attributed() {
        let err = EvalError::from_hook(anyhow::anyhow!("bad area"), |err| {
            ComputeError::new("stats", "stats.__stats", "{}", err)
        });

        let message = err.to_string();
        assert!(message.contains("stats.__stats"));
        assert!(message.contains("bad area"));
    }
}
