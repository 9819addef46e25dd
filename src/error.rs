// Error taxonomy shared by the registry, the validators and the synthesizer
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("structural error: {0}")]
    Structural(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("shape mismatch at node {node}: {reason}")]
    ShapeMismatch { node: String, reason: String },

    #[error("parameter error at node {node}: {reason}")]
    Parameter { node: String, reason: String },

    #[error("workflow order error: {0}")]
    WorkflowOrder(String),

    #[error("graph contains a cycle through node {0}; networks must be acyclic (DAG)")]
    Cycle(String),

    #[error("unknown operator '{operator}' on node {node}")]
    UnknownOperator { node: String, operator: String },

    #[error("failed to render program: {0:#}")]
    Render(#[from] anyhow::Error),

    #[error("invalid graph document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Discriminant of [`CompileError`], handy for matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Structural,
    Connectivity,
    TypeMismatch,
    ShapeMismatch,
    Parameter,
    WorkflowOrder,
    Cycle,
    UnknownOperator,
    Render,
    Json,
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Structural(_) => ErrorKind::Structural,
            CompileError::Connectivity(_) => ErrorKind::Connectivity,
            CompileError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            CompileError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            CompileError::Parameter { .. } => ErrorKind::Parameter,
            CompileError::WorkflowOrder(_) => ErrorKind::WorkflowOrder,
            CompileError::Cycle(_) => ErrorKind::Cycle,
            CompileError::UnknownOperator { .. } => ErrorKind::UnknownOperator,
            CompileError::Render(_) => ErrorKind::Render,
            CompileError::Json(_) => ErrorKind::Json,
        }
    }

    pub(crate) fn shape(node: &str, reason: impl Into<String>) -> Self {
        CompileError::ShapeMismatch {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parameter(node: &str, reason: impl Into<String>) -> Self {
        CompileError::Parameter {
            node: node.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            CompileError::shape("add_1", "boom").kind(),
            ErrorKind::ShapeMismatch
        );
        assert_eq!(
            CompileError::Structural("no dataset".into()).kind(),
            ErrorKind::Structural
        );
    }

    #[test]
    fn render_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("unexpected end of template").context("rendering program.py");
        let err = CompileError::from(inner);
        let message = err.to_string();
        assert!(message.contains("rendering program.py"));
        assert!(message.contains("unexpected end of template"));
    }
}
