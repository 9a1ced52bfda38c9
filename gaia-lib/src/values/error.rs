use thiserror::Error;

/// Every failure a G invocation (or the machinery serving it) can surface.
/// G-level failures carry the source text of the failing expression so the
/// actor's one-line diagnostic can quote it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Failure {
    #[error("parse failure: {reason} at `{span}`")]
    Parse { reason: String, span: String },

    #[error("unresolved callee `{callee}` in `{expr}`")]
    UnresolvedCallee { callee: String, expr: String },

    #[error("type coercion failure: {reason} in `{expr}`")]
    TypeCoercion { reason: String, expr: String },

    #[error("permission denied: {reason}")]
    Permission { reason: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("store conflict writing {id}")]
    StoreConflict { id: String },

    #[error("timed out in `{expr}`")]
    Timeout { expr: String },

    #[error("depth limit of {limit} frames exceeded")]
    DepthLimit { limit: usize },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Failure {
    /// The single-line diagnostic delivered to the actor when an invocation
    /// aborts.
    pub fn diagnostic(&self) -> String {
        format!("G error: {}", self)
    }
}
