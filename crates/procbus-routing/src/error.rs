/// Errors that can occur while building or updating routing rules.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// An address is not of the form `<node>.<process>`.
    #[error("invalid address {0:?} (expected <node>.<process>)")]
    InvalidAddress(String),

    /// A routing update could not be parsed.
    #[error("invalid routing update: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RoutingError>;
