use thiserror::Error;

/// Errors surfaced by the membership protocol.
///
/// Network failures never appear here: the controllers retry them on their
/// own schedule. Only local precondition violations and codec failures do.
#[derive(Debug, Error)]
pub enum SwimError {
    #[error("Cannot join: no contact points given")]
    NoContactPoints,

    #[error("Already joined (or joining) the cluster")]
    AlreadyJoined,

    #[error("Cannot leave while a join is in progress")]
    JoinInProgress,

    #[error("Already leaving the cluster")]
    LeaveInProgress,

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwimError>;
