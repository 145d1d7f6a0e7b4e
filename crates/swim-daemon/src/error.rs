use swim_core::SwimError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Swim(#[from] SwimError),

    #[error("Node runtime has stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, DaemonError>;
