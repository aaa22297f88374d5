use cove_core::ActionKind;
use cove_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error("unsupported action `{0}`")]
    UnsupportedAction(ActionKind),
    #[error("queue manager has shut down")]
    ManagerGone,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
