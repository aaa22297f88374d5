use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    TimedOut,
    DnsFailure,
    HostUnreachable,
    Tls,
    NotConnected,
}

/// Raw outcome a handler reports when a task did not succeed.
///
/// Handlers translate their own error domain into this shape and stop there;
/// deciding what happens to the task is the result policy's job.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskFailure {
    #[error("transport failure: {0:?}")]
    Transport(TransportFailure),
    /// Non-2xx HTTP response.
    #[error("http status {status}")]
    Http { status: u16 },
    /// 2xx HTTP response whose envelope carries an application code.
    #[error("application error code {code}")]
    Application { code: i64 },
    #[error("handler does not support this action")]
    UnsupportedAction,
    #[error("internal failure: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport(TransportFailure),
    NotFound,
    ServerError,
    HttpStatus(u16),
    Application(i64),
    AuthCacheLocked,
    HumanVerification,
    AlreadySent,
    UnsupportedAction,
    Internal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Done: remove the task and release dependents.
    None,
    /// Transient failure: remove the task and let dependents be re-examined.
    CheckDependents,
    /// Keep the task at the head and pause the lane until connectivity returns.
    ConnectionIssue,
    /// Remove the task together with everything depending on it.
    CascadeDrop,
    /// Dispatch the same task again.
    Retry,
    /// The server already has the result: drop every prerequisite-chain task
    /// left for the entity.
    DropEntity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultOutcome {
    pub error_kind: Option<ErrorKind>,
    pub disposition: Disposition,
    pub retry_count: u32,
}

impl ResultOutcome {
    pub fn success(retry_count: u32) -> Self {
        Self {
            error_kind: None,
            disposition: Disposition::None,
            retry_count,
        }
    }

    pub fn failure(kind: ErrorKind, disposition: Disposition, retry_count: u32) -> Self {
        Self {
            error_kind: Some(kind),
            disposition,
            retry_count,
        }
    }
}
