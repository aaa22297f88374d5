use cove_core::{
    ActionKind, Disposition, ErrorKind, ResultOutcome, Task, TaskFailure,
};
use std::ops::RangeInclusive;

pub const SUCCESS_CODES: [i64; 2] = [1000, 1001];
pub const ALREADY_SENT: i64 = 2500;
pub const HUMAN_VERIFICATION_REQUIRED: i64 = 9001;
pub const PENDING_VERIFICATION: RangeInclusive<i64> = 9000..=9099;
pub const AUTH_CACHE_LOCKED: i64 = 10013;

/// Maps what a handler reported to what the queue does next.
#[derive(Debug, Clone, Copy)]
pub struct ResultPolicy {
    max_server_retries: u32,
}

impl ResultPolicy {
    pub fn new(max_server_retries: u32) -> Self {
        Self { max_server_retries }
    }

    /// `retry_count` is how many times this task was already retried.
    pub fn classify(
        &self,
        task: &Task,
        result: &Result<(), TaskFailure>,
        retry_count: u32,
    ) -> ResultOutcome {
        let Err(failure) = result else {
            return ResultOutcome::success(retry_count);
        };

        match failure {
            TaskFailure::Transport(kind) => ResultOutcome::failure(
                ErrorKind::Transport(*kind),
                Disposition::ConnectionIssue,
                retry_count,
            ),
            TaskFailure::Http { status } => self.classify_status(*status, retry_count),
            TaskFailure::Application { code } => self.classify_code(task, *code, retry_count),
            TaskFailure::UnsupportedAction => ResultOutcome::failure(
                ErrorKind::UnsupportedAction,
                Disposition::CascadeDrop,
                retry_count,
            ),
            TaskFailure::Internal(_) => ResultOutcome::failure(
                ErrorKind::Internal,
                Disposition::CascadeDrop,
                retry_count,
            ),
        }
    }

    fn classify_status(&self, status: u16, retry_count: u32) -> ResultOutcome {
        match status {
            200..=299 => ResultOutcome::success(retry_count),
            404 => ResultOutcome::failure(ErrorKind::NotFound, Disposition::CascadeDrop, retry_count),
            500..=599 if retry_count < self.max_server_retries => ResultOutcome::failure(
                ErrorKind::ServerError,
                Disposition::Retry,
                retry_count + 1,
            ),
            500..=599 => {
                ResultOutcome::failure(ErrorKind::ServerError, Disposition::CascadeDrop, retry_count)
            }
            _ => ResultOutcome::failure(
                ErrorKind::HttpStatus(status),
                Disposition::CascadeDrop,
                retry_count,
            ),
        }
    }

    fn classify_code(&self, task: &Task, code: i64, retry_count: u32) -> ResultOutcome {
        if SUCCESS_CODES.contains(&code) {
            return ResultOutcome::success(retry_count);
        }
        if code == AUTH_CACHE_LOCKED {
            return ResultOutcome::failure(
                ErrorKind::AuthCacheLocked,
                Disposition::CheckDependents,
                retry_count,
            );
        }
        if PENDING_VERIFICATION.contains(&code) {
            return ResultOutcome::failure(
                ErrorKind::HumanVerification,
                Disposition::ConnectionIssue,
                retry_count,
            );
        }
        if code == ALREADY_SENT && task.action() == ActionKind::Send {
            return ResultOutcome::failure(ErrorKind::AlreadySent, Disposition::DropEntity, retry_count);
        }
        ResultOutcome::failure(ErrorKind::Application(code), Disposition::CascadeDrop, retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cove_core::TransportFailure;

    fn send() -> Task {
        Task::new("msg-1", ActionKind::Send, "user-1")
    }

    fn classify(failure: TaskFailure, retry_count: u32) -> ResultOutcome {
        ResultPolicy::new(3).classify(&send(), &Err(failure), retry_count)
    }

    #[test]
    fn success_resolves_to_none() {
        let outcome = ResultPolicy::new(3).classify(&send(), &Ok(()), 2);
        assert_eq!(outcome, ResultOutcome::success(2));
    }

    #[test]
    fn every_transport_failure_pauses() {
        for kind in [
            TransportFailure::TimedOut,
            TransportFailure::DnsFailure,
            TransportFailure::HostUnreachable,
            TransportFailure::Tls,
            TransportFailure::NotConnected,
        ] {
            let outcome = classify(TaskFailure::Transport(kind), 0);
            assert_eq!(outcome.disposition, Disposition::ConnectionIssue);
            assert_eq!(outcome.error_kind, Some(ErrorKind::Transport(kind)));
        }
    }

    #[test]
    fn not_found_cascades() {
        let outcome = classify(TaskFailure::Http { status: 404 }, 0);
        assert_eq!(outcome.disposition, Disposition::CascadeDrop);
        assert_eq!(outcome.error_kind, Some(ErrorKind::NotFound));
    }

    #[test]
    fn server_errors_retry_three_times_then_drop() {
        let mut retry_count = 0;
        for _ in 0..3 {
            let outcome = classify(TaskFailure::Http { status: 503 }, retry_count);
            assert_eq!(outcome.disposition, Disposition::Retry);
            assert_eq!(outcome.retry_count, retry_count + 1);
            retry_count = outcome.retry_count;
        }

        let outcome = classify(TaskFailure::Http { status: 500 }, retry_count);
        assert_eq!(outcome.disposition, Disposition::CascadeDrop);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ServerError));
    }

    #[test]
    fn other_client_errors_cascade() {
        let outcome = classify(TaskFailure::Http { status: 422 }, 0);
        assert_eq!(outcome.disposition, Disposition::CascadeDrop);
        assert_eq!(outcome.error_kind, Some(ErrorKind::HttpStatus(422)));
    }

    #[test]
    fn envelope_codes() {
        assert_eq!(
            classify(TaskFailure::Application { code: 1001 }, 0).disposition,
            Disposition::None
        );
        assert_eq!(
            classify(TaskFailure::Application { code: AUTH_CACHE_LOCKED }, 0).disposition,
            Disposition::CheckDependents
        );

        let verification = classify(
            TaskFailure::Application {
                code: HUMAN_VERIFICATION_REQUIRED,
            },
            0,
        );
        assert_eq!(verification.disposition, Disposition::ConnectionIssue);
        assert_eq!(verification.error_kind, Some(ErrorKind::HumanVerification));

        assert_eq!(
            classify(TaskFailure::Application { code: 2001 }, 0).error_kind,
            Some(ErrorKind::Application(2001))
        );
    }

    #[test]
    fn already_sent_only_drops_the_entity_for_sends() {
        let outcome = classify(TaskFailure::Application { code: ALREADY_SENT }, 0);
        assert_eq!(outcome.disposition, Disposition::DropEntity);

        let save = Task::new("msg-1", ActionKind::SaveDraft, "user-1");
        let outcome = ResultPolicy::new(3).classify(
            &save,
            &Err(TaskFailure::Application { code: ALREADY_SENT }),
            0,
        );
        assert_eq!(outcome.disposition, Disposition::CascadeDrop);
    }

    #[test]
    fn local_failures_are_never_retried() {
        assert_eq!(
            classify(TaskFailure::UnsupportedAction, 0).disposition,
            Disposition::CascadeDrop
        );
        assert_eq!(
            classify(TaskFailure::Internal("panicked".into()), 0).error_kind,
            Some(ErrorKind::Internal)
        );
    }
}
