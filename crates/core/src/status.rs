//! Status machines for documents, jobs, runs and step runs.
//!
//! Every status has a stable numeric code used by the relational store
//! (`SMALLINT` columns). Runs and step runs only ever move forward; the
//! `can_transition_to` methods are the single source of truth for which moves
//! are legal, and stores reject anything else.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

macro_rules! impl_status_codes {
    ($t:ident, $name:literal, { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $t {
            /// Stable storage code.
            pub fn code(self) -> i16 {
                match self {
                    $($t::$variant => $code,)+
                }
            }

            pub fn from_code(code: i16) -> DomainResult<Self> {
                match code {
                    $($code => Ok($t::$variant),)+
                    other => Err(DomainError::validation(format!(
                        "unknown {} code: {}",
                        $name, other
                    ))),
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($t::$variant => stringify!($variant),)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Lifecycle of an ingested document. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Received,
    Stored,
    Processing,
    Completed,
    Failed,
}

impl_status_codes!(DocumentStatus, "DocumentStatus", {
    Received = 0,
    Stored = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
});

/// Queue-side status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_run_at`.
    Pending,
    /// Claimed by a worker until `next_run_at` (the lease deadline).
    Leased,
    Done,
    Failed,
}

impl_status_codes!(JobStatus, "JobStatus", {
    Pending = 0,
    Leased = 1,
    Done = 2,
    Failed = 3,
});

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// `Leased -> Leased` is a re-lease after the previous lease expired.
    /// `Pending -> Failed` happens when the attempt cap is reached.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Leased)
                | (Pending, Failed)
                | (Leased, Leased)
                | (Leased, Pending)
                | (Leased, Done)
                | (Leased, Failed)
        )
    }
}

/// Status of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl_status_codes!(RunStatus, "RunStatus", {
    Created = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
});

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Failed) | (Running, Succeeded) | (Running, Failed)
        )
    }
}

/// Status of one step inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Skipped,
}

impl_status_codes!(StepStatus, "StepStatus", {
    Created = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Retrying = 4,
    Skipped = 5,
});

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        match self {
            Created => matches!(next, Running | Failed | Skipped),
            Running => matches!(next, Succeeded | Failed | Retrying | Skipped),
            Retrying => matches!(next, Running | Failed),
            Succeeded | Failed | Skipped => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STEP_STATUSES: [StepStatus; 6] = [
        StepStatus::Created,
        StepStatus::Running,
        StepStatus::Succeeded,
        StepStatus::Failed,
        StepStatus::Retrying,
        StepStatus::Skipped,
    ];

    const RUN_STATUSES: [RunStatus; 4] = [
        RunStatus::Created,
        RunStatus::Running,
        RunStatus::Succeeded,
        RunStatus::Failed,
    ];

    #[test]
    fn codes_are_stable() {
        assert_eq!(JobStatus::Pending.code(), 0);
        assert_eq!(JobStatus::Failed.code(), 3);
        assert_eq!(StepStatus::Skipped.code(), 5);
        assert_eq!(DocumentStatus::Stored.code(), 1);
        assert_eq!(RunStatus::from_code(2).unwrap(), RunStatus::Succeeded);
        assert!(JobStatus::from_code(9).is_err());
    }

    #[test]
    fn run_happy_path_is_legal() {
        assert!(RunStatus::Created.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Succeeded));
    }

    #[test]
    fn terminal_jobs_never_move() {
        for next in [
            JobStatus::Pending,
            JobStatus::Leased,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert!(!JobStatus::Done.can_transition_to(next));
            assert!(!JobStatus::Failed.can_transition_to(next));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn step_runs_never_leave_terminal_states(from in 0usize..6, to in 0usize..6) {
            let (from, to) = (STEP_STATUSES[from], STEP_STATUSES[to]);
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn runs_never_leave_terminal_states(from in 0usize..4, to in 0usize..4) {
            let (from, to) = (RUN_STATUSES[from], RUN_STATUSES[to]);
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn status_codes_round_trip(code in 0i16..6) {
            prop_assert_eq!(StepStatus::from_code(code).unwrap().code(), code);
        }
    }
}
