// SPDX-License-Identifier: MIT

use crate::ir::BlockId;

/// Errors that can escape the scheduler's public entry points.
///
/// Everything else that can go wrong inside the scheduler is a programming
/// bug (an invariant violation) and is reported via `debug_assert!` rather
/// than through this type, since there is no sensible way for a caller to
/// recover from a corrupt dependency graph.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The ready-list scheduler found no eligible candidate and no
    /// special-register conflict to break by cloning.
    #[error("instruction scheduler deadlocked in block {block:?}: {reason}")]
    Deadlock {
        block: BlockId,
        reason: DeadlockReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockReason {
    /// Nothing in the ready list passed eligibility and no producer is in
    /// scope to split.
    NoEligibleCandidate,
    /// A kill instruction is blocked on a barycentric input we can never
    /// schedule (it was pruned or never reachable).
    UnreachableBarycentricInput,
}

impl std::fmt::Display for DeadlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadlockReason::NoEligibleCandidate => {
                write!(f, "no eligible candidate")
            }
            DeadlockReason::UnreachableBarycentricInput => {
                write!(f, "blocked kill with unreachable barycentric input")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
