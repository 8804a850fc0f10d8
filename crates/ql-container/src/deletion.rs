//! Post-invocation delete decision

use ql_common::DeletionPolicy;

/// Result of a handler invocation, as far as deletion is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionDecision {
    Delete,
    Leave,
}

/// Decide whether a message is deleted after its handler ran.
///
/// | policy     | success | failure, redrive | failure, no redrive |
/// |------------|---------|------------------|---------------------|
/// | ON_SUCCESS | Delete  | Leave            | Leave               |
/// | ALWAYS     | Delete  | Delete           | Delete              |
/// | NO_REDRIVE | Delete  | Leave            | Delete              |
/// | NEVER      | Leave   | Leave            | Leave               |
///
/// Under NO_REDRIVE a failed message on a queue without a dead-letter target
/// would be redelivered forever, so it is dropped instead.
pub fn decide(
    policy: DeletionPolicy,
    outcome: HandlerOutcome,
    has_redrive_policy: bool,
) -> DeletionDecision {
    use DeletionDecision::{Delete, Leave};

    match (policy, outcome) {
        (DeletionPolicy::Never, _) => Leave,
        (DeletionPolicy::Always, _) => Delete,
        (_, HandlerOutcome::Success) => Delete,
        (DeletionPolicy::OnSuccess, HandlerOutcome::Failure) => Leave,
        (DeletionPolicy::NoRedrive, HandlerOutcome::Failure) => {
            if has_redrive_policy {
                Leave
            } else {
                Delete
            }
        }
    }
}
