//! Stable exit codes for `stepman` commands.

use crate::error::StepError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Any failure without a more specific code.
pub const FAILURE: i32 = 1;
/// The step reference could not be resolved (bad constraint, unknown step or version).
pub const INVALID_REFERENCE: i32 = 2;
/// Offline mode is set and the step is not in the local cache.
pub const OFFLINE_UNAVAILABLE: i32 = 3;
/// A downloaded artifact failed integrity checks.
pub const INTEGRITY: i32 = 4;

/// Exit code for an error returned by the engine.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<StepError>() {
        Some(
            StepError::InvalidConstraint { .. }
            | StepError::StepNotFound { .. }
            | StepError::VersionNotFound { .. }
            | StepError::UnsupportedSource(_),
        ) => INVALID_REFERENCE,
        Some(StepError::OfflineUnavailable { .. }) => OFFLINE_UNAVAILABLE,
        Some(
            StepError::HashMismatch { .. }
            | StepError::UnsupportedHashAlgorithm(_)
            | StepError::InsecureUrl(_),
        ) => INTEGRITY,
        _ => FAILURE,
    }
}
