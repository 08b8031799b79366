//! Stable exit codes for the `codegen-driver` binary.

/// The request succeeded, in-loop or on reconciliation.
pub const OK: i32 = 0;
/// Abnormal termination: bad config, missing credential or runtime, unwritable project.
pub const INVALID: i32 = 1;
/// Every attempt was spent and the last artifact still fails.
pub const EXHAUSTED: i32 = 2;
/// Every attempt hit a model failure; nothing was written.
pub const MODEL_UNAVAILABLE: i32 = 3;
