//! Stable exit codes for nodeforge CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, arguments or caller context, or any other error.
pub const INVALID: i32 = 1;
/// The generated files were rejected by the validator.
pub const VALIDATION: i32 = 2;
/// The request matched several existing artifacts or broke the identifier policy.
pub const RECONCILE: i32 = 3;
/// The generator failed or returned a malformed response.
pub const GENERATION: i32 = 4;
/// A step of the publish sequence failed.
pub const PUBLISH: i32 = 5;
