//! Prompt-to-pull-request generator for low-code node and workflow repositories.
//!
//! A natural-language request is reconciled against the target repository,
//! handed to an external generator, gated by a structural and
//! backward-compatibility validator, and published as a single-commit pull
//! request. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (layouts, policy table, reconciler,
//!   request builder, validator). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, generator process, GitHub
//!   REST, repository context, run logs). Isolated behind traits so tests can
//!   substitute doubles.
//!
//! Orchestration modules ([`pipeline`], [`publish`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod publish;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
