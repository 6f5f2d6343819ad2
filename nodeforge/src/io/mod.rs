//! Side-effecting operations: configuration, the generator process, GitHub
//! access, repository context, and run logs.

pub mod config;
pub mod context;
pub mod generator;
pub mod github;
pub mod process;
pub mod run_log;
