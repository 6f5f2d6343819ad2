//! Deterministic, pure logic shared by the generation pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod branch;
pub mod compat;
pub mod identifier;
pub mod layout;
pub mod manifest;
pub mod policy;
pub mod reconcile;
pub mod request;
pub mod schema;
pub mod types;
pub mod validator;
pub mod version;
