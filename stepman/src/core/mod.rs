//! Deterministic, pure logic shared by activation and preload.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! registry data and return deterministic outputs suitable for tests.

pub mod constraint;
pub mod models;
pub mod retention;
pub mod semver;
pub mod step_id;
