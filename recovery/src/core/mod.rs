//! Deterministic, pure logic shared by the recovery pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod cancel;
pub mod classifier;
pub mod fingerprint;
pub mod rules;
pub mod session;
pub mod source_text;
pub mod types;
