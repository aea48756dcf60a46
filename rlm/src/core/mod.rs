//! Deterministic, pure logic shared by the loop engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod route;
pub mod schema;
pub mod synthesis;
pub mod types;
