//! Deterministic, pure logic shared by the daemon.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod countdown;
pub mod diff;
pub mod message;
pub mod push_failure;
