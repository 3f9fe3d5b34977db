//! Deterministic, pure logic shared by the control core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod ask_table;
pub mod delegation;
pub mod state_detector;
pub mod types;
