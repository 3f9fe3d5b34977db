//! I/O seams for the control core: config, wire payloads, delegation records,
//! and human prompts.

pub mod config;
pub mod delegation_store;
pub mod fs_atomic;
pub mod prompt;
pub mod wire;
