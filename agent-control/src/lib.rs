//! Control core for an autonomous coding-agent runtime.
//!
//! Turns an asynchronously arriving stream of agent messages into a
//! conversational state, decides when a human must be asked, routes each ask
//! to the right approval or answer protocol, and keeps delegated parent/child
//! tasks consistent across restarts.
//!
//! - **[`core`]**: Pure, deterministic logic (state detection, ask
//!   classification, delegation record transitions). No I/O.
//! - **[`io`]**: Side-effecting seams (config, wire codec, delegation record
//!   store, human prompts).
//!
//! Orchestration modules ([`session`], [`dispatch`], [`delegation`],
//! [`driver`]) combine the two.

pub mod core;
pub mod delegation;
pub mod dispatch;
pub mod driver;
pub mod events;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
