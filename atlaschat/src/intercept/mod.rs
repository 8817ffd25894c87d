//! The interception engine.
//!
//! The engine attaches to a host page through the [`host::HostPage`]
//! capability interface, captures the submit keystroke, routes the prompt
//! through a time-bounded rewrite call, and re-submits. Every failure path
//! either resends usable text or tears the session down, restoring the
//! page's default behavior.

pub mod call;
pub mod driver;
pub mod engine;
pub mod host;
pub mod session;
