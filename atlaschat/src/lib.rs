//! Submit interception for a third-party chat page.
//!
//! The crate intercepts the host page's submit keystroke, optionally rewrites
//! the prompt through a deterministic template, and re-submits it. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (modes, rewrite templates, key
//!   classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (state store, config, indicator,
//!   store watching).
//!
//! The [`coordinator`] owns the persisted state and serves the [`protocol`];
//! the [`intercept`] engine runs against a host page through a capability
//! interface and never leaves the page unusable.

pub mod coordinator;
pub mod core;
pub mod intercept;
pub mod io;
pub mod logging;
pub mod protocol;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
