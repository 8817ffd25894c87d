//! Deterministic prompt rewriting.
//!
//! `Guard` renders the prompt into a fixed instructional template whose only
//! variable slot is the verbatim prompt, enclosed between
//! [`REQUEST_OPEN`] and [`REQUEST_CLOSE`] lines. `Direct` is the identity.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::Mode;

const GUARD_TEMPLATE: &str = include_str!("prompts/guard.md");

/// Line that opens the delimited region holding the original prompt.
pub const REQUEST_OPEN: &str = "<<<";
/// Line that closes the delimited region holding the original prompt.
pub const REQUEST_CLOSE: &str = ">>>";

static ENGINE: LazyLock<RewriteEngine> = LazyLock::new(RewriteEngine::new);

/// Template engine wrapper around minijinja.
struct RewriteEngine {
    env: Environment<'static>,
}

impl RewriteEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        // Template names without an html/xml extension disable auto-escaping,
        // so the prompt is inserted byte-for-byte.
        env.add_template("guard", GUARD_TEMPLATE)
            .expect("guard template should be valid");
        Self { env }
    }

    fn render_guard(&self, text: &str) -> Result<String> {
        let template = self.env.get_template("guard")?;
        let rendered = template.render(context! { text => text })?;
        Ok(rendered)
    }
}

/// Rewrite `text` for the given mode.
pub fn apply(text: &str, mode: Mode) -> Result<String> {
    match mode {
        Mode::Guard => guard(text),
        Mode::Direct => Ok(direct(text)),
    }
}

/// Wrap `text` in the guard template.
pub fn guard(text: &str) -> Result<String> {
    ENGINE.render_guard(text)
}

/// Return `text` unchanged.
pub fn direct(text: &str) -> String {
    text.to_string()
}
