//! Keystroke classification for the host page's submit action.

use serde::{Deserialize, Serialize};

/// Key name of the host's submit keystroke.
pub const SUBMIT_KEY: &str = "Enter";

/// The parts of a keyboard event the engine inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStroke {
    /// Logical key name, as reported by the host (`"Enter"`, `"a"`, ...).
    pub key: String,
    /// The modifier that turns submit into "insert newline".
    #[serde(default)]
    pub shift: bool,
    /// True while an input-method composition is in progress.
    #[serde(default)]
    pub composing: bool,
}

impl KeyStroke {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            shift: false,
            composing: false,
        }
    }

    /// A bare submit keystroke, used for synthesized resends.
    pub fn submit() -> Self {
        Self::new(SUBMIT_KEY)
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn composing(mut self) -> Self {
        self.composing = true;
        self
    }
}

/// Phases of a synthesized keystroke, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPhase {
    Down,
    Press,
    Up,
}

/// The three phases a host observes from a real keystroke.
pub const KEYSTROKE_PHASES: [KeyPhase; 3] = [KeyPhase::Down, KeyPhase::Press, KeyPhase::Up];

/// True for the submit keystroke without the newline modifier, outside composition.
pub fn is_submit_stroke(stroke: &KeyStroke) -> bool {
    stroke.key == SUBMIT_KEY && !stroke.shift && !stroke.composing
}
