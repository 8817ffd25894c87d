//! Persistent storage for the two-flag extension state.
//!
//! The stored record is `{ "enabled": bool, "mode": string }`. Reads are
//! lenient: a missing record yields defaults, `enabled` is coerced to a
//! boolean, and any `mode` other than `"direct"` reads as `guard`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::debug;

use crate::core::types::{ExtensionState, Mode};
use crate::io::fs::write_atomic;

/// Key of the persisted enablement flag.
pub const ENABLED_KEY: &str = "enabled";
/// Key of the persisted mode.
pub const MODE_KEY: &str = "mode";

/// Raw storage backend. Only the coordinator writes through it.
pub trait StateStore: Send {
    /// Load the raw record, or `None` if nothing has been stored yet.
    fn load_raw(&self) -> Result<Option<Value>>;

    /// Replace the raw record.
    fn save_raw(&self, value: &Value) -> Result<()>;

    /// Load and normalize the current state.
    fn load(&self) -> Result<ExtensionState> {
        Ok(self
            .load_raw()?
            .as_ref()
            .map(normalize)
            .unwrap_or_default())
    }

    /// Persist a full state record.
    fn save(&self, state: &ExtensionState) -> Result<()> {
        self.save_raw(&to_record(state))
    }
}

/// Normalize a raw stored record into a state snapshot.
pub fn normalize(raw: &Value) -> ExtensionState {
    ExtensionState {
        enabled: truthy(raw.get(ENABLED_KEY)),
        mode: Mode::normalize(raw.get(MODE_KEY).and_then(Value::as_str)),
    }
}

fn to_record(state: &ExtensionState) -> Value {
    json!({
        ENABLED_KEY: state.enabled,
        MODE_KEY: state.mode.as_str(),
    })
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// JSON file store (`.atlaschat/state.json`).
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load_raw(&self) -> Result<Option<Value>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no stored state");
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read state {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", self.path.display()))?;
        Ok(Some(value))
    }

    fn save_raw(&self, value: &Value) -> Result<()> {
        debug!(path = %self.path.display(), "writing state");
        let mut buf = serde_json::to_string_pretty(value)?;
        buf.push('\n');
        write_atomic(&self.path, &buf, "json.tmp")
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an arbitrary raw record.
    pub fn with_raw(record: Value) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    pub fn with_state(state: ExtensionState) -> Self {
        Self::with_raw(to_record(&state))
    }

    /// Snapshot of the raw record.
    pub fn raw(&self) -> Option<Value> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

impl StateStore for MemoryStore {
    fn load_raw(&self) -> Result<Option<Value>> {
        let record = self
            .record
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(record.clone())
    }

    fn save_raw(&self, value: &Value) -> Result<()> {
        let mut record = self
            .record
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        *record = Some(value.clone());
        Ok(())
    }
}
