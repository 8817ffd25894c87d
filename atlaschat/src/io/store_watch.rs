//! Observation of state-file changes made by another process.
//!
//! The engine may run apart from the coordinator; the state file is then the
//! only shared channel. A poll watcher reloads it on every create/modify and
//! forwards each distinct normalized state.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::types::ExtensionState;
use crate::io::store::{JsonFileStore, StateStore};

const CHANGE_BUFFER: usize = 16;

/// A running watch. Dropping it stops polling.
pub struct StoreWatch {
    _watcher: PollWatcher,
    pub changes: mpsc::Receiver<ExtensionState>,
}

/// Suppresses reloads that did not change the normalized state.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    last: Option<ExtensionState>,
}

impl ChangeFilter {
    pub fn new(initial: Option<ExtensionState>) -> Self {
        Self { last: initial }
    }

    /// Returns the state if it differs from the last one observed.
    pub fn observe(&mut self, state: ExtensionState) -> Option<ExtensionState> {
        if self.last == Some(state) {
            return None;
        }
        self.last = Some(state);
        Some(state)
    }
}

/// True if the notify event touches the state file.
pub fn touches(event: &NotifyEvent, state_path: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p == state_path)
}

/// Start polling `store`'s file for changes.
pub fn watch_store(store: JsonFileStore, poll_interval: Duration) -> Result<StoreWatch> {
    let state_path = store.path().to_path_buf();
    let dir = state_path
        .parent()
        .with_context(|| format!("state path missing parent {}", state_path.display()))?
        .to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;

    let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
    let mut filter = ChangeFilter::new(store.load().ok());
    let watched_path = state_path.clone();

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "state watcher error");
                    return;
                }
            };
            if !touches(&event, &watched_path) {
                return;
            }
            match store.load() {
                Ok(state) => {
                    if let Some(state) = filter.observe(state) {
                        debug!(enabled = state.enabled, mode = %state.mode, "stored state changed");
                        let _ = tx.try_send(state);
                    }
                }
                Err(e) => warn!(error = %format!("{e:#}"), "reload state failed"),
            }
        },
        notify::Config::default().with_poll_interval(poll_interval),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %state_path.display(), "watching state file");

    Ok(StoreWatch {
        _watcher: watcher,
        changes: rx,
    })
}
