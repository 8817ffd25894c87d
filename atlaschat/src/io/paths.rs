//! Canonical paths within `.atlaschat/` for a project root.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AtlasPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub state_path: PathBuf,
    pub config_path: PathBuf,
}

impl AtlasPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".atlaschat");
        Self {
            root,
            state_path: state_dir.join("state.json"),
            config_path: state_dir.join("config.toml"),
            state_dir,
        }
    }
}
