//! Configuration stored under `.atlaschat/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::fs::write_atomic;

/// Which match to take when a selector matches several elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pick {
    #[default]
    First,
    Last,
}

/// One element-location strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: String,
    #[serde(default)]
    pub pick: Pick,
}

impl Locator {
    pub fn first(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            pick: Pick::First,
        }
    }

    pub fn last(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            pick: Pick::Last,
        }
    }
}

/// Engine configuration (TOML).
///
/// Missing fields default to the values the host page integration was tuned
/// for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AtlasConfig {
    /// Hard deadline for a rewrite round trip, in milliseconds.
    pub rewrite_timeout_ms: u64,

    /// Yield before a programmatic resend, letting the host digest the input.
    pub resend_delay_ms: u64,

    /// Host substrings the engine bootstraps on.
    pub hosts: Vec<String>,

    /// Input-surface locators, most to least specific.
    pub input_locators: Vec<Locator>,

    /// Submit-affordance locators, most to least specific.
    pub submit_locators: Vec<Locator>,

    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatcherConfig {
    /// Poll interval while looking for the input surface.
    pub interval_ms: u64,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_attempts: 120,
        }
    }
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            rewrite_timeout_ms: 2500,
            resend_delay_ms: 25,
            hosts: vec!["chat.openai.com".to_string(), "chatgpt.com".to_string()],
            input_locators: vec![
                Locator::first("div#prompt-textarea[contenteditable='true']"),
                Locator::first("[id='prompt-textarea'][contenteditable='true']"),
                Locator::first("textarea[data-testid='prompt-textarea']"),
                Locator::last("textarea"),
            ],
            submit_locators: vec![
                Locator::first("button[data-testid='send-button']"),
                Locator::first("button[aria-label='Send message']"),
                Locator::first("button[aria-label='Send']"),
            ],
            watcher: WatcherConfig::default(),
        }
    }
}

impl AtlasConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rewrite_timeout_ms == 0 {
            return Err(anyhow!("rewrite_timeout_ms must be > 0"));
        }
        if self.resend_delay_ms == 0 {
            return Err(anyhow!("resend_delay_ms must be > 0"));
        }
        if self.watcher.interval_ms == 0 {
            return Err(anyhow!("watcher.interval_ms must be > 0"));
        }
        if self.watcher.max_attempts == 0 {
            return Err(anyhow!("watcher.max_attempts must be > 0"));
        }
        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(anyhow!("hosts must be a non-empty array of non-blank names"));
        }
        if self.input_locators.is_empty() {
            return Err(anyhow!("input_locators must be a non-empty array"));
        }
        let blank = self
            .input_locators
            .iter()
            .chain(&self.submit_locators)
            .any(|l| l.selector.trim().is_empty());
        if blank {
            return Err(anyhow!("locator selectors must not be blank"));
        }
        Ok(())
    }

    pub fn rewrite_timeout(&self) -> Duration {
        Duration::from_millis(self.rewrite_timeout_ms)
    }

    pub fn resend_delay(&self) -> Duration {
        Duration::from_millis(self.resend_delay_ms)
    }

    pub fn watcher_interval(&self) -> Duration {
        Duration::from_millis(self.watcher.interval_ms)
    }

    /// True if the document host is one the engine should attach to.
    pub fn matches_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| host.contains(h.as_str()))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AtlasConfig::default()`.
pub fn load_config(path: &Path) -> Result<AtlasConfig> {
    if !path.exists() {
        let cfg = AtlasConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AtlasConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AtlasConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf, "toml.tmp")
}
