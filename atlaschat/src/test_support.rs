//! Test-only fakes: an in-memory host page, scripted rewrite backends, and
//! failing or recording adapters for the coordinator.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tempfile::TempDir;

use crate::core::keys::{KeyPhase, KeyStroke};
use crate::core::types::{ErrorCode, ExtensionState, Mode, RewriteResult};
use crate::intercept::call::PromptProcessor;
use crate::intercept::host::{HostPage, ListenerId};
use crate::io::config::Pick;
use crate::io::indicator::{Badge, Indicator};
use crate::io::paths::AtlasPaths;
use crate::io::store::{JsonFileStore, StateStore};

/// Selector of the host's rich-text editor.
pub const PROMPT_EDITOR: &str = "div#prompt-textarea[contenteditable='true']";
/// Selector of the last-resort textarea fallback.
pub const TEXTAREA: &str = "textarea";
/// Selector of the host's send button.
pub const SEND_BUTTON: &str = "button[data-testid='send-button']";

/// Handle of a node in a [`FakePage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

#[derive(Debug)]
struct Node {
    selector: String,
    text: String,
    parent: Option<NodeId>,
    connected: bool,
    disabled: bool,
}

#[derive(Debug, Default)]
struct Page {
    host: String,
    nodes: Vec<Node>,
    active: Option<NodeId>,
    listeners: HashSet<ListenerId>,
    listeners_added: u64,
    writes: Vec<(NodeId, String)>,
    clicks: Vec<NodeId>,
    keys: Vec<(NodeId, KeyPhase)>,
    fail_reads: bool,
    fail_listener_install: bool,
}

/// In-memory host document.
///
/// Clones share the same page, so a test can keep a handle while the engine
/// owns its copy. Selectors match by exact string.
#[derive(Debug, Clone)]
pub struct FakePage {
    inner: Arc<Mutex<Page>>,
}

impl FakePage {
    pub fn new(host: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Page {
                host: host.to_string(),
                ..Page::default()
            })),
        }
    }

    /// An empty page on the default chat host.
    pub fn chat() -> Self {
        Self::new("chatgpt.com")
    }

    fn page(&self) -> std::sync::MutexGuard<'_, Page> {
        self.inner.lock().expect("fake page lock")
    }

    pub fn add_node(&self, selector: &str, text: &str) -> NodeId {
        self.insert(selector, text, None, false)
    }

    pub fn add_child(&self, parent: NodeId, selector: &str) -> NodeId {
        self.insert(selector, "", Some(parent), false)
    }

    /// Add the rich-text editor holding `text`.
    pub fn add_prompt(&self, text: &str) -> NodeId {
        self.add_node(PROMPT_EDITOR, text)
    }

    pub fn add_send_button(&self, disabled: bool) -> NodeId {
        self.insert(SEND_BUTTON, "", None, disabled)
    }

    fn insert(&self, selector: &str, text: &str, parent: Option<NodeId>, disabled: bool) -> NodeId {
        let mut page = self.page();
        let id = NodeId(page.nodes.len() as u64);
        page.nodes.push(Node {
            selector: selector.to_string(),
            text: text.to_string(),
            parent,
            connected: true,
            disabled,
        });
        id
    }

    /// Remove a node from the document, as a host re-render would.
    pub fn disconnect(&self, id: NodeId) {
        if let Some(node) = self.page().nodes.get_mut(id.0 as usize) {
            node.connected = false;
        }
    }

    pub fn focus(&self, id: NodeId) {
        self.page().active = Some(id);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.page().fail_reads = fail;
    }

    pub fn fail_listener_install(&self, fail: bool) {
        self.page().fail_listener_install = fail;
    }

    pub fn text_of(&self, id: NodeId) -> String {
        self.page()
            .nodes
            .get(id.0 as usize)
            .map(|n| n.text.clone())
            .unwrap_or_default()
    }

    /// Capture listeners currently installed.
    pub fn listener_count(&self) -> usize {
        self.page().listeners.len()
    }

    /// Capture listeners ever installed.
    pub fn listeners_added(&self) -> u64 {
        self.page().listeners_added
    }

    pub fn writes(&self) -> Vec<(NodeId, String)> {
        self.page().writes.clone()
    }

    pub fn clicks(&self) -> Vec<NodeId> {
        self.page().clicks.clone()
    }

    pub fn key_dispatches(&self) -> Vec<(NodeId, KeyPhase)> {
        self.page().keys.clone()
    }
}

impl Page {
    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0 as usize)
            .with_context(|| format!("unknown node {}", id.0))
    }

    fn is_connected(&self, id: NodeId) -> bool {
        self.nodes.get(id.0 as usize).is_some_and(|n| n.connected)
    }
}

impl HostPage for FakePage {
    type Handle = NodeId;

    fn host(&self) -> String {
        self.page().host.clone()
    }

    fn add_capture_listener(&mut self) -> Result<ListenerId> {
        let mut page = self.page();
        if page.fail_listener_install {
            return Err(anyhow!("listener install refused"));
        }
        page.listeners_added += 1;
        let id = ListenerId(page.listeners_added);
        page.listeners.insert(id);
        Ok(id)
    }

    fn remove_capture_listener(&mut self, id: ListenerId) -> Result<()> {
        self.page().listeners.remove(&id);
        Ok(())
    }

    fn select(&self, selector: &str, pick: Pick) -> Result<Option<NodeId>> {
        let page = self.page();
        let mut matches = page
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.connected && n.selector == selector)
            .map(|(i, _)| NodeId(i as u64));
        Ok(match pick {
            Pick::First => matches.next(),
            Pick::Last => matches.last(),
        })
    }

    fn is_connected(&self, handle: &NodeId) -> bool {
        self.page().is_connected(*handle)
    }

    fn contains(&self, container: &NodeId, node: &NodeId) -> bool {
        let page = self.page();
        let mut cursor = Some(*node);
        while let Some(id) = cursor {
            if id == *container {
                return true;
            }
            cursor = page.nodes.get(id.0 as usize).and_then(|n| n.parent);
        }
        false
    }

    fn active_element(&self) -> Option<NodeId> {
        let page = self.page();
        page.active.filter(|id| page.is_connected(*id))
    }

    fn read_text(&self, handle: &NodeId) -> Result<String> {
        let page = self.page();
        if page.fail_reads {
            return Err(anyhow!("read of node {} failed", handle.0));
        }
        Ok(page.node(*handle)?.text.clone())
    }

    fn write_text(&mut self, handle: &NodeId, text: &str) -> Result<()> {
        let mut page = self.page();
        let node = page
            .nodes
            .get_mut(handle.0 as usize)
            .with_context(|| format!("unknown node {}", handle.0))?;
        node.text = text.to_string();
        page.writes.push((*handle, text.to_string()));
        Ok(())
    }

    fn is_disabled(&self, handle: &NodeId) -> bool {
        self.page()
            .nodes
            .get(handle.0 as usize)
            .is_some_and(|n| n.disabled)
    }

    fn click(&mut self, handle: &NodeId) -> Result<()> {
        self.page().clicks.push(*handle);
        Ok(())
    }

    fn dispatch_key(&mut self, handle: &NodeId, phase: KeyPhase, _stroke: &KeyStroke) -> Result<()> {
        self.page().keys.push((*handle, phase));
        Ok(())
    }
}

/// Behavior of a [`ScriptedProcessor`] call.
#[derive(Debug, Clone)]
pub enum Script {
    /// The call never settles.
    Never,
    /// Settle with the result after the delay.
    After(Duration, RewriteResult),
    /// Fail the call itself with this message.
    Fail(String),
}

/// Rewrite backend replaying a fixed script and recording what it saw.
#[derive(Debug)]
pub struct ScriptedProcessor {
    script: Script,
    calls: Mutex<Vec<(String, Option<Mode>)>>,
    pipeline_errors: Mutex<Vec<ErrorCode>>,
}

impl ScriptedProcessor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
            pipeline_errors: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call immediately with `result`.
    pub fn replying(result: RewriteResult) -> Self {
        Self::new(Script::After(Duration::ZERO, result))
    }

    pub fn calls(&self) -> Vec<(String, Option<Mode>)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn pipeline_errors(&self) -> Vec<ErrorCode> {
        self.pipeline_errors.lock().expect("errors lock").clone()
    }
}

impl PromptProcessor for ScriptedProcessor {
    fn process_prompt(
        &self,
        text: String,
        mode: Option<Mode>,
    ) -> BoxFuture<'static, Result<RewriteResult>> {
        self.calls.lock().expect("calls lock").push((text, mode));
        match self.script.clone() {
            Script::Never => futures::future::pending::<Result<RewriteResult>>().boxed(),
            Script::After(delay, result) => async move {
                tokio::time::sleep(delay).await;
                Ok::<_, anyhow::Error>(result)
            }
            .boxed(),
            Script::Fail(message) => async move { Err::<RewriteResult, _>(anyhow!(message)) }.boxed(),
        }
    }

    fn report_pipeline_error(&self, error: ErrorCode) {
        self.pipeline_errors.lock().expect("errors lock").push(error);
    }
}

/// Store whose every access fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl StateStore for FailingStore {
    fn load_raw(&self) -> Result<Option<Value>> {
        Err(anyhow!("store unavailable"))
    }

    fn save_raw(&self, _value: &Value) -> Result<()> {
        Err(anyhow!("store unavailable"))
    }
}

/// Indicator recording the enablement of every badge it was shown.
#[derive(Debug, Default, Clone)]
pub struct RecordingIndicator {
    shown: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn shown(&self) -> Vec<bool> {
        self.shown.lock().expect("indicator lock").clone()
    }
}

impl Indicator for RecordingIndicator {
    fn show(&self, badge: &Badge) {
        let engaged = *badge == Badge::for_enabled(true);
        self.shown.lock().expect("indicator lock").push(engaged);
    }
}

/// A temporary project root with `.atlaschat/` paths.
pub struct TestRoot {
    dir: TempDir,
    paths: AtlasPaths,
}

impl TestRoot {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp root")?;
        let paths = AtlasPaths::new(dir.path());
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &AtlasPaths {
        &self.paths
    }

    pub fn store(&self) -> JsonFileStore {
        JsonFileStore::new(self.paths.state_path.clone())
    }

    /// Write a state record as another process would.
    pub fn write_state(&self, state: &ExtensionState) -> Result<()> {
        self.store().save(state)
    }
}
