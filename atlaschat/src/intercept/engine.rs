//! Attach/detach lifecycle and the capture-phase submit handler.
//!
//! The engine is either released (no session) or attached (a session holding
//! the capture listener, the element watcher, and the in-flight flags).
//! [`Engine::initialize`] always releases first and then rebuilds only if
//! enabled, so repeated cycles can never stack listeners or keep a stale
//! element reference.
//!
//! The engine itself is synchronous. Suspension (the rewrite call, the resend
//! yield, watcher polling) is the driver's job; the engine hands out
//! [`RewriteJob`]s and [`Resend`]s tagged with the session generation, and
//! anything arriving for a torn-down session is discarded.

use std::fmt;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::core::keys::{KEYSTROKE_PHASES, KeyStroke, is_submit_stroke};
use crate::core::types::{ExtensionState, Mode, RewriteResult};
use crate::intercept::host::{HostPage, KeyEvent, locate};
use crate::intercept::session::{AttachmentSession, WatchTick};
use crate::io::config::AtlasConfig;

/// Why the lifecycle was (re)initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Bootstrap,
    StorageChange,
    RouteChange,
    InterceptError,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Bootstrap => "bootstrap",
            Reason::StorageChange => "storage-change",
            Reason::RouteChange => "route-change",
            Reason::InterceptError => "intercept-error",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rewrite the driver must run for an intercepted keystroke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteJob {
    pub generation: u64,
    /// Original prompt text, resent verbatim if rewriting fails.
    pub text: String,
    pub mode: Mode,
}

/// A resend the driver must issue after the digestion yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resend {
    pub generation: u64,
}

/// Disposition of a captured keydown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Let the host handle the event normally.
    Ignored,
    /// Default and propagation suppressed; nothing else to do.
    Suppressed,
    /// Default and propagation suppressed; run the job.
    Process(RewriteJob),
}

impl Capture {
    /// Whether the host must cancel the event.
    pub fn prevents_default(&self) -> bool {
        !matches!(self, Capture::Ignored)
    }
}

/// How a programmatic resend reached the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPath {
    Clicked,
    Synthesized,
    Unavailable,
}

pub struct Engine<H: HostPage> {
    page: H,
    config: AtlasConfig,
    state: ExtensionState,
    session: Option<AttachmentSession<H::Handle>>,
    generations: u64,
}

impl<H: HostPage> Engine<H> {
    /// Build a released engine with a cached copy of the extension state.
    pub fn new(page: H, config: AtlasConfig, state: ExtensionState) -> Self {
        Self {
            page,
            config,
            state,
            session: None,
            generations: 0,
        }
    }

    /// True if the page's host is one this engine should attach to.
    pub fn supports_host(&self) -> bool {
        self.config.matches_host(&self.page.host())
    }

    pub fn page(&self) -> &H {
        &self.page
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    /// Generation of the live session, if attached.
    pub fn generation(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.generation)
    }

    pub fn watcher_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.watcher.is_some())
    }

    pub fn watcher_attempts(&self) -> Option<u32> {
        self.session
            .as_ref()
            .and_then(|s| s.watcher.as_ref())
            .map(|w| w.attempts())
    }

    pub fn is_processing(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.processing)
    }

    pub fn suppress_armed(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.suppress_next_intercept)
    }

    pub fn cached_input(&self) -> Option<&H::Handle> {
        self.session.as_ref().and_then(|s| s.input.as_ref())
    }

    /// Adopt a new state snapshot observed from the store and rebuild.
    pub fn apply_state(&mut self, state: ExtensionState) {
        self.state = state;
        self.initialize(Reason::StorageChange);
    }

    /// Tear down, then attach if enabled.
    pub fn initialize(&mut self, reason: Reason) {
        self.release(reason);

        if !self.state.enabled {
            info!(reason = %reason, "disabled, hooks released");
            return;
        }

        let listener = match self.page.add_capture_listener() {
            Ok(listener) => listener,
            Err(err) => {
                error!(error = %format!("{err:#}"), reason = %reason, "could not install capture listener");
                return;
            }
        };
        self.generations += 1;
        self.session = Some(AttachmentSession::new(
            self.generations,
            listener,
            self.config.watcher.max_attempts,
        ));
        info!(mode = %self.state.mode, reason = %reason, "enabled, capture attached");
    }

    /// Idempotent teardown of the session and everything it owns.
    pub fn release(&mut self, reason: Reason) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Err(err) = self.page.remove_capture_listener(session.listener) {
            warn!(error = %format!("{err:#}"), "release error (non-fatal)");
        }
        debug!(reason = %reason, generation = session.generation, "release complete");
    }

    /// One element-watcher poll. `None` if no watcher is running.
    pub fn tick_watcher(&mut self) -> Option<WatchTick> {
        let session = self.session.as_mut()?;
        let watcher = session.watcher.as_mut()?;

        let found = match locate(&self.page, &self.config.input_locators) {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "input lookup failed");
                None
            }
        };
        if let Some(handle) = found {
            info!(input = ?handle, "attached to input surface");
            session.input = Some(handle);
            session.watcher = None;
            return Some(WatchTick::Found);
        }

        let gave_up = watcher.record_miss();
        let attempts = watcher.attempts();
        if gave_up {
            session.watcher = None;
            warn!(attempts, "could not locate input surface");
            return Some(WatchTick::GaveUp { attempts });
        }
        Some(WatchTick::Pending { attempts })
    }

    /// Capture-phase keydown handler.
    pub fn on_key_down(&mut self, event: &KeyEvent<H::Handle>) -> Capture {
        if !is_submit_stroke(&event.stroke) {
            return Capture::Ignored;
        }
        let Some(session) = self.session.as_mut() else {
            return Capture::Ignored;
        };
        if session.consume_suppress() {
            debug!("programmatic submit passed through");
            return Capture::Ignored;
        }
        if !self.state.enabled {
            return Capture::Ignored;
        }

        let input = match self.ensure_input() {
            Ok(Some(input)) => input,
            Ok(None) => return Capture::Ignored,
            Err(err) => {
                self.self_heal(&err);
                return Capture::Ignored;
            }
        };
        if !self.targets_input(&input, event) {
            return Capture::Ignored;
        }

        // From here on the host never sees this keystroke.
        if self.is_processing() {
            debug!("rewrite in flight, keystroke dropped");
            return Capture::Suppressed;
        }
        let text = match self.page.read_text(&input) {
            Ok(text) => text,
            Err(err) => {
                self.self_heal(&err);
                return Capture::Suppressed;
            }
        };
        if text.trim().is_empty() {
            return Capture::Suppressed;
        }

        let Some(session) = self.session.as_mut() else {
            return Capture::Suppressed;
        };
        session.processing = true;
        let job = RewriteJob {
            generation: session.generation,
            text,
            mode: self.state.mode,
        };
        info!(mode = %job.mode, "intercepted submit");
        debug!(text = %job.text, "intercepted text");
        Capture::Process(job)
    }

    /// Apply a settled rewrite result. Returns the resend to schedule.
    ///
    /// Non-ok results write the original text back; ok results write the
    /// rewritten text, or the original if the result carries none.
    pub fn complete(&mut self, job: &RewriteJob, result: &RewriteResult) -> Option<Resend> {
        match self.session.as_mut() {
            Some(session) if session.generation == job.generation => session.processing = false,
            _ => {
                debug!(generation = job.generation, "discarding completion for released session");
                return None;
            }
        }

        let text = if result.ok {
            result
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or(&job.text)
        } else {
            warn!(error = ?result.error, detail = ?result.detail, "pipeline failed, resending original");
            &job.text
        };
        debug!(text = %text, "final text");

        if let Err(err) = self.write_input(text) {
            self.self_heal(&err);
            return None;
        }
        Some(Resend {
            generation: job.generation,
        })
    }

    /// Arm the one-shot pass and reissue the submit action.
    pub fn resend(&mut self, resend: Resend) -> Option<SubmitPath> {
        match self.session.as_mut() {
            Some(session) if session.generation == resend.generation => {
                session.suppress_next_intercept = true;
            }
            _ => {
                debug!(generation = resend.generation, "discarding resend for released session");
                return None;
            }
        }

        match self.submit() {
            Ok(path) => {
                // Only a synthesized keystroke comes back through the capture
                // listener to consume the pass.
                if path != SubmitPath::Synthesized {
                    if let Some(session) = self.session.as_mut() {
                        session.suppress_next_intercept = false;
                    }
                }
                debug!(path = ?path, "resent");
                Some(path)
            }
            Err(err) => {
                self.self_heal(&err);
                None
            }
        }
    }

    fn submit(&mut self) -> Result<SubmitPath> {
        let input = self.ensure_input()?;
        let button = locate(&self.page, &self.config.submit_locators)?;
        if let Some(button) = button.filter(|b| !self.page.is_disabled(b)) {
            self.page.click(&button)?;
            return Ok(SubmitPath::Clicked);
        }
        let Some(input) = input else {
            warn!("no submit affordance or input surface to resend through");
            return Ok(SubmitPath::Unavailable);
        };
        let stroke = KeyStroke::submit();
        for phase in KEYSTROKE_PHASES {
            self.page.dispatch_key(&input, phase, &stroke)?;
        }
        Ok(SubmitPath::Synthesized)
    }

    fn write_input(&mut self, text: &str) -> Result<()> {
        let input = self
            .ensure_input()?
            .ok_or_else(|| anyhow!("input surface disappeared before write"))?;
        self.page.write_text(&input, text)
    }

    /// The cached input, re-acquired if missing or disconnected.
    fn ensure_input(&mut self) -> Result<Option<H::Handle>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let stale = session
            .input
            .as_ref()
            .is_none_or(|h| !self.page.is_connected(h));
        if stale {
            session.input = locate(&self.page, &self.config.input_locators)?;
        }
        Ok(session.input.clone())
    }

    fn targets_input(&self, input: &H::Handle, event: &KeyEvent<H::Handle>) -> bool {
        let Some(target) = event.target.as_ref() else {
            return false;
        };
        if self.page.contains(input, target) {
            return true;
        }
        self.page
            .active_element()
            .is_some_and(|active| self.page.contains(input, &active))
    }

    /// Convert a handler fault into a full lifecycle reset.
    fn self_heal(&mut self, err: &anyhow::Error) {
        error!(error = %format!("{err:#}"), "intercept error");
        self.initialize(Reason::InterceptError);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::KeyPhase;
    use crate::core::types::ErrorCode;
    use crate::test_support::{FakePage, NodeId, TEXTAREA};

    fn enabled() -> ExtensionState {
        ExtensionState {
            enabled: true,
            mode: Mode::Guard,
        }
    }

    fn engine_with_prompt(text: &str) -> (Engine<FakePage>, NodeId) {
        let page = FakePage::chat();
        let input = page.add_prompt(text);
        let mut engine = Engine::new(page, AtlasConfig::default(), enabled());
        engine.initialize(Reason::Bootstrap);
        (engine, input)
    }

    fn enter(target: NodeId) -> KeyEvent<NodeId> {
        KeyEvent::new(KeyStroke::submit(), Some(target))
    }

    #[test]
    fn disabled_initialize_stays_released() {
        let page = FakePage::chat();
        let mut engine = Engine::new(page, AtlasConfig::default(), ExtensionState::default());
        engine.initialize(Reason::Bootstrap);
        assert!(!engine.is_attached());
        assert_eq!(engine.page().listener_count(), 0);
    }

    #[test]
    fn repeated_cycles_keep_one_listener_and_one_watcher() {
        let (mut engine, _) = engine_with_prompt("hi");
        engine.release(Reason::RouteChange);
        engine.release(Reason::RouteChange);
        engine.initialize(Reason::RouteChange);
        engine.initialize(Reason::StorageChange);
        assert_eq!(engine.page().listener_count(), 1);
        assert!(engine.watcher_active());
        assert_eq!(engine.watcher_attempts(), Some(0));
    }

    #[test]
    fn release_clears_cached_input_and_flags() {
        let (mut engine, input) = engine_with_prompt("hello");
        assert_eq!(engine.tick_watcher(), Some(WatchTick::Found));
        assert_eq!(engine.cached_input(), Some(&input));
        assert!(matches!(engine.on_key_down(&enter(input)), Capture::Process(_)));
        engine.release(Reason::RouteChange);
        assert!(!engine.is_processing());
        assert_eq!(engine.cached_input(), None);
        assert_eq!(engine.page().listener_count(), 0);
    }

    #[test]
    fn watcher_gives_up_after_ceiling() {
        let page = FakePage::chat();
        let config = AtlasConfig {
            watcher: crate::io::config::WatcherConfig {
                interval_ms: 500,
                max_attempts: 3,
            },
            ..AtlasConfig::default()
        };
        let mut engine = Engine::new(page, config, enabled());
        engine.initialize(Reason::Bootstrap);
        assert_eq!(engine.tick_watcher(), Some(WatchTick::Pending { attempts: 1 }));
        assert_eq!(engine.tick_watcher(), Some(WatchTick::Pending { attempts: 2 }));
        assert_eq!(engine.tick_watcher(), Some(WatchTick::GaveUp { attempts: 3 }));
        assert_eq!(engine.tick_watcher(), None);
        assert!(engine.is_attached());
    }

    #[test]
    fn shift_enter_and_composition_pass_through() {
        let (mut engine, input) = engine_with_prompt("hello");
        let shifted = KeyEvent::new(KeyStroke::submit().with_shift(), Some(input));
        let composing = KeyEvent::new(KeyStroke::submit().composing(), Some(input));
        assert_eq!(engine.on_key_down(&shifted), Capture::Ignored);
        assert_eq!(engine.on_key_down(&composing), Capture::Ignored);
    }

    #[test]
    fn capture_reacquires_input_lazily() {
        let (mut engine, input) = engine_with_prompt("hello");
        assert_eq!(engine.cached_input(), None);
        let capture = engine.on_key_down(&enter(input));
        assert_eq!(
            capture,
            Capture::Process(RewriteJob {
                generation: 1,
                text: "hello".to_string(),
                mode: Mode::Guard,
            })
        );
        assert!(capture.prevents_default());
        assert!(engine.is_processing());
    }

    #[test]
    fn events_outside_input_pass_through() {
        let (mut engine, _) = engine_with_prompt("hello");
        let other = engine.page().add_node("div.sidebar", "");
        assert_eq!(engine.on_key_down(&enter(other)), Capture::Ignored);
        assert_eq!(engine.on_key_down(&KeyEvent::new(KeyStroke::submit(), None)), Capture::Ignored);
    }

    #[test]
    fn focused_input_counts_as_target() {
        let (mut engine, input) = engine_with_prompt("hello");
        let other = engine.page().add_node("div.sidebar", "");
        engine.page().focus(input);
        assert!(matches!(engine.on_key_down(&enter(other)), Capture::Process(_)));
    }

    #[test]
    fn second_capture_while_processing_is_dropped() {
        let (mut engine, input) = engine_with_prompt("hello");
        assert!(matches!(engine.on_key_down(&enter(input)), Capture::Process(_)));
        assert_eq!(engine.on_key_down(&enter(input)), Capture::Suppressed);
    }

    #[test]
    fn blank_prompt_is_suppressed_without_processing() {
        let (mut engine, input) = engine_with_prompt("   ");
        assert_eq!(engine.on_key_down(&enter(input)), Capture::Suppressed);
        assert!(!engine.is_processing());
    }

    #[test]
    fn missing_input_passes_through() {
        let page = FakePage::chat();
        let mut engine = Engine::new(page, AtlasConfig::default(), enabled());
        engine.initialize(Reason::Bootstrap);
        let stray = engine.page().add_node("div", "");
        assert_eq!(engine.on_key_down(&enter(stray)), Capture::Ignored);
    }

    #[test]
    fn failed_result_writes_original_and_resends() {
        let (mut engine, input) = engine_with_prompt("hello");
        let Capture::Process(job) = engine.on_key_down(&enter(input)) else {
            panic!("expected job");
        };
        let resend = engine
            .complete(&job, &RewriteResult::failure(ErrorCode::Timeout))
            .expect("resend");
        assert!(!engine.is_processing());
        assert_eq!(engine.page().text_of(input), "hello");
        assert_eq!(engine.resend(resend), Some(SubmitPath::Synthesized));
        assert_eq!(
            engine.page().key_dispatches(),
            vec![
                (input, KeyPhase::Down),
                (input, KeyPhase::Press),
                (input, KeyPhase::Up)
            ]
        );
        assert!(engine.suppress_armed());
        assert_eq!(engine.on_key_down(&enter(input)), Capture::Ignored);
        assert!(!engine.suppress_armed());
    }

    #[test]
    fn ok_result_writes_rewritten_text_and_clicks_send() {
        let (mut engine, input) = engine_with_prompt("hello");
        let button = engine.page().add_send_button(false);
        let Capture::Process(job) = engine.on_key_down(&enter(input)) else {
            panic!("expected job");
        };
        let resend = engine
            .complete(&job, &RewriteResult::success(Mode::Guard, "wrapped".to_string()))
            .expect("resend");
        assert_eq!(engine.page().text_of(input), "wrapped");
        assert_eq!(engine.resend(resend), Some(SubmitPath::Clicked));
        assert_eq!(engine.page().clicks(), vec![button]);
        assert!(!engine.suppress_armed());
    }

    #[test]
    fn ok_result_without_text_resends_original() {
        let (mut engine, input) = engine_with_prompt("hello");
        let Capture::Process(job) = engine.on_key_down(&enter(input)) else {
            panic!("expected job");
        };
        let result = RewriteResult {
            ok: true,
            mode: Some(Mode::Guard),
            text: None,
            error: None,
            detail: None,
        };
        assert!(engine.complete(&job, &result).is_some());
        assert_eq!(engine.page().text_of(input), "hello");
    }

    #[test]
    fn disabled_send_button_falls_back_to_keystrokes() {
        let (mut engine, input) = engine_with_prompt("hello");
        engine.page().add_send_button(true);
        let Capture::Process(job) = engine.on_key_down(&enter(input)) else {
            panic!("expected job");
        };
        let resend = engine
            .complete(&job, &RewriteResult::failure(ErrorCode::Exception))
            .expect("resend");
        assert_eq!(engine.resend(resend), Some(SubmitPath::Synthesized));
        assert!(engine.page().clicks().is_empty());
    }

    #[test]
    fn completion_for_released_session_is_discarded() {
        let (mut engine, input) = engine_with_prompt("hello");
        let Capture::Process(job) = engine.on_key_down(&enter(input)) else {
            panic!("expected job");
        };
        engine.initialize(Reason::RouteChange);
        let result = RewriteResult::success(Mode::Guard, "late".to_string());
        assert_eq!(engine.complete(&job, &result), None);
        assert_eq!(engine.page().text_of(input), "hello");
        assert_eq!(engine.resend(Resend { generation: job.generation }), None);
    }

    #[test]
    fn read_fault_self_heals_into_fresh_session() {
        let (mut engine, input) = engine_with_prompt("hello");
        engine.page().fail_reads(true);
        assert_eq!(engine.on_key_down(&enter(input)), Capture::Suppressed);
        assert_eq!(engine.generation(), Some(2));
        assert!(!engine.is_processing());
        assert_eq!(engine.page().listener_count(), 1);
    }

    #[test]
    fn disconnected_input_is_reacquired() {
        let (mut engine, input) = engine_with_prompt("first");
        engine.tick_watcher();
        engine.page().disconnect(input);
        let replacement = engine.page().add_prompt("second");
        let Capture::Process(job) = engine.on_key_down(&enter(replacement)) else {
            panic!("expected job");
        };
        assert_eq!(job.text, "second");
        assert_eq!(engine.cached_input(), Some(&replacement));
    }

    #[test]
    fn last_textarea_is_the_final_fallback() {
        let page = FakePage::chat();
        page.add_node(TEXTAREA, "one");
        let last = page.add_node(TEXTAREA, "two");
        let mut engine = Engine::new(page, AtlasConfig::default(), enabled());
        engine.initialize(Reason::Bootstrap);
        assert_eq!(engine.tick_watcher(), Some(WatchTick::Found));
        assert_eq!(engine.cached_input(), Some(&last));
    }

    #[test]
    fn enter_inside_a_child_of_the_input_is_captured() {
        let (mut engine, input) = engine_with_prompt("hello");
        let paragraph = engine.page().add_child(input, "p");
        let Capture::Process(job) = engine.on_key_down(&enter(paragraph)) else {
            panic!("expected job");
        };
        assert_eq!(job.text, "hello");
    }

    #[test]
    fn refused_listener_install_leaves_page_untouched() {
        let page = FakePage::chat();
        let input = page.add_prompt("hello");
        page.fail_listener_install(true);
        let mut engine = Engine::new(page, AtlasConfig::default(), enabled());
        engine.initialize(Reason::Bootstrap);

        assert!(!engine.is_attached());
        assert!(!engine.watcher_active());
        assert_eq!(engine.page().listener_count(), 0);
        assert_eq!(engine.on_key_down(&enter(input)), Capture::Ignored);
        assert!(engine.page().writes().is_empty());
    }

    #[test]
    fn unsupported_host_is_detected() {
        let engine = Engine::new(FakePage::new("example.com"), AtlasConfig::default(), enabled());
        assert!(!engine.supports_host());
        let engine = Engine::new(FakePage::chat(), AtlasConfig::default(), enabled());
        assert!(engine.supports_host());
    }
}
