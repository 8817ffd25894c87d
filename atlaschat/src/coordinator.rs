//! The coordinator: sole owner of the persisted state.
//!
//! Every request is one read-modify-write against the store that completes
//! before its reply is produced. Failures never escape as errors; they
//! resolve to tagged results. [`spawn`] runs a coordinator as an actor that
//! serializes requests from any number of [`CoordinatorHandle`]s.

use anyhow::{Context, Result, anyhow};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::rewrite;
use crate::core::types::{ErrorCode, ExtensionState, Mode, RewriteResult};
use crate::io::indicator::{Badge, Indicator};
use crate::io::store::StateStore;
use crate::protocol::{Request, Response};

const CHANGE_CAPACITY: usize = 32;
const MAILBOX_CAPACITY: usize = 64;

pub struct Coordinator<S, I> {
    store: S,
    indicator: I,
    changes: broadcast::Sender<ExtensionState>,
}

impl<S: StateStore, I: Indicator> Coordinator<S, I> {
    pub fn new(store: S, indicator: I) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            store,
            indicator,
            changes,
        }
    }

    /// Subscribe to every state the coordinator persists.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionState> {
        self.changes.subscribe()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write the install defaults (`enabled=false`, `mode=guard`).
    ///
    /// Without `force`, an existing record is left untouched.
    pub fn install(&self, force: bool) -> Result<ExtensionState> {
        if !force && self.store.load_raw()?.is_some() {
            debug!("state already installed");
            return self.get_state();
        }
        let state = ExtensionState::default();
        self.persist(&state).context("install default state")?;
        self.indicator.show(&Badge::for_enabled(state.enabled));
        Ok(state)
    }

    pub fn get_state(&self) -> Result<ExtensionState> {
        self.store.load().context("read state")
    }

    pub fn toggle_enabled(&self) -> Result<ExtensionState> {
        let current = self.get_state()?;
        let next = ExtensionState {
            enabled: !current.enabled,
            ..current
        };
        self.persist(&next)?;
        self.indicator.show(&Badge::for_enabled(next.enabled));
        info!(enabled = next.enabled, "toggled");
        Ok(next)
    }

    /// Persist `requested` if it is exactly `direct`, otherwise `guard`.
    pub fn set_mode(&self, requested: Option<&str>) -> Result<ExtensionState> {
        let current = self.get_state()?;
        let next = ExtensionState {
            mode: Mode::normalize(requested),
            ..current
        };
        self.persist(&next)?;
        info!(mode = %next.mode, "mode set");
        Ok(next)
    }

    pub fn process_prompt(&self, text: &str, mode_override: Option<&str>) -> RewriteResult {
        if text.trim().is_empty() {
            return RewriteResult::failure(ErrorCode::EmptyPrompt);
        }

        let state = match self.get_state() {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "state unavailable for prompt");
                return RewriteResult::failure_with_detail(
                    ErrorCode::InvalidState,
                    format!("{err:#}"),
                );
            }
        };
        if !state.enabled {
            return RewriteResult::failure(ErrorCode::Disabled);
        }

        // Unknown overrides fall back to the stored mode.
        let mode = Mode::parse_override(mode_override).unwrap_or(state.mode);
        info!(mode = %mode, "processing prompt");

        match rewrite::apply(text, mode) {
            Ok(rewritten) => RewriteResult::success(mode, rewritten),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "rewrite failed");
                RewriteResult::failure_with_detail(ErrorCode::RuntimeError, format!("{err:#}"))
            }
        }
    }

    /// Serve one protocol request. Returns `None` for one-way messages.
    #[instrument(skip_all, fields(kind = request.kind()))]
    pub fn handle(&self, request: Request) -> Option<Response> {
        let reply = match request {
            Request::GetState => state_reply(self.get_state()),
            Request::Toggle => state_reply(self.toggle_enabled()),
            Request::SetMode { mode } => state_reply(self.set_mode(mode.as_deref())),
            Request::ProcessPrompt { text, mode } => {
                Response::Result(self.process_prompt(&text, mode.as_deref()))
            }
            Request::PipelineError { error } => {
                warn!(error = error.as_deref().unwrap_or("unknown"), "pipeline fell back");
                return None;
            }
        };
        Some(reply)
    }

    fn persist(&self, state: &ExtensionState) -> Result<()> {
        self.store.save(state).context("write state")?;
        let _ = self.changes.send(*state);
        Ok(())
    }
}

fn state_reply(result: Result<ExtensionState>) -> Response {
    match result {
        Ok(state) => Response::State(state),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "state request failed");
            Response::Result(RewriteResult::failure_with_detail(
                ErrorCode::InvalidState,
                format!("{err:#}"),
            ))
        }
    }
}

struct Envelope {
    request: Request,
    reply: Option<oneshot::Sender<Option<Response>>>,
}

/// Client side of a spawned coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl CoordinatorHandle {
    /// Send a request and wait for its reply.
    pub async fn request(&self, request: Request) -> Result<Option<Response>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                request,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| anyhow!("coordinator stopped"))?;
        reply_rx.await.map_err(|_| anyhow!("coordinator dropped reply"))
    }

    /// Route a decoded request: wait for the reply when the sender expects
    /// one, otherwise hand it off without waiting.
    pub async fn dispatch(&self, request: Request) -> Result<Option<Response>> {
        if !request.expects_reply() {
            self.notify(request);
            return Ok(None);
        }
        self.request(request).await
    }

    /// Best-effort one-way send; never waits.
    pub fn notify(&self, request: Request) {
        let envelope = Envelope {
            request,
            reply: None,
        };
        if self.tx.try_send(envelope).is_err() {
            debug!("coordinator mailbox unavailable, notification dropped");
        }
    }

    pub async fn get_state(&self) -> Result<Response> {
        self.expect_reply(Request::GetState).await
    }

    pub async fn toggle(&self) -> Result<Response> {
        self.expect_reply(Request::Toggle).await
    }

    pub async fn set_mode(&self, mode: &str) -> Result<Response> {
        self.expect_reply(Request::set_mode(mode)).await
    }

    pub async fn process_prompt(&self, text: &str, mode: Option<&str>) -> Result<Response> {
        self.expect_reply(Request::process_prompt(text, mode)).await
    }

    async fn expect_reply(&self, request: Request) -> Result<Response> {
        let kind = request.kind();
        self.request(request)
            .await?
            .with_context(|| format!("no reply to {kind}"))
    }
}

/// Run `coordinator` as an actor. The task ends when every handle is dropped.
pub fn spawn<S, I>(coordinator: Coordinator<S, I>) -> (CoordinatorHandle, JoinHandle<()>)
where
    S: StateStore + 'static,
    I: Indicator + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Envelope>(MAILBOX_CAPACITY);
    let task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let response = coordinator.handle(envelope.request);
            if let Some(reply) = envelope.reply {
                let _ = reply.send(response);
            }
        }
        debug!("coordinator stopped");
    });
    (CoordinatorHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::indicator::LogIndicator;
    use crate::io::store::MemoryStore;
    use crate::test_support::{FailingStore, RecordingIndicator};
    use serde_json::json;

    fn coordinator(state: ExtensionState) -> Coordinator<MemoryStore, LogIndicator> {
        Coordinator::new(MemoryStore::with_state(state), LogIndicator)
    }

    fn enabled(mode: Mode) -> ExtensionState {
        ExtensionState {
            enabled: true,
            mode,
        }
    }

    #[test]
    fn empty_prompt_is_rejected_before_reading_state() {
        let c = Coordinator::new(FailingStore, LogIndicator);
        for text in ["", "   ", "\n\t"] {
            assert_eq!(
                c.process_prompt(text, Some("guard")),
                RewriteResult::failure(ErrorCode::EmptyPrompt)
            );
        }
    }

    #[test]
    fn disabled_state_refuses_rewrite() {
        let c = coordinator(ExtensionState::default());
        assert_eq!(
            c.process_prompt("hello", Some("guard")),
            RewriteResult::failure(ErrorCode::Disabled)
        );
    }

    #[test]
    fn guard_override_wraps_prompt() {
        let c = coordinator(enabled(Mode::Direct));
        let result = c.process_prompt("hello", Some("guard"));
        assert!(result.ok);
        assert_eq!(result.mode, Some(Mode::Guard));
        assert_eq!(result.text, Some(rewrite::guard("hello").expect("guard")));
    }

    #[test]
    fn unknown_override_falls_back_to_stored_mode() {
        let c = coordinator(enabled(Mode::Direct));
        assert_eq!(
            c.process_prompt("hello", Some("bogus")),
            RewriteResult::success(Mode::Direct, "hello".to_string())
        );
    }

    #[test]
    fn toggle_flips_and_shows_badge_once() {
        let indicator = RecordingIndicator::default();
        let c = Coordinator::new(MemoryStore::new(), indicator.clone());
        assert!(c.toggle_enabled().expect("toggle").enabled);
        assert!(!c.toggle_enabled().expect("toggle").enabled);
        assert_eq!(indicator.shown(), vec![true, false]);
    }

    #[test]
    fn set_mode_never_persists_arbitrary_strings() {
        let c = coordinator(enabled(Mode::Direct));
        let state = c.set_mode(Some("nonsense")).expect("set");
        assert_eq!(state.mode, Mode::Guard);
        assert_eq!(
            c.store().raw(),
            Some(json!({ "enabled": true, "mode": "guard" }))
        );
    }

    #[test]
    fn set_mode_keeps_enablement_and_skips_badge() {
        let indicator = RecordingIndicator::default();
        let c = Coordinator::new(MemoryStore::with_state(enabled(Mode::Guard)), indicator.clone());
        let state = c.set_mode(Some("direct")).expect("set");
        assert_eq!(state, enabled(Mode::Direct));
        assert!(indicator.shown().is_empty());
    }

    #[test]
    fn install_respects_existing_state_unless_forced() {
        let c = coordinator(enabled(Mode::Direct));
        assert_eq!(c.install(false).expect("install"), enabled(Mode::Direct));
        assert_eq!(c.install(true).expect("install"), ExtensionState::default());
    }

    #[test]
    fn store_failure_resolves_to_invalid_state() {
        let c = Coordinator::new(FailingStore, LogIndicator);
        let reply = c.handle(Request::GetState).expect("reply");
        let result = reply.into_result().expect("result");
        assert_eq!(result.error, Some(ErrorCode::InvalidState));
        assert!(result.detail.is_some());

        let result = c.process_prompt("hello", None);
        assert_eq!(result.error, Some(ErrorCode::InvalidState));
    }

    #[test]
    fn mutations_are_broadcast() {
        let c = coordinator(ExtensionState::default());
        let mut rx = c.subscribe();
        c.toggle_enabled().expect("toggle");
        c.set_mode(Some("direct")).expect("set");
        assert_eq!(rx.try_recv().expect("first"), enabled(Mode::Guard));
        assert_eq!(rx.try_recv().expect("second"), enabled(Mode::Direct));
    }

    #[test]
    fn pipeline_error_has_no_reply() {
        let c = coordinator(ExtensionState::default());
        assert_eq!(c.handle(Request::pipeline_error(ErrorCode::Timeout)), None);
    }

    #[tokio::test]
    async fn actor_serializes_requests() {
        let (handle, task) = spawn(coordinator(ExtensionState::default()));
        let toggled = handle.toggle().await.expect("toggle");
        assert_eq!(toggled, Response::State(enabled(Mode::Guard)));
        let processed = handle
            .process_prompt("hello", Some("direct"))
            .await
            .expect("process");
        assert_eq!(
            processed,
            Response::Result(RewriteResult::success(Mode::Direct, "hello".to_string()))
        );
        drop(handle);
        task.await.expect("actor exits");
    }
}
