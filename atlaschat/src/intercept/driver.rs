//! Async loop that owns an [`Engine`] and serializes everything it reacts to.
//!
//! Host events, state changes, watcher ticks and settled rewrite calls are all
//! handled on this one loop, so the engine never sees concurrent mutation.
//! Rewrite calls and the resend yield run on their own tasks and report back
//! through an internal channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::core::types::{ErrorCode, ExtensionState, RewriteResult};
use crate::intercept::call::{PromptProcessor, call_with_timeout};
use crate::intercept::engine::{Capture, Engine, Reason, Resend, RewriteJob};
use crate::intercept::host::{HostPage, KeyEvent, Navigation};

const STATE_BUFFER: usize = 16;

/// Something the host document reports to the engine.
#[derive(Debug)]
pub enum HostEvent<H> {
    /// A capture-phase keydown. The reply says whether to cancel it.
    KeyDown {
        event: KeyEvent<H>,
        reply: oneshot::Sender<bool>,
    },
    Navigation(Navigation),
}

/// Sending half of a host event channel.
pub struct HostLink<H> {
    tx: mpsc::Sender<HostEvent<H>>,
}

impl<H> Clone for HostLink<H> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<H> HostLink<H> {
    /// Report a keydown and wait for the cancel decision.
    pub async fn key_down(&self, event: KeyEvent<H>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostEvent::KeyDown { event, reply })
            .await
            .map_err(|_| anyhow!("interception driver stopped"))?;
        rx.await.context("interception driver dropped keydown")
    }

    pub async fn navigate(&self, navigation: Navigation) -> Result<()> {
        self.tx
            .send(HostEvent::Navigation(navigation))
            .await
            .map_err(|_| anyhow!("interception driver stopped"))
    }
}

pub fn host_channel<H>(capacity: usize) -> (HostLink<H>, mpsc::Receiver<HostEvent<H>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (HostLink { tx }, rx)
}

/// Bridge coordinator change notifications into the driver's state channel.
pub fn forward_changes(
    mut changes: broadcast::Receiver<ExtensionState>,
) -> mpsc::Receiver<ExtensionState> {
    let (tx, rx) = mpsc::channel(STATE_BUFFER);
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(state) => {
                    if tx.send(state).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "state change notifications lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    rx
}

enum Internal {
    Completed { job: RewriteJob, result: RewriteResult },
    Resend(Resend),
    Reinitialize(Reason),
}

/// Run until the host event channel closes, then hand the engine back.
///
/// On an unsupported host the engine never attaches and every keydown passes
/// through.
pub async fn run<H, P>(
    mut engine: Engine<H>,
    processor: Arc<P>,
    mut events: mpsc::Receiver<HostEvent<H::Handle>>,
    mut states: mpsc::Receiver<ExtensionState>,
) -> Engine<H>
where
    H: HostPage,
    P: PromptProcessor + ?Sized,
{
    if !engine.supports_host() {
        info!(host = %engine.page().host(), "host not supported, staying inert");
        while let Some(event) = events.recv().await {
            if let HostEvent::KeyDown { reply, .. } = event {
                let _ = reply.send(false);
            }
        }
        return engine;
    }

    let (internal_tx, mut internal) = mpsc::unbounded_channel();
    let period = engine.config().watcher_interval();
    let timeout = engine.config().rewrite_timeout();
    let resend_delay = engine.config().resend_delay();

    engine.initialize(Reason::Bootstrap);
    let mut watch: Option<(u64, Instant)> = None;

    loop {
        watch = next_watch(&engine, watch, period);
        let deadline = watch.map(|(_, at)| at);
        let tick = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("host event channel closed");
                    break;
                };
                match event {
                    HostEvent::KeyDown { event, reply } => {
                        let capture = engine.on_key_down(&event);
                        let _ = reply.send(capture.prevents_default());
                        if let Capture::Process(job) = capture {
                            spawn_rewrite(&processor, job, timeout, &internal_tx);
                        }
                    }
                    HostEvent::Navigation(navigation) => {
                        debug!(navigation = ?navigation, "navigation observed");
                        let _ = internal_tx.send(Internal::Reinitialize(Reason::RouteChange));
                    }
                }
            }
            Some(state) = states.recv() => {
                debug!(enabled = state.enabled, mode = %state.mode, "state changed");
                engine.apply_state(state);
            }
            Some(message) = internal.recv() => match message {
                Internal::Completed { job, result } => {
                    if !result.ok {
                        processor.report_pipeline_error(result.error.unwrap_or(ErrorCode::RuntimeError));
                    }
                    if let Some(resend) = engine.complete(&job, &result) {
                        let tx = internal_tx.clone();
                        tokio::spawn(async move {
                            sleep(resend_delay).await;
                            let _ = tx.send(Internal::Resend(resend));
                        });
                    }
                }
                Internal::Resend(resend) => {
                    engine.resend(resend);
                }
                Internal::Reinitialize(reason) => engine.initialize(reason),
            },
            () = tick => {
                engine.tick_watcher();
                if let Some((generation, _)) = watch {
                    watch = Some((generation, Instant::now() + period));
                }
            }
        }
    }

    engine
}

/// Deadline of the next watcher poll for the engine's live session.
fn next_watch<H: HostPage>(
    engine: &Engine<H>,
    current: Option<(u64, Instant)>,
    period: Duration,
) -> Option<(u64, Instant)> {
    if !engine.watcher_active() {
        return None;
    }
    let generation = engine.generation()?;
    match current {
        Some((g, at)) if g == generation => Some((g, at)),
        _ => Some((generation, Instant::now() + period)),
    }
}

fn spawn_rewrite<P: PromptProcessor + ?Sized>(
    processor: &Arc<P>,
    job: RewriteJob,
    timeout: Duration,
    tx: &mpsc::UnboundedSender<Internal>,
) {
    let processor = Arc::clone(processor);
    let tx = tx.clone();
    tokio::spawn(async move {
        let result =
            call_with_timeout(processor.as_ref(), job.text.clone(), Some(job.mode), timeout).await;
        if tx.send(Internal::Completed { job, result }).is_err() {
            warn!("interception driver stopped before rewrite settled");
        }
    });
}
