//! Time-bounded rewrite call into the coordinator.

use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::coordinator::CoordinatorHandle;
use crate::core::types::{ErrorCode, Mode, RewriteResult};
use crate::protocol::Request;

/// Something that can answer `PROCESS_PROMPT`.
pub trait PromptProcessor: Send + Sync + 'static {
    fn process_prompt(
        &self,
        text: String,
        mode: Option<Mode>,
    ) -> BoxFuture<'static, Result<RewriteResult>>;

    /// Best-effort signal that a pipeline fell back to the original text.
    fn report_pipeline_error(&self, _error: ErrorCode) {}
}

impl PromptProcessor for CoordinatorHandle {
    fn process_prompt(
        &self,
        text: String,
        mode: Option<Mode>,
    ) -> BoxFuture<'static, Result<RewriteResult>> {
        let handle = self.clone();
        Box::pin(async move {
            let request = Request::process_prompt(&text, mode.map(Mode::as_str));
            // An unreachable coordinator is a result, not an exception.
            let reply = match handle.request(request).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "coordinator unreachable");
                    return Ok(RewriteResult::failure(ErrorCode::RuntimeError));
                }
            };
            Ok(reply
                .and_then(|r| r.into_result())
                .unwrap_or_else(|| RewriteResult::failure(ErrorCode::RuntimeError)))
        })
    }

    fn report_pipeline_error(&self, error: ErrorCode) {
        self.notify(Request::pipeline_error(error));
    }
}

/// Call `processor` with a hard deadline.
///
/// The call runs on its own task. On timeout that task is detached, not
/// aborted; its late result is simply never observed.
pub async fn call_with_timeout<P: PromptProcessor + ?Sized>(
    processor: &P,
    text: String,
    mode: Option<Mode>,
    timeout: Duration,
) -> RewriteResult {
    let pending = tokio::spawn(processor.process_prompt(text, mode));
    match tokio::time::timeout(timeout, pending).await {
        Err(_) => {
            debug!(timeout = ?timeout, "rewrite call timed out");
            RewriteResult::failure(ErrorCode::Timeout)
        }
        Ok(Err(join_err)) => {
            RewriteResult::failure_with_detail(ErrorCode::Exception, join_err.to_string())
        }
        Ok(Ok(Err(err))) => {
            RewriteResult::failure_with_detail(ErrorCode::Exception, format!("{err:#}"))
        }
        Ok(Ok(Ok(result))) => result,
    }
}
