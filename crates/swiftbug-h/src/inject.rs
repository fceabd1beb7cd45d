use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::CreateIsolatedWorldParams;
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use serde_json::Value;
use std::time::Duration;
use swiftbug_engine::protocol::ScriptWorld;
use swiftbug_engine::script::PageScript;

use crate::cdp::CdpResult;

/// Default timeout for JavaScript evaluation (10 seconds).
/// This prevents hanging when dialogs (alert/confirm/prompt) block the JS thread.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Name of the world storage and location scripts run in. Storage is shared
/// with the page; globals are not.
const ISOLATED_WORLD: &str = "swiftbug";

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Runs one of the fixed page programs and returns its JSON result.
pub async fn run_script(page: &Page, script: &PageScript) -> CdpResult<Value> {
    let expression = script.source();
    tracing::debug!("Running {} in {:?} world", script.name(), script.world());

    let mut last_error = None;
    for attempt in 0..MAX_CONTEXT_RETRIES {
        match evaluate_with_timeout(page, &expression, script.world()).await {
            Ok(value) => return Ok(value),
            Err(EvalError::Timeout) => {
                return Err(
                    "Script timed out - possibly blocked by a dialog (alert/confirm/prompt)".into(),
                );
            }
            Err(EvalError::Context(err_str)) => {
                tracing::debug!(
                    "Context error running {} (attempt {}/{}), retrying...",
                    script.name(),
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err_str);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
            Err(EvalError::Other(err_str)) => {
                return Err(format!("Evaluation failed: {}", err_str).into());
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| format!("Failed to run {} after retries", script.name()))
        .into())
}

enum EvalError {
    Timeout,
    Context(String),
    Other(String),
}

impl EvalError {
    fn classify(err: String) -> Self {
        if is_context_error(&err) {
            EvalError::Context(err)
        } else {
            EvalError::Other(err)
        }
    }
}

async fn isolated_context(page: &Page) -> Result<ExecutionContextId, EvalError> {
    let frame = page
        .mainframe()
        .await
        .map_err(|e| EvalError::classify(e.to_string()))?
        .ok_or_else(|| EvalError::Context("Cannot find context: no main frame".to_string()))?;
    let params = CreateIsolatedWorldParams::builder()
        .frame_id(frame)
        .world_name(ISOLATED_WORLD)
        .build()
        .map_err(EvalError::Other)?;
    let created = page
        .execute(params)
        .await
        .map_err(|e| EvalError::classify(e.to_string()))?;
    Ok(created.result.execution_context_id)
}

async fn evaluate_with_timeout(
    page: &Page,
    expression: &str,
    world: ScriptWorld,
) -> Result<Value, EvalError> {
    let mut builder = EvaluateParams::builder()
        .expression(expression)
        .return_by_value(true)
        .await_promise(true);
    if world == ScriptWorld::Isolated {
        builder = builder.context_id(isolated_context(page).await?);
    }
    let params = builder.build().map_err(EvalError::Other)?;

    match tokio::time::timeout(EVAL_TIMEOUT, page.execute(params)).await {
        Err(_) => Err(EvalError::Timeout),
        Ok(Err(e)) => Err(EvalError::classify(e.to_string())),
        Ok(Ok(response)) => {
            if let Some(details) = &response.result.exception_details {
                let message = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                return Err(EvalError::Other(message));
            }
            Ok(response.result.result.value.clone().unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_errors_are_retried() {
        assert!(is_context_error("Execution context was destroyed."));
        assert!(is_context_error("Cannot find context with specified id"));
        assert!(!is_context_error("ReferenceError: x is not defined"));
    }
}
