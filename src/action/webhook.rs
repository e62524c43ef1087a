//! Executor that delegates an action to an HTTP endpoint.
//!
//! Params: `{ url, payload?, timeout_secs?, headers? }`. The endpoint receives
//! a JSON envelope with the run id, step id, attempt and current metrics and
//! may answer with an `ActionOutcome`. Any other JSON body counts as a success
//! carrying that body as its result.
//!
//! Connection failures, timeouts, 408, 429 and 5xx responses are transient.
//! Every other non-2xx response is permanent.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use playbook_common::{ActionDescriptor, ActionOutcome};

use super::{ActionContext, ActionError, ActionExecutor};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct WebhookParams {
    url: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct WebhookExecutor {
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("playbook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn outcome_from_body(body: Value) -> Result<ActionOutcome, ActionError> {
    if body.get("success").is_some() {
        return serde_json::from_value(body)
            .map_err(|e| ActionError::permanent(format!("invalid outcome from webhook: {}", e)));
    }
    Ok(ActionOutcome {
        result: body,
        ..ActionOutcome::succeeded()
    })
}

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let params: WebhookParams = serde_json::from_value(action.params.clone())
            .map_err(|e| ActionError::permanent(format!("invalid webhook params: {}", e)))?;

        let envelope = json!({
            "run_id": ctx.run_id,
            "org_id": ctx.org_id,
            "step_id": ctx.step_id,
            "attempt": ctx.attempt,
            "metrics": ctx.state.metrics(),
            "payload": params.payload,
        });

        let mut request = self.client.post(&params.url).json(&envelope);
        if let Some(secs) = params.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }
        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(step_id = ctx.step_id, url = %params.url, "calling webhook");
        let response = request.send().await.map_err(|e| {
            warn!(step_id = ctx.step_id, error = %e, "webhook request failed");
            if e.is_timeout() || e.is_connect() {
                ActionError::transient(format!("webhook unreachable: {}", e))
            } else {
                ActionError::permanent(format!("webhook request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("webhook returned {}: {}", status, body.trim());
            return Err(if is_transient_status(status) {
                ActionError::transient(message)
            } else {
                ActionError::permanent(message)
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ActionError::transient(format!("failed to read webhook response: {}", e)))?;
        if bytes.is_empty() {
            return Ok(ActionOutcome::succeeded());
        }
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ActionError::permanent(format!("webhook response is not JSON: {}", e)))?;
        outcome_from_body(body)
    }
}
