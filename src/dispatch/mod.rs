//! Dispatcher — bounded retries, single failover, throttled alerting.
//!
//! Drives the state machine in [`state`] against a real provider:
//! every HTTP attempt is written to the usage log before the next
//! transition, 429s trigger the alert throttle and the failover
//! selector, other failures back off linearly. The caller sees one
//! outcome: content, or a single classified [`DispatchError`].

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::adapters::{
    parse_completion, ChatCompletionProvider, ChatMessage, CompletionRequest, ParsedCompletion,
};
use crate::alert::AlertThrottle;
use crate::config::{DispatchConfig, EndpointConfig};
use crate::error::DispatchError;
use crate::usage::{UsageLogEntry, UsageRecorder};

pub mod attempt;
pub mod failover;
pub mod state;

use attempt::{truncate_detail, AttemptOutcome, EndpointRole, RequestAttempt, MAX_DETAIL_BYTES};
use failover::FailoverSelector;
use state::{transition, DispatchState, Event, Limits, TerminalReason};

// ── Request / Response ──────────────────────────────────────────────

/// Who is asking, for the usage log.
#[derive(Debug, Clone, Default)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub prompt: String,
    pub caller: CallerIdentity,
}

impl DispatchRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), caller: CallerIdentity::default() }
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = caller;
        self
    }
}

/// A successful dispatch.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request_id: String,
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<Value>,
    /// Upstream response body, byte for byte.
    pub body: String,
    pub endpoint: EndpointRole,
    /// HTTP calls made, failover included.
    pub http_calls: u32,
}

// ── Dispatcher ──────────────────────────────────────────────────────

pub struct Dispatcher {
    config: Arc<DispatchConfig>,
    provider: Arc<dyn ChatCompletionProvider>,
    usage: Arc<dyn UsageRecorder>,
    alerts: Arc<AlertThrottle>,
    selector: FailoverSelector,
}

impl Dispatcher {
    pub fn new(
        config: Arc<DispatchConfig>,
        provider: Arc<dyn ChatCompletionProvider>,
        usage: Arc<dyn UsageRecorder>,
        alerts: Arc<AlertThrottle>,
    ) -> Self {
        let selector = FailoverSelector::new(config.secondary.is_some());
        Self { config, provider, usage, alerts, selector }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn alerts(&self) -> &AlertThrottle {
        &self.alerts
    }

    /// Build the upstream body for a prompt.
    pub fn build_request(&self, prompt: &str) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));
        CompletionRequest::new(&self.config.model, messages, &self.config.sampling)
    }

    fn endpoint(&self, role: EndpointRole) -> &EndpointConfig {
        match role {
            EndpointRole::Primary => &self.config.primary,
            // The selector never picks the secondary unless it is configured.
            EndpointRole::Secondary => self.config.secondary.as_ref().unwrap_or(&self.config.primary),
        }
    }

    /// Send a prompt upstream, retrying and failing over as needed.
    pub async fn dispatch(&self, req: &DispatchRequest) -> Result<Completion, DispatchError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let body = self.build_request(&req.prompt);
        let payload = serde_json::to_string(&body).unwrap_or_default();
        let limits = Limits {
            max_attempts: self.config.max_attempts,
            backoff_base: self.config.backoff_base,
        };

        let mut state = DispatchState::Start;
        let mut failed_over = false;
        let mut http_calls = 0u32;
        let mut delivered: Option<(EndpointRole, ParsedCompletion)> = None;
        let mut last: Option<RequestAttempt> = None;

        while !state.is_terminal() {
            state = match state {
                DispatchState::Start => transition(state, Event::Begin, &limits),

                DispatchState::Attempt { endpoint, n } => {
                    let (attempt, parsed) = self.attempt(endpoint, n, &body).await;
                    http_calls += 1;
                    self.log_attempt(&request_id, &req.caller, &payload, &attempt)?;

                    let mut failover_now = false;
                    if attempt.outcome.is_rate_limited() {
                        let description = format!(
                            "Upstream {} endpoint {} returned HTTP 429 (request {}, attempt {})",
                            endpoint, attempt.endpoint_url, request_id, n
                        );
                        self.alerts.maybe_alert(&description).await;

                        let selection = self.selector.select(attempt.http_status, failed_over);
                        failover_now = selection.failed_over_now;
                        failed_over |= failover_now;
                    }

                    let next = transition(
                        state,
                        Event::Attempted { outcome: &attempt.outcome, failover_now },
                        &limits,
                    );
                    delivered = parsed.map(|p| (endpoint, p));
                    last = Some(attempt);
                    next
                }

                DispatchState::Failover { n } => {
                    info!(request_id = %request_id, attempt = n, "↪️  Failing over to secondary endpoint");
                    transition(state, Event::Proceed, &limits)
                }

                DispatchState::Retry { endpoint, n, delay } => {
                    info!(
                        request_id = %request_id,
                        endpoint = %endpoint,
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    transition(state, Event::Proceed, &limits)
                }

                DispatchState::Success | DispatchState::TerminalFailure(_) => state,
            };
        }

        if let DispatchState::TerminalFailure(reason) = state {
            let last_status = last.as_ref().and_then(|a| a.http_status);
            let last_error = last
                .as_ref()
                .and_then(|a| a.error.clone())
                .unwrap_or_default();
            let err = match reason {
                TerminalReason::MalformedResponse => DispatchError::MalformedResponse {
                    status: last_status.unwrap_or(200),
                    detail: last_error,
                },
                TerminalReason::Exhausted => DispatchError::UpstreamExhausted {
                    attempts: http_calls,
                    last_status,
                    last_error,
                },
            };
            error!(request_id = %request_id, kind = err.kind(), http_calls, "❌ Dispatch failed: {}", err);
            return Err(err);
        }

        let (endpoint, parsed) = delivered.ok_or_else(|| DispatchError::MalformedResponse {
            status: 200,
            detail: "completion missing after successful attempt".into(),
        })?;
        info!(request_id = %request_id, endpoint = %endpoint, http_calls, "✅ Dispatch complete");
        Ok(Completion {
            request_id,
            content: parsed.content,
            model: parsed.model,
            usage: parsed.usage,
            body: parsed.body,
            endpoint,
            http_calls,
        })
    }

    /// Make one HTTP call and classify it.
    async fn attempt(
        &self,
        role: EndpointRole,
        n: u32,
        body: &CompletionRequest,
    ) -> (RequestAttempt, Option<ParsedCompletion>) {
        let endpoint = self.endpoint(role);
        let started_at = Utc::now();
        let start = Instant::now();
        let result = self.provider.send(endpoint, body).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (outcome, http_status, detail, error, parsed) = match result {
            Err(e) => {
                let text = e.to_string();
                (AttemptOutcome::NetworkError, None, text.clone(), Some(text), None)
            }
            Ok(reply) if !reply.is_success() => {
                let detail = truncate_detail(&reply.body, MAX_DETAIL_BYTES);
                let error = format!("HTTP {}: {}", reply.status, truncate_detail(&reply.body, 500));
                (AttemptOutcome::HttpError { code: reply.status }, Some(reply.status), detail, Some(error), None)
            }
            Ok(reply) => {
                let detail = truncate_detail(&reply.body, MAX_DETAIL_BYTES);
                match parse_completion(&reply.body) {
                    Ok(p) => (AttemptOutcome::Success, Some(reply.status), detail, None, Some(p)),
                    Err(reason) => (AttemptOutcome::MalformedResponse, Some(reply.status), detail, Some(reason), None),
                }
            }
        };

        let attempt = RequestAttempt {
            endpoint: role,
            endpoint_url: endpoint.url.clone(),
            index: n,
            started_at,
            latency_ms,
            outcome,
            http_status,
            detail,
            error,
        };

        if attempt.outcome == AttemptOutcome::Success {
            info!(
                endpoint = %role,
                attempt = n,
                status = ?attempt.http_status,
                latency_ms,
                "Upstream attempt succeeded"
            );
        } else {
            warn!(
                endpoint = %role,
                attempt = n,
                status = ?attempt.http_status,
                outcome = attempt.outcome.label(),
                latency_ms,
                "Upstream attempt failed: {}",
                attempt.error.as_deref().map(|e| truncate_detail(e, 200)).unwrap_or_default()
            );
        }

        (attempt, parsed)
    }

    fn log_attempt(
        &self,
        request_id: &str,
        caller: &CallerIdentity,
        request_payload: &str,
        attempt: &RequestAttempt,
    ) -> Result<(), DispatchError> {
        let entry = UsageLogEntry {
            request_id: request_id.to_string(),
            user_id: caller.user_id.clone(),
            user_email: caller.user_email.clone(),
            api_name: self.provider.name().to_string(),
            endpoint_hit: attempt.endpoint_url.clone(),
            request_method: "POST".to_string(),
            request_payload: request_payload.to_string(),
            response_payload: attempt.detail.clone(),
            response_time_ms: attempt.latency_ms,
            status_code: attempt.http_status,
            attempt: attempt.index,
            outcome: attempt.outcome.label().to_string(),
            error_message: attempt.error.clone(),
            created_at: attempt.started_at,
        };

        self.usage.record(&entry).map_err(|e| {
            error!(request_id = %request_id, "Usage log write failed — aborting dispatch: {:#}", e);
            DispatchError::LoggingFailure(e)
        })
    }
}
