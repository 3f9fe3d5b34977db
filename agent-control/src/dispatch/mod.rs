//! Ask dispatch: turning a pending ask into exactly one outbound response.
//!
//! [`AskDispatcher::handle_ask`] classifies the ask through the ask table and
//! runs the category policy. Each ask id is claimed before any prompt is shown,
//! so a re-delivered ask never produces a second prompt or response. When
//! producing a response fails, the claim is released so the ask can be
//! retried, and the error is returned to the caller.

pub mod payload;

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::ask_table::{
    API_REQ_FAILED, AUTO_APPROVAL_MAX_REQ_REACHED, BROWSER_ACTION_LAUNCH, COMMAND,
    COMPLETION_RESULT, FOLLOWUP, MISTAKE_LIMIT_REACHED, RESUME_COMPLETED_TASK, TOOL,
    USE_MCP_SERVER, classify_ask,
};
use crate::core::types::{AskCategory, Message};
use crate::io::config::{ControlConfig, DispatchMode};
use crate::io::prompt::{ConfirmRequest, Prompter, TextRequest};
use crate::io::wire::OutboundMessage;
use payload::{is_protected, parse_followup, parse_mcp, parse_tool, resolve_followup_answer};

/// Dispatcher policy knobs, usually derived from [`ControlConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub followup_timeout: Duration,
    pub auto_retry_failed_requests: bool,
    pub auto_resume: bool,
    pub fallback_answer: String,
}

impl DispatchConfig {
    pub fn interactive() -> Self {
        Self::from(&ControlConfig::default())
    }

    pub fn non_interactive() -> Self {
        Self {
            mode: DispatchMode::NonInteractive,
            ..Self::interactive()
        }
    }
}

impl From<&ControlConfig> for DispatchConfig {
    fn from(cfg: &ControlConfig) -> Self {
        Self {
            mode: cfg.mode,
            followup_timeout: cfg.followup_timeout(),
            auto_retry_failed_requests: cfg.auto_retry_failed_requests,
            auto_resume: cfg.auto_resume,
            fallback_answer: cfg.fallback_answer.clone(),
        }
    }
}

/// Result of [`AskDispatcher::handle_ask`].
///
/// `handled=false` with no error means the ask was not eligible (partial, not
/// an ask, or already claimed). `handled=true` with no response is a terminal
/// no-op such as `completion_result`.
#[derive(Debug)]
pub struct AskOutcome {
    pub handled: bool,
    pub response: Option<OutboundMessage>,
    pub error: Option<anyhow::Error>,
}

impl AskOutcome {
    fn skipped() -> Self {
        Self {
            handled: false,
            response: None,
            error: None,
        }
    }

    fn handled(response: Option<OutboundMessage>) -> Self {
        Self {
            handled: true,
            response,
            error: None,
        }
    }

    fn failed(error: anyhow::Error) -> Self {
        Self {
            handled: false,
            response: None,
            error: Some(error),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AskDispatcher<P> {
    prompter: P,
    config: DispatchConfig,
    handled: Mutex<HashSet<u64>>,
    cancel: Mutex<CancellationToken>,
}

impl<P: Prompter> AskDispatcher<P> {
    pub fn new(prompter: P, config: DispatchConfig) -> Self {
        Self {
            prompter,
            config,
            handled: Mutex::new(HashSet::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    pub fn is_handled(&self, ask_id: u64) -> bool {
        lock(&self.handled).contains(&ask_id)
    }

    /// Forget every handled ask id. Called when a task restarts so ids from
    /// unrelated tasks never collide.
    pub fn clear(&self) {
        lock(&self.handled).clear();
    }

    /// Resolve every in-flight prompt and start a fresh scope. Dispatches
    /// begun under the old scope finish without a response.
    pub fn cancel(&self) {
        let previous = std::mem::replace(&mut *lock(&self.cancel), CancellationToken::new());
        previous.cancel();
        self.clear();
        debug!("cancelled in-flight prompts");
    }

    /// Produce at most one response for `message`.
    #[instrument(skip_all, fields(ask_id = message.id, subtype = %message.subtype))]
    pub async fn handle_ask(&self, message: &Message) -> AskOutcome {
        if !message.is_final_ask() {
            return AskOutcome::skipped();
        }
        if !lock(&self.handled).insert(message.id) {
            debug!("ask already handled");
            return AskOutcome::skipped();
        }

        let token = lock(&self.cancel).clone();
        match self.respond(message, &token).await {
            Ok(response) if token.is_cancelled() => {
                debug!(dropped = ?response.as_ref().and_then(OutboundMessage::ask_response_kind), "task cancelled; response dropped");
                AskOutcome::handled(None)
            }
            Ok(response) => {
                info!(response = ?response.as_ref().and_then(OutboundMessage::ask_response_kind), "ask handled");
                AskOutcome::handled(response)
            }
            Err(err) => {
                lock(&self.handled).remove(&message.id);
                warn!(err = %format!("{err:#}"), "ask handling failed; released for retry");
                AskOutcome::failed(err)
            }
        }
    }

    async fn respond(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        match classify_ask(&message.subtype) {
            AskCategory::NonBlocking => Ok(Some(OutboundMessage::approve())),
            AskCategory::Idle => self.respond_idle(message, token).await,
            AskCategory::Resumable => self.respond_resumable(message, token).await,
            AskCategory::Interactive => self.respond_interactive(message, token).await,
        }
    }

    async fn respond_idle(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        let auto = self.is_non_interactive();
        match message.subtype.as_str() {
            COMPLETION_RESULT => Ok(None),
            API_REQ_FAILED => {
                if auto && self.config.auto_retry_failed_requests {
                    return Ok(Some(OutboundMessage::approve()));
                }
                self.decide(
                    token,
                    ConfirmRequest {
                        ask_id: message.id,
                        title: "The API request failed. Retry?".to_string(),
                        detail: message.text.clone(),
                        default: true,
                    },
                )
                .await
                .map(Some)
            }
            MISTAKE_LIMIT_REACHED | AUTO_APPROVAL_MAX_REQ_REACHED => {
                if auto {
                    return Ok(Some(OutboundMessage::approve()));
                }
                let title = if message.subtype == MISTAKE_LIMIT_REACHED {
                    "The agent keeps making mistakes. Proceed anyway?"
                } else {
                    "Auto-approved request limit reached. Continue?"
                };
                self.decide(
                    token,
                    ConfirmRequest {
                        ask_id: message.id,
                        title: title.to_string(),
                        detail: message.text.clone(),
                        default: false,
                    },
                )
                .await
                .map(Some)
            }
            RESUME_COMPLETED_TASK => {
                if auto {
                    return Ok(None);
                }
                let reply = self
                    .ask_text(
                        token,
                        TextRequest {
                            ask_id: message.id,
                            question: "The task is complete. Send a follow-up message (empty to skip)?"
                                .to_string(),
                            suggestions: Vec::new(),
                            default: None,
                        },
                    )
                    .await?;
                Ok(reply
                    .filter(|text| !text.trim().is_empty())
                    .map(OutboundMessage::answer))
            }
            _ => self.generic_approval(message, token).await.map(Some),
        }
    }

    async fn respond_resumable(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        if self.is_non_interactive() && self.config.auto_resume {
            return Ok(Some(OutboundMessage::approve()));
        }
        self.decide(
            token,
            ConfirmRequest {
                ask_id: message.id,
                title: "Resume the interrupted task?".to_string(),
                detail: message.text.clone(),
                default: true,
            },
        )
        .await
        .map(Some)
    }

    async fn respond_interactive(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        let text = message.text.as_deref();
        let (title, detail) = match message.subtype.as_str() {
            FOLLOWUP => return self.respond_followup(message, token).await.map(Some),
            COMMAND => ("Run command?".to_string(), text.map(str::to_string)),
            TOOL => match parse_tool(text) {
                Some(tool) => (
                    format!("Allow tool '{}'?", tool.tool),
                    tool.path.map(|path| format!("path: {path}")),
                ),
                None => return self.generic_approval(message, token).await.map(Some),
            },
            BROWSER_ACTION_LAUNCH => (
                "Launch browser?".to_string(),
                text.map(|url| format!("url: {url}")),
            ),
            USE_MCP_SERVER => match parse_mcp(text) {
                Some(mcp) => {
                    let target = mcp.tool_name.or(mcp.uri).unwrap_or_default();
                    (
                        format!("Allow MCP server '{}' to use '{}'?", mcp.server_name, target),
                        None,
                    )
                }
                None => return self.generic_approval(message, token).await.map(Some),
            },
            _ => return self.generic_approval(message, token).await.map(Some),
        };

        self.approve_or_prompt(
            message,
            token,
            ConfirmRequest {
                ask_id: message.id,
                title,
                detail,
                default: false,
            },
        )
        .await
        .map(Some)
    }

    /// Fallback for unknown or undecodable asks: never dropped, always an approval.
    async fn generic_approval(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<OutboundMessage> {
        self.approve_or_prompt(
            message,
            token,
            ConfirmRequest {
                ask_id: message.id,
                title: format!("Approve '{}'?", message.subtype),
                detail: message.text.clone(),
                default: false,
            },
        )
        .await
    }

    async fn respond_followup(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<OutboundMessage> {
        let question = parse_followup(message.text.as_deref());
        let suggested = question.suggestions.first().cloned();
        let request = TextRequest {
            ask_id: message.id,
            question: question.question.clone(),
            suggestions: question.suggestions.clone(),
            default: suggested.clone(),
        };

        if !self.is_non_interactive() {
            let reply = self.ask_text(token, request).await?;
            return Ok(match reply.filter(|text| !text.trim().is_empty()) {
                Some(text) => {
                    OutboundMessage::answer(resolve_followup_answer(&text, &question.suggestions))
                }
                None => OutboundMessage::deny(),
            });
        }

        let default = suggested.unwrap_or_else(|| self.config.fallback_answer.clone());
        let reply =
            match tokio::time::timeout(self.config.followup_timeout, self.ask_text(token, request))
                .await
            {
                Ok(reply) => reply?,
                Err(_) => {
                    info!(
                        timeout_secs = self.config.followup_timeout.as_secs(),
                        "follow-up prompt timed out; using default answer"
                    );
                    None
                }
            };
        Ok(match reply.filter(|text| !text.trim().is_empty()) {
            Some(text) => {
                OutboundMessage::answer(resolve_followup_answer(&text, &question.suggestions))
            }
            None => OutboundMessage::answer(default),
        })
    }

    async fn approve_or_prompt(
        &self,
        message: &Message,
        token: &CancellationToken,
        request: ConfirmRequest,
    ) -> Result<OutboundMessage> {
        if self.is_non_interactive() {
            if !is_protected(message.text.as_deref()) {
                return Ok(OutboundMessage::approve());
            }
            debug!("protected action requires a human decision");
        }
        self.decide(token, request).await
    }

    /// Yes/no prompt mapped to approve/deny; interruption denies. Unattended
    /// prompts are bounded by the follow-up timeout and deny when it fires.
    async fn decide(
        &self,
        token: &CancellationToken,
        request: ConfirmRequest,
    ) -> Result<OutboundMessage> {
        let prompt = async {
            tokio::select! {
                biased;
                _ = token.cancelled() => Ok(None),
                decision = self.prompter.confirm(request) => decision,
            }
        };
        let decision = if self.is_non_interactive() {
            match tokio::time::timeout(self.config.followup_timeout, prompt).await {
                Ok(decision) => decision?,
                Err(_) => {
                    info!(
                        timeout_secs = self.config.followup_timeout.as_secs(),
                        "unattended approval timed out; denying"
                    );
                    None
                }
            }
        } else {
            prompt.await?
        };
        Ok(match decision {
            Some(true) => OutboundMessage::approve(),
            Some(false) | None => OutboundMessage::deny(),
        })
    }

    async fn ask_text(
        &self,
        token: &CancellationToken,
        request: TextRequest,
    ) -> Result<Option<String>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Ok(None),
            reply = self.prompter.ask_text(request) => reply,
        }
    }

    fn is_non_interactive(&self) -> bool {
        self.config.mode == DispatchMode::NonInteractive
    }
}
