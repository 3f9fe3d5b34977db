//! Shared deterministic types for the control core.
//!
//! These types define the stable contract between the message source, the
//! state detector, and the session/dispatch layers. They carry no I/O and
//! serialize to the wire shapes the message source speaks.

use serde::{Deserialize, Serialize};

/// Whether a message requires a decision (`ask`) or only informs (`say`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ask,
    Say,
}

/// A single conversational message produced by the provider-adapter layer.
///
/// A given `id` may arrive many times with `partial=true`, then once with
/// `partial=false`. Only the partial→final update keyed by `id` mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic, unique per task.
    pub id: u64,
    pub kind: MessageKind,
    pub subtype: String,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Message {
    pub fn is_ask(&self) -> bool {
        self.kind == MessageKind::Ask
    }

    pub fn is_say(&self) -> bool {
        self.kind == MessageKind::Say
    }

    /// True for an ask that is complete and therefore eligible for a response.
    pub fn is_final_ask(&self) -> bool {
        self.is_ask() && !self.partial
    }
}

/// Coarse state of the agent loop, derived purely from message history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentLoopState {
    NoTask,
    Streaming,
    Running,
    WaitingForInput,
    Idle,
    Resumable,
}

impl AgentLoopState {
    /// States that cannot progress without external input.
    pub fn requires_input(self) -> bool {
        matches!(self, Self::WaitingForInput | Self::Idle | Self::Resumable)
    }
}

/// What the outside world must do to move the loop forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    StartTask,
    RetryOrNewTask,
    ProceedOrNewTask,
    StartNewTask,
    ResumeOrAbandon,
    ContinueOrAbort,
    Answer,
    Approve,
}

/// Category of an ask subtype; drives both state detection and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskCategory {
    /// Auto-acknowledged; does not gate progress.
    NonBlocking,
    /// The task has stopped and needs a start/retry/abandon decision.
    Idle,
    /// A previously stopped task can be resumed.
    Resumable,
    /// Requires approval or a free-text answer.
    Interactive,
}

/// Output of [`crate::core::state_detector::detect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedState {
    pub state: AgentLoopState,
    pub is_streaming: bool,
    pub is_running: bool,
    pub is_waiting_for_input: bool,
    /// Subtype of the trailing ask, when the state is ask-driven.
    pub current_ask: Option<String>,
    pub required_action: Option<RequiredAction>,
    pub last_message: Option<Message>,
    pub last_message_ts: Option<u64>,
}

impl DetectedState {
    pub fn no_task() -> Self {
        Self {
            state: AgentLoopState::NoTask,
            is_streaming: false,
            is_running: false,
            is_waiting_for_input: false,
            current_ask: None,
            required_action: None,
            last_message: None,
            last_message_ts: None,
        }
    }

    /// True when the trailing message is a final `completion_result` ask.
    pub fn is_completion(&self) -> bool {
        self.state == AgentLoopState::Idle
            && self.current_ask.as_deref() == Some(crate::core::ask_table::COMPLETION_RESULT)
    }

    /// Id of the ask the loop is blocked on, if any.
    pub fn pending_ask_id(&self) -> Option<u64> {
        if !self.state.requires_input() {
            return None;
        }
        self.last_message.as_ref().map(|m| m.id)
    }
}
