//! Agent loop state classification from message history.
//!
//! [`detect`] is the sole authority for the loop state. It is pure: the same
//! history always yields the same [`DetectedState`], with no hidden counters.

use serde_json::Value;

use crate::core::ask_table::{API_REQ_STARTED, classify_ask, required_action};
use crate::core::types::{AgentLoopState, AskCategory, DetectedState, Message};

/// Classify the current loop state from the ordered message history.
///
/// - Empty history is `NoTask`.
/// - A partial trailing message is `Streaming`.
/// - A final trailing ask is classified through the ask table.
/// - A trailing say is `Streaming` while the latest `api_req_started` lacks a
///   `cost` field, otherwise `Running`.
pub fn detect(history: &[Message]) -> DetectedState {
    let Some(last) = history.last() else {
        return DetectedState::no_task();
    };

    let (state, current_ask, action) = if last.partial {
        (AgentLoopState::Streaming, None, None)
    } else if last.is_ask() {
        let state = match classify_ask(&last.subtype) {
            AskCategory::Idle => AgentLoopState::Idle,
            AskCategory::Resumable => AgentLoopState::Resumable,
            AskCategory::NonBlocking => AgentLoopState::Running,
            AskCategory::Interactive => AgentLoopState::WaitingForInput,
        };
        (
            state,
            Some(last.subtype.clone()),
            Some(required_action(&last.subtype)),
        )
    } else if api_request_in_progress(history) {
        (AgentLoopState::Streaming, None, None)
    } else {
        (AgentLoopState::Running, None, None)
    };

    DetectedState {
        state,
        is_streaming: state == AgentLoopState::Streaming,
        is_running: state == AgentLoopState::Running,
        is_waiting_for_input: state.requires_input(),
        current_ask,
        required_action: action,
        last_message: Some(last.clone()),
        last_message_ts: Some(last.id),
    }
}

/// True when the most recent `api_req_started` has no `cost` field yet.
///
/// An empty payload counts as in progress. A payload that is not a JSON
/// object counts as finished. `cost: 0` and `cost: null` both count as
/// present.
pub fn api_request_in_progress(history: &[Message]) -> bool {
    let Some(started) = history
        .iter()
        .rev()
        .find(|m| m.is_say() && m.subtype == API_REQ_STARTED)
    else {
        return false;
    };

    let raw = started.text.as_deref().map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return true;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => !fields.contains_key("cost"),
        _ => false,
    }
}
