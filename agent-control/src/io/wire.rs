//! JSON payloads exchanged with the message source.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Message;

/// Full conversation state pushed by the message source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Payloads arriving from the message source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    State {
        state: StateSnapshot,
        /// Monotonic snapshot sequence; absent on sources that do not number snapshots.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    MessageUpdated {
        message: Message,
    },
}

/// Parse an inbound payload. Anything that is not a well-formed payload yields `None`.
pub fn parse_inbound(raw: &str) -> Option<InboundMessage> {
    match serde_json::from_str(raw) {
        Ok(message) => Some(message),
        Err(err) => {
            debug!(err = %err, len = raw.len(), "ignoring unparsable inbound payload");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskResponse {
    Approve,
    Deny,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalOp {
    Continue,
    Abort,
}

/// Payloads sent back to the message source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    AskResponse {
        #[serde(rename = "askResponse")]
        response: AskResponse,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
    },
    NewTask {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
    },
    ClearTask,
    CancelTask,
    TerminalOperation {
        op: TerminalOp,
    },
}

impl OutboundMessage {
    pub fn approve() -> Self {
        Self::ask_response(AskResponse::Approve, None)
    }

    pub fn deny() -> Self {
        Self::ask_response(AskResponse::Deny, None)
    }

    /// Free-text answer.
    pub fn answer(text: impl Into<String>) -> Self {
        Self::ask_response(AskResponse::Message, Some(text.into()))
    }

    pub fn new_task(text: impl Into<String>) -> Self {
        Self::NewTask {
            text: text.into(),
            images: Vec::new(),
        }
    }

    fn ask_response(response: AskResponse, text: Option<String>) -> Self {
        Self::AskResponse {
            response,
            text,
            images: Vec::new(),
        }
    }

    /// The ask response kind, when this is an ask response.
    pub fn ask_response_kind(&self) -> Option<AskResponse> {
        match self {
            Self::AskResponse { response, .. } => Some(*response),
            _ => None,
        }
    }
}
