//! Stateful session wrapper around the state detector.
//!
//! [`SessionClient`] owns the working message history for one task, re-runs
//! detection on every ingest, and publishes typed [`SessionEvent`]s. Inbound
//! payloads that cannot be parsed are ignored and leave state untouched.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, instrument};

use crate::core::state_detector::detect;
use crate::core::types::{AgentLoopState, DetectedState, Message};
use crate::events::{EventBus, Subscription};
use crate::io::wire::{InboundMessage, parse_inbound};

/// Events published by a [`SessionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChange {
        previous_state: AgentLoopState,
        current: DetectedState,
    },
    WaitingForInput {
        ask: String,
        message: Message,
    },
    TaskCompleted {
        success: bool,
        message: Option<Message>,
    },
    ModeChanged {
        previous_mode: Option<String>,
        current_mode: String,
    },
    Message {
        message: Message,
    },
    MessageUpdated {
        message: Message,
    },
    Error {
        error: String,
    },
}

pub struct SessionClient {
    messages: Vec<Message>,
    detected: DetectedState,
    mode: Option<String>,
    initialized: bool,
    last_applied_seq: Option<u64>,
    /// When each still-partial message id was first seen (diagnostics only).
    first_partial_seen: HashMap<u64, Instant>,
    events: EventBus<SessionEvent>,
}

impl Default for SessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClient {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            detected: DetectedState::no_task(),
            mode: None,
            initialized: false,
            last_applied_seq: None,
            first_partial_seen: HashMap::new(),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn state(&self) -> AgentLoopState {
        self.detected.state
    }

    pub fn detected(&self) -> &DetectedState {
        &self.detected
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_ask(&self) -> Option<&str> {
        self.detected.current_ask.as_deref()
    }

    pub fn last_applied_seq(&self) -> Option<u64> {
        self.last_applied_seq
    }

    /// Parse and ingest a raw inbound payload. Returns whether it was applied.
    pub fn ingest_raw(&mut self, raw: &str) -> bool {
        match parse_inbound(raw) {
            Some(inbound) => self.ingest(inbound),
            None => false,
        }
    }

    /// Ingest a parsed payload. Snapshots with a sequence at or below the last
    /// applied one are dropped. Returns whether the payload was applied.
    pub fn ingest(&mut self, inbound: InboundMessage) -> bool {
        match inbound {
            InboundMessage::State { state, seq } => {
                if let Some(seq) = seq {
                    if let Some(last) = self.last_applied_seq.filter(|last| seq <= *last) {
                        debug!(seq, last, "dropping stale snapshot");
                        return false;
                    }
                    self.last_applied_seq = Some(seq);
                }
                self.ingest_snapshot(state.messages, state.mode);
                true
            }
            InboundMessage::MessageUpdated { message } => {
                self.ingest_update(message);
                true
            }
        }
    }

    /// Replace the working history with a full snapshot.
    ///
    /// A snapshot without `mode` keeps the previously tracked mode.
    #[instrument(skip_all, fields(messages = messages.len(), mode = ?mode))]
    pub fn ingest_snapshot(&mut self, messages: Vec<Message>, mode: Option<String>) {
        let content_events = {
            let previous: HashMap<u64, &Message> =
                self.messages.iter().map(|m| (m.id, m)).collect();
            messages
                .iter()
                .filter_map(|message| match previous.get(&message.id) {
                    None => Some(SessionEvent::Message {
                        message: message.clone(),
                    }),
                    Some(prev) if *prev != message => Some(SessionEvent::MessageUpdated {
                        message: message.clone(),
                    }),
                    Some(_) => None,
                })
                .collect::<Vec<_>>()
        };

        for message in &messages {
            self.track_partial(message);
        }
        self.messages = messages;
        self.initialized = true;

        for event in &content_events {
            self.events.emit(event);
        }
        self.apply_mode(mode);
        self.redetect();
    }

    /// Patch a single message into history by id (partial→final transitions).
    #[instrument(skip_all, fields(id = message.id, partial = message.partial))]
    pub fn ingest_update(&mut self, message: Message) {
        self.track_partial(&message);
        self.initialized = true;

        let event = match self.messages.iter().position(|m| m.id == message.id) {
            Some(idx) if self.messages[idx] == message => None,
            Some(idx) => {
                self.messages[idx] = message.clone();
                Some(SessionEvent::MessageUpdated { message })
            }
            None => {
                let pos = self.messages.partition_point(|m| m.id < message.id);
                self.messages.insert(pos, message.clone());
                Some(SessionEvent::Message { message })
            }
        };

        if let Some(event) = event {
            self.events.emit(&event);
        }
        self.redetect();
    }

    /// Return to the `NoTask` baseline: history, mode and initialized flag
    /// are cleared. The snapshot sequence guard is kept.
    pub fn reset(&mut self) {
        debug!("resetting session");
        let previous_state = self.detected.state;
        self.messages.clear();
        self.mode = None;
        self.initialized = false;
        self.first_partial_seen.clear();
        self.detected = DetectedState::no_task();
        if previous_state != AgentLoopState::NoTask {
            self.events.emit(&SessionEvent::StateChange {
                previous_state,
                current: self.detected.clone(),
            });
        }
    }

    /// Publish an error raised by a collaborator acting on this session.
    pub fn emit_error(&self, error: impl Into<String>) {
        self.events.emit(&SessionEvent::Error {
            error: error.into(),
        });
    }

    fn apply_mode(&mut self, mode: Option<String>) {
        let Some(mode) = mode else {
            return;
        };
        if self.mode.as_deref() == Some(mode.as_str()) {
            return;
        }
        let previous_mode = self.mode.replace(mode.clone());
        debug!(?previous_mode, current_mode = %mode, "mode changed");
        self.events.emit(&SessionEvent::ModeChanged {
            previous_mode,
            current_mode: mode,
        });
    }

    fn redetect(&mut self) {
        let next = detect(&self.messages);
        let previous = std::mem::replace(&mut self.detected, next.clone());

        let state_changed = next.state != previous.state;
        if state_changed {
            debug!(from = ?previous.state, to = ?next.state, "state change");
            self.events.emit(&SessionEvent::StateChange {
                previous_state: previous.state,
                current: next.clone(),
            });
        }

        let new_pending_ask = next.pending_ask_id() != previous.pending_ask_id();
        if next.state.requires_input() && (state_changed || new_pending_ask) {
            if let (Some(ask), Some(message)) = (&next.current_ask, &next.last_message) {
                self.events.emit(&SessionEvent::WaitingForInput {
                    ask: ask.clone(),
                    message: message.clone(),
                });
            }
        }

        if next.is_completion() && !previous.is_completion() {
            self.events.emit(&SessionEvent::TaskCompleted {
                success: true,
                message: next.last_message.clone(),
            });
        }
    }

    fn track_partial(&mut self, message: &Message) {
        if message.partial {
            self.first_partial_seen
                .entry(message.id)
                .or_insert_with(Instant::now);
        } else if let Some(first_seen) = self.first_partial_seen.remove(&message.id) {
            debug!(
                id = message.id,
                streamed_ms = first_seen.elapsed().as_millis() as u64,
                "message finalized"
            );
        }
    }
}
