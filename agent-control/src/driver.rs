//! Wiring from inbound payloads to outbound responses.
//!
//! [`SessionDriver`] ingests synchronously, then hands the pending ask to the
//! dispatcher on a spawned task. Ingestion keeps running while a prompt is
//! open; the dispatcher's claim on each ask id keeps a re-delivered ask from
//! being prompted twice.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::dispatch::AskDispatcher;
use crate::events::EventBus;
use crate::io::prompt::Prompter;
use crate::io::wire::OutboundMessage;
use crate::session::{SessionClient, SessionEvent};

/// Destination for outbound payloads.
pub trait OutboundSink: Send + Sync + 'static {
    fn send(&self, message: OutboundMessage) -> Result<()>;
}

impl OutboundSink for mpsc::UnboundedSender<OutboundMessage> {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        mpsc::UnboundedSender::send(self, message).context("outbound channel closed")
    }
}

/// Writes each payload as one JSON line.
pub struct JsonLineSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send + 'static> OutboundSink for JsonLineSink<W> {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        let line = serde_json::to_string(&message).context("serialize outbound message")?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}").context("write outbound message")?;
        writer.flush().context("flush outbound message")
    }
}

pub struct SessionDriver<P, S> {
    session: SessionClient,
    dispatcher: Arc<AskDispatcher<P>>,
    sink: Arc<S>,
    in_flight: JoinSet<()>,
}

impl<P, S> SessionDriver<P, S>
where
    P: Prompter + 'static,
    S: OutboundSink,
{
    pub fn new(session: SessionClient, dispatcher: AskDispatcher<P>, sink: S) -> Self {
        Self {
            session,
            dispatcher: Arc::new(dispatcher),
            sink: Arc::new(sink),
            in_flight: JoinSet::new(),
        }
    }

    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    pub fn dispatcher(&self) -> &AskDispatcher<P> {
        &self.dispatcher
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Ingest one raw payload and dispatch the final ask it leaves pending,
    /// if any. Returns whether the payload was applied.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_inbound(&mut self, raw: &str) -> bool {
        if !self.session.ingest_raw(raw) {
            debug!("inbound payload ignored");
            return false;
        }
        self.reap_finished();

        let Some(ask) = self
            .session
            .detected()
            .last_message
            .as_ref()
            .filter(|message| message.is_final_ask())
            .cloned()
        else {
            return true;
        };
        if self.dispatcher.is_handled(ask.id) {
            return true;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let sink = Arc::clone(&self.sink);
        let events = self.session.events().clone();
        self.in_flight.spawn(async move {
            let outcome = dispatcher.handle_ask(&ask).await;
            if let Some(err) = outcome.error {
                emit_error(&events, format!("ask {} ({}): {err:#}", ask.id, ask.subtype));
                return;
            }
            if let Some(response) = outcome.response {
                if let Err(err) = sink.send(response) {
                    emit_error(&events, format!("{err:#}"));
                }
            }
        });
        true
    }

    /// Wait for every in-flight dispatch to finish.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(err) = joined {
                error!(err = %err, "dispatch task failed");
            }
        }
    }

    /// Interrupt the task: open prompts resolve to their defaults, handled
    /// ids are forgotten, external session listeners are detached, and
    /// `cancelTask` is sent.
    pub fn cancel_task(&mut self) -> Result<()> {
        self.dispatcher.cancel();
        self.session.events().clear();
        self.sink.send(OutboundMessage::CancelTask)
    }

    /// Forget handled ids and ask the source to clear the task.
    pub fn clear_task(&mut self) -> Result<()> {
        self.dispatcher.clear();
        self.sink.send(OutboundMessage::ClearTask)
    }

    /// Forget handled ids and ask the source to start `text` as a new task.
    pub fn start_task(&mut self, text: &str) -> Result<()> {
        self.dispatcher.clear();
        self.sink.send(OutboundMessage::new_task(text))
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Err(err) = joined {
                error!(err = %err, "dispatch task failed");
            }
        }
    }
}

fn emit_error(events: &EventBus<SessionEvent>, error: String) {
    warn!(error = %error, "dispatch error");
    events.emit(&SessionEvent::Error { error });
}
