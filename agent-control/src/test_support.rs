//! Test-only builders and scripted collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::json;

use crate::core::delegation::DelegationMeta;
use crate::core::types::{Message, MessageKind};
use crate::delegation::{TaskHandle, TaskHost, TaskSpec};
use crate::driver::OutboundSink;
use crate::events::{EventBus, Subscription};
use crate::io::delegation_store::{DelegationStore, FileDelegationStore};
use crate::io::prompt::{ConfirmRequest, Prompter, TextRequest};
use crate::io::wire::OutboundMessage;
use crate::session::{SessionClient, SessionEvent};

fn message(id: u64, kind: MessageKind, subtype: &str, text: &str, partial: bool) -> Message {
    Message {
        id,
        kind,
        subtype: subtype.to_string(),
        partial,
        text: (!text.is_empty()).then(|| text.to_string()),
        reasoning: None,
    }
}

/// Final `say` message; empty text becomes `None`.
pub fn say(id: u64, subtype: &str, text: &str) -> Message {
    message(id, MessageKind::Say, subtype, text, false)
}

/// Final `ask` message; empty text becomes `None`.
pub fn ask(id: u64, subtype: &str, text: &str) -> Message {
    message(id, MessageKind::Ask, subtype, text, false)
}

pub fn partial_ask(id: u64, subtype: &str, text: &str) -> Message {
    message(id, MessageKind::Ask, subtype, text, true)
}

/// `say:"api_req_started"` with the given JSON payload text.
pub fn api_req_started(id: u64, payload: &str) -> Message {
    say(id, "api_req_started", payload)
}

/// Serialize a `state` snapshot payload.
pub fn snapshot_json(messages: &[Message], mode: Option<&str>, seq: Option<u64>) -> String {
    let mut state = json!({ "messages": messages });
    if let Some(mode) = mode {
        state["mode"] = json!(mode);
    }
    let mut payload = json!({ "type": "state", "state": state });
    if let Some(seq) = seq {
        payload["seq"] = json!(seq);
    }
    payload.to_string()
}

/// Serialize a `messageUpdated` payload.
pub fn update_json(message: &Message) -> String {
    json!({ "type": "messageUpdated", "message": message }).to_string()
}

/// Records every event published on a bus while attached.
pub struct EventLog<E> {
    events: Arc<Mutex<Vec<E>>>,
    _subscription: Subscription,
}

impl EventLog<SessionEvent> {
    pub fn attach(session: &SessionClient) -> Self {
        Self::attach_bus(session.events())
    }
}

impl<E: Clone + Send + 'static> EventLog<E> {
    pub fn attach_bus(bus: &EventBus<E>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = bus.subscribe(move |event: &E| {
            sink.lock().expect("event log lock").push(event.clone());
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().expect("event log lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event log lock").clear();
    }
}

/// One scripted prompt answer, consumed in order.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Confirm(Option<bool>),
    Text(Option<String>),
    /// Never answers; only cancellation or a timeout ends the prompt.
    Hang,
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCall {
    Confirm(ConfirmRequest),
    Text(TextRequest),
}

/// Prompter that replays a fixed script and records every request.
#[derive(Default)]
pub struct ScriptedPrompter {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<PromptCall>>,
}

impl ScriptedPrompter {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PromptCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn next(&self, call: PromptCall) -> Option<ScriptedReply> {
        self.calls.lock().expect("calls lock").push(call);
        self.replies.lock().expect("replies lock").pop_front()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, request: ConfirmRequest) -> Result<Option<bool>> {
        match self.next(PromptCall::Confirm(request)) {
            Some(ScriptedReply::Confirm(answer)) => Ok(answer),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            other => bail!("unexpected confirm prompt; next scripted reply: {other:?}"),
        }
    }

    async fn ask_text(&self, request: TextRequest) -> Result<Option<String>> {
        match self.next(PromptCall::Text(request)) {
            Some(ScriptedReply::Text(answer)) => Ok(answer),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            other => bail!("unexpected text prompt; next scripted reply: {other:?}"),
        }
    }
}

/// Shared, ordered record of collaborator calls (`create:<id>`, `write:<id>`, ...).
#[derive(Debug, Clone, Default)]
pub struct OrderLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl OrderLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().expect("order log lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("order log lock").clone()
    }

    /// Entries starting with any of `prefixes`, in call order.
    pub fn entries_matching(&self, prefixes: &[&str]) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| prefixes.iter().any(|prefix| entry.starts_with(prefix)))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("order log lock").clear();
    }
}

/// In-memory delegation store with call logging and failure injection.
#[derive(Default)]
pub struct MemoryDelegationStore {
    records: Mutex<HashMap<String, DelegationMeta>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    log: OrderLog,
}

impl MemoryDelegationStore {
    pub fn with_log(log: OrderLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Seed a record without logging a write.
    pub fn insert(&self, task_id: &str, meta: DelegationMeta) {
        self.records
            .lock()
            .expect("records lock")
            .insert(task_id.to_string(), meta);
    }

    /// Inspect a record without logging a read.
    pub fn get(&self, task_id: &str) -> Option<DelegationMeta> {
        self.records.lock().expect("records lock").get(task_id).cloned()
    }

    pub fn fail_reads_for(&self, task_id: &str) {
        self.failing_reads
            .lock()
            .expect("failing reads lock")
            .insert(task_id.to_string());
    }

    pub fn fail_writes_for(&self, task_id: &str) {
        self.failing_writes
            .lock()
            .expect("failing writes lock")
            .insert(task_id.to_string());
    }
}

impl DelegationStore for MemoryDelegationStore {
    fn read(&self, task_id: &str) -> Result<Option<DelegationMeta>> {
        self.log.record(format!("read:{task_id}"));
        if self.failing_reads.lock().expect("failing reads lock").contains(task_id) {
            bail!("injected read failure for '{task_id}'");
        }
        Ok(self.get(task_id))
    }

    fn write(&self, task_id: &str, meta: &DelegationMeta) -> Result<()> {
        self.log.record(format!("write:{task_id}"));
        if self.failing_writes.lock().expect("failing writes lock").contains(task_id) {
            bail!("injected write failure for '{task_id}'");
        }
        self.insert(task_id, meta.clone());
        Ok(())
    }
}

/// Filesystem store rooted in a fresh temp directory (kept alive by the guard).
pub fn temp_store() -> (tempfile::TempDir, FileDelegationStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileDelegationStore::new(dir.path().join("tasks")).expect("store");
    (dir, store)
}

/// Task host that hands out `task-<n>` ids and logs every call.
#[derive(Debug, Default)]
pub struct RecordingHost {
    next_id: u64,
    parents: HashMap<String, Option<String>>,
    log: OrderLog,
}

impl RecordingHost {
    pub fn with_log(log: OrderLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }
}

impl TaskHost for RecordingHost {
    fn create_task(&mut self, _spec: &TaskSpec, parent_task_id: Option<&str>) -> Result<TaskHandle> {
        self.next_id += 1;
        let task = TaskHandle {
            task_id: format!("task-{}", self.next_id),
            parent_task_id: parent_task_id.map(str::to_string),
        };
        self.parents
            .insert(task.task_id.clone(), task.parent_task_id.clone());
        self.log.record(format!("create:{}", task.task_id));
        Ok(task)
    }

    fn start_task(&mut self, task: &TaskHandle) -> Result<()> {
        self.log.record(format!("start:{}", task.task_id));
        Ok(())
    }

    fn resume_task(&mut self, task_id: &str) -> Result<TaskHandle> {
        self.log.record(format!("resume:{task_id}"));
        let parent_task_id = self
            .parents
            .get(task_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown task '{task_id}'"))?;
        Ok(TaskHandle {
            task_id: task_id.to_string(),
            parent_task_id,
        })
    }
}

/// Outbound sink that keeps everything it was sent.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sink lock").clone()
    }
}

impl OutboundSink for RecordingSink {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        self.sent.lock().expect("sink lock").push(message);
        Ok(())
    }
}
