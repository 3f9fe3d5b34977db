//! Parent/child task delegation.
//!
//! [`DelegationCoordinator`] owns the live [`TaskStack`] and keeps each task's
//! persisted [`DelegationMeta`] in step with it. A delegating parent's record
//! is always durable before its child starts, so a crash between the two
//! leaves a parent marked `delegated` and a child that restarts cleanly.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::delegation::{DelegationMeta, DelegationStatus};
use crate::events::{EventBus, Subscription};
use crate::io::delegation_store::DelegationStore;

/// What a new task should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub text: String,
}

impl TaskSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// An open task. `parent_task_id` points into persisted history, not into the
/// stack; the parent may no longer be in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
    pub parent_task_id: Option<String>,
}

/// Runtime collaborator that owns task execution.
pub trait TaskHost {
    /// Create a task without starting it.
    fn create_task(&mut self, spec: &TaskSpec, parent_task_id: Option<&str>) -> Result<TaskHandle>;

    fn start_task(&mut self, task: &TaskHandle) -> Result<()>;

    /// Rehydrate a suspended task from history and bring it back to the foreground.
    fn resume_task(&mut self, task_id: &str) -> Result<TaskHandle>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationEvent {
    Delegated { parent_id: String, child_id: String },
    ParentRepaired { parent_id: String, child_id: String },
    ChildCompleted { parent_id: String, child_id: String },
}

/// Removal on a task id that is not open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNotOnStackError {
    pub task_id: String,
}

impl fmt::Display for TaskNotOnStackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' is not on the task stack", self.task_id)
    }
}

impl std::error::Error for TaskNotOnStackError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Leave the parent record untouched. Set when the removal is itself one
    /// step of a delegation, so a grandparent still awaiting this task is not
    /// repaired.
    pub skip_repair: bool,
}

impl RemoveOptions {
    pub fn skip_repair() -> Self {
        Self { skip_repair: true }
    }
}

/// Open tasks, most recently opened last.
#[derive(Debug, Default)]
pub struct TaskStack {
    tasks: Vec<TaskHandle>,
}

impl TaskStack {
    pub fn push(&mut self, task: TaskHandle) {
        self.tasks.push(task);
    }

    /// Remove `task_id` wherever it sits in the stack.
    pub fn remove(&mut self, task_id: &str) -> Option<TaskHandle> {
        let idx = self.tasks.iter().rposition(|task| task.task_id == task_id)?;
        Some(self.tasks.remove(idx))
    }

    /// The foreground task.
    pub fn top(&self) -> Option<&TaskHandle> {
        self.tasks.last()
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskHandle> {
        self.tasks.iter().rev().find(|task| task.task_id == task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.get(task_id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.task_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

pub struct DelegationCoordinator<S, H> {
    store: S,
    host: H,
    stack: TaskStack,
    events: EventBus<DelegationEvent>,
}

impl<S: DelegationStore, H: TaskHost> DelegationCoordinator<S, H> {
    pub fn new(store: S, host: H) -> Self {
        Self {
            store,
            host,
            stack: TaskStack::default(),
            events: EventBus::new(),
        }
    }

    pub fn stack(&self) -> &TaskStack {
        &self.stack
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn events(&self) -> &EventBus<DelegationEvent> {
        &self.events
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DelegationEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// Create and start a top-level task, recording it as `active` unless a
    /// record already exists.
    #[instrument(skip_all)]
    pub fn open_root(&mut self, spec: &TaskSpec) -> Result<TaskHandle> {
        let task = self.host.create_task(spec, None).context("create root task")?;
        if self.read_record(&task.task_id)?.is_none() {
            self.write_record(&task.task_id, &DelegationMeta::default())?;
        }
        self.stack.push(task.clone());
        self.host
            .start_task(&task)
            .with_context(|| format!("start task '{}'", task.task_id))?;
        info!(task_id = %task.task_id, "opened root task");
        Ok(task)
    }

    /// Hand the foreground from `parent_id` to a new child task.
    ///
    /// Order: pop parent, create child, record the child as `active`, persist
    /// the parent as `delegated`, then start the child. If creation or persistence fails the parent is put
    /// back and the child is never started.
    #[instrument(skip_all, fields(parent_id = %parent_id))]
    pub fn delegate(&mut self, parent_id: &str, child_spec: &TaskSpec) -> Result<TaskHandle> {
        let parent = self.remove_task(parent_id, RemoveOptions::skip_repair())?;

        let child = match self.create_and_persist(parent_id, child_spec) {
            Ok(child) => child,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "delegation aborted before child start");
                self.stack.push(parent);
                return Err(err);
            }
        };

        self.stack.push(child.clone());
        self.host
            .start_task(&child)
            .with_context(|| format!("start child task '{}'", child.task_id))?;

        info!(child_id = %child.task_id, "delegated to child");
        self.events.emit(&DelegationEvent::Delegated {
            parent_id: parent_id.to_string(),
            child_id: child.task_id.clone(),
        });
        Ok(child)
    }

    fn create_and_persist(&mut self, parent_id: &str, child_spec: &TaskSpec) -> Result<TaskHandle> {
        let child = self
            .host
            .create_task(child_spec, Some(parent_id))
            .context("create child task")?;
        self.write_record(&child.task_id, &DelegationMeta::default())?;
        let mut meta = self.read_record(parent_id)?.unwrap_or_default();
        meta.mark_delegated(&child.task_id);
        self.write_record(parent_id, &meta)?;
        Ok(child)
    }

    /// Pop `task_id` off the stack, repairing its parent unless told not to.
    ///
    /// Repair is best-effort: record failures are logged and never block the
    /// pop. The only error is a task that is not open.
    #[instrument(skip_all, fields(task_id = %task_id, skip_repair = options.skip_repair))]
    pub fn remove_task(&mut self, task_id: &str, options: RemoveOptions) -> Result<TaskHandle> {
        let task = self.stack.remove(task_id).ok_or_else(|| TaskNotOnStackError {
            task_id: task_id.to_string(),
        })?;

        if options.skip_repair {
            debug!("removed task without parent repair");
            return Ok(task);
        }
        if let Some(parent_id) = task.parent_task_id.as_deref() {
            self.repair_parent(parent_id, task_id);
        }
        Ok(task)
    }

    fn repair_parent(&self, parent_id: &str, child_id: &str) {
        let mut meta = match self.store.read(parent_id) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                debug!(parent_id, "parent has no delegation record; nothing to repair");
                return;
            }
            Err(err) => {
                warn!(parent_id, err = %format!("{err:#}"), "parent repair skipped: read failed");
                return;
            }
        };

        if !meta.repair_after_child_removed(child_id) {
            debug!(parent_id, status = ?meta.status, "parent not awaiting removed task");
            return;
        }
        if let Err(err) = self.store.write(parent_id, &meta) {
            warn!(parent_id, err = %format!("{err:#}"), "parent repair skipped: write failed");
            return;
        }

        info!(parent_id, "parent returned to active after child removal");
        self.events.emit(&DelegationEvent::ParentRepaired {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
        });
    }

    /// Finish `child_id` and return the foreground to its parent.
    ///
    /// Returns the resumed parent, or `None` for a root task.
    #[instrument(skip_all, fields(child_id = %child_id))]
    pub fn complete_child(
        &mut self,
        child_id: &str,
        result_summary: Option<String>,
    ) -> Result<Option<TaskHandle>> {
        let parent_id = self
            .stack
            .get(child_id)
            .ok_or_else(|| TaskNotOnStackError {
                task_id: child_id.to_string(),
            })?
            .parent_task_id
            .clone();

        let mut child_meta = self.read_record(child_id)?.unwrap_or_default();
        child_meta.mark_completed();
        self.write_record(child_id, &child_meta)?;
        self.remove_task(child_id, RemoveOptions::skip_repair())?;

        let Some(parent_id) = parent_id else {
            info!("root task completed");
            return Ok(None);
        };

        let mut parent_meta = self.read_record(&parent_id)?.unwrap_or_default();
        if !parent_meta.is_awaiting(child_id) {
            warn!(parent_id = %parent_id, status = ?parent_meta.status, "completed child was not the awaited one");
        }
        parent_meta.record_child_completion(child_id, result_summary);
        self.write_record(&parent_id, &parent_meta)?;

        let parent = self
            .host
            .resume_task(&parent_id)
            .with_context(|| format!("resume parent task '{parent_id}'"))?;
        self.stack.push(parent.clone());

        info!(parent_id = %parent_id, "child completed; parent resumed");
        self.events.emit(&DelegationEvent::ChildCompleted {
            parent_id,
            child_id: child_id.to_string(),
        });
        Ok(Some(parent))
    }

    /// Task that should be in the foreground after a restart; see [`resume_target`].
    pub fn resume_target(&self, task_id: &str) -> Result<String> {
        resume_target(&self.store, task_id)
    }

    fn read_record(&self, task_id: &str) -> Result<Option<DelegationMeta>> {
        self.store
            .read(task_id)
            .with_context(|| format!("read delegation record for '{task_id}'"))
    }

    fn write_record(&self, task_id: &str, meta: &DelegationMeta) -> Result<()> {
        self.store
            .write(task_id, meta)
            .with_context(|| format!("write delegation record for '{task_id}'"))
    }
}

/// Follow the chain of awaited children from `task_id` to the task that
/// should be in the foreground after a restart.
pub fn resume_target<S: DelegationStore>(store: &S, task_id: &str) -> Result<String> {
    let mut current = task_id.to_string();
    let mut seen = HashSet::new();
    loop {
        if !seen.insert(current.clone()) {
            warn!(task_id = %current, "delegation cycle detected; stopping");
            return Ok(current);
        }
        let meta = store
            .read(&current)
            .with_context(|| format!("read delegation record for '{current}'"))?;
        match meta {
            Some(DelegationMeta {
                status: DelegationStatus::Delegated,
                awaiting_child_id: Some(child),
                ..
            }) => current = child,
            _ => return Ok(current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryDelegationStore, OrderLog, RecordingHost};
    use std::sync::{Arc, Mutex};

    type Coordinator = DelegationCoordinator<MemoryDelegationStore, RecordingHost>;

    fn coordinator() -> (Coordinator, OrderLog) {
        let log = OrderLog::default();
        let coordinator = DelegationCoordinator::new(
            MemoryDelegationStore::with_log(log.clone()),
            RecordingHost::with_log(log.clone()),
        );
        (coordinator, log)
    }

    fn delegated_to(child: &str) -> DelegationMeta {
        let mut meta = DelegationMeta::default();
        meta.mark_delegated(child);
        meta
    }

    fn collect_events(coordinator: &Coordinator) -> (Arc<Mutex<Vec<DelegationEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = coordinator.subscribe(move |event| sink.lock().expect("lock").push(event.clone()));
        (seen, sub)
    }

    /// The child's record and then the parent's are persisted between child creation and child start.
    #[test]
    fn delegate_persists_parent_before_starting_child() {
        let (mut coordinator, log) = coordinator();
        let root = coordinator.open_root(&TaskSpec::new("root")).expect("root");
        log.clear();

        let child = coordinator
            .delegate(&root.task_id, &TaskSpec::new("child"))
            .expect("delegate");

        let order = log.entries_matching(&["create:", "write:", "start:"]);
        assert_eq!(
            order,
            vec![
                format!("create:{}", child.task_id),
                format!("write:{}", child.task_id),
                format!("write:{}", root.task_id),
                format!("start:{}", child.task_id),
            ]
        );
        assert_eq!(
            coordinator.store().get(&child.task_id),
            Some(DelegationMeta::default())
        );

        let meta = coordinator
            .store()
            .get(&root.task_id)
            .expect("parent record");
        assert_eq!(meta.status, DelegationStatus::Delegated);
        assert_eq!(meta.awaiting_child_id.as_deref(), Some(child.task_id.as_str()));
        assert_eq!(meta.delegated_to_id.as_deref(), Some(child.task_id.as_str()));
        assert_eq!(meta.child_ids, vec![child.task_id.clone()]);
        assert_eq!(coordinator.stack().ids(), vec![child.task_id.as_str()]);
        assert_eq!(child.parent_task_id.as_deref(), Some(root.task_id.as_str()));
    }

    /// A failed parent write leaves the child unstarted and the parent in the foreground.
    #[test]
    fn delegate_does_not_start_child_when_persist_fails() {
        let (mut coordinator, log) = coordinator();
        let root = coordinator.open_root(&TaskSpec::new("root")).expect("root");
        coordinator.store().fail_writes_for(&root.task_id);
        log.clear();

        let err = coordinator
            .delegate(&root.task_id, &TaskSpec::new("child"))
            .expect_err("persist failure");
        assert!(format!("{err:#}").contains("write delegation record"));
        assert!(log.entries_matching(&["start:"]).is_empty());
        assert_eq!(coordinator.stack().ids(), vec![root.task_id.as_str()]);
    }

    #[test]
    fn delegate_emits_event_with_both_ids() {
        let (mut coordinator, _log) = coordinator();
        let (events, _sub) = collect_events(&coordinator);
        let root = coordinator.open_root(&TaskSpec::new("root")).expect("root");
        let child = coordinator
            .delegate(&root.task_id, &TaskSpec::new("child"))
            .expect("delegate");

        assert_eq!(
            *events.lock().expect("lock"),
            vec![DelegationEvent::Delegated {
                parent_id: root.task_id,
                child_id: child.task_id,
            }]
        );
    }

    /// skip_repair never touches the store, even when the parent awaits this task.
    #[test]
    fn skip_repair_never_reads_or_writes_parent() {
        let (mut coordinator, log) = coordinator();
        let root = coordinator.open_root(&TaskSpec::new("root")).expect("root");
        let child = coordinator
            .delegate(&root.task_id, &TaskSpec::new("child"))
            .expect("delegate");
        log.clear();

        coordinator
            .remove_task(&child.task_id, RemoveOptions::skip_repair())
            .expect("remove");

        assert!(log.entries_matching(&["read:", "write:"]).is_empty());
        assert_eq!(
            coordinator.store().get(&root.task_id).expect("record").status,
            DelegationStatus::Delegated
        );
        assert!(coordinator.stack().is_empty());
    }

    /// Removing the awaited child flips the parent back to active.
    #[test]
    fn remove_repairs_parent_awaiting_removed_child() {
        let (mut coordinator, _log) = coordinator();
        let (events, _sub) = collect_events(&coordinator);
        let root = coordinator.open_root(&TaskSpec::new("root")).expect("root");
        let child = coordinator
            .delegate(&root.task_id, &TaskSpec::new("child"))
            .expect("delegate");

        coordinator
            .remove_task(&child.task_id, RemoveOptions::default())
            .expect("remove");

        let meta = coordinator.store().get(&root.task_id).expect("record");
        assert_eq!(meta.status, DelegationStatus::Active);
        assert!(meta.awaiting_child_id.is_none());
        assert_eq!(meta.child_ids, vec![child.task_id.clone()]);
        assert!(events.lock().expect("lock").contains(&DelegationEvent::ParentRepaired {
            parent_id: root.task_id,
            child_id: child.task_id,
        }));
    }

    /// A parent awaiting a different child is left alone and never rewritten.
    #[test]
    fn remove_does_not_write_when_parent_awaits_other_child() {
        let (mut coordinator, log) = coordinator();
        coordinator
            .store()
            .insert("parent", delegated_to("other-child"));
        coordinator.stack.push(TaskHandle {
            task_id: "stale-child".to_string(),
            parent_task_id: Some("parent".to_string()),
        });

        coordinator
            .remove_task("stale-child", RemoveOptions::default())
            .expect("remove");

        assert_eq!(log.entries_matching(&["read:"]), vec!["read:parent"]);
        assert!(log.entries_matching(&["write:"]).is_empty());
        assert_eq!(
            coordinator.store().get("parent").expect("record"),
            delegated_to("other-child")
        );
    }

    /// Record failures during repair are logged, not raised; the pop still happens.
    #[test]
    fn repair_failure_does_not_block_pop() {
        let (mut coordinator, _log) = coordinator();
        coordinator.store().insert("parent", delegated_to("child"));
        coordinator.store().fail_reads_for("parent");
        coordinator.stack.push(TaskHandle {
            task_id: "child".to_string(),
            parent_task_id: Some("parent".to_string()),
        });

        coordinator
            .remove_task("child", RemoveOptions::default())
            .expect("pop succeeds");
        assert!(coordinator.stack().is_empty());
    }

    #[test]
    fn removing_unknown_task_is_typed_error() {
        let (mut coordinator, _log) = coordinator();
        let err = coordinator
            .remove_task("ghost", RemoveOptions::default())
            .expect_err("not on stack");
        let typed = err.downcast_ref::<TaskNotOnStackError>().expect("typed error");
        assert_eq!(typed.task_id, "ghost");
    }

    /// Nested delegation: removing the grandchild as part of a further
    /// delegation leaves the grandparent waiting on the parent.
    #[test]
    fn nested_delegation_keeps_grandparent_waiting() {
        let (mut coordinator, _log) = coordinator();
        let grandparent = coordinator.open_root(&TaskSpec::new("gp")).expect("root");
        let parent = coordinator
            .delegate(&grandparent.task_id, &TaskSpec::new("parent"))
            .expect("delegate parent");
        let child = coordinator
            .delegate(&parent.task_id, &TaskSpec::new("child"))
            .expect("delegate child");

        let gp_meta = coordinator.store().get(&grandparent.task_id).expect("gp");
        assert!(gp_meta.is_awaiting(&parent.task_id));
        let parent_meta = coordinator.store().get(&parent.task_id).expect("parent");
        assert!(parent_meta.is_awaiting(&child.task_id));
        assert_eq!(coordinator.stack().ids(), vec![child.task_id.as_str()]);
        assert_eq!(
            coordinator.resume_target(&grandparent.task_id).expect("target"),
            child.task_id
        );
    }

    /// Completion records the child result on the parent and resumes it.
    #[test]
    fn complete_child_returns_foreground_to_parent() {
        let (mut coordinator, log) = coordinator();
        let (events, _sub) = collect_events(&coordinator);
        let root = coordinator.open_root(&TaskSpec::new("root")).expect("root");
        let child = coordinator
            .delegate(&root.task_id, &TaskSpec::new("child"))
            .expect("delegate");

        let resumed = coordinator
            .complete_child(&child.task_id, Some("all tests pass".to_string()))
            .expect("complete")
            .expect("parent");

        assert_eq!(resumed.task_id, root.task_id);
        assert_eq!(coordinator.stack().ids(), vec![root.task_id.as_str()]);

        let parent_meta = coordinator.store().get(&root.task_id).expect("parent");
        assert_eq!(parent_meta.status, DelegationStatus::Active);
        assert!(parent_meta.awaiting_child_id.is_none());
        assert_eq!(parent_meta.completed_by_child_id.as_deref(), Some(child.task_id.as_str()));
        assert_eq!(
            parent_meta.completion_result_summary.as_deref(),
            Some("all tests pass")
        );
        assert!(parent_meta.validate().is_empty());
        assert_eq!(
            coordinator.store().get(&child.task_id).expect("child").status,
            DelegationStatus::Completed
        );

        let order = log.entries_matching(&["write:", "resume:"]);
        assert_eq!(order.last(), Some(&format!("resume:{}", root.task_id)));
        assert!(events.lock().expect("lock").contains(&DelegationEvent::ChildCompleted {
            parent_id: root.task_id.clone(),
            child_id: child.task_id,
        }));
        assert_eq!(coordinator.resume_target(&root.task_id).expect("target"), root.task_id);
    }

    /// Legacy tasks without a record resolve to themselves.
    #[test]
    fn resume_target_of_legacy_task_is_itself() {
        let (coordinator, _log) = coordinator();
        assert_eq!(coordinator.resume_target("legacy").expect("target"), "legacy");
    }

    #[test]
    fn resume_target_stops_on_cycle() {
        let (coordinator, _log) = coordinator();
        coordinator.store().insert("a", delegated_to("b"));
        coordinator.store().insert("b", delegated_to("a"));
        assert_eq!(coordinator.resume_target("a").expect("target"), "a");
    }
}
