//! Per-task delegation record storage.
//!
//! Records live at `<root>/<task_id>/delegation.json`. A missing file means a
//! task that predates delegation bookkeeping; callers treat it as `active`
//! with no children.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::delegation::DelegationMeta;
use crate::io::fs_atomic::write_atomic;

const DELEGATION_SCHEMA: &str = include_str!("../../schemas/delegation_meta.schema.json");
const RECORD_FILE: &str = "delegation.json";

/// Read/write access to persisted delegation records.
pub trait DelegationStore {
    /// Load the record for `task_id`; `Ok(None)` when no record exists.
    fn read(&self, task_id: &str) -> Result<Option<DelegationMeta>>;

    /// Durably replace the record for `task_id`.
    fn write(&self, task_id: &str, meta: &DelegationMeta) -> Result<()>;
}

/// Filesystem store with schema validation and atomic replacement.
pub struct FileDelegationStore {
    root: PathBuf,
    schema: Validator,
}

impl FileDelegationStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let schema_value: Value =
            serde_json::from_str(DELEGATION_SCHEMA).context("parse delegation schema")?;
        let schema = validator_for(&schema_value)
            .map_err(|err| anyhow!("invalid delegation schema: {}", err))?;
        Ok(Self {
            root: root.into(),
            schema,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, task_id: &str) -> Result<PathBuf> {
        validate_task_id(task_id)?;
        Ok(self.root.join(task_id).join(RECORD_FILE))
    }

    fn validate_schema(&self, path: &Path, value: &Value) -> Result<()> {
        if self.schema.is_valid(value) {
            return Ok(());
        }
        let messages = self
            .schema
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(anyhow!(
            "delegation record {} failed schema validation: {}",
            path.display(),
            messages.join("; ")
        ))
    }
}

impl DelegationStore for FileDelegationStore {
    fn read(&self, task_id: &str) -> Result<Option<DelegationMeta>> {
        let path = self.record_path(task_id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(task_id, "no delegation record, treating as legacy active task");
                return Ok(None);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read delegation record {}", path.display()));
            }
        };
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse delegation record {}", path.display()))?;
        self.validate_schema(&path, &value)?;
        let meta: DelegationMeta = serde_json::from_value(value)
            .with_context(|| format!("deserialize delegation record {}", path.display()))?;

        let violations = meta.validate();
        if !violations.is_empty() {
            warn!(task_id, violations = %violations.join("; "), "delegation record violates invariants");
        }
        Ok(Some(meta))
    }

    fn write(&self, task_id: &str, meta: &DelegationMeta) -> Result<()> {
        let path = self.record_path(task_id)?;
        debug!(task_id, status = ?meta.status, path = %path.display(), "writing delegation record");
        let mut buf = serde_json::to_string_pretty(meta).context("serialize delegation record")?;
        buf.push('\n');
        write_atomic(&path, buf.as_bytes())
    }
}

/// Task ids become directory names; reject anything that could escape the root.
fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.is_empty()
        || task_id == "."
        || task_id == ".."
        || task_id.contains(['/', '\\'])
    {
        return Err(anyhow!("invalid task id '{}'", task_id));
    }
    Ok(())
}
