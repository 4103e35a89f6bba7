//! JSON File Store
//!
//! Persists every record as a pretty-printed JSON file under a state
//! directory:
//!
//! ```text
//! {state_dir}/definitions/{workflow_id}.json
//! {state_dir}/executions/{execution_id}.json
//! {state_dir}/steps/{execution_id}/{step_execution_id}.json
//! ```
//!
//! Each save writes a uniquely named temporary file and renames it over the
//! target, so readers never observe a partially written record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::execution::record::{StepExecution, WorkflowExecution};
use crate::workflow::model::WorkflowDefinition;

use super::{newest_first, oldest_first, PersistenceGateway};

const DEFINITIONS_DIR: &str = "definitions";
const EXECUTIONS_DIR: &str = "executions";
const STEPS_DIR: &str = "steps";

/// Rejects IDs that would escape their record directory.
fn checked_id(id: &str) -> Result<&str, PersistenceError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(PersistenceError::Backend(format!(
            "ID '{}' cannot be used as a record name",
            id
        )));
    }
    Ok(id)
}

/// Durable store writing one JSON file per record.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        for dir in [DEFINITIONS_DIR, EXECUTIONS_DIR, STEPS_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        info!("Using state directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, dir: &Path, id: &str) -> Result<PathBuf, PersistenceError> {
        Ok(dir.join(format!("{}.json", checked_id(id)?)))
    }

    fn steps_dir(&self, execution_id: &str) -> Result<PathBuf, PersistenceError> {
        Ok(self.root.join(STEPS_DIR).join(checked_id(execution_id)?))
    }

    async fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Saved record {}", path.display());
        Ok(())
    }

    async fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, PersistenceError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads every `*.json` record in a directory, skipping unreadable files.
    async fn read_all<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>, PersistenceError> {
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl PersistenceGateway for FileStore {
    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), PersistenceError> {
        let path = self.record_path(&self.root.join(DEFINITIONS_DIR), &definition.id)?;
        self.write_record(&path, definition).await
    }

    async fn get_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, PersistenceError> {
        let path = self.record_path(&self.root.join(DEFINITIONS_DIR), workflow_id)?;
        self.read_record(&path).await
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, PersistenceError> {
        let mut definitions: Vec<WorkflowDefinition> =
            self.read_all(&self.root.join(DEFINITIONS_DIR)).await?;
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), PersistenceError> {
        let path = self.record_path(&self.root.join(EXECUTIONS_DIR), &execution.execution_id)?;
        self.write_record(&path, execution).await
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, PersistenceError> {
        let path = self.record_path(&self.root.join(EXECUTIONS_DIR), execution_id)?;
        self.read_record(&path).await
    }

    async fn list_executions(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, PersistenceError> {
        let executions: Vec<WorkflowExecution> = self.read_all(&self.root.join(EXECUTIONS_DIR)).await?;
        let matching = executions
            .into_iter()
            .filter(|e| e.workflow_id == workflow_id)
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn save_step_execution(&self, step: &StepExecution) -> Result<(), PersistenceError> {
        let dir = self.steps_dir(&step.workflow_execution_id)?;
        fs::create_dir_all(&dir).await?;

        let path = self.record_path(&dir, &step.step_execution_id)?;
        self.write_record(&path, step).await
    }

    async fn list_step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>, PersistenceError> {
        let steps = self.read_all(&self.steps_dir(execution_id)?).await?;
        Ok(oldest_first(steps))
    }
}
