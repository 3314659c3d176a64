// ABOUTME: File-backed execution store writing one JSON document per execution
// ABOUTME: Survives process restarts so executions can be inspected and resumed

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{ExecutionFilter, ExecutionStore, Result, StoreError};
use crate::engine::Execution;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on the first save.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", execution_id))
    }
}

#[async_trait]
impl ExecutionStore for FileStore {
    async fn save(&self, execution: &Execution) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let path = self.path_for(&execution.id);
        let json = serde_json::to_string_pretty(execution)?;
        fs::write(&path, json).await?;

        debug!("Persisted execution {} to {}", execution.id, path.display());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Execution> {
        let path = self.path_for(execution_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    execution_id: execution_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        let mut executions = Vec::new();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(executions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            let execution: Execution = serde_json::from_str(&content)?;
            if filter.matches(&execution) {
                executions.push(execution);
            }
        }

        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutionStatus, StepStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let mut execution = Execution::new("wf", vec!["a".to_string()]);
        execution
            .steps
            .get_mut("a")
            .unwrap()
            .mark_terminal(StepStatus::Succeeded, 1, None);
        execution.status = ExecutionStatus::Completed;

        store.save(&execution).await.unwrap();
        let loaded = store.load(&execution.id).await.unwrap();

        assert_eq!(loaded.id, execution.id);
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.step_status("a"), Some(StepStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_missing_execution() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let store = FileStore::new("/tmp/lodestar-store-does-not-exist");
        let listed = store.list(&ExecutionFilter::default()).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_by_workflow() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store
            .save(&Execution::new("alpha", vec!["a".to_string()]))
            .await
            .unwrap();
        store
            .save(&Execution::new("beta", vec!["a".to_string()]))
            .await
            .unwrap();

        let filter = ExecutionFilter {
            workflow_id: Some("beta".to_string()),
            status: None,
        };
        let listed = store.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_id, "beta");
    }
}
