use crate::error::{RelayError, Result};
use crate::gate::RequirementCheckResult;
use crate::paths;
use crate::types::{Stage, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// StageTransition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub entered: DateTime<Utc>,
    pub exited: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work driven through the pipeline, plus its progress. The task
/// context that pre-gates evaluate is the title, description, topics, and
/// free-form attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub status: TaskStatus,
    pub stage: Stage,
    /// Revisions requested on the current stage. Reset on advance.
    #[serde(default)]
    pub revisions: u32,
    #[serde(default)]
    pub stage_history: Vec<StageTransition>,
    /// Failed requirements behind the last block, revision, or failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RequirementCheckResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            topics: Vec::new(),
            attributes: BTreeMap::new(),
            status: TaskStatus::Pending,
            stage: Stage::Spec,
            revisions: 0,
            stage_history: vec![StageTransition {
                stage: Stage::Spec,
                entered: now,
                exited: None,
            }],
            failures: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    /// Validate the id and persist `task` as a new task.
    pub fn create(root: &Path, task: Task) -> Result<Self> {
        paths::validate_task_id(&task.id)?;
        if paths::task_dir(root, &task.id).exists() {
            return Err(RelayError::TaskExists(task.id));
        }
        task.save(root)?;
        Ok(task)
    }

    pub fn load(root: &Path, id: &str) -> Result<Self> {
        paths::validate_task_id(id)?;
        let manifest = paths::task_manifest(root, id);
        if !manifest.exists() {
            return Err(RelayError::TaskNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&manifest)?;
        let task: Task = serde_yaml::from_str(&data)?;
        Ok(task)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let manifest = paths::task_manifest(root, &self.id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&manifest, data.as_bytes())
    }

    pub fn list(root: &Path) -> Result<Vec<Self>> {
        let tasks_dir = root.join(paths::TASKS_DIR);
        if !tasks_dir.exists() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(&tasks_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let id = entry.file_name().to_string_lossy().into_owned();
                match Self::load(root, &id) {
                    Ok(t) => tasks.push(t),
                    Err(RelayError::TaskNotFound(_) | RelayError::InvalidTaskId(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    // ---------------------------------------------------------------------------
    // Context
    // ---------------------------------------------------------------------------

    /// Look up a context field: `title`, `description`, or an attribute.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        let value = match key {
            "title" => Some(self.title.as_str()),
            "description" => Some(self.description.as_str()),
            _ => self.attributes.get(key).map(String::as_str),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Text searched for dynamic skill triggers.
    pub fn trigger_text(&self) -> String {
        let mut text = format!("{}\n{}", self.title, self.description);
        for topic in &self.topics {
            text.push('\n');
            text.push_str(topic);
        }
        text
    }

    // ---------------------------------------------------------------------------
    // Progress
    // ---------------------------------------------------------------------------

    pub fn advance_to(&mut self, stage: Stage) {
        let now = Utc::now();
        if let Some(last) = self.stage_history.last_mut() {
            last.exited = Some(now);
        }
        self.stage = stage;
        self.status = TaskStatus::Pending;
        self.revisions = 0;
        self.failures.clear();
        self.stage_history.push(StageTransition {
            stage,
            entered: now,
            exited: None,
        });
        self.updated_at = now;
    }

    pub fn set_status(&mut self, status: TaskStatus, failures: Vec<RequirementCheckResult>) {
        if status == TaskStatus::Done {
            if let Some(last) = self.stage_history.last_mut() {
                last.exited.get_or_insert_with(Utc::now);
            }
        }
        self.status = status;
        self.failures = failures;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut task = Task::new("auth-login", "Add login");
        task.topics.push("api".into());
        task.attributes.insert("research".into(), "read routes/".into());
        Task::create(dir.path(), task).unwrap();

        let loaded = Task::load(dir.path(), "auth-login").unwrap();
        assert_eq!(loaded.title, "Add login");
        assert_eq!(loaded.stage, Stage::Spec);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.context_value("research"), Some("read routes/"));
    }

    #[test]
    fn create_rejects_duplicates_and_bad_ids() {
        let dir = TempDir::new().unwrap();
        Task::create(dir.path(), Task::new("t1", "One")).unwrap();
        assert!(matches!(
            Task::create(dir.path(), Task::new("t1", "Again")),
            Err(RelayError::TaskExists(_))
        ));
        assert!(matches!(
            Task::create(dir.path(), Task::new("Bad Id", "x")),
            Err(RelayError::InvalidTaskId(_))
        ));
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Task::load(dir.path(), "nope"),
            Err(RelayError::TaskNotFound(_))
        ));
    }

    #[test]
    fn load_rejects_ids_outside_tasks_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".relay/x")).unwrap();
        std::fs::write(dir.path().join(".relay/x/task.yaml"), "id: x\n").unwrap();
        for id in ["../x", "../../etc", "a/b"] {
            assert!(
                matches!(Task::load(dir.path(), id), Err(RelayError::InvalidTaskId(_))),
                "expected invalid: {id}"
            );
        }
    }

    #[test]
    fn blank_context_values_count_as_missing() {
        let mut task = Task::new("t1", "Title");
        task.attributes.insert("research".into(), "   ".into());
        assert_eq!(task.context_value("title"), Some("Title"));
        assert_eq!(task.context_value("description"), None);
        assert_eq!(task.context_value("research"), None);
    }

    #[test]
    fn advance_resets_revisions_and_records_history() {
        let mut task = Task::new("t1", "Title");
        task.revisions = 2;
        task.advance_to(Stage::Implementation);
        assert_eq!(task.stage, Stage::Implementation);
        assert_eq!(task.revisions, 0);
        assert_eq!(task.stage_history.len(), 2);
        assert!(task.stage_history[0].exited.is_some());
        assert!(task.stage_history[1].exited.is_none());
    }

    #[test]
    fn list_sorts_by_creation() {
        let dir = TempDir::new().unwrap();
        Task::create(dir.path(), Task::new("first", "1")).unwrap();
        Task::create(dir.path(), Task::new("second", "2")).unwrap();
        let ids: Vec<_> = Task::list(dir.path())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, ["first", "second"]);
    }
}
