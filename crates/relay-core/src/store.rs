//! Append-only hand-off history, one directory per task:
//!
//! ```text
//! .relay/tasks/<id>/
//!   history/0001-spec.yaml
//!   history/0002-implementation.yaml
//!   current.yaml      pointer at the latest record
//!   current.md        rendering of the latest record
//!   run.lock          held while a sequencer runs the task
//! ```
//!
//! History files are created with no-clobber semantics and never rewritten.
//! Only the pointer and its rendering change.

use crate::artifact::{ArtifactRecord, ArtifactRef, HandoffArtifact};
use crate::error::{RelayError, Result};
use crate::gate::RequirementCheckResult;
use crate::io;
use crate::paths;
use crate::types::{Disposition, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

// ---------------------------------------------------------------------------
// CurrentPointer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPointer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<Disposition>,
    #[serde(default)]
    pub cancelled: bool,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

pub struct ArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-task lock. Appends for one task serialize; other tasks proceed.
    fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(task_id.to_string()).or_default())
    }

    /// Record `artifact` as the next history entry for the task and move
    /// the current pointer to it.
    pub fn append(
        &self,
        task_id: &str,
        artifact: HandoffArtifact,
        disposition: Disposition,
        audit: Vec<RequirementCheckResult>,
    ) -> Result<ArtifactRef> {
        if !paths::task_manifest(&self.root, task_id).exists() {
            return Err(RelayError::TaskNotFound(task_id.to_string()));
        }
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let history_dir = paths::history_dir(&self.root, task_id);
        let seq = next_seq(&history_dir)?;
        let record = ArtifactRecord {
            seq,
            task_id: task_id.to_string(),
            disposition,
            recorded_at: Utc::now(),
            artifact,
            audit,
        };

        let path = history_dir.join(format!("{seq:04}-{}.yaml", record.artifact.stage));
        let data = serde_yaml::to_string(&record)?;
        match io::write_new(&path, data.as_bytes()) {
            Err(RelayError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(RelayError::ArtifactExists {
                    task: task_id.to_string(),
                    seq,
                });
            }
            other => other?,
        }

        let pointer = CurrentPointer {
            seq: Some(seq),
            stage: Some(record.artifact.stage),
            disposition: Some(disposition),
            cancelled: false,
            updated_at: record.recorded_at,
        };
        self.write_current(task_id, &pointer, Some(&record))?;

        tracing::debug!(
            task = task_id,
            seq,
            stage = %record.artifact.stage,
            disposition = %disposition,
            "artifact recorded"
        );
        Ok(ArtifactRef {
            task_id: task_id.to_string(),
            seq,
            path,
        })
    }

    /// Every record for the task in append order.
    pub fn history(&self, task_id: &str) -> Result<Vec<ArtifactRecord>> {
        let dir = paths::history_dir(&self.root, task_id);
        let mut records = Vec::new();
        for path in history_files(&dir)? {
            let data = std::fs::read_to_string(&path)?;
            let record: ArtifactRecord = serde_yaml::from_str(&data)?;
            records.push(record);
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    /// Latest accepted record of `stage`.
    pub fn latest_of_stage(&self, task_id: &str, stage: Stage) -> Result<Option<ArtifactRecord>> {
        Ok(self
            .history(task_id)?
            .into_iter()
            .rev()
            .find(|r| r.is_accepted() && r.artifact.stage == stage))
    }

    pub fn current(&self, task_id: &str) -> Result<Option<CurrentPointer>> {
        let path = paths::current_pointer(&self.root, task_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_yaml::from_str(&data)?))
    }

    /// Flag the current pointer cancelled. History is left untouched.
    pub fn mark_cancelled(&self, task_id: &str) -> Result<()> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut pointer = self.current(task_id)?.unwrap_or(CurrentPointer {
            seq: None,
            stage: None,
            disposition: None,
            cancelled: false,
            updated_at: Utc::now(),
        });
        pointer.cancelled = true;
        pointer.updated_at = Utc::now();

        let latest = self.history(task_id)?.pop();
        self.write_current(task_id, &pointer, latest.as_ref())
    }

    fn write_current(
        &self,
        task_id: &str,
        pointer: &CurrentPointer,
        record: Option<&ArtifactRecord>,
    ) -> Result<()> {
        let data = serde_yaml::to_string(pointer)?;
        io::atomic_write(&paths::current_pointer(&self.root, task_id), data.as_bytes())?;

        let mut md = String::new();
        if pointer.cancelled {
            md.push_str("> **Cancelled.** This task will not advance further.\n\n");
        }
        match record {
            Some(r) => {
                md.push_str(&format!("<!-- record {} ({}) -->\n", r.seq, r.disposition));
                md.push_str(&r.artifact.render_markdown());
                let failed: Vec<_> = r.failures().collect();
                if !failed.is_empty() {
                    md.push_str("\n## Unmet requirements\n\n");
                    for f in failed {
                        md.push_str(&format!("- **{}** {}\n", f.requirement, f.detail));
                    }
                }
            }
            None => md.push_str("_No artifacts recorded._\n"),
        }
        io::atomic_write(&paths::current_md(&self.root, task_id), md.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// History file paths in name order. `NNNN-` prefixes make that seq order.
fn history_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| parse_seq(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

fn parse_seq(path: &Path) -> Option<u32> {
    if path.extension()? != "yaml" {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    let (prefix, _) = name.split_once('-')?;
    prefix.parse().ok()
}

fn next_seq(dir: &Path) -> Result<u32> {
    let max = history_files(dir)?
        .iter()
        .filter_map(|p| parse_seq(p))
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactDraft, Criterion};
    use crate::task::Task;
    use tempfile::TempDir;

    fn setup(ids: &[&str]) -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        for id in ids {
            Task::create(dir.path(), Task::new(*id, "title")).unwrap();
        }
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    fn artifact(stage: Stage, summary: &str) -> HandoffArtifact {
        HandoffArtifact::from_draft(
            stage,
            "pm",
            ArtifactDraft {
                summary: summary.into(),
                success_criteria: vec![Criterion {
                    id: "c1".into(),
                    description: "works".into(),
                }],
                ..Default::default()
            },
        )
    }

    #[test]
    fn append_assigns_sequential_files() {
        let (dir, store) = setup(&["t1"]);
        let a = store
            .append("t1", artifact(Stage::Spec, "v1"), Disposition::NeedsRevision, vec![])
            .unwrap();
        let b = store
            .append("t1", artifact(Stage::Spec, "v2"), Disposition::Accepted, vec![])
            .unwrap();
        assert_eq!((a.seq, b.seq), (1, 2));
        assert!(dir.path().join(".relay/tasks/t1/history/0001-spec.yaml").exists());
        assert!(b.path.ends_with("0002-spec.yaml"));

        let pointer = store.current("t1").unwrap().unwrap();
        assert_eq!(pointer.seq, Some(2));
        assert_eq!(pointer.disposition, Some(Disposition::Accepted));
        let md = std::fs::read_to_string(paths::current_md(dir.path(), "t1")).unwrap();
        assert!(md.contains("v2"));
    }

    #[test]
    fn history_only_grows() {
        let (_dir, store) = setup(&["t1"]);
        let mut seen: Vec<ArtifactRecord> = Vec::new();
        for (i, stage) in Stage::all().iter().enumerate() {
            store
                .append("t1", artifact(*stage, &format!("s{i}")), Disposition::Accepted, vec![])
                .unwrap();
            let now = store.history("t1").unwrap();
            assert_eq!(now.len(), seen.len() + 1);
            assert_eq!(&now[..seen.len()], &seen[..]);
            seen = now;
        }
    }

    #[test]
    fn latest_of_stage_skips_revisions() {
        let (_dir, store) = setup(&["t1"]);
        store
            .append("t1", artifact(Stage::Spec, "accepted"), Disposition::Accepted, vec![])
            .unwrap();
        store
            .append("t1", artifact(Stage::Spec, "rejected"), Disposition::NeedsRevision, vec![])
            .unwrap();
        let latest = store.latest_of_stage("t1", Stage::Spec).unwrap().unwrap();
        assert_eq!(latest.artifact.summary, "accepted");
        assert!(store.latest_of_stage("t1", Stage::Review).unwrap().is_none());
    }

    #[test]
    fn append_never_overwrites_existing_files() {
        let (dir, store) = setup(&["t1"]);
        store
            .append("t1", artifact(Stage::Spec, "first"), Disposition::Accepted, vec![])
            .unwrap();
        let stray = dir.path().join(".relay/tasks/t1/history/0002-spec.yaml");
        std::fs::write(&stray, "not a record").unwrap();

        let next = store
            .append("t1", artifact(Stage::Implementation, "second"), Disposition::Accepted, vec![])
            .unwrap();
        assert_eq!(next.seq, 3);
        assert_eq!(std::fs::read_to_string(stray).unwrap(), "not a record");
    }

    #[test]
    fn append_to_unknown_task_fails() {
        let (_dir, store) = setup(&[]);
        let err = store
            .append("ghost", artifact(Stage::Spec, "x"), Disposition::Accepted, vec![])
            .unwrap_err();
        assert!(matches!(err, RelayError::TaskNotFound(_)));
    }

    #[test]
    fn mark_cancelled_keeps_history() {
        let (dir, store) = setup(&["t1"]);
        store
            .append("t1", artifact(Stage::Spec, "spec"), Disposition::Accepted, vec![])
            .unwrap();
        store.mark_cancelled("t1").unwrap();

        let pointer = store.current("t1").unwrap().unwrap();
        assert!(pointer.cancelled);
        assert_eq!(pointer.seq, Some(1));
        assert_eq!(store.history("t1").unwrap().len(), 1);
        let md = std::fs::read_to_string(paths::current_md(dir.path(), "t1")).unwrap();
        assert!(md.starts_with("> **Cancelled.**"));
    }

    #[test]
    fn concurrent_appends_across_tasks() {
        let ids = ["a", "b", "c", "d"];
        let (_dir, store) = setup(&ids);
        std::thread::scope(|s| {
            for id in ids {
                let store = &store;
                s.spawn(move || {
                    for i in 0..10 {
                        let a = artifact(Stage::Spec, &format!("{id}{i}"));
                        store
                            .append(id, a, Disposition::NeedsRevision, vec![])
                            .unwrap();
                    }
                });
            }
        });
        for id in ids {
            let history = store.history(id).unwrap();
            let seqs: Vec<u32> = history.iter().map(|r| r.seq).collect();
            assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
            assert!(history.iter().all(|r| r.task_id == id));
        }
    }
}
