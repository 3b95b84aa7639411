use crate::error::{RelayError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RELAY_DIR: &str = ".relay";
pub const TASKS_DIR: &str = ".relay/tasks";
pub const AGENTS_DIR: &str = ".relay/agents";
pub const SKILLS_DIR: &str = ".relay/skills";

pub const CONFIG_FILE: &str = ".relay/config.yaml";

pub const TASK_FILE: &str = "task.yaml";
pub const HISTORY_DIR: &str = "history";
pub const WORK_DIR: &str = "work";
pub const CURRENT_POINTER: &str = "current.yaml";
pub const CURRENT_MD: &str = "current.md";
pub const CANCEL_MARKER: &str = "cancel";
pub const RUN_LOCK: &str = "run.lock";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn relay_dir(root: &Path) -> PathBuf {
    root.join(RELAY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn task_dir(root: &Path, task_id: &str) -> PathBuf {
    root.join(TASKS_DIR).join(task_id)
}

pub fn task_manifest(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(TASK_FILE)
}

pub fn history_dir(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(HISTORY_DIR)
}

pub fn work_dir(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(WORK_DIR)
}

pub fn current_pointer(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(CURRENT_POINTER)
}

pub fn current_md(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(CURRENT_MD)
}

pub fn cancel_marker(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(CANCEL_MARKER)
}

pub fn run_lock(root: &Path, task_id: &str) -> PathBuf {
    task_dir(root, task_id).join(RUN_LOCK)
}

// ---------------------------------------------------------------------------
// Task id validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Task ids become directory names, so they are restricted to short
/// lowercase slugs.
pub fn validate_task_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !slug_re().is_match(id) {
        return Err(RelayError::InvalidTaskId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_task_ids() {
        for id in ["auth-login", "a", "task-123", "x1"] {
            validate_task_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_task_ids() {
        for id in ["", "-lead", "trail-", "has spaces", "UPPER", "a_b", "../up"] {
            assert!(validate_task_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.relay/config.yaml")
        );
        assert_eq!(
            task_manifest(root, "auth"),
            PathBuf::from("/tmp/proj/.relay/tasks/auth/task.yaml")
        );
        assert_eq!(
            current_pointer(root, "auth"),
            PathBuf::from("/tmp/proj/.relay/tasks/auth/current.yaml")
        );
    }
}
