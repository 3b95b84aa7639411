use std::path::PathBuf;
use thiserror::Error;

/// Problems with skills, profiles, or config found while loading. These
/// are fatal: no task may start until they are fixed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate skill id '{id}': defined in {} and {}", first.display(), second.display())]
    DuplicateSkillId {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("invalid skill file {}: {reason}", path.display())]
    InvalidSkill { path: PathBuf, reason: String },

    #[error("invalid agent profile '{id}': {reason}")]
    InvalidProfile { id: String, reason: String },

    #[error("{referrer} references unknown agent '{agent}'")]
    UnknownAgent { referrer: String, agent: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("not initialized: run 'relay init'")]
    NotInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task already exists: {0}")]
    TaskExists(String),

    #[error("invalid task id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidTaskId(String),

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("task '{task}' cannot run: {reason}")]
    TaskNotRunnable { task: String, reason: String },

    #[error("artifact {seq} already recorded for task '{task}'")]
    ArtifactExists { task: String, seq: u32 },

    #[error("agent execution failed: {0}")]
    Executor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// True for errors raised while loading configuration, skills, or
    /// profiles, as opposed to errors local to a single task.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RelayError::Config(_) | RelayError::NotInitialized)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_classified() {
        let err: RelayError = ConfigError::InvalidProfile {
            id: "pm".into(),
            reason: "unknown skill 'security' in preloaded_skills".into(),
        }
        .into();
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "invalid agent profile 'pm': unknown skill 'security' in preloaded_skills"
        );
        assert!(!RelayError::TaskNotFound("t1".into()).is_configuration());
    }

    #[test]
    fn duplicate_skill_message_names_both_sources() {
        let err = ConfigError::DuplicateSkillId {
            id: "tailwind".into(),
            first: PathBuf::from("a/tailwind.md"),
            second: PathBuf::from("b/tailwind/SKILL.md"),
        };
        let msg = err.to_string();
        assert!(msg.contains("a/tailwind.md"));
        assert!(msg.contains("b/tailwind/SKILL.md"));
    }
}
