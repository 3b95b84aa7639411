use crate::error::{ConfigError, RelayError, Result};
use crate::paths;
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SkillsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillsConfig {
    /// Directories scanned for skills, relative to the project root.
    #[serde(default = "default_skill_roots")]
    pub roots: Vec<String>,
}

fn default_skill_roots() -> Vec<String> {
    vec![paths::SKILLS_DIR.to_string()]
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            roots: default_skill_roots(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// How a Review topic that the default reviewer neither handles nor defers
/// is routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// The first declared profile that handles the topic takes the review.
    #[default]
    FirstDeclared,
    /// The default reviewer keeps it.
    KeepDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_spec_agent")]
    pub spec: String,
    #[serde(default = "default_implementation_agent")]
    pub implementation: String,
    #[serde(default = "default_review_agent")]
    pub review: String,
    #[serde(default = "default_test_report_agent")]
    pub test_report: String,
    /// Revisions allowed per stage before the task fails.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    #[serde(default)]
    pub routing: RoutingPolicy,
}

fn default_spec_agent() -> String {
    "pm".to_string()
}

fn default_implementation_agent() -> String {
    "developer".to_string()
}

fn default_review_agent() -> String {
    "reviewer".to_string()
}

fn default_test_report_agent() -> String {
    "tester".to_string()
}

fn default_max_revisions() -> u32 {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            spec: default_spec_agent(),
            implementation: default_implementation_agent(),
            review: default_review_agent(),
            test_report: default_test_report_agent(),
            max_revisions: default_max_revisions(),
            routing: RoutingPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// The default agent for a stage.
    pub fn agent_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::Spec => &self.spec,
            Stage::Implementation => &self.implementation,
            Stage::Review => &self.review,
            Stage::TestReport => &self.test_report,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Shell command that runs one agent invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    1800
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_seconds: default_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_version() -> u32 {
    1
}

fn default_agents_dir() -> String {
    paths::AGENTS_DIR.to_string()
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            skills: SkillsConfig::default(),
            agents_dir: default_agents_dir(),
            pipeline: PipelineConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RelayError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| ConfigError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn skill_roots(&self, root: &Path) -> Vec<PathBuf> {
        self.skills.roots.iter().map(|r| root.join(r)).collect()
    }

    pub fn agents_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.agents_dir)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let p = &self.pipeline;

        if p.max_revisions == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "pipeline.max_revisions is 0: any failed post-check fails the task"
                    .to_string(),
            });
        } else if p.max_revisions > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "pipeline.max_revisions={} (>10 is unusual)",
                    p.max_revisions
                ),
            });
        }

        for stage in Stage::all() {
            if p.agent_for(*stage).trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("pipeline.{stage} names no agent"),
                });
            }
        }

        if p.implementation == p.review {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "'{}' both implements and reviews; consider a separate reviewer",
                    p.review
                ),
            });
        }

        match self.executor.command.as_deref().map(str::trim) {
            None | Some("") => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "executor.command is not set: 'relay run' cannot invoke agents"
                    .to_string(),
            }),
            Some(_) => {}
        }
        if self.executor.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "executor.timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.skills.roots.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "skills.roots is empty: no skills will be loaded".to_string(),
            });
        }

        warnings
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
    fn default_config_roundtrip() {
        let cfg = Config::new("test-project");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.name, "test-project");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.pipeline.max_revisions, 3);
        assert_eq!(parsed.pipeline.routing, RoutingPolicy::FirstDeclared);
        assert_eq!(parsed.skills.roots, [".relay/skills"]);
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let yaml = "project:\n  name: demo\npipeline:\n  review: backend-reviewer\n  routing: keep_default\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.pipeline.spec, "pm");
        assert_eq!(cfg.pipeline.agent_for(Stage::Review), "backend-reviewer");
        assert_eq!(cfg.pipeline.routing, RoutingPolicy::KeepDefault);
        assert_eq!(cfg.executor.timeout_seconds, 1800);
        assert_eq!(cfg.agents_dir, ".relay/agents");
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(RelayError::NotInitialized)
        ));
    }

    #[test]
    fn malformed_config_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = paths::config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "project:\n  name: demo\npipline: {}\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("demo");
        cfg.executor.command = Some("./agent.sh".into());
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.executor.command.as_deref(), Some("./agent.sh"));
        assert_eq!(
            loaded.skill_roots(dir.path()),
            [dir.path().join(".relay/skills")]
        );
    }

    #[test]
    fn validate_flags_unusual_settings() {
        let mut cfg = Config::new("demo");
        cfg.pipeline.max_revisions = 0;
        cfg.pipeline.review = "developer".into();
        cfg.executor.timeout_seconds = 0;
        let messages: Vec<String> = cfg.validate().into_iter().map(|w| w.message).collect();
        assert!(messages.iter().any(|m| m.contains("max_revisions is 0")));
        assert!(messages.iter().any(|m| m.contains("both implements and reviews")));
        assert!(messages.iter().any(|m| m.contains("executor.command")));
        assert!(messages.iter().any(|m| m.contains("timeout_seconds")));
    }

    #[test]
    fn validate_clean_config() {
        let mut cfg = Config::new("demo");
        cfg.executor.command = Some("./agent.sh".into());
        assert!(cfg.validate().is_empty());
    }
}
