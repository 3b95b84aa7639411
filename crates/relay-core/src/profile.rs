use crate::error::{ConfigError, Result};
use crate::gate::RequirementStatement;
use crate::skill::SkillRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// DomainScope
// ---------------------------------------------------------------------------

/// Topics a role owns, and the roles it hands other topics to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainScope {
    #[serde(default)]
    pub handles: Vec<String>,
    #[serde(default)]
    pub defers_to: BTreeMap<String, String>,
}

impl DomainScope {
    pub fn handles(&self, topic: &str) -> bool {
        self.handles.iter().any(|h| h == topic)
    }

    /// Topics neither handled nor deferred. A scope that handles nothing is
    /// unrestricted.
    pub fn unowned(&self, topics: &[String]) -> Vec<String> {
        if self.handles.is_empty() {
            return Vec::new();
        }
        topics
            .iter()
            .filter(|t| !self.handles(t) && !self.defers_to.contains_key(t.as_str()))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// AgentProfile
// ---------------------------------------------------------------------------

/// Static description of a role, loaded from `.relay/agents/<id>.yaml`.
///
/// ```yaml
/// id: backend-reviewer
/// display_name: Backend Reviewer
/// allowed_tools: [read, grep]
/// preloaded_skills: [security]
/// dynamic_skills:
///   websockets: websocket-patterns
/// critical_requirements:
///   - id: verify-all
///     statement: Every spec criterion has verification evidence
///     check: { type: criteria_verified }
/// domain_scope:
///   handles: [api, database]
///   defers_to: { react-component: frontend-reviewer }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    #[serde(default)]
    pub preloaded_skills: Vec<String>,
    /// Trigger name to skill id.
    #[serde(default)]
    pub dynamic_skills: BTreeMap<String, String>,
    #[serde(default)]
    pub critical_requirements: Vec<RequirementStatement>,
    #[serde(default)]
    pub domain_scope: DomainScope,
}

impl AgentProfile {
    /// Parse and validate one profile file against the registry.
    pub fn load(path: &Path, registry: &SkillRegistry) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut profile: AgentProfile =
            serde_yaml::from_str(&data).map_err(|e| ConfigError::InvalidProfile {
                id: label,
                reason: e.to_string(),
            })?;
        if profile.display_name.is_empty() {
            profile.display_name = profile.id.clone();
        }
        profile.validate(registry)?;
        Ok(profile)
    }

    /// Every `*.yaml` / `*.yml` under `dir`, in file-name order. That order
    /// is the profile declaration order used by domain routing.
    pub fn load_dir(dir: &Path, registry: &SkillRegistry) -> Result<Vec<Self>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::load(p, registry)).collect()
    }

    /// Checks that need nothing beyond the profile and the registry.
    /// Cross-profile references are checked by the catalog.
    pub fn validate(&self, registry: &SkillRegistry) -> Result<()> {
        let invalid = |reason: String| ConfigError::InvalidProfile {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty".into()).into());
        }
        if self.allowed_tools.is_empty() {
            return Err(invalid("allowed_tools is empty".into()).into());
        }
        if self.critical_requirements.is_empty() {
            return Err(invalid("critical_requirements is empty".into()).into());
        }

        let mut seen = BTreeSet::new();
        for req in &self.critical_requirements {
            if req.id.trim().is_empty() {
                return Err(invalid("a critical requirement has an empty id".into()).into());
            }
            if !seen.insert(req.id.as_str()) {
                return Err(invalid(format!("duplicate requirement id '{}'", req.id)).into());
            }
        }

        for id in &self.preloaded_skills {
            if !registry.contains(id) {
                return Err(invalid(format!("unknown skill '{id}' in preloaded_skills")).into());
            }
        }
        for (trigger, id) in &self.dynamic_skills {
            if !registry.contains(id) {
                return Err(invalid(format!(
                    "unknown skill '{id}' for dynamic trigger '{trigger}'"
                ))
                .into());
            }
        }

        for (topic, target) in &self.domain_scope.defers_to {
            if self.domain_scope.handles(topic) {
                return Err(invalid(format!("topic '{topic}' is both handled and deferred")).into());
            }
            if target == &self.id {
                return Err(invalid(format!("topic '{topic}' defers to itself")).into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
