use crate::config::{Config, PipelineConfig, RoutingPolicy};
use crate::error::{ConfigError, RelayError, Result};
use crate::profile::AgentProfile;
use crate::skill::SkillRegistry;
use crate::types::Stage;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Skills, profiles, and pipeline assignments, loaded and cross-checked once
/// at startup and shared read-only by every running task.
#[derive(Debug)]
pub struct Catalog {
    registry: SkillRegistry,
    /// Declaration order.
    profiles: Vec<AgentProfile>,
    pipeline: PipelineConfig,
}

/// Where a Review went and which topic sent it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub agent: &'a AgentProfile,
    pub topic: Option<String>,
}

impl Catalog {
    /// Load every skill root and profile named by `config`. Any error here
    /// is a configuration error and nothing may run.
    pub fn load(root: &Path, config: &Config) -> Result<Self> {
        let registry = SkillRegistry::load(&config.skill_roots(root))?;
        let profiles = AgentProfile::load_dir(&config.agents_dir(root), &registry)?;
        tracing::info!(
            skills = registry.len(),
            profiles = profiles.len(),
            "catalog loaded"
        );
        Self::from_parts(registry, profiles, config.pipeline.clone())
    }

    pub fn from_parts(
        registry: SkillRegistry,
        profiles: Vec<AgentProfile>,
        pipeline: PipelineConfig,
    ) -> Result<Self> {
        let mut ids = HashSet::new();
        for p in &profiles {
            p.validate(&registry)?;
            if !ids.insert(p.id.as_str()) {
                return Err(ConfigError::InvalidProfile {
                    id: p.id.clone(),
                    reason: "declared more than once".into(),
                }
                .into());
            }
        }

        for p in &profiles {
            for (topic, target) in &p.domain_scope.defers_to {
                if !ids.contains(target.as_str()) {
                    return Err(ConfigError::UnknownAgent {
                        referrer: format!("agent '{}' (defers_to.{topic})", p.id),
                        agent: target.clone(),
                    }
                    .into());
                }
            }
        }

        for stage in Stage::all() {
            let agent = pipeline.agent_for(*stage);
            if !ids.contains(agent) {
                return Err(ConfigError::UnknownAgent {
                    referrer: format!("pipeline.{stage}"),
                    agent: agent.to_string(),
                }
                .into());
            }
        }

        Ok(Self {
            registry,
            profiles,
            pipeline,
        })
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn profile(&self, id: &str) -> Result<&AgentProfile> {
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| RelayError::AgentNotFound(id.to_string()))
    }

    /// The default agent for `stage`.
    pub fn agent_for(&self, stage: Stage) -> Result<&AgentProfile> {
        self.profile(self.pipeline.agent_for(stage))
    }

    pub fn match_skills(&self, text: &str, agent_id: &str) -> Result<BTreeSet<String>> {
        Ok(self.registry.matches(text, self.profile(agent_id)?))
    }

    /// Pick the reviewer for an artifact with `topics`.
    ///
    /// Topics are examined in order. The first one `default` defers routes
    /// to the deferred profile. A topic nobody on `default`'s side owns goes
    /// to the first declared profile handling it, unless the routing policy
    /// is `keep_default`. Routing is a single hop: the chosen profile's own
    /// deferrals are not followed.
    pub fn route<'a>(&'a self, default: &'a AgentProfile, topics: &[String]) -> Route<'a> {
        let scope = &default.domain_scope;
        for topic in topics {
            if let Some(target) = scope.defers_to.get(topic) {
                if let Ok(agent) = self.profile(target) {
                    return Route {
                        agent,
                        topic: Some(topic.clone()),
                    };
                }
            }
            if scope.handles(topic) || self.pipeline.routing == RoutingPolicy::KeepDefault {
                continue;
            }
            if let Some(agent) = self
                .profiles
                .iter()
                .find(|p| p.id != default.id && p.domain_scope.handles(topic))
            {
                return Route {
                    agent,
                    topic: Some(topic.clone()),
                };
            }
        }
        Route {
            agent: default,
            topic: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{RequirementCheck, RequirementStatement};
    use crate::profile::DomainScope;
    use tempfile::TempDir;

    fn profile(id: &str, handles: &[&str], defers: &[(&str, &str)]) -> AgentProfile {
        AgentProfile {
            id: id.to_string(),
            display_name: id.to_string(),
            allowed_tools: BTreeSet::from(["read".to_string()]),
            critical_requirements: vec![RequirementStatement {
                id: "ack".into(),
                statement: "acknowledge".into(),
                check: RequirementCheck::Attested,
            }],
            domain_scope: DomainScope {
                handles: handles.iter().map(|s| s.to_string()).collect(),
                defers_to: defers
                    .iter()
                    .map(|(t, a)| (t.to_string(), a.to_string()))
                    .collect(),
            },
            ..Default::default()
        }
    }

    fn pipeline_profiles(extra: Vec<AgentProfile>) -> Vec<AgentProfile> {
        let mut v = vec![
            profile("pm", &[], &[]),
            profile("developer", &[], &[]),
            profile("tester", &[], &[]),
        ];
        v.extend(extra);
        v
    }

    fn catalog(extra: Vec<AgentProfile>, routing: RoutingPolicy) -> Catalog {
        let pipeline = PipelineConfig {
            routing,
            ..Default::default()
        };
        Catalog::from_parts(SkillRegistry::default(), pipeline_profiles(extra), pipeline).unwrap()
    }

    #[test]
    fn defers_to_routes_review() {
        let cat = catalog(
            vec![
                profile("reviewer", &["api"], &[("react-component", "frontend-reviewer")]),
                profile("frontend-reviewer", &["react-component", "css"], &[]),
            ],
            RoutingPolicy::FirstDeclared,
        );
        let default = cat.agent_for(Stage::Review).unwrap();
        let topics = vec!["api".to_string(), "react-component".to_string()];
        let route = cat.route(default, &topics);
        assert_eq!(route.agent.id, "frontend-reviewer");
        assert_eq!(route.topic.as_deref(), Some("react-component"));

        let topics = vec!["api".to_string()];
        assert_eq!(cat.route(default, &topics).agent.id, "reviewer");
    }

    #[test]
    fn unowned_topic_follows_policy() {
        let extra = || {
            vec![
                profile("reviewer", &["api"], &[]),
                profile("db-reviewer", &["database"], &[]),
                profile("other-db", &["database"], &[]),
            ]
        };
        let topics = vec!["database".to_string()];

        let first = catalog(extra(), RoutingPolicy::FirstDeclared);
        let default = first.agent_for(Stage::Review).unwrap();
        assert_eq!(first.route(default, &topics).agent.id, "db-reviewer");

        let keep = catalog(extra(), RoutingPolicy::KeepDefault);
        let default = keep.agent_for(Stage::Review).unwrap();
        assert_eq!(keep.route(default, &topics).agent.id, "reviewer");
    }

    #[test]
    fn routing_is_single_hop() {
        let cat = catalog(
            vec![
                profile("reviewer", &[], &[("ui", "frontend-reviewer")]),
                profile("frontend-reviewer", &[], &[("ui", "reviewer")]),
            ],
            RoutingPolicy::FirstDeclared,
        );
        let default = cat.agent_for(Stage::Review).unwrap();
        let topics = vec!["ui".to_string()];
        assert_eq!(cat.route(default, &topics).agent.id, "frontend-reviewer");
    }

    #[test]
    fn unknown_defer_target_is_rejected() {
        let err = Catalog::from_parts(
            SkillRegistry::default(),
            pipeline_profiles(vec![profile("reviewer", &[], &[("ui", "ghost")])]),
            PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Config(ConfigError::UnknownAgent { ref agent, .. }) if agent == "ghost"
        ));
    }

    #[test]
    fn pipeline_agents_must_exist() {
        let err = Catalog::from_parts(
            SkillRegistry::default(),
            pipeline_profiles(vec![]),
            PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("pipeline.review"));
    }

    #[test]
    fn duplicate_profile_ids_are_rejected() {
        let err = Catalog::from_parts(
            SkillRegistry::default(),
            pipeline_profiles(vec![profile("reviewer", &[], &[]), profile("pm", &[], &[])]),
            PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn every_referenced_skill_resolves_after_load() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let skills = root.join(".relay/skills");
        std::fs::create_dir_all(skills.join("security")).unwrap();
        std::fs::write(skills.join("security/SKILL.md"), "Validate input.").unwrap();
        std::fs::write(
            skills.join("prisma.md"),
            "---\ntriggers: [prisma]\n---\nUse the singleton.",
        )
        .unwrap();

        let agents = root.join(".relay/agents");
        std::fs::create_dir_all(&agents).unwrap();
        for id in ["pm", "developer", "reviewer", "tester"] {
            std::fs::write(
                agents.join(format!("{id}.yaml")),
                format!(
                    "id: {id}\nallowed_tools: [read]\npreloaded_skills: [security]\ndynamic_skills:\n  db: prisma\ncritical_requirements:\n  - id: ack\n    statement: s\n"
                ),
            )
            .unwrap();
        }

        let cat = Catalog::load(root, &Config::new("demo")).unwrap();
        for p in cat.profiles() {
            for id in p.preloaded_skills.iter().chain(p.dynamic_skills.values()) {
                assert!(cat.registry().resolve(id).is_ok());
            }
        }
        assert_eq!(
            cat.match_skills("add a prisma model", "developer").unwrap(),
            BTreeSet::from(["prisma".to_string()])
        );
        assert!(matches!(
            cat.match_skills("x", "nobody"),
            Err(RelayError::AgentNotFound(_))
        ));
    }

    #[test]
    fn missing_preloaded_skill_fails_catalog_load() {
        let dir = TempDir::new().unwrap();
        let agents = dir.path().join(".relay/agents");
        std::fs::create_dir_all(&agents).unwrap();
        std::fs::write(
            agents.join("pm.yaml"),
            "id: pm\nallowed_tools: [read]\npreloaded_skills: [security]\ncritical_requirements:\n  - id: ack\n    statement: s\n",
        )
        .unwrap();
        let err = Catalog::load(dir.path(), &Config::new("demo")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("security"));
    }
}
