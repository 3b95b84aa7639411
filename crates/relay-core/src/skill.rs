//! Skill discovery, resolution, and trigger matching.
//!
//! A skill is a markdown document with optional YAML front matter:
//!
//! ```markdown
//! ---
//! name: prisma-patterns
//! description: Schema and query conventions for Prisma.
//! triggers: [prisma, schema migration, database]
//! preloaded_by: [backend-developer]
//! invocation: /prisma
//! ---
//!
//! Full instructions for the agent...
//! ```
//!
//! Without a `name`, a `SKILL.md` file takes its directory's name and any
//! other `*.md` file takes its file stem. A directory holding a `SKILL.md`
//! is one skill; sibling documents inside it are reference material and are
//! not registered separately.

use crate::error::{ConfigError, RelayError, Result};
use crate::profile::AgentProfile;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const SKILL_FILENAME: &str = "SKILL.md";
const MAX_DEPTH: usize = 4;

#[derive(Debug, Default, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    triggers: Vec<String>,
    #[serde(default)]
    preloaded_by: Vec<String>,
    #[serde(default)]
    invocation: Option<String>,
}

// ---------------------------------------------------------------------------
// Skill
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skill {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger_patterns: BTreeSet<String>,
    pub preloaded_by: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_invocation_name: Option<String>,
    pub content: String,
    pub source: PathBuf,
}

impl Skill {
    /// Parse a skill document. `fallback_id` is used when the front matter
    /// does not name the skill.
    pub fn parse(path: &Path, fallback_id: &str, raw: &str) -> Result<Self> {
        let (front, body) = split_frontmatter(raw);
        let meta: SkillFrontmatter = match front {
            Some(yaml) if !yaml.trim().is_empty() => {
                serde_yaml::from_str(&yaml).map_err(|e| ConfigError::InvalidSkill {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?
            }
            _ => SkillFrontmatter::default(),
        };

        let id = meta
            .name
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| fallback_id.to_string());
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidSkill {
                path: path.to_path_buf(),
                reason: format!("skill id '{id}' must be non-empty and contain no whitespace"),
            }
            .into());
        }

        Ok(Self {
            id,
            description: meta.description,
            trigger_patterns: meta
                .triggers
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            preloaded_by: meta.preloaded_by.into_iter().collect(),
            dynamic_invocation_name: meta.invocation.filter(|s| !s.trim().is_empty()),
            content: body.trim().to_string(),
            source: path.to_path_buf(),
        })
    }

    /// Every phrase that activates this skill: its trigger patterns plus its
    /// invocation name, if any.
    fn patterns(&self) -> impl Iterator<Item = &str> {
        self.trigger_patterns
            .iter()
            .map(String::as_str)
            .chain(self.dynamic_invocation_name.as_deref())
    }
}

/// Split `---` delimited YAML front matter from the body. Documents without
/// front matter are all body.
fn split_frontmatter(raw: &str) -> (Option<String>, String) {
    let mut lines = raw.lines();
    if !matches!(lines.next(), Some(first) if first.trim() == "---") {
        return (None, raw.to_string());
    }

    let mut front = Vec::new();
    let mut body = Vec::new();
    let mut closed = false;
    for line in lines {
        if closed {
            body.push(line);
        } else if line.trim() == "---" {
            closed = true;
        } else {
            front.push(line);
        }
    }

    if !closed {
        return (None, raw.to_string());
    }
    (Some(front.join("\n")), body.join("\n"))
}

// ---------------------------------------------------------------------------
// Tokenizing
// ---------------------------------------------------------------------------

/// Lowercase alphanumeric runs. `react-component`, `React component` and
/// `react_component` all tokenize to `["react", "component"]`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(haystack: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty()
        && phrase.len() <= haystack.len()
        && haystack.windows(phrase.len()).any(|w| w == phrase)
}

// ---------------------------------------------------------------------------
// SkillRegistry
// ---------------------------------------------------------------------------

/// Immutable index of every skill found under the configured roots.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Skill>,
}

impl SkillRegistry {
    /// Scan each root once. Missing roots are skipped; the same id appearing
    /// twice, in one root or across roots, is an error.
    pub fn load(roots: &[PathBuf]) -> Result<Self> {
        let mut registry = Self::default();
        for root in roots {
            if !root.is_dir() {
                tracing::debug!(root = %root.display(), "skill root missing, skipping");
                continue;
            }
            let mut found = Vec::new();
            discover(root, 0, &mut found)?;
            for (path, fallback_id) in found {
                let raw = std::fs::read_to_string(&path)?;
                registry.insert(Skill::parse(&path, &fallback_id, &raw)?)?;
            }
        }
        tracing::info!(count = registry.skills.len(), "loaded skills");
        Ok(registry)
    }

    /// Build a registry from already-parsed skills.
    pub fn from_skills(skills: impl IntoIterator<Item = Skill>) -> Result<Self> {
        let mut registry = Self::default();
        for skill in skills {
            registry.insert(skill)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, skill: Skill) -> Result<()> {
        if let Some(existing) = self.skills.get(&skill.id) {
            return Err(ConfigError::DuplicateSkillId {
                id: skill.id.clone(),
                first: existing.source.clone(),
                second: skill.source.clone(),
            }
            .into());
        }
        self.skills.insert(skill.id.clone(), skill);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<&Skill> {
        self.skills
            .get(id)
            .ok_or_else(|| RelayError::SkillNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// All skills, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    /// Dynamic skills the agent may invoke whose trigger phrases occur in
    /// `text`.
    ///
    /// Only skills listed in the profile's `dynamic_skills` are candidates.
    /// The trigger name under which the profile declares a skill counts as
    /// one more pattern. Pure: the same registry, profile and text always
    /// give the same set.
    pub fn matches(&self, text: &str, agent: &AgentProfile) -> BTreeSet<String> {
        let haystack = tokenize(text);
        let mut matched = BTreeSet::new();
        for (trigger, skill_id) in &agent.dynamic_skills {
            let Some(skill) = self.skills.get(skill_id) else {
                continue;
            };
            let hit = std::iter::once(trigger.as_str())
                .chain(skill.patterns())
                .any(|p| contains_phrase(&haystack, &tokenize(p)));
            if hit {
                matched.insert(skill_id.clone());
            }
        }
        matched
    }

    /// Skills attached to every invocation of `agent`: its declared preloads
    /// in order, then skills that name the agent in `preloaded_by`.
    pub fn preloaded_for(&self, agent: &AgentProfile) -> Result<Vec<&Skill>> {
        let mut out: Vec<&Skill> = Vec::new();
        for id in &agent.preloaded_skills {
            let skill = self.resolve(id)?;
            if !out.iter().any(|s| s.id == skill.id) {
                out.push(skill);
            }
        }
        for skill in self.skills.values() {
            if skill.preloaded_by.contains(&agent.id) && !out.iter().any(|s| s.id == skill.id) {
                out.push(skill);
            }
        }
        Ok(out)
    }
}

/// Collect `(path, fallback_id)` for every skill document under `dir`, in
/// sorted path order so loading is deterministic.
fn discover(dir: &Path, depth: usize, out: &mut Vec<(PathBuf, String)>) -> Result<()> {
    if depth > MAX_DEPTH {
        return Ok(());
    }

    let marker = dir.join(SKILL_FILENAME);
    if marker.is_file() {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push((marker, id));
        return Ok(());
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            discover(&path, depth + 1, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push((path, stem));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn skill(id: &str, triggers: &[&str]) -> Skill {
        Skill {
            id: id.to_string(),
            description: None,
            trigger_patterns: triggers.iter().map(|t| t.to_string()).collect(),
            preloaded_by: BTreeSet::new(),
            dynamic_invocation_name: None,
            content: format!("# {id}"),
            source: PathBuf::from(format!("{id}.md")),
        }
    }

    fn agent(id: &str, dynamic: &[(&str, &str)]) -> AgentProfile {
        AgentProfile {
            id: id.to_string(),
            dynamic_skills: dynamic
                .iter()
                .map(|(t, s)| (t.to_string(), s.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn loads_frontmatter_and_directory_skills() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "prisma.md",
            "---\nname: prisma-patterns\ntriggers: [Prisma, schema migration]\ninvocation: /prisma\n---\n\nUse the client singleton.\n",
        );
        write(dir.path(), "security/SKILL.md", "Validate all input.\n");
        write(dir.path(), "security/reference.md", "not a skill");

        let reg = SkillRegistry::load(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(reg.len(), 2);

        let prisma = reg.resolve("prisma-patterns").unwrap();
        assert!(prisma.trigger_patterns.contains("prisma"));
        assert!(prisma.trigger_patterns.contains("schema migration"));
        assert_eq!(prisma.dynamic_invocation_name.as_deref(), Some("/prisma"));
        assert_eq!(prisma.content, "Use the client singleton.");

        let security = reg.resolve("security").unwrap();
        assert_eq!(security.content, "Validate all input.");
        assert!(!reg.contains("reference"));
    }

    #[test]
    fn duplicate_ids_across_roots_fail_fast() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write(a.path(), "tailwind.md", "one");
        write(b.path(), "tailwind/SKILL.md", "two");

        let err = SkillRegistry::load(&[a.path().to_path_buf(), b.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Config(ConfigError::DuplicateSkillId { ref id, .. }) if id == "tailwind"
        ));
    }

    #[test]
    fn missing_roots_are_skipped() {
        let dir = TempDir::new().unwrap();
        let reg = SkillRegistry::load(&[dir.path().join("nope")]).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn malformed_frontmatter_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.md", "---\ntriggers: [unclosed\n---\nbody");
        let err = SkillRegistry::load(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let reg = SkillRegistry::default();
        assert!(matches!(
            reg.resolve("security"),
            Err(RelayError::SkillNotFound(_))
        ));
    }

    #[test]
    fn matches_phrases_case_insensitively() {
        let reg = SkillRegistry::from_skills([
            skill("websockets", &["web socket", "realtime"]),
            skill("prisma-patterns", &["prisma"]),
        ])
        .unwrap();
        let dev = agent(
            "developer",
            &[("ws", "websockets"), ("db", "prisma-patterns")],
        );

        let hit = reg.matches("Add a Web-Socket channel for chat", &dev);
        assert_eq!(hit, BTreeSet::from(["websockets".to_string()]));

        let none = reg.matches("websocket", &dev);
        assert!(none.is_empty(), "partial phrase must not match");
    }

    #[test]
    fn matches_only_skills_invokable_by_agent() {
        let reg = SkillRegistry::from_skills([
            skill("prisma-patterns", &["prisma"]),
            skill("tailwind", &["tailwind"]),
        ])
        .unwrap();
        let dev = agent("developer", &[("db", "prisma-patterns")]);

        let hit = reg.matches("prisma model and tailwind classes", &dev);
        assert_eq!(hit, BTreeSet::from(["prisma-patterns".to_string()]));
    }

    #[test]
    fn trigger_name_and_invocation_count_as_patterns() {
        let mut testing = skill("testing-patterns", &[]);
        testing.dynamic_invocation_name = Some("/tdd".into());
        let reg = SkillRegistry::from_skills([testing]).unwrap();
        let tester = agent("tester", &[("flaky tests", "testing-patterns")]);

        assert!(!reg.matches("fix flaky tests", &tester).is_empty());
        assert!(!reg.matches("run /tdd now", &tester).is_empty());
        assert!(reg.matches("nothing relevant", &tester).is_empty());
    }

    #[test]
    fn matching_is_idempotent() {
        let reg = SkillRegistry::from_skills([skill("prisma-patterns", &["prisma"])]).unwrap();
        let dev = agent("developer", &[("db", "prisma-patterns")]);
        let text = "migrate the prisma schema";
        assert_eq!(reg.matches(text, &dev), reg.matches(text, &dev));
    }

    #[test]
    fn concurrent_matching_has_no_cross_talk() {
        let reg = Arc::new(
            SkillRegistry::from_skills([
                skill("prisma-patterns", &["prisma", "database"]),
                skill("websockets", &["websocket", "database"]),
            ])
            .unwrap(),
        );
        let backend = Arc::new(agent("backend", &[("db", "prisma-patterns")]));
        let realtime = Arc::new(agent("realtime", &[("ws", "websockets")]));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                let profile = if i % 2 == 0 {
                    Arc::clone(&backend)
                } else {
                    Arc::clone(&realtime)
                };
                std::thread::spawn(move || {
                    let mut last = None;
                    for _ in 0..100 {
                        let got = reg.matches("shared database websocket prisma text", &profile);
                        if let Some(prev) = &last {
                            assert_eq!(prev, &got);
                        }
                        last = Some(got);
                    }
                    (profile.id.clone(), last.unwrap())
                })
            })
            .collect();

        for h in handles {
            let (id, got) = h.join().unwrap();
            let expected = if id == "backend" {
                "prisma-patterns"
            } else {
                "websockets"
            };
            assert_eq!(got, BTreeSet::from([expected.to_string()]));
        }
    }

    #[test]
    fn preloaded_combines_profile_list_and_skill_declarations() {
        let mut api = skill("api-design", &[]);
        api.preloaded_by.insert("backend-reviewer".into());
        let reg = SkillRegistry::from_skills([skill("security", &[]), api, skill("zeta", &[])])
            .unwrap();
        let mut reviewer = agent("backend-reviewer", &[]);
        reviewer.preloaded_skills = vec!["security".into(), "api-design".into()];

        let ids: Vec<_> = reg
            .preloaded_for(&reviewer)
            .unwrap()
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, ["security", "api-design"]);

        reviewer.preloaded_skills = vec!["zeta".into()];
        let ids: Vec<_> = reg
            .preloaded_for(&reviewer)
            .unwrap()
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, ["zeta", "api-design"]);
    }
}
