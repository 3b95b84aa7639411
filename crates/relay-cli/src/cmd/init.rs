use anyhow::Context;
use relay_core::{config::Config, io, paths};
use std::path::Path;

const SAMPLE_AGENTS: &[(&str, &str)] = &[
    ("pm", PM_AGENT),
    ("developer", DEVELOPER_AGENT),
    ("reviewer", REVIEWER_AGENT),
    ("frontend-reviewer", FRONTEND_REVIEWER_AGENT),
    ("tester", TESTER_AGENT),
];

const SAMPLE_SKILLS: &[(&str, &str)] = &[
    ("requirements-writing", REQUIREMENTS_SKILL),
    ("coding-standards", CODING_STANDARDS_SKILL),
    ("security", SECURITY_SKILL),
    ("database-patterns", DATABASE_SKILL),
    ("frontend-patterns", FRONTEND_SKILL),
    ("testing", TESTING_SKILL),
];

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    println!("Initializing relay in: {}", root.display());

    for dir in [
        paths::RELAY_DIR,
        paths::TASKS_DIR,
        paths::AGENTS_DIR,
        paths::SKILLS_DIR,
    ] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    for (id, content) in SAMPLE_AGENTS {
        let rel = format!("{}/{id}.yaml", paths::AGENTS_DIR);
        write_sample(root, &rel, content)?;
    }
    for (id, content) in SAMPLE_SKILLS {
        let rel = format!("{}/{id}/SKILL.md", paths::SKILLS_DIR);
        write_sample(root, &rel, content)?;
    }

    println!(
        "\nNext: set executor.command in {} to the command that runs one agent.",
        paths::CONFIG_FILE
    );
    Ok(())
}

fn write_sample(root: &Path, rel: &str, content: &str) -> anyhow::Result<()> {
    let path = root.join(rel);
    let created = io::write_if_missing(&path, content.as_bytes())
        .with_context(|| format!("failed to write {rel}"))?;
    if created {
        println!("  created: {rel}");
    } else {
        println!("  exists:  {rel}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample agents
// ---------------------------------------------------------------------------

const PM_AGENT: &str = r#"id: pm
display_name: Product Manager
allowed_tools: [read, grep]
preloaded_skills: [requirements-writing]
critical_requirements:
  - id: has-description
    statement: The task says what problem it solves
    check: { type: context_field, key: description }
  - id: criteria-defined
    statement: The spec lists uniquely named, measurable success criteria
    check: { type: success_criteria_defined }
  - id: scope-consistent
    statement: Nothing is both in and out of scope
    check: { type: scope_respected }
"#;

const DEVELOPER_AGENT: &str = r#"id: developer
display_name: Developer
allowed_tools: [read, grep, edit, write, bash]
preloaded_skills: [coding-standards]
dynamic_skills:
  database: database-patterns
  security: security
  frontend: frontend-patterns
critical_requirements:
  - id: spec-accepted
    statement: Work starts from an accepted spec
    check: { type: prior_stage, stage: spec }
  - id: patterns-cited
    statement: Every cited pattern reference exists in the codebase
    check: { type: pattern_references_exist }
  - id: within-scope
    statement: The implementation stays inside the spec's scope
    check: { type: scope_respected }
"#;

const REVIEWER_AGENT: &str = r#"id: reviewer
display_name: Backend Reviewer
allowed_tools: [read, grep]
preloaded_skills: [security]
dynamic_skills:
  database: database-patterns
critical_requirements:
  - id: implementation-accepted
    statement: There is an accepted implementation to review
    check: { type: prior_stage, stage: implementation }
  - id: verify-all
    statement: Every spec criterion is verified exactly once and met
    check: { type: criteria_verified }
  - id: evidence
    statement: Every verification cites concrete evidence
    check: { type: evidence_present }
domain_scope:
  handles: [api, backend, database, security]
  defers_to:
    frontend: frontend-reviewer
    ui: frontend-reviewer
"#;

const FRONTEND_REVIEWER_AGENT: &str = r#"id: frontend-reviewer
display_name: Frontend Reviewer
allowed_tools: [read, grep]
preloaded_skills: [frontend-patterns]
critical_requirements:
  - id: implementation-accepted
    statement: There is an accepted implementation to review
    check: { type: prior_stage, stage: implementation }
  - id: verify-all
    statement: Every spec criterion is verified exactly once and met
    check: { type: criteria_verified }
  - id: evidence
    statement: Every verification cites concrete evidence
    check: { type: evidence_present }
domain_scope:
  handles: [frontend, ui]
"#;

const TESTER_AGENT: &str = r#"id: tester
display_name: Tester
allowed_tools: [read, grep, bash]
preloaded_skills: [testing]
critical_requirements:
  - id: review-accepted
    statement: Testing starts after an accepted review
    check: { type: prior_stage, stage: review }
  - id: verify-all
    statement: Every spec criterion is exercised by a test and met
    check: { type: criteria_verified }
  - id: evidence
    statement: Every verification names the test that proves it
    check: { type: evidence_present }
"#;

// ---------------------------------------------------------------------------
// Sample skills
// ---------------------------------------------------------------------------

const REQUIREMENTS_SKILL: &str = r#"---
description: Writing specs with testable success criteria.
---

# Requirements Writing

- Give every success criterion a short stable id (`c1`, `c2`, ...).
- Each criterion must be checkable by someone who did not write it.
- List what is explicitly out of scope.
"#;

const CODING_STANDARDS_SKILL: &str = r#"---
description: House conventions for new code.
---

# Coding Standards

- Follow the nearest existing pattern and cite it in `pattern_references`.
- Keep changes inside the spec's scope boundaries.
"#;

const SECURITY_SKILL: &str = r#"---
description: Security review checklist.
triggers: [auth, authentication, password, token, secret]
---

# Security

- Validate all external input at the boundary.
- Never log credentials or tokens.
- Check authorization on every new endpoint.
"#;

const DATABASE_SKILL: &str = r#"---
description: Schema and query conventions.
triggers: [schema, migration, sql, query]
---

# Database Patterns

- Every schema change ships with a reversible migration.
- Queries touching user data are parameterized.
"#;

const FRONTEND_SKILL: &str = r#"---
description: Component and styling conventions.
triggers: [react, component, css, ui]
---

# Frontend Patterns

- Components are small and typed.
- Styling goes through the shared design tokens.
"#;

const TESTING_SKILL: &str = r#"---
description: How to prove a criterion with a test.
---

# Testing

- One test per success criterion, named after its id.
- Evidence is the test name and the command that ran it.
"#;
