use crate::artifact::{ArtifactRecord, HandoffArtifact, VerificationStatus};
use crate::profile::AgentProfile;
use crate::task::Task;
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// RequirementCheck
// ---------------------------------------------------------------------------

/// The predicate behind a critical requirement. Pre-phase checks read the
/// task context before the agent runs; post-phase checks read the artifact
/// it produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequirementCheck {
    /// A context field (`title`, `description`, or a task attribute) is set.
    ContextField { key: String },
    /// An accepted artifact of `stage` exists for the task.
    PriorStage { stage: Stage },
    /// Every task topic is handled or explicitly deferred by the agent.
    TopicsInScope,
    SuccessCriteriaDefined,
    /// Verification covers every Spec criterion exactly once, all met.
    CriteriaVerified,
    EvidencePresent,
    PatternReferencesExist,
    ScopeRespected,
    /// The artifact acknowledges the requirement id in `attestations`.
    #[default]
    Attested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Pre,
    Post,
}

impl RequirementCheck {
    pub fn phase(&self) -> GatePhase {
        match self {
            RequirementCheck::ContextField { .. }
            | RequirementCheck::PriorStage { .. }
            | RequirementCheck::TopicsInScope => GatePhase::Pre,
            _ => GatePhase::Post,
        }
    }
}

// ---------------------------------------------------------------------------
// RequirementStatement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementStatement {
    pub id: String,
    pub statement: String,
    #[serde(default)]
    pub check: RequirementCheck,
}

// ---------------------------------------------------------------------------
// RequirementCheckResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementCheckResult {
    pub requirement: String,
    pub satisfied: bool,
    pub detail: String,
    /// Artifact or context fields the result is about.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl RequirementCheckResult {
    fn pass(requirement: &str, detail: impl Into<String>) -> Self {
        Self {
            requirement: requirement.to_string(),
            satisfied: true,
            detail: detail.into(),
            fields: Vec::new(),
        }
    }

    fn fail(requirement: &str, detail: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            requirement: requirement.to_string(),
            satisfied: false,
            detail: detail.into(),
            fields,
        }
    }
}

// ---------------------------------------------------------------------------
// GateContext
// ---------------------------------------------------------------------------

/// What a gate may look at besides the artifact: the project root (for
/// pattern references), the task, and the task's history so far.
pub struct GateContext<'a> {
    pub root: &'a Path,
    pub task: &'a Task,
    pub history: &'a [ArtifactRecord],
}

impl<'a> GateContext<'a> {
    /// Latest accepted artifact of `stage`.
    pub fn accepted(&self, stage: Stage) -> Option<&'a HandoffArtifact> {
        self.history
            .iter()
            .rev()
            .find(|r| r.is_accepted() && r.artifact.stage == stage)
            .map(|r| &r.artifact)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate the profile's pre-phase requirements against the task context.
pub fn check_pre(profile: &AgentProfile, ctx: &GateContext<'_>) -> Vec<RequirementCheckResult> {
    profile
        .critical_requirements
        .iter()
        .filter(|r| r.check.phase() == GatePhase::Pre)
        .map(|r| evaluate_pre(profile, r, ctx))
        .collect()
}

/// Evaluate every requirement of the profile, in declaration order. Pre-phase
/// requirements are re-checked against the context; the rest against
/// `artifact`. Always exactly one result per requirement.
pub fn check_post(
    profile: &AgentProfile,
    ctx: &GateContext<'_>,
    artifact: &HandoffArtifact,
) -> Vec<RequirementCheckResult> {
    profile
        .critical_requirements
        .iter()
        .map(|r| match r.check.phase() {
            GatePhase::Pre => evaluate_pre(profile, r, ctx),
            GatePhase::Post => evaluate_post(profile, r, ctx, artifact),
        })
        .collect()
}

fn evaluate_pre(
    profile: &AgentProfile,
    req: &RequirementStatement,
    ctx: &GateContext<'_>,
) -> RequirementCheckResult {
    let id = req.id.as_str();
    match &req.check {
        RequirementCheck::ContextField { key } if key == "topics" => {
            if ctx.task.topics.is_empty() {
                RequirementCheckResult::fail(id, "task has no topics", vec!["topics".into()])
            } else {
                RequirementCheckResult::pass(id, "topics present")
            }
        }
        RequirementCheck::ContextField { key } => match ctx.task.context_value(key) {
            Some(_) => RequirementCheckResult::pass(id, format!("'{key}' present")),
            None => RequirementCheckResult::fail(
                id,
                format!("task context is missing '{key}'"),
                vec![key.clone()],
            ),
        },
        RequirementCheck::PriorStage { stage } => match ctx.accepted(*stage) {
            Some(_) => RequirementCheckResult::pass(id, format!("accepted {stage} artifact found")),
            None => RequirementCheckResult::fail(
                id,
                format!("no accepted {stage} artifact"),
                vec![format!("history.{stage}")],
            ),
        },
        RequirementCheck::TopicsInScope => {
            let outside = profile.domain_scope.unowned(&ctx.task.topics);
            if outside.is_empty() {
                RequirementCheckResult::pass(id, "all topics in scope")
            } else {
                RequirementCheckResult::fail(
                    id,
                    format!("topics outside {}'s scope: {}", profile.id, outside.join(", ")),
                    outside.iter().map(|t| format!("topics.{t}")).collect(),
                )
            }
        }
        // Post-phase checks never reach here.
        _ => RequirementCheckResult::fail(id, "not a pre-action requirement", Vec::new()),
    }
}

fn evaluate_post(
    profile: &AgentProfile,
    req: &RequirementStatement,
    ctx: &GateContext<'_>,
    artifact: &HandoffArtifact,
) -> RequirementCheckResult {
    let id = req.id.as_str();
    match &req.check {
        RequirementCheck::SuccessCriteriaDefined => success_criteria_defined(id, artifact),
        RequirementCheck::CriteriaVerified => criteria_verified(id, ctx, artifact),
        RequirementCheck::EvidencePresent => evidence_present(id, artifact),
        RequirementCheck::PatternReferencesExist => pattern_references_exist(id, ctx, artifact),
        RequirementCheck::ScopeRespected => scope_respected(id, profile, ctx, artifact),
        RequirementCheck::Attested => {
            if artifact.attestations.contains(id) {
                RequirementCheckResult::pass(id, "attested")
            } else {
                RequirementCheckResult::fail(
                    id,
                    format!("artifact does not attest '{id}': {}", req.statement),
                    vec!["attestations".into()],
                )
            }
        }
        _ => evaluate_pre(profile, req, ctx),
    }
}

fn success_criteria_defined(id: &str, artifact: &HandoffArtifact) -> RequirementCheckResult {
    if artifact.success_criteria.is_empty() {
        return RequirementCheckResult::fail(
            id,
            "no success criteria defined",
            vec!["success_criteria".into()],
        );
    }
    let mut seen = BTreeSet::new();
    let mut bad = Vec::new();
    for c in &artifact.success_criteria {
        if c.id.trim().is_empty() || c.description.trim().is_empty() {
            bad.push(format!("criterion '{}' is incomplete", c.id));
        } else if !seen.insert(c.id.as_str()) {
            bad.push(format!("criterion '{}' is defined twice", c.id));
        }
    }
    if bad.is_empty() {
        RequirementCheckResult::pass(
            id,
            format!("{} criteria defined", artifact.success_criteria.len()),
        )
    } else {
        RequirementCheckResult::fail(id, bad.join("; "), vec!["success_criteria".into()])
    }
}

fn criteria_verified(
    id: &str,
    ctx: &GateContext<'_>,
    artifact: &HandoffArtifact,
) -> RequirementCheckResult {
    if !artifact.stage.verifies_criteria() {
        return RequirementCheckResult::pass(
            id,
            format!("not applicable to {} artifacts", artifact.stage),
        );
    }
    let Some(spec) = ctx.accepted(Stage::Spec) else {
        return RequirementCheckResult::fail(
            id,
            "no accepted spec to verify against",
            vec!["verification".into()],
        );
    };
    let Some(verification) = &artifact.verification else {
        return RequirementCheckResult::fail(
            id,
            "artifact has no verification section",
            vec!["verification".into()],
        );
    };

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in verification {
        *counts.entry(v.criterion.as_str()).or_default() += 1;
    }

    let mut problems = Vec::new();
    let mut fields = Vec::new();
    for c in &spec.success_criteria {
        match counts.get(c.id.as_str()).copied().unwrap_or(0) {
            0 => {
                problems.push(format!("criterion '{}' not verified", c.id));
                fields.push(format!("verification.{}", c.id));
            }
            1 => {}
            n => {
                problems.push(format!("criterion '{}' verified {n} times", c.id));
                fields.push(format!("verification.{}", c.id));
            }
        }
    }
    for crit in counts.keys() {
        if spec.criterion(crit).is_none() {
            problems.push(format!("criterion '{crit}' is not in the spec"));
            fields.push(format!("verification.{crit}"));
        }
    }
    for v in verification {
        if v.status == VerificationStatus::NotMet && spec.criterion(&v.criterion).is_some() {
            problems.push(format!("criterion '{}' not met", v.criterion));
            fields.push(format!("verification.{}", v.criterion));
        }
    }

    if problems.is_empty() {
        RequirementCheckResult::pass(
            id,
            format!("all {} spec criteria met", spec.success_criteria.len()),
        )
    } else {
        RequirementCheckResult::fail(id, problems.join("; "), fields)
    }
}

fn evidence_present(id: &str, artifact: &HandoffArtifact) -> RequirementCheckResult {
    let Some(verification) = &artifact.verification else {
        if artifact.stage.verifies_criteria() {
            return RequirementCheckResult::fail(
                id,
                "artifact has no verification section",
                vec!["verification".into()],
            );
        }
        return RequirementCheckResult::pass(
            id,
            format!("not applicable to {} artifacts", artifact.stage),
        );
    };
    let missing: Vec<&str> = verification
        .iter()
        .filter(|v| v.evidence.trim().is_empty())
        .map(|v| v.criterion.as_str())
        .collect();
    if missing.is_empty() {
        RequirementCheckResult::pass(id, "every verification carries evidence")
    } else {
        RequirementCheckResult::fail(
            id,
            format!("no evidence for: {}", missing.join(", ")),
            missing
                .iter()
                .map(|c| format!("verification.{c}.evidence"))
                .collect(),
        )
    }
}

fn pattern_references_exist(
    id: &str,
    ctx: &GateContext<'_>,
    artifact: &HandoffArtifact,
) -> RequirementCheckResult {
    let mut problems = Vec::new();
    let mut fields = Vec::new();
    for (i, r) in artifact.pattern_references.iter().enumerate() {
        let path = ctx.root.join(&r.file);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => {
                problems.push(format!("'{}' does not exist", r.file));
                fields.push(format!("pattern_references[{i}].file"));
                continue;
            }
        };
        if let Some(range) = r.line_range {
            let lines = content.lines().count() as u32;
            if range.start == 0 || range.start > range.end || range.end > lines {
                problems.push(format!(
                    "'{}' has {lines} lines; range {range} is invalid",
                    r.file
                ));
                fields.push(format!("pattern_references[{i}].line_range"));
            }
        }
    }
    if problems.is_empty() {
        RequirementCheckResult::pass(
            id,
            format!("{} references resolved", artifact.pattern_references.len()),
        )
    } else {
        RequirementCheckResult::fail(id, problems.join("; "), fields)
    }
}

fn scope_respected(
    id: &str,
    profile: &AgentProfile,
    ctx: &GateContext<'_>,
    artifact: &HandoffArtifact,
) -> RequirementCheckResult {
    let scope = &artifact.scope_boundaries;
    let mut problems = Vec::new();
    let mut fields = Vec::new();

    for item in scope.in_scope.intersection(&scope.out_of_scope) {
        problems.push(format!("'{item}' is both in and out of scope"));
        fields.push("scope_boundaries".to_string());
    }
    if artifact.stage != Stage::Spec {
        if let Some(spec) = ctx.accepted(Stage::Spec) {
            for item in scope.in_scope.intersection(&spec.scope_boundaries.out_of_scope) {
                problems.push(format!("'{item}' is out of scope per the spec"));
                fields.push("scope_boundaries.in".to_string());
            }
        }
    }
    for topic in profile.domain_scope.unowned(&artifact.topics) {
        problems.push(format!("topic '{topic}' is outside {}'s domain", profile.id));
        fields.push(format!("topics.{topic}"));
    }

    if problems.is_empty() {
        RequirementCheckResult::pass(id, "scope respected")
    } else {
        fields.dedup();
        RequirementCheckResult::fail(id, problems.join("; "), fields)
    }
}

// ---------------------------------------------------------------------------
// GateVerdict
// ---------------------------------------------------------------------------

/// Severity is binary: any unsatisfied result stops advancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    Blocked(Vec<RequirementCheckResult>),
    NeedsRevision(Vec<RequirementCheckResult>),
}

impl GateVerdict {
    pub fn pre(results: &[RequirementCheckResult]) -> Self {
        let failed = failures(results);
        if failed.is_empty() {
            GateVerdict::Pass
        } else {
            GateVerdict::Blocked(failed)
        }
    }

    pub fn post(results: &[RequirementCheckResult]) -> Self {
        let failed = failures(results);
        if failed.is_empty() {
            GateVerdict::Pass
        } else {
            GateVerdict::NeedsRevision(failed)
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Pass)
    }
}

fn failures(results: &[RequirementCheckResult]) -> Vec<RequirementCheckResult> {
    results.iter().filter(|r| !r.satisfied).cloned().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
