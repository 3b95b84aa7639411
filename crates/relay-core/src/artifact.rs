use crate::gate::RequirementCheckResult;
use crate::types::{Disposition, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Criterion {
    pub id: String,
    pub description: String,
}

/// Inclusive, 1-indexed line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A pointer at existing code the work follows or modifies. Without a
/// `line_range` the whole file is meant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternReference {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<LineRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Met,
    NotMet,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationStatus::Met => "met",
            VerificationStatus::NotMet => "not_met",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verification {
    pub criterion: String,
    pub status: VerificationStatus,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeBoundaries {
    #[serde(rename = "in", default)]
    pub in_scope: BTreeSet<String>,
    #[serde(rename = "out", default)]
    pub out_of_scope: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// ArtifactDraft
// ---------------------------------------------------------------------------

/// What an agent hands back at the end of a stage. The sequencer stamps the
/// stage, producer, and time to turn it into a [`HandoffArtifact`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactDraft {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub scope_boundaries: ScopeBoundaries,
    #[serde(default)]
    pub success_criteria: Vec<Criterion>,
    #[serde(default)]
    pub pattern_references: Vec<PatternReference>,
    #[serde(default)]
    pub verification: Option<Vec<Verification>>,
    #[serde(default)]
    pub attestations: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// HandoffArtifact
// ---------------------------------------------------------------------------

/// The structured result one role passes to the next. Never edited once
/// recorded; a correction is a new artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffArtifact {
    pub stage: Stage,
    pub produced_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub scope_boundaries: ScopeBoundaries,
    #[serde(default)]
    pub success_criteria: Vec<Criterion>,
    #[serde(default)]
    pub pattern_references: Vec<PatternReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Vec<Verification>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub attestations: BTreeSet<String>,
}

impl HandoffArtifact {
    pub fn from_draft(stage: Stage, produced_by: impl Into<String>, draft: ArtifactDraft) -> Self {
        Self {
            stage,
            produced_by: produced_by.into(),
            created_at: Utc::now(),
            summary: draft.summary,
            topics: draft.topics,
            scope_boundaries: draft.scope_boundaries,
            success_criteria: draft.success_criteria,
            pattern_references: draft.pattern_references,
            verification: draft.verification,
            attestations: draft.attestations,
        }
    }

    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.success_criteria.iter().find(|c| c.id == id)
    }

    /// Markdown rendering used for the task's `current.md`.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} ({})", self.stage, self.produced_by);
        let _ = writeln!(out);
        let _ = writeln!(out, "_Created {}_", self.created_at.to_rfc3339());
        if !self.summary.is_empty() {
            let _ = writeln!(out, "\n{}", self.summary.trim());
        }
        if !self.topics.is_empty() {
            let _ = writeln!(out, "\n**Topics:** {}", self.topics.join(", "));
        }

        let scope = &self.scope_boundaries;
        if !scope.in_scope.is_empty() || !scope.out_of_scope.is_empty() {
            let _ = writeln!(out, "\n## Scope\n");
            for item in &scope.in_scope {
                let _ = writeln!(out, "- in: {item}");
            }
            for item in &scope.out_of_scope {
                let _ = writeln!(out, "- out: {item}");
            }
        }

        if !self.success_criteria.is_empty() {
            let _ = writeln!(out, "\n## Success criteria\n");
            for c in &self.success_criteria {
                let _ = writeln!(out, "- **{}** {}", c.id, c.description);
            }
        }

        if !self.pattern_references.is_empty() {
            let _ = writeln!(out, "\n## Pattern references\n");
            for r in &self.pattern_references {
                match r.line_range {
                    Some(range) => {
                        let _ = writeln!(out, "- `{}:{}`", r.file, range);
                    }
                    None => {
                        let _ = writeln!(out, "- `{}`", r.file);
                    }
                }
            }
        }

        if let Some(verification) = &self.verification {
            let _ = writeln!(out, "\n## Verification\n");
            for v in verification {
                let _ = writeln!(out, "- [{}] **{}** {}", v.status, v.criterion, v.evidence);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ArtifactRecord / ArtifactRef
// ---------------------------------------------------------------------------

/// One entry of a task's hand-off history. Gate results annotate the record;
/// the artifact itself is stored exactly as produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub seq: u32,
    pub task_id: String,
    pub disposition: Disposition,
    pub recorded_at: DateTime<Utc>,
    pub artifact: HandoffArtifact,
    #[serde(default)]
    pub audit: Vec<RequirementCheckResult>,
}

impl ArtifactRecord {
    pub fn is_accepted(&self) -> bool {
        self.disposition == Disposition::Accepted
    }

    pub fn failures(&self) -> impl Iterator<Item = &RequirementCheckResult> {
        self.audit.iter().filter(|r| !r.satisfied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub task_id: String,
    pub seq: u32,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
