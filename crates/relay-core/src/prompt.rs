use crate::artifact::VerificationStatus;
use crate::executor::Invocation;
use crate::gate::RequirementCheck;
use crate::types::Stage;
use std::fmt::Write as _;

/// Render the instructions handed to the agent for one invocation.
pub fn render(inv: &Invocation<'_>) -> String {
    let mut out = String::new();
    let agent = inv.agent;
    let task = inv.task;

    let _ = writeln!(out, "# {}: {} stage", agent.display_name, inv.stage);
    let _ = writeln!(out);
    let _ = writeln!(out, "Task `{}`: {}", task.id, task.title);
    if !task.description.trim().is_empty() {
        let _ = writeln!(out, "\n{}", task.description.trim());
    }
    if !task.topics.is_empty() {
        let _ = writeln!(out, "\nTopics: {}", task.topics.join(", "));
    }
    for (key, value) in &task.attributes {
        let _ = writeln!(out, "- {key}: {value}");
    }

    let tools: Vec<&str> = agent.allowed_tools.iter().map(String::as_str).collect();
    let _ = writeln!(out, "\n## Allowed tools\n\n{}", tools.join(", "));

    let _ = writeln!(out, "\n## Critical requirements\n");
    for req in &agent.critical_requirements {
        let _ = writeln!(out, "- **{}**: {}", req.id, req.statement);
        if req.check == RequirementCheck::Attested {
            let _ = writeln!(
                out,
                "  (list `{}` under `attestations` once satisfied)",
                req.id
            );
        }
    }

    if !inv.preloaded.is_empty() || !inv.triggered.is_empty() {
        let _ = writeln!(out, "\n## Skills");
        for skill in inv.preloaded.iter().chain(inv.triggered.iter()) {
            let _ = writeln!(out, "\n### {}\n\n{}", skill.id, skill.content);
        }
    }

    if let Some(spec) = inv.spec {
        let _ = writeln!(out, "\n## Spec ({})\n", spec.produced_by);
        if !spec.summary.is_empty() {
            let _ = writeln!(out, "{}\n", spec.summary.trim());
        }
        for c in &spec.success_criteria {
            let _ = writeln!(out, "- `{}` {}", c.id, c.description);
        }
        if !spec.scope_boundaries.out_of_scope.is_empty() {
            let out_of_scope: Vec<&str> = spec
                .scope_boundaries
                .out_of_scope
                .iter()
                .map(String::as_str)
                .collect();
            let _ = writeln!(out, "\nOut of scope: {}", out_of_scope.join(", "));
        }
    }

    if let Some(prev) = inv.previous {
        let _ = writeln!(
            out,
            "\n## Input from {} ({})\n\n{}",
            prev.artifact.produced_by,
            prev.artifact.stage,
            prev.artifact.summary.trim()
        );
    }

    if let Some(rejected) = inv.revision_of {
        let _ = writeln!(
            out,
            "\n## Revision {} of this stage\n\nYour previous artifact (record {}) was returned:\n",
            inv.revision, rejected.seq
        );
        for f in rejected.failures() {
            let fields = if f.fields.is_empty() {
                String::new()
            } else {
                format!(" [{}]", f.fields.join(", "))
            };
            let _ = writeln!(out, "- **{}**: {}{}", f.requirement, f.detail, fields);
        }
    }

    let _ = writeln!(out, "\n## Output\n");
    let _ = writeln!(
        out,
        "Write a YAML artifact to the file named by `RELAY_OUTPUT_FILE` with the keys \
         `summary`, `topics`, `scope_boundaries` (`in`, `out`), `success_criteria` \
         (`id`, `description`), `pattern_references` (`file`, optional `line_range` \
         with `start`/`end`), `verification` and `attestations`."
    );
    if inv.stage.verifies_criteria() {
        let _ = writeln!(
            out,
            "\n`verification` must list every spec criterion exactly once with `status` \
             `{}` or `{}` and concrete `evidence`.",
            VerificationStatus::Met,
            VerificationStatus::NotMet
        );
    }
    if inv.stage == Stage::Spec {
        let _ = writeln!(
            out,
            "\nDefine measurable `success_criteria` with unique ids; later stages verify them."
        );
    }
    out
}
