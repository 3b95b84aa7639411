use crate::output::{print_failures, print_json, print_table};
use anyhow::Context;
use relay_core::store::ArtifactStore;
use relay_core::task::Task;
use std::path::Path;

pub fn run(root: &Path, task_id: &str, seq: Option<u32>, json: bool) -> anyhow::Result<()> {
    // Surfaces TaskNotFound instead of an empty history.
    Task::load(root, task_id).with_context(|| format!("failed to load task '{task_id}'"))?;
    let records = ArtifactStore::new(root)
        .history(task_id)
        .with_context(|| format!("failed to read history of '{task_id}'"))?;

    if let Some(seq) = seq {
        let record = records
            .iter()
            .find(|r| r.seq == seq)
            .ok_or_else(|| anyhow::anyhow!("task '{task_id}' has no record {seq}"))?;
        if json {
            return print_json(record);
        }
        println!("Record #{} ({})\n", record.seq, record.disposition);
        print!("{}", record.artifact.render_markdown());
        let failures: Vec<_> = record.failures().cloned().collect();
        if !failures.is_empty() {
            println!("\nUnmet requirements:");
            print_failures(&failures);
        }
        return Ok(());
    }

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No hand-offs recorded for '{task_id}'.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.seq.to_string(),
                r.artifact.stage.to_string(),
                r.artifact.produced_by.clone(),
                r.disposition.to_string(),
                r.failures().count().to_string(),
                r.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    print_table(
        &["SEQ", "STAGE", "AGENT", "DISPOSITION", "UNMET", "RECORDED"],
        rows,
    );
    Ok(())
}
