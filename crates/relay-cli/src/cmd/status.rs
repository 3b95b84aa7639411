use crate::output::{print_failures, print_json};
use anyhow::Context;
use relay_core::store::ArtifactStore;
use relay_core::task::Task;
use std::path::Path;

pub fn run(root: &Path, task_id: &str, json: bool) -> anyhow::Result<()> {
    let task =
        Task::load(root, task_id).with_context(|| format!("failed to load task '{task_id}'"))?;
    let store = ArtifactStore::new(root);
    let current = store.current(task_id)?;

    if json {
        let value = serde_json::json!({
            "task": task,
            "current": current,
        });
        return print_json(&value);
    }

    println!("Task:      {} ({})", task.id, task.title);
    println!("Stage:     {}", task.stage);
    println!("Status:    {}", task.status);
    println!("Revisions: {}", task.revisions);
    if !task.topics.is_empty() {
        println!("Topics:    {}", task.topics.join(", "));
    }
    if let Some(pointer) = &current {
        if let (Some(seq), Some(stage), Some(disposition)) =
            (pointer.seq, pointer.stage, pointer.disposition)
        {
            println!("Latest:    #{seq} {stage} ({disposition})");
        }
    }
    if !task.failures.is_empty() {
        println!("\nUnmet requirements:");
        print_failures(&task.failures);
    }
    Ok(())
}
