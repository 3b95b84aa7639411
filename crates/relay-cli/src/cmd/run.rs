use crate::output::{print_failures, print_json};
use anyhow::Context;
use relay_core::executor::CommandExecutor;
use relay_core::sequencer::{Cancellation, RunOutcome, Sequencer};
use relay_core::store::ArtifactStore;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Serialize)]
struct TaskResult {
    task: String,
    #[serde(flatten)]
    outcome: Option<RunOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run each task on its own thread and report every outcome. Returns the
/// process exit code: 0 only when every task is done.
pub fn run(root: &Path, tasks: &[String], json: bool) -> anyhow::Result<i32> {
    let (config, catalog) = super::load_catalog(root)?;
    let executor =
        CommandExecutor::from_config(&config.executor).context("cannot invoke agents")?;
    let store = ArtifactStore::new(root);

    let mut seen = HashSet::new();
    let tasks: Vec<&String> = tasks.iter().filter(|t| seen.insert(t.as_str())).collect();

    let results: Vec<TaskResult> = std::thread::scope(|s| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|&id| {
                let (catalog, store, executor) = (&catalog, &store, &executor);
                s.spawn(move || {
                    let outcome = Sequencer::new(root, catalog, store, executor)
                        .with_cancellation(Cancellation::for_task(root, id))
                        .run(id);
                    match outcome {
                        Ok(o) => TaskResult {
                            task: id.clone(),
                            outcome: Some(o),
                            error: None,
                        },
                        Err(e) => TaskResult {
                            task: id.clone(),
                            outcome: None,
                            error: Some(format!("{e:#}")),
                        },
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(&tasks)
            .map(|(h, id)| {
                h.join().unwrap_or_else(|_| TaskResult {
                    task: id.to_string(),
                    outcome: None,
                    error: Some("task thread panicked".to_string()),
                })
            })
            .collect()
    });

    if json {
        print_json(&results)?;
    } else {
        for r in &results {
            match (&r.outcome, &r.error) {
                (Some(outcome), _) => {
                    println!("{}: {outcome}", r.task);
                    print_failures(outcome.failures());
                }
                (None, Some(err)) => eprintln!("error: {}: {err}", r.task),
                (None, None) => {}
            }
        }
    }

    let all_done = results
        .iter()
        .all(|r| matches!(r.outcome, Some(RunOutcome::Done)));
    Ok(if all_done { 0 } else { 1 })
}
