use crate::output::print_json;
use anyhow::Context;
use relay_core::sequencer::{request_cancel, CancelRequest};
use relay_core::store::ArtifactStore;
use std::path::Path;

pub fn run(root: &Path, task_id: &str, json: bool) -> anyhow::Result<()> {
    let store = ArtifactStore::new(root);
    let request = request_cancel(root, &store, task_id)
        .with_context(|| format!("failed to cancel '{task_id}'"))?;

    if json {
        return print_json(&serde_json::json!({ "task": task_id, "cancel": request }));
    }
    match request {
        CancelRequest::Cancelled => println!("Cancelled task '{task_id}'."),
        CancelRequest::Pending => {
            println!("Task '{task_id}' is running; it will stop at the next gate.")
        }
    }
    Ok(())
}
