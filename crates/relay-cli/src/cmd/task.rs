use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use relay_core::task::Task;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Create a task
    Create {
        /// Task id (lowercase letters, digits, hyphens)
        id: String,
        #[arg(required = true)]
        title: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        /// Topic used for skill triggers and review routing (repeatable)
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// Context attribute as KEY=VALUE (repeatable)
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
    },
    /// List tasks
    List,
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn run(root: &Path, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TaskSubcommand::Create {
            id,
            title,
            description,
            topics,
            attrs,
        } => create(
            root,
            &id,
            &title.join(" "),
            description,
            topics,
            attrs.into_iter().collect(),
            json,
        ),
        TaskSubcommand::List => list(root, json),
    }
}

fn create(
    root: &Path,
    id: &str,
    title: &str,
    description: Option<String>,
    topics: Vec<String>,
    attributes: BTreeMap<String, String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut task = Task::new(id, title);
    task.description = description.unwrap_or_default();
    task.topics = topics;
    task.attributes = attributes;
    let task = Task::create(root, task).with_context(|| format!("failed to create task '{id}'"))?;

    if json {
        print_json(&task)?;
    } else {
        println!("Created task [{}]: {}", task.id, task.title);
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let tasks = Task::list(root).context("failed to list tasks")?;

    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    let rows = tasks
        .iter()
        .map(|t| {
            vec![
                t.id.clone(),
                t.stage.to_string(),
                t.status.to_string(),
                t.revisions.to_string(),
                t.title.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "STAGE", "STATUS", "REVISIONS", "TITLE"], rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_parsing() {
        assert_eq!(
            parse_attr("research=read src/auth").unwrap(),
            ("research".to_string(), "read src/auth".to_string())
        );
        assert_eq!(parse_attr("k=a=b").unwrap().1, "a=b");
        assert!(parse_attr("novalue").is_err());
        assert!(parse_attr("=x").is_err());
    }
}
