use crate::output::{print_json, print_table};
use clap::Subcommand;
use relay_core::types::Stage;
use std::path::Path;

#[derive(Subcommand)]
pub enum AgentSubcommand {
    /// List agent profiles and the stages they own
    List,
    /// Print one agent profile
    Show { id: String },
}

pub fn run(root: &Path, subcmd: AgentSubcommand, json: bool) -> anyhow::Result<()> {
    let (_, catalog) = super::load_catalog(root)?;

    match subcmd {
        AgentSubcommand::List => {
            if json {
                return print_json(&catalog.profiles());
            }
            let rows = catalog
                .profiles()
                .iter()
                .map(|p| {
                    let stages: Vec<&str> = Stage::all()
                        .iter()
                        .filter(|s| catalog.pipeline().agent_for(**s) == p.id)
                        .map(|s| s.as_str())
                        .collect();
                    vec![
                        p.id.clone(),
                        p.display_name.clone(),
                        stages.join(", "),
                        p.critical_requirements.len().to_string(),
                        p.domain_scope.handles.join(", "),
                    ]
                })
                .collect();
            print_table(&["ID", "NAME", "STAGES", "REQUIREMENTS", "HANDLES"], rows);
        }
        AgentSubcommand::Show { id } => {
            let profile = catalog.profile(&id)?;
            if json {
                return print_json(profile);
            }
            print!("{}", serde_yaml::to_string(profile)?);
        }
    }
    Ok(())
}
