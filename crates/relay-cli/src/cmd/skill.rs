use crate::output::{print_json, print_table};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum SkillSubcommand {
    /// List every discovered skill
    List,
    /// Print one skill's metadata and content
    Show { id: String },
    /// Show which dynamic skills an agent would load for some text
    Match {
        agent: String,
        #[arg(required = true)]
        text: Vec<String>,
    },
}

pub fn run(root: &Path, subcmd: SkillSubcommand, json: bool) -> anyhow::Result<()> {
    let (_, catalog) = super::load_catalog(root)?;
    let registry = catalog.registry();

    match subcmd {
        SkillSubcommand::List => {
            let skills: Vec<_> = registry.iter().collect();
            if json {
                return print_json(&skills);
            }
            if skills.is_empty() {
                println!("No skills.");
                return Ok(());
            }
            let rows = skills
                .iter()
                .map(|s| {
                    vec![
                        s.id.clone(),
                        s.trigger_patterns.iter().cloned().collect::<Vec<_>>().join(", "),
                        s.description.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(&["ID", "TRIGGERS", "DESCRIPTION"], rows);
        }
        SkillSubcommand::Show { id } => {
            let skill = registry.resolve(&id)?;
            if json {
                return print_json(skill);
            }
            println!("# {} ({})", skill.id, skill.source.display());
            if let Some(desc) = &skill.description {
                println!("{desc}");
            }
            println!("\n{}", skill.content.trim_end());
        }
        SkillSubcommand::Match { agent, text } => {
            let matched = catalog.match_skills(&text.join(" "), &agent)?;
            if json {
                return print_json(&matched);
            }
            if matched.is_empty() {
                println!("No dynamic skills match.");
            }
            for id in matched {
                println!("{id}");
            }
        }
    }
    Ok(())
}
