use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;

use crate::args::AgentCommand;
use crate::context::CliContext;

pub fn handle(context: &CliContext, command: AgentCommand) -> Result<()> {
    let services = &context.services;

    match command {
        AgentCommand::List => {
            let agents = services.agents().list()?;
            if agents.is_empty() {
                println!("no agents registered");
                return Ok(());
            }
            for agent in agents {
                println!(
                    "{:12} v{:<3} {}",
                    agent.id.bold(),
                    agent.current_version,
                    agent.name,
                );
            }
        }
        AgentCommand::Show { id } => {
            let agent = services.agents().get(&id)?;
            println!("{} ({}), current v{}", agent.id.bold(), agent.name, agent.current_version);
            for version in services.agents().versions(&id)? {
                let marker = if version.version == agent.current_version {
                    "●".green().to_string()
                } else if version.retired {
                    "◌".to_string()
                } else {
                    "○".to_string()
                };
                println!(
                    "  {} v{}: {} completed, {} failed, ${:.2}",
                    marker,
                    version.version,
                    version.ports_completed,
                    version.ports_failed,
                    version.total_cost,
                );
            }
        }
        AgentCommand::Register {
            id,
            name,
            spec_file,
            spec,
        } => {
            let spec_text = match (spec_file, spec) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path))?,
                (None, Some(inline)) => inline,
                (None, None) => bail!("pass --spec-file or --spec"),
            };
            let version = services.agents().register(&id, &name, &spec_text)?;
            println!("registered {} v{}", id, version.version);
        }
        AgentCommand::Retire { id, version } => {
            services.agents().retire(&id, version)?;
            println!("retired {} v{}", id, version);
        }
        AgentCommand::Assign { id, port } => {
            services.ports().assign_agent(&port, &id)?;
            println!("port {} is attributed to agent {}", port, id);
        }
    }

    Ok(())
}
