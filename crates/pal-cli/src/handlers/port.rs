use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use pal_types::PortStatus;

use crate::args::PortCommand;
use crate::context::CliContext;

pub fn handle(context: &CliContext, command: PortCommand) -> Result<()> {
    let services = &context.services;

    match command {
        PortCommand::List { status, limit } => {
            let status = match status.as_deref() {
                Some(raw) => match PortStatus::parse(raw) {
                    Some(parsed) => Some(parsed),
                    None => bail!("unknown port status {:?}", raw),
                },
                None => None,
            };
            let ports = services.ports().list(status, limit)?;
            if ports.is_empty() {
                println!("no ports");
                return Ok(());
            }
            for port in ports {
                println!(
                    "{:10} {:8} {}",
                    port.id.bold(),
                    port.status.as_str(),
                    port.title.unwrap_or_default(),
                );
            }
        }
        PortCommand::Show { id } => {
            let port = services.ports().get(&id)?;
            println!("{}", serde_json::to_string_pretty(&port)?);

            let deps = services.ports().dependencies(&id)?;
            for edge in &deps.incoming {
                let marker = if edge.satisfied {
                    "✓".green().to_string()
                } else {
                    "…".yellow().to_string()
                };
                println!("  needs {} {}", edge.depends_on, marker);
            }
            for edge in &deps.outgoing {
                println!("  feeds {}", edge.port_id);
            }

            for handoff in services.handoffs().inputs(&id)? {
                println!(
                    "  handoff #{} {} from {} ({} tokens)",
                    handoff.id,
                    handoff.handoff_type.as_str(),
                    handoff.from_port,
                    handoff.token_count,
                );
            }
        }
    }

    Ok(())
}
