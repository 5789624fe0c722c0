use anyhow::Result;

use crate::context::CliContext;

/// `pal sweep`: close running sessions older than the zombie threshold.
pub fn handle(context: &CliContext) -> Result<()> {
    let swept = context.services.sessions().sweep_zombies()?;
    if swept.is_empty() {
        println!("no zombie sessions");
    } else {
        for session in &swept {
            println!(
                "closed {} ({}, started {})",
                session.id,
                session.session_type.as_str(),
                session.started_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!("{} zombie session(s) closed", swept.len());
    }
    Ok(())
}
