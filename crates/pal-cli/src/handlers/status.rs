use anyhow::Result;
use owo_colors::OwoColorize;
use pal_types::PortStatus;

use crate::context::CliContext;

/// `pal status`: the port frontier at a glance.
pub fn handle(context: &CliContext) -> Result<()> {
    let services = &context.services;

    let counts = services.ports().summary()?;
    println!(
        "ports: {} running, {} pending, {} complete, {} blocked, {} failed",
        counts.running.to_string().green(),
        counts.pending,
        counts.complete,
        counts.blocked.to_string().yellow(),
        counts.failed.to_string().red(),
    );

    for port in services.ports().list(Some(PortStatus::Running), 20)? {
        println!(
            "  {} {} {}",
            "▸".green(),
            port.id.bold(),
            port.title.unwrap_or_default()
        );
    }
    for port in services.ports().list(Some(PortStatus::Blocked), 20)? {
        println!(
            "  {} {} {}",
            "⊘".yellow(),
            port.id.bold(),
            port.failure_summary.unwrap_or_default()
        );
    }

    let stats = services.sessions().stats()?;
    println!(
        "sessions: {} running of {} total, {} tokens, ${:.2}",
        stats.running.to_string().green(),
        stats.total,
        stats.total_tokens,
        stats.total_cost,
    );

    let open = services.escalations().list(
        Some(pal_types::EscalationStatus::Open),
        10,
    )?;
    if !open.is_empty() {
        println!("{}", "open escalations:".yellow());
        for escalation in open {
            println!(
                "  #{} [{}] {}",
                escalation.id,
                escalation.severity.as_str(),
                escalation.issue
            );
        }
    }

    Ok(())
}
