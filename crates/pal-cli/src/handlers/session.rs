use anyhow::Result;
use owo_colors::OwoColorize;
use pal_services::SessionTreeNode;
use pal_types::{Session, SessionStatus};

use crate::args::SessionCommand;
use crate::context::CliContext;

pub fn handle(context: &CliContext, command: SessionCommand) -> Result<()> {
    let services = &context.services;

    match command {
        SessionCommand::List { active, limit } => {
            let sessions = services.sessions().list(active, limit)?;
            if sessions.is_empty() {
                println!("no sessions");
                return Ok(());
            }
            for session in sessions {
                print_line(&session);
            }
        }
        SessionCommand::Show { id, events } => {
            let session = services.sessions().get(&id)?;
            println!("{}", serde_json::to_string_pretty(&session)?);

            if let Ok(report) = services.attention().report(&id) {
                println!(
                    "attention: {} ({:.0}% of {} tokens, focus {:.2}, drift {:.2})",
                    report.level.as_str(),
                    report.usage_ratio * 100.0,
                    report.state.token_budget,
                    report.state.focus_score,
                    report.state.drift_score,
                );
            }

            if events {
                for event in services.sessions().events(&id, Some(50))? {
                    println!(
                        "  {} {} {}",
                        event.id,
                        event.event_type.as_str().bold(),
                        event.event_data
                    );
                }
            }
        }
        SessionCommand::Tree => {
            for root in services.sessions().roots(20)? {
                let tree = services.sessions().tree(&root.id)?;
                print_tree(&tree, 0);
            }
        }
        SessionCommand::End { id, reason } => {
            let session = services.sessions().end(&id, reason.as_deref())?;
            println!("{} is {}", session.id, session.status.as_str());
        }
        SessionCommand::Stats => {
            let stats = services.sessions().stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            for bucket in services.sessions().history(7)? {
                println!(
                    "  {}: {} sessions, {} tokens, ${:.2}",
                    bucket.day, bucket.sessions, bucket.tokens, bucket.cost
                );
            }
        }
    }

    Ok(())
}

fn print_line(session: &Session) {
    let marker = match session.status {
        SessionStatus::Running => "●".green().to_string(),
        SessionStatus::Complete => "○".to_string(),
        SessionStatus::Failed => "✗".red().to_string(),
        SessionStatus::Cancelled => "◌".to_string(),
    };
    println!(
        "{} {} [{}] {} {}",
        marker,
        &session.id[..session.id.len().min(8)],
        session.session_type.as_str(),
        session.started_at.format("%m-%d %H:%M"),
        session.title.as_deref().unwrap_or(""),
    );
}

fn print_tree(node: &SessionTreeNode, indent: usize) {
    print!("{}", "  ".repeat(indent));
    print_line(&node.session);
    for child in &node.children {
        print_tree(child, indent + 1);
    }
}
