use anyhow::Result;

use crate::args::{Cli, Commands};
use crate::context::CliContext;
use crate::handlers;

pub fn run(cli: Cli) -> Result<()> {
    // logs go to stderr: stdout is either human output or the tool protocol
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let context = CliContext::new(cli.db.as_deref(), cli.project_root.as_deref())?;

    match cli.command {
        Commands::Serve { addr } => handlers::serve::handle(&context, &addr),
        Commands::Mcp => handlers::mcp::handle(context),
        Commands::Orchestrate { spec } => handlers::orchestrate::handle(&context, &spec),
        Commands::Status => handlers::status::handle(&context),
        Commands::Sweep => handlers::sweep::handle(&context),
        Commands::Session { command } => handlers::session::handle(&context, command),
        Commands::Port { command } => handlers::port::handle(&context, command),
        Commands::Agent { command } => handlers::agent::handle(&context, command),
    }
}
