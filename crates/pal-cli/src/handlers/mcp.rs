use anyhow::Result;

use crate::context::CliContext;

/// `pal mcp`: serve the agent tool protocol on stdio until the host agent
/// runtime closes the pipe.
pub fn handle(context: CliContext) -> Result<()> {
    // agents reconnecting after a crash should not trip over stale sessions
    context.services.sessions().sweep_zombies()?;
    pal_server::run_stdio_server(context.services)
}
