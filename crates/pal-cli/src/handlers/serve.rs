use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::context::CliContext;

/// `pal serve`: the long-lived core process. Sweeps zombies on startup and
/// hourly, then serves the dashboard API until interrupted.
pub fn handle(context: &CliContext, addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address {:?}", addr))?;

    let swept = context.services.sessions().sweep_zombies()?;
    if !swept.is_empty() {
        info!(count = swept.len(), "zombie sessions closed on startup");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let sweeper = {
            let services = context.services.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(3600));
                tick.tick().await; // immediate first tick already handled
                loop {
                    tick.tick().await;
                    match services.sessions().sweep_zombies() {
                        Ok(swept) if !swept.is_empty() => {
                            info!(count = swept.len(), "zombie sessions closed");
                        }
                        Ok(_) => {}
                        Err(e) => warn!("zombie sweep failed: {}", e),
                    }
                }
            })
        };

        let served = pal_server::serve_http(context.services.clone(), addr).await;
        sweeper.abort();
        served
    })
}
