mod bootstrap_helpers;
mod cli_args;

use anyhow::{Context, Result};
use clap::Parser;
use relay_router::RelayRouter;

use crate::bootstrap_helpers::{
    build_agent, build_chat_transport, build_router_config, init_tracing, shutdown_signal,
};
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    let router_config = build_router_config(&cli)?;
    let agent = build_agent(&cli)?;
    let chat = build_chat_transport(&router_config)?;
    let router =
        RelayRouter::new(router_config, agent, chat).context("invalid router configuration")?;
    let listener = router.bind_health_listener().await?;
    router.run_until(listener, shutdown_signal()).await
}
