//! wifi-keeper - keeps a campus portal session authenticated
//!
//! Runs a background supervision loop that re-logs-in whenever the portal
//! reports a logged-out state, failing over between the portal's two
//! addresses on connect timeouts.

mod config;
mod error;
mod failover;
mod keeper;
mod models;
mod netlink;
mod portal;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use failover::FailoverState;
use keeper::KeeperHandle;
use netlink::NmcliProbe;
use portal::CampusPortal;

#[derive(Parser, Debug)]
#[command(name = "wifi-keeper")]
#[command(about = "Campus Portal Session Keeper", long_about = None)]
struct Args {
    /// Log out from the portal and exit
    #[arg(long)]
    logout: bool,

    /// Config file path (default: config.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::Config::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("wifi-keeper - campus portal session keeper");

    let failover = Arc::new(FailoverState::new(
        cfg.portal.primary_host.clone(),
        cfg.portal.secondary_host.clone(),
    ));
    let campus = Arc::new(CampusPortal::new(failover.clone(), &cfg.http)?);
    let handle = KeeperHandle::new(campus, Arc::new(NmcliProbe), failover);
    handle.register_callback(|event| tracing::info!(target: "portal", "{event}"));

    if args.logout {
        return match handle.logout().await {
            Some(result) => {
                tracing::info!("portal session closed: {result}");
                Ok(())
            }
            None => anyhow::bail!("logout failed"),
        };
    }

    let credentials = cfg
        .account
        .credentials()
        .context("cannot start supervision")?;
    handle.start(credentials)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.stop();
    Ok(())
}
