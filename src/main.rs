mod command_line_arguments;
mod config;
mod proxy;
mod routing;
mod shutdown;

use crate::command_line_arguments::PortwayArguments;
use crate::shutdown::Shutdown;
use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info, trace};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let args = PortwayArguments::parse();
    pretty_env_logger::env_logger::builder()
        .format_timestamp(None)
        .filter_level(if args.verbose { LevelFilter::Trace } else { LevelFilter::Info })
        .init();

    info!("Starting portway");
    trace!("Arguments: {:#?}", args);

    let rules = config::load_rules(&args.config_path).await?;
    let defaults = routing::Defaults {
        dial_timeout: Duration::from_secs(args.dial_timeout),
        keepalive: Duration::from_secs(args.keepalive),
    };
    // fail-closed: any invalid rule means no listener starts at all
    let table = routing::compile(&rules, &defaults)?;
    info!("Compiled {} rule(s) into {} listen key(s)", rules.len(), table.len());
    let handles = proxy::build_handles(table);

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();
    proxy::run_all(handles, &shutdown).await
}
