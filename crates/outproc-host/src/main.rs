//! Outproc host - child process serving one hosted object.
//!
//! Launched by an agent with two inherited pipe endpoints. Logs go to stderr;
//! stdout is never written.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use outproc::{ChannelEndpoint, HostConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "outproc-host")]
#[command(about = "Host a single outproc object over an inherited pipe pair")]
struct Args {
    /// Descriptor to read requests from
    inbound: ChannelEndpoint,

    /// Descriptor to write replies to
    outbound: ChannelEndpoint,
}

fn main() -> ExitCode {
    // clap's own exit code would collide with the protocol violation code.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(HostConfig::BOOTSTRAP_FAILURE_EXIT_CODE),
            };
        }
    };

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(HostConfig::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(HostConfig::BOOTSTRAP_FAILURE_EXIT_CODE)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let registry = outproc_host::registry().context("Failed to build type registry")?;

    info!(
        "Serving on endpoints {} / {} (PID {})",
        args.inbound,
        args.outbound,
        std::process::id()
    );
    Ok(outproc::handler::serve(&registry, args.inbound, args.outbound))
}
