mod cache;
mod cloud;
mod config;
mod error;
mod helpers;
mod hypervisor;
mod packager;
mod payload;
mod pipeline;
mod repositories;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use config::ProvisionOpts;

fn install_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let format = fmt::format().without_time().with_target(false).compact();
    let fmt_layer = fmt::layer().event_format(format).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();
}

async fn run(opts: ProvisionOpts) -> Result<()> {
    pipeline::run(opts).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    install_tracing();

    let opts = match ProvisionOpts::try_parse() {
        Ok(opts) => opts,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
        // --help / --version
        Err(err) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
