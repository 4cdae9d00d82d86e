//! stend - bring up the device subsystem and dispatch its events to plugins
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;

/// stend - device-bridged event orchestrator
#[derive(Parser, Debug)]
#[command(name = "stend")]
#[command(about = "Bridge a device subsystem's event stream to plugins and webhooks", long_about = None)]
struct Args {
    /// Project directory holding `.stend/`, the payload and `plugins/`
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Settings file to use instead of `.stend/config.toml`
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load plugins without probing or deploying to the device
    #[arg(long)]
    no_start: bool,

    /// Mirror log output to stderr
    #[arg(long)]
    log_stderr: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    stend_core::logging::init(args.log_stderr)?;
    if !args.log_stderr {
        if let Ok(log_file) = stend_core::logging::get_current_log_file() {
            eprintln!("stend: logging to {}", log_file.display());
        }
    }

    let project_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = stend::RunOptions {
        config_file: args.config,
        no_start: args.no_start,
    };

    if let Err(e) = stend::run(&project_path, options).await {
        tracing::error!("stend exited with error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
