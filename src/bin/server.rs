// src/bin/server.rs

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use gosbench::config::{check_config, load_config_from_file};
use gosbench::coordinator;

#[derive(Parser)]
#[command(name = "gosbench-server", version, about = "Gosbench coordinator")]
struct Cli {
    /// Config file describing the test run
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Port on which workers connect
    #[arg(short = 'p', long = "port", default_value_t = 2000)]
    port: u16,

    /// Enable debug log output
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Enable trace log output
    #[arg(short = 't', long = "trace")]
    trace: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.debug, cli.trace);

    let mut config = load_config_from_file(&cli.config)?;
    check_config(&mut config)?;
    debug!(
        "loaded config with {} endpoints and {} tests",
        config.s3_config.len(),
        config.tests.len()
    );

    coordinator::run(config, cli.port).await
}

fn init_logging(debug: bool, trace: bool) {
    let level = if trace {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(false).init();
}
