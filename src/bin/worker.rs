// src/bin/worker.rs

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{fmt, EnvFilter};

use gosbench::stats;
use gosbench::worker;

#[derive(Parser)]
#[command(name = "gosbench-worker", version, about = "Gosbench worker")]
struct Cli {
    /// Coordinator address in the form '192.168.1.1:2000'
    #[arg(short = 's', long = "server")]
    server: String,

    /// Port on which the Prometheus exporter will be available
    #[arg(short = 'p', long = "prometheus-port", default_value_t = 8888)]
    prometheus_port: u16,

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

    stats::install_exporter(cli.prometheus_port)?;
    worker::run(&cli.server).await
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
