use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dns_traffic_logger::config::load_config;
use dns_traffic_logger::pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about = "Passive DNS query logger with batched persistence", long_about = None)]
struct Args {
    /// Config file path (JSON); defaults apply when it does not exist
    #[arg(short = 'c', long = "config", default_value = "config/dns-logger.json")]
    config: PathBuf,
    /// Capture source to use instead of the configured list (repeatable;
    /// `file:<path>` replays a capture file)
    #[arg(short = 'i', long = "interface")]
    interfaces: Vec<String>,
    /// Enable debug logging
    #[arg(long = "debug", default_value_t = false)]
    debug: bool,
    /// Emit logs as JSON
    #[arg(long = "json-logs", default_value_t = false)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug, args.json_logs);

    let mut cfg = load_config(&args.config).context("load config")?;
    if !args.interfaces.is_empty() {
        cfg.sources = args.interfaces;
        cfg.validate().context("validate capture sources")?;
    }

    // shutdown must not wait on capture threads still blocked in a read
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let result = runtime.block_on(pipeline::run(cfg));
    pipeline::shutdown_runtime(runtime);
    result
}

fn init_tracing(debug: bool, json: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_ansi(false))
            .init();
    }
}
