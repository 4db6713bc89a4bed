use anyhow::Result;
use clap::Parser;
use iris_pgwire::executor::memory::MemoryExecutorFactory;
use iris_pgwire::{AdapterConfig, AdapterServer};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "PostgreSQL wire protocol adapter for InterSystems IRIS")]
struct Args {
    /// Config file path (JSON)
    #[clap(short, long, env = "PGWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[clap(long)]
    host: Option<String>,

    /// Listen port
    #[clap(short, long)]
    port: Option<u16>,

    /// Maximum concurrent sessions
    #[clap(long)]
    max_connections: Option<usize>,

    /// Per-statement timeout in milliseconds (0 = unlimited)
    #[clap(long)]
    statement_timeout_ms: Option<u64>,

    /// Log statement text at debug level
    #[clap(long)]
    log_queries: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    // defaults <- file <- environment <- flags
    let mut config = match &args.config {
        Some(path) => AdapterConfig::from_file(path)?,
        None => AdapterConfig::new(),
    };
    config.apply_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if let Some(ms) = args.statement_timeout_ms {
        config.statement_timeout_ms = (ms > 0).then_some(ms);
    }
    if args.log_queries {
        config.log_queries = true;
    }

    info!(
        "starting IRIS pgwire adapter on {} (auth: {}, tls: {})",
        config.listen_addr(),
        config.auth.method,
        if config.tls.is_some() { "on" } else { "off" },
    );

    // The standalone binary runs against the in-process backend; embedders
    // construct AdapterServer with their own ExecutorFactory for a real
    // IRIS connection.
    let factory = Arc::new(MemoryExecutorFactory::new());
    let server = Arc::new(AdapterServer::new(config, factory)?);

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c");
        })
        .await?;

    Ok(())
}
