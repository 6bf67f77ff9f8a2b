//! trackmate-server - tracking facade entry point

use std::time::Duration;

use trackmate::facade::{self, FacadeConfig, StoreConfig};

const HELP: &str = "\
trackmate-server

USAGE:
    trackmate-server [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Address to bind [env: TRACKMATE_HOST, default: 127.0.0.1]
    -p, --port <PORT>        Port to bind [env: TRACKMATE_PORT, default: 8000]
    --store-uri <URI>        MLflow tracking server [env: MLFLOW_TRACKING_URI, default: http://127.0.0.1:5000]
    --memory                 Keep everything in memory instead of forwarding to MLflow
    --workers <N>            Concurrent store calls [env: TRACKMATE_WORKERS, default: 8]
    --timeout <SECS>         Store call timeout [env: TRACKMATE_STORE_TIMEOUT_SECS, default: 30]
    --help                   Print this message
";

fn parse_args(mut config: FacadeConfig) -> anyhow::Result<Option<FacadeConfig>> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains("--help") {
        return Ok(None);
    }
    if let Some(host) = args.opt_value_from_str(["-h", "--host"])? {
        config.host = host;
    }
    if let Some(port) = args.opt_value_from_str(["-p", "--port"])? {
        config.port = port;
    }
    if let Some(tracking_uri) = args.opt_value_from_str("--store-uri")? {
        config.store = StoreConfig::Rest { tracking_uri };
    }
    if args.contains("--memory") {
        config.store = StoreConfig::Memory;
    }
    if let Some(workers) = args.opt_value_from_str::<_, usize>("--workers")? {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.workers = workers;
    }
    if let Some(secs) = args.opt_value_from_str("--timeout")? {
        config.store_timeout = Duration::from_secs(secs);
    }
    args.finish()?;
    Ok(Some(config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackmate=info,tower_http=info".into()),
        )
        .init();

    let config = match parse_args(FacadeConfig::from_env())? {
        Some(config) => config,
        None => {
            print!("{}", HELP);
            return Ok(());
        }
    };

    facade::serve(config).await
}
