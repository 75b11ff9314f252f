use std::env;
use std::process::ExitCode;

use pizza_relay::{init_tracing, AppConfig, RelayServer, TelemetryCollector};

const DEFAULT_CONFIG: &str = "pizza-relay.toml";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "pizza relay stopped");
            eprintln!("pizza-relay: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> pizza_relay::Result<()> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("PIZZA_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = AppConfig::from_env_or_file(&path)?;
    init_tracing(&cfg.telemetry)?;
    tracing::info!(
        config = %path,
        provider = %cfg.model.provider,
        model = %cfg.model.model,
        "configuration loaded"
    );

    let server = RelayServer::from_config(&cfg, TelemetryCollector::default())?;
    server.serve(cfg.listen_addr()?).await
}
