use anyhow::Context;
use gvwap::config::{Config, RunMode};
use gvwap::gateway::ClientIdGenerator;
use gvwap::orchestration::{restart_backoff, supervise};
use gvwap::{
    api, CandleSignalSource, ControlLoop, EngineError, EventLog, ExchangeGateway, OkxGateway,
    SignalSource, StatusHandle, TuningFile,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Candles are refetched at most this often per bar.
const CANDLE_CACHE_TTL: Duration = Duration::from_secs(20);

/// One full run: connect, control loop, drain.
async fn run_once(
    config: &Config,
    events: EventLog,
    status: StatusHandle,
    mut stop: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(OkxGateway::new(
        config.okx_base_url.clone(),
        config.credentials.clone(),
        config.simulated,
        config.http_timeout,
    )?);
    let signals: Arc<dyn SignalSource> =
        Arc::new(CandleSignalSource::new(gateway.clone(), CANDLE_CACHE_TTL));

    let mut tuning_file = TuningFile::new(&config.tuning_file);
    let tuning = tuning_file.load()?;
    let ids = ClientIdGenerator::from_seed_or_random(config.clord_seed.as_deref());

    let mut control = ControlLoop::connect(
        gateway,
        signals,
        config.inst_id.clone(),
        config.td_mode.as_str(),
        ids,
        tuning,
        events,
        status,
    )
    .await?
    .with_tuning_file(tuning_file);

    control
        .run(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await
}

async fn serve_status(port: u16, state: api::AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Status server listening on {}", addr);
    axum::serve(listener, api::create_router(state))
        .await
        .context("Status server error")
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let events = EventLog::default();
    let status = StatusHandle::new();

    if let Some(port) = config.status_port {
        let state = api::AppState::new(status.clone(), events.clone());
        tokio::spawn(async move {
            if let Err(e) = serve_status(port, state).await {
                tracing::error!("{:#}", e);
            }
        });
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, draining");
            let _ = stop_tx.send(true);
        }
    });

    let result = match config.run_mode {
        RunMode::Once => run_once(&config, events, status, stop_rx).await,
        RunMode::Daemon => supervise(stop_rx, restart_backoff(), |stop| {
            run_once(&config, events.clone(), status.clone(), stop)
        })
        .await
        .map(|runs| tracing::info!(runs, "Daemon stopped")),
    };

    if let Err(e) = result {
        eprintln!("Engine error: {}", e);
        std::process::exit(1);
    }
}
