use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulsewatch::config::Config;
use pulsewatch::control::ControlSurface;
use pulsewatch::db::aggregation::Aggregator;
use pulsewatch::db::{HeartbeatWriter, Store};
use pulsewatch::notifier::{EmailService, Notifier};
use pulsewatch::probe::{self, Resolver};
use pulsewatch::scheduler::Scheduler;
use pulsewatch::web::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pulsewatch=info".parse()?),
        )
        .init();

    let cfg = match Config::load("config.yaml") {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Failed to load config.yaml: {}. Using defaults.", e);
            Config::default()
        }
    };
    tracing::info!("Starting PulseWatch on port {}", cfg.server.port);

    // DB open failure is fatal.
    let store = Arc::new(Store::open("pulsewatch.db")?);
    tracing::info!("Database initialized");

    let writer = Arc::new(HeartbeatWriter::spawn(store.clone()));

    let resolver = Arc::new(Resolver::new(&cfg.monitor.dns_server));
    probe::init_clients(resolver.clone());

    if cfg.notification.resend_api_key.is_empty() {
        tracing::warn!("resend_api_key is not set; email notifications will fail");
    }
    let mailer = Arc::new(EmailService::from_config(&cfg.notification));

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        cfg.retention,
        mailer.clone(),
    ));
    let check_result_tx = notifier.start();

    let scheduler = Scheduler::new(
        store.clone(),
        writer.clone(),
        resolver.clone(),
        check_result_tx,
        notifier.states(),
    );

    let aggregator = Aggregator::new(store.clone(), cfg.retention);
    aggregator.start();

    scheduler.start();

    let control = Arc::new(ControlSurface::new(
        store.clone(),
        scheduler.clone(),
        resolver,
        cfg.retention,
        mailer,
        notifier.states(),
    ));

    let server = Server::new(
        cfg.server.port,
        store.clone(),
        scheduler.clone(),
        control,
        cfg.retention,
    );

    // Bind failure propagates and exits non-zero. Shutdown runs in reverse
    // order of construction.
    server
        .start(async {
            shutdown_signal().await;
            tracing::info!("Shutting down...");
        })
        .await?;

    scheduler.stop_all();
    notifier.stop();
    aggregator.stop();
    writer.shutdown().await;
    tracing::info!("Server exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
