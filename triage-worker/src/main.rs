use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use triage_core::{
    create_backend, AnalysisBackend, DisabledAnalysisClient, PgReportStore, RedisQueue,
    ReportStore, TriageConfig,
};

use triage_worker::Consumer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "triage.toml")]
    config: String,

    /// Check database and queue connectivity, then exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match TriageConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging, RUST_LOG wins over the configured level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.worker.log_level)),
        )
        .init();

    let store = PgReportStore::new(&config.database);
    let mut queue = RedisQueue::new(&config.queue)?;

    if args.health {
        match store.health_check().await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match queue.ping().await {
            Ok(reply) => println!("✅ Redis connected: {}", reply),
            Err(e) => {
                println!("❌ Redis connection failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ Triage worker health check passed");
        return Ok(());
    }

    tracing::info!("Triage worker starting...");

    if config.worker.startup_delay_secs > 0 {
        tokio::time::sleep(Duration::from_secs(config.worker.startup_delay_secs)).await;
    }

    let analyzer: Box<dyn AnalysisBackend> = match create_backend(&config.analysis).await {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create analysis backend — AI analysis disabled");
            Box::new(DisabledAnalysisClient)
        }
    };

    match store.ensure_schema().await {
        Ok(()) => tracing::info!("Database ready"),
        Err(e) => tracing::error!(error = %e, "Database schema setup failed — continuing"),
    }

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signals");
            // Holding the sender keeps the consumer running without a signal.
            let _tx = tx;
            std::future::pending::<()>().await;
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(());
    });

    tracing::info!(queue = %queue.name(), "Listening on queue");

    Consumer::new(
        Box::new(queue),
        analyzer,
        Box::new(store),
        Duration::from_secs(config.queue.reconnect_delay_secs),
    )
    .run(rx)
    .await;

    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}
