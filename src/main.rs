use std::sync::Arc;
use std::sync::atomic::Ordering;

use scambait::config::{Config, POLL_INTERVAL};
use scambait::dispatch::Dispatcher;
use scambait::llm::OpenAiClient;
use scambait::mail::{ImapSource, SmtpSink};
use scambait::poller::spawn_inbox_poller;
use scambait::store::{Database, LibSqlBackend};
use scambait::thread::FirstMatchWins;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(&config);

    eprintln!("📬 Scambait v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Persona: {}", config.persona_id);
    eprintln!(
        "   IMAP: {}:{} (TLS: {})",
        config.imap.host, config.imap.port, config.imap.use_tls
    );
    eprintln!("   SMTP: {}:{}", config.smtp.host, config.smtp.port);
    eprintln!("   From: {} <{}>", config.from.name, config.from.address);

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.database_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.database_path, e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.database_path);

    // Fail fast if the persona row is missing rather than erroring on
    // every dispatched mail.
    let persona = db.persona(config.persona_id).await.unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!(
            "  Insert a persona row with id {} before starting.",
            config.persona_id
        );
        std::process::exit(1);
    });
    eprintln!("   Replying as: {} <{}>", persona.name, persona.email);
    eprintln!("   Polling every {}s\n", POLL_INTERVAL.as_secs());

    let model = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    ));
    let sink = Arc::new(SmtpSink::new(config.smtp.clone(), config.from.clone()));
    let source = Arc::new(ImapSource::new(config.imap.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        model,
        sink,
        Arc::new(FirstMatchWins),
        config.persona_id,
    ));

    let (poller, shutdown) = spawn_inbox_poller(source, Arc::clone(&db), dispatcher);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.store(true, Ordering::Relaxed);
    // The loop only checks the flag between ticks; abort instead of
    // waiting one out.
    poller.abort();

    Ok(())
}

/// Stderr logging, plus a daily-rolling file when LOG_DIR is set. The
/// returned guard must stay alive for the file writer to flush.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    match &config.log_dir {
        Some(dir) => {
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;

            let appender = tracing_appender::rolling::daily(dir, "scambait.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
