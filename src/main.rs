use std::sync::Arc;
use std::sync::atomic::Ordering;

use resume_intake::config::IntakeConfig;
use resume_intake::inbox::{ImapConfig, ImapInbox};
use resume_intake::ledger::{Ledger, LibSqlLedger};
use resume_intake::llm::{LlmConfig, create_provider};
use resume_intake::pipeline::{
    CandidateExtractor, DocumentClassifier, IntakeProcessor, spawn_intake_poller,
};
use resume_intake::sink::{CsvSink, RecordSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing (guard must outlive main for the file writer to flush)
    let _log_guard = init_tracing();

    let config = IntakeConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let imap_config = ImapConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export INTAKE_IMAP_HOST=imap.example.com");
        eprintln!("  export INTAKE_IMAP_USERNAME=hiring@example.com");
        eprintln!("  export INTAKE_IMAP_PASSWORD=...");
        std::process::exit(1);
    });

    let llm_config = LlmConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    eprintln!("📥 Resume Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Inbox: {}@{}:{} ({})",
        imap_config.username, imap_config.host, imap_config.port, imap_config.mailbox
    );
    eprintln!("   Subject filter: {:?}", config.subject_filter);
    eprintln!(
        "   Poll: every {}s (retries {}, ceiling {})",
        config.poll_interval.as_secs(),
        config.max_retries,
        config.max_attempts
    );
    eprintln!("   Model: {}", llm_config.model);

    // Create LLM provider
    let llm = create_provider(&llm_config)?;

    // ── Ledger ──────────────────────────────────────────────────────────
    let ledger: Arc<dyn Ledger> = Arc::new(
        LibSqlLedger::new_local(&config.ledger_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open ledger at {}: {}",
                    config.ledger_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Ledger: {}", config.ledger_path.display());

    // ── Output sink ─────────────────────────────────────────────────────
    let sink = CsvSink::new(&config.output_dir).unwrap_or_else(|e| {
        eprintln!(
            "Error: Failed to prepare output dir {}: {}",
            config.output_dir.display(),
            e
        );
        std::process::exit(1);
    });
    eprintln!("   Candidates: {}", sink.candidates_path().display());
    eprintln!("   Rejections: {}\n", sink.rejections_path().display());
    let sink: Arc<dyn RecordSink> = Arc::new(sink);

    // ── Pipeline ────────────────────────────────────────────────────────
    let inbox = Arc::new(ImapInbox::new(imap_config));
    let classifier = DocumentClassifier::new(llm.clone());
    let extractor = CandidateExtractor::new(llm);
    let processor = Arc::new(IntakeProcessor::new(
        inbox,
        classifier,
        extractor,
        ledger,
        sink,
        config.clone(),
    ));

    let (poller, shutdown) = spawn_intake_poller(Arc::clone(&processor), config.poll_interval);

    // ── Shutdown ────────────────────────────────────────────────────────
    wait_for_shutdown_signal().await;
    shutdown.store(true, Ordering::Relaxed);

    // Finish the in-flight message, then stop. Exit is forced (non-zero)
    // only when the grace period runs out.
    match tokio::time::timeout(config.shutdown_grace, poller).await {
        Ok(result) => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Poller task ended abnormally");
            }
            tracing::info!("Intake stopped cleanly");
            Ok(())
        }
        Err(_) => {
            tracing::error!(
                grace_secs = config.shutdown_grace.as_secs(),
                "In-flight work did not finish within the grace period, forcing exit"
            );
            std::process::exit(1);
        }
    }
}

/// Stdout logging, plus a daily-rolling file copy when `INTAKE_LOG_DIR` is
/// set. The returned guard flushes the file writer on drop.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("INTAKE_LOG_DIR") {
        Ok(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
                &dir,
                "intake.log",
            ));
            tracing_subscriber::registry()
                .with(env_filter)
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
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
            None
        }
    }
}

/// Block until Ctrl+C or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Ctrl+C received, shutting down...");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl+C received, shutting down..."),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C received, shutting down...");
    }
}
