//! `scriptrelay-agent` -- remotely controlled script runner.
//!
//! Reads administrator commands from standard input and remote commands
//! from the messenger, runs registered scripts on a bounded worker pool,
//! and sends their output back to whoever asked.
//!
//! # Arguments and environment
//!
//! | Source                      | Required | Description                                   |
//! |-----------------------------|----------|-----------------------------------------------|
//! | first argument              | no*      | Store directory holding `config.json`         |
//! | `SCRIPTRELAY_STORE_DIR`     | no*      | Store directory when no argument is given     |
//! | `RUST_LOG`                  | no       | Log filter, default `scriptrelay_agent=info,scriptrelay_core=info` |
//!
//! \* One of the two must be set.

use std::sync::Arc;
use std::time::Duration;

use scriptrelay_agent::dispatch::{CommandDispatcher, DispatchOutcome};
use scriptrelay_agent::offline::OfflineMessenger;
use scriptrelay_agent::reload::ConfigReloader;
use scriptrelay_agent::session::SessionState;
use scriptrelay_agent::shutdown::{ShutdownMode, ShutdownSequence};
use scriptrelay_agent::watcher::ConfigWatcher;
use scriptrelay_agent::{console, inbound};
use scriptrelay_core::{
    ConfigSource, Console, ExecutionPool, Messenger, Outbox, PoolConfig, ProcessRunner,
    RegistryHandle, StdoutConsole,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sent to the administrator once the agent is ready.
const STARTUP_NOTICE: &str = "scriptrelay started";

/// How long to wait for background tasks after shutdown.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptrelay_agent=info,scriptrelay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let source = ConfigSource::resolve(std::env::args().nth(1)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Cannot determine store directory");
        std::process::exit(1);
    });

    let config = source.load().await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        std::process::exit(1);
    });

    tracing::info!(
        identity = %config.bot.identity,
        admin = %config.bot.admin_identity,
        max_threads = config.bot.max_threads,
        queue_size = config.bot.queue_size,
        "Starting scriptrelay-agent",
    );

    // --- Messaging ---
    let console: Arc<dyn Console> = Arc::new(StdoutConsole);
    let (inbound_tx, inbound_rx) = inbound::channel();
    let messenger = OfflineMessenger::open(
        source.store_dir(),
        config.bot.identity.clone(),
        config.bot.admin_identity.clone(),
        Arc::clone(&console),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to open messenger");
        std::process::exit(1);
    })
    .with_loopback(inbound_tx);
    let messenger: Arc<dyn Messenger> = Arc::new(messenger);
    let outbox = Outbox::new(Arc::clone(&messenger), Arc::clone(&console));

    // --- Execution ---
    let pool = ExecutionPool::start(
        PoolConfig {
            workers: config.bot.max_threads,
            queue_size: config.bot.queue_size,
        },
        ProcessRunner::new(outbox.clone()),
    )
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to start execution pool");
        std::process::exit(1);
    });

    let registry = RegistryHandle::new(config.build_registry());
    let reloader = Arc::new(ConfigReloader::new(
        source.clone(),
        registry.clone(),
        config.bot.clone(),
    ));
    let session = Arc::new(SessionState::new(
        config.bot.admin_identity.clone(),
        config.bot.listen_only_admin,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        session,
        registry,
        Arc::clone(&pool),
        outbox.clone(),
        Arc::clone(&reloader),
    ));

    // --- Background tasks ---
    let console_stop = CancellationToken::new();
    let watcher_stop = CancellationToken::new();
    let inbound_stop = CancellationToken::new();

    let watcher_handle = config.bot.watch_config.then(|| {
        let watcher = ConfigWatcher::new(Arc::clone(&reloader));
        let cancel = watcher_stop.clone();
        tokio::spawn(async move { watcher.run(cancel).await })
    });

    let inbound_handle = tokio::spawn(inbound::run(
        Arc::clone(&dispatcher),
        inbound_rx,
        inbound_stop.clone(),
    ));

    let (line_tx, mut line_rx) = mpsc::channel(console::CONSOLE_CHANNEL_CAPACITY);
    // The reader thread blocks on stdin and is not joined.
    let _reader = console::spawn_stdin_reader(line_tx, console_stop.clone());

    if config.bot.notify_admin_on_startup {
        let _ = outbox.send(&config.bot.admin_identity, STARTUP_NOTICE).await;
    }
    outbox.print("Ready. Type /help for the list of operations.");

    // --- Main loop ---
    let shutdown = ShutdownSequence::new(
        Arc::clone(&messenger),
        Arc::clone(&pool),
        console_stop,
        watcher_stop,
    );
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut console_open = true;

    let mode = loop {
        tokio::select! {
            line = line_rx.recv(), if console_open => match line {
                Some(line) => {
                    if let DispatchOutcome::Quit = dispatcher.dispatch_local(&line).await {
                        break ShutdownMode::Drain;
                    }
                }
                None => {
                    tracing::info!("Console input closed; waiting for a shutdown signal");
                    console_open = false;
                }
            },
            () = &mut signal => break ShutdownMode::KillNow,
        }
    };

    shutdown.run(mode).await;

    // --- Post-shutdown cleanup ---
    inbound_stop.cancel();
    let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, inbound_handle).await;
    if let Some(handle) = watcher_handle {
        let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await;
    }

    tracing::info!("Goodbye");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), killing running scripts");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, killing running scripts");
        }
    }
}
