// nnwatch entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open the state database, falling back to in-memory storage
// 4. Build the HTTP client, fetcher, push sources and admin client
// 5. Subscribe the status reporter and spawn the engine
// 6. Read operator commands from stdin until quit or Ctrl+C
// 7. Shut down, flushing persisted state

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use nnwatch::commands::{self, HELP};
use nnwatch::config;
use nnwatch::status::StatusReporter;
use nnwatch_core::admin::AdminClient;
use nnwatch_core::db::Database;
use nnwatch_core::engine::{Command, Engine};
use nnwatch_core::persist::{KvStorage, MemoryStorage};
use nnwatch_core::transport::poll::HttpFetcher;
use nnwatch_core::transport::sse::SseSource;
use nnwatch_core::transport::ws::WsSource;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("nnwatch starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: backend={}", config.server.base_url);

    // 3. Open database
    let storage = open_storage(&config.db_path());

    // 4. Transports
    let settings = config.sync_settings();
    let http = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let fetcher = Arc::new(HttpFetcher::new(http.clone(), config.server.base_url.clone()));
    let admin = Arc::new(AdminClient::new(http.clone(), config.server.base_url.clone()));
    let mut engine = Engine::new(settings, storage, fetcher).with_admin(admin);
    match config.server.ws() {
        Some(url) => engine = engine.with_push_source(Arc::new(WsSource::new(url))),
        None => info!("No WebSocket URL configured"),
    }
    match config.server.sse() {
        Some(url) => engine = engine.with_push_source(Arc::new(SseSource::new(http.clone(), url))),
        None => info!("No SSE URL configured"),
    }

    // 5. Status reporting and the engine task
    let mut reporter = StatusReporter::new();
    engine.subscribe(move |state, _meta| reporter.report(state));

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let mut engine_handle = tokio::spawn(engine.run(cmd_rx));

    // 6. Operator input
    let input_handle = tokio::spawn(read_commands(cmd_tx.clone()));
    eprintln!("nnwatch running; logs in logs/nnwatch.log. Type 'help' for commands.");

    let finished = tokio::select! {
        res = &mut engine_handle => Some(res),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
            None
        }
    };

    // 7. Cleanup
    let result = match finished {
        Some(res) => Ok(res),
        None => {
            let _ = cmd_tx.send(Command::Shutdown).await;
            tokio::time::timeout(SHUTDOWN_GRACE, engine_handle).await
        }
    };
    input_handle.abort();

    match result {
        Ok(Ok(state)) => info!(
            "nnwatch shut down cleanly ({} log lines, connection {})",
            state.data.logs.len(),
            state.meta.connection.state.as_str()
        ),
        Ok(Err(e)) => error!("Engine task failed: {}", e),
        Err(_) => warn!("Engine did not stop within {:?}", SHUTDOWN_GRACE),
    }
    Ok(())
}

/// Open the SQLite store, or keep state in memory when that fails.
fn open_storage(path: &std::path::Path) -> Box<dyn KvStorage> {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Could not create {}: {}", parent.display(), e);
        }
    }
    match Database::open(&path.to_string_lossy()) {
        Ok(db) => {
            info!("Database opened at {}", path.display());
            Box::new(db)
        }
        Err(e) => {
            warn!("Persistence disabled, using in-memory storage: {:#}", e);
            Box::new(MemoryStorage::new())
        }
    }
}

/// Forward parsed stdin lines to the engine until EOF or `quit`.
async fn read_commands(cmd_tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim() == "help" {
            eprintln!("{HELP}");
            continue;
        }
        match commands::parse_command(&line) {
            Ok(cmd) => {
                let quit = cmd == Command::Shutdown;
                if cmd_tx.send(cmd).await.is_err() || quit {
                    break;
                }
            }
            Err(commands::CommandError::Empty) => {}
            Err(e) => eprintln!("{e}"),
        }
    }
}

/// Initialize tracing to log to a file, keeping stdout and stderr for the
/// operator.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("nnwatch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nnwatch=info,nnwatch_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
