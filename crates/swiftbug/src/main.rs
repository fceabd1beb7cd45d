use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use swiftbug_engine::backend::Backend;
use swiftbug_engine::cli::{self, Console, OnError};
use swiftbug_engine::config::{ConfigLoader, SwiftbugConfig};
use swiftbug_engine::executor::CommandExecutor;
use swiftbug_engine::fetch::HttpFetcher;
use swiftbug_engine::handler::MessageHandler;
use swiftbug_engine::restore::{RestoreOptions, Restorer};
use swiftbug_engine::store::{FilePersistence, ReportStore};
use swiftbug_h::backend::HeadlessBackend;
use swiftbug_r::backend::RemoteBackend;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swiftbug", version, about = "Capture and replay bug report snapshots")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Commands to execute (non-interactive mode)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Config file (defaults to ./swiftbug.yaml, then ~/.swiftbug/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Mode {
    /// Drive a local Chromium via CDP
    Headless {
        /// Launch browser in visible mode (not headless)
        #[arg(long)]
        visible: bool,
    },
    /// Relay to the browser extension via WebSocket
    Remote {
        /// WebSocket port (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path).await?,
        None => ConfigLoader::load_default().await?,
    };

    let mut backend: Box<dyn Backend> = match args.mode {
        Mode::Headless { visible } => Box::new(HeadlessBackend::new_with_visibility(
            config.capture.clone(),
            visible,
        )),
        Mode::Remote { port } => {
            let mut remote = config.remote.clone();
            if let Some(port) = port {
                remote.port = port;
            }
            Box::new(RemoteBackend::with_config(&remote))
        }
    };

    if let Err(e) = backend.launch().await {
        eprintln!("Failed to launch backend: {}", e);
        return Err(e.into());
    }
    let backend: Arc<dyn Backend> = Arc::from(backend);

    let handler = build_handler(&config, Arc::clone(&backend)).await?;
    let executor = CommandExecutor::new(Arc::new(handler));

    let result = match &args.file {
        Some(path) => cli::run_file(&executor, path, &mut Console, OnError::Stop)
            .await
            .map(|summary| {
                info!(
                    "Ran {} commands ({} failed), {} restorations finished",
                    summary.executed, summary.failed, summary.restorations
                )
            }),
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            cli::run_repl(&executor, stdin, &mut Console).await
        }
    };
    if let Err(e) = &result {
        eprintln!("{}", e);
    }

    backend.close().await?;
    result.map_err(Into::into)
}

async fn build_handler(
    config: &SwiftbugConfig,
    backend: Arc<dyn Backend>,
) -> Result<MessageHandler, Box<dyn std::error::Error>> {
    info!("Report storage: {}", config.storage.dir.display());
    let store = Arc::new(ReportStore::new(Arc::new(FilePersistence::new(
        &config.storage.dir,
    ))));
    store.initialize().await?;

    let settings = store.settings().await?;
    if let Err(e) = backend.apply_settings(&settings).await {
        warn!("Could not apply stored settings: {}", e);
    }

    Ok(MessageHandler::new(
        backend,
        store,
        Arc::new(HttpFetcher::new()),
        Restorer::new(RestoreOptions::from(&config.restore)),
        &config.storage.export_dir,
    ))
}
