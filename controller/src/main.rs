mod cli;
mod logging;

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command};
use promconf::source::load_manifests;
use promconf::{
    Controller, ControllerConfig, Engine, ManifestSource, ReloadClient, SourceError, SourceWatcher,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Capacity of the event channel between the watcher thread and the loop.
const EVENT_BUFFER: usize = 64;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level, cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(err = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(err = %e, "Controller failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode, BoxError> {
    let config = cli.config.to_config()?;

    let shutdown = CancellationToken::new();
    let reloader = Arc::new(ReloadClient::from_config(&config, shutdown.clone())?);
    let engine = Arc::new(Engine::new(config.clone(), reloader));

    match cli.command {
        Command::Run {
            manifests,
            resync_secs,
        } => run(engine, &config, manifests, resync_secs, shutdown).await,
        Command::Validate { manifest } => validate(&engine, &manifest),
        Command::Rebuild { reload } => {
            install_signal_handler(shutdown)?;
            let (assembled, report) = engine.rebuild(reload).await?;
            tracing::info!(path = %assembled.path.display(), "Rebuilt configuration");
            if let Some(report) = report {
                tracing::info!(attempts = report.attempts, "Reloaded");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    engine: Arc<Engine>,
    config: &ControllerConfig,
    manifests: std::path::PathBuf,
    resync_secs: u64,
    shutdown: CancellationToken,
) -> Result<ExitCode, BoxError> {
    install_signal_handler(shutdown.clone())?;

    tracing::info!(
        config_path = %config.config_path.display(),
        template = %config.config_template.display(),
        id = %config.instance.id,
        reload_url = %config.reload_url,
        manifests = %manifests.display(),
        "Starting Prometheus Controller"
    );

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let resync = Some(Duration::from_secs(resync_secs));
    let watcher = SourceWatcher::new(ManifestSource::new(manifests), tx, shutdown.clone())
        .with_resync(resync)
        .spawn()?;

    let controller = Controller::new(engine);
    controller.run(rx, shutdown.clone()).await;
    shutdown.cancel();

    let joined = tokio::task::spawn_blocking(move || watcher.join()).await?;
    match joined {
        Ok(Ok(())) | Ok(Err(SourceError::ChannelClosed)) => Ok(ExitCode::SUCCESS),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err("manifest watcher panicked".into()),
    }
}

fn validate(engine: &Engine, manifest: &Path) -> Result<ExitCode, BoxError> {
    let inspections: Vec<_> = load_manifests(manifest)?
        .iter()
        .map(|resource| engine.inspect(resource))
        .collect();

    println!("{}", serde_json::to_string_pretty(&inspections)?);

    if inspections.iter().all(|i| i.valid) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn install_signal_handler(shutdown: CancellationToken) -> Result<(), BoxError> {
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    })?;
    Ok(())
}
