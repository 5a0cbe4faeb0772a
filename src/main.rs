mod cli;
mod command;
mod config;
mod connection;
mod fault;
mod logging;
mod session;
mod transport;
mod upload;

use anyhow::Result;
use command::CommandDispatcher;
use config::Config;
use connection::ConnectionController;
use logging::LogCapture;
use session::{load_token, SessionManager, SystemNetwork};
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use transport::SocketIoConnector;
use upload::UploadPipeline;

use tracing::{debug, error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match Config::parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let capture = match LogCapture::create(&config.log_file) {
        Ok(capture) => Arc::new(capture),
        Err(e) => {
            eprintln!("Cannot create log file {}: {}", config.log_file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    logging::init(capture.clone());

    info!("Device starting: {}", config.identity.serial_no);
    debug!("{:#?}", config);

    serve(config, capture, shutdown_signal()).await
}

/// Run the device until power-off or `shutdown`, then close the log
///
/// `shutdown` is polled before the handshake starts, so the signal handlers
/// are in place for the whole lifetime of the process.
async fn serve<F>(config: Config, capture: Arc<LogCapture>, shutdown: F) -> ExitCode
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let started = tokio::select! {
        biased;
        _ = &mut shutdown => None,
        started = start(config, capture.clone()) => Some(started),
    };

    let code = match started {
        None => {
            info!("Exiting: interrupted during startup");
            ExitCode::SUCCESS
        }
        Some(Ok(controller)) => {
            let outcome = controller.run(shutdown).await;
            info!("Exiting: {:?}", outcome);
            ExitCode::SUCCESS
        }
        Some(Err(e)) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    };

    // The log must parse as a JSON array however the process ends
    if let Err(e) = capture.finalize() {
        eprintln!("Cannot finalize log file: {}", e);
    }
    code
}

/// Load the token, open the session and wire up the controller
async fn start(config: Config, capture: Arc<LogCapture>) -> Result<ConnectionController<SocketIoConnector>> {
    let network = Arc::new(SystemNetwork);

    let token = load_token(&config.token_file)?;
    let manager = SessionManager::new(config.handshake.clone(), network.clone())?;
    let session = Arc::new(manager.acquire_session(&config.identity, &token).await?);

    info!("Starting socket client with session {}", session.session_id);

    let pipeline = Arc::new(UploadPipeline::new(config.upload.clone(), capture.clone())?);
    let dispatcher = CommandDispatcher::new(session, config.identity.clone(), capture, network);
    Ok(ConnectionController::new(
        config.connection,
        config.socket,
        dispatcher,
        config.fault.simulator(),
        pipeline,
    ))
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Interrupt received, shutting down"),
        _ = terminate => info!("Terminate received, shutting down"),
    }
}
