use crate::cli::Cli;
use crate::connection::ConnectionConfig;
use crate::fault::{FaultSimulator, KnuthPoisson, OccurrenceSource};
use crate::session::HandshakeConfig;
use crate::transport::SocketIoConnector;
use crate::upload::UploadConfig;
use anyhow::{ensure, Result};
use simiot_shared::{timing, DeviceIdentity};
use std::path::PathBuf;
use std::time::Duration;

/// Fault model parameters
#[derive(Clone, Debug)]
pub struct FaultConfig {
    pub lambda: f64,
    pub threshold: u32,
    /// Fixed seed; drawn from the OS when absent
    pub seed: Option<u64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            lambda: timing::FAULT_LAMBDA,
            threshold: timing::FAULT_FAILURE_THRESHOLD,
            seed: None,
        }
    }
}

impl FaultConfig {
    pub fn simulator(&self) -> FaultSimulator {
        let source: Box<dyn OccurrenceSource> = match self.seed {
            Some(seed) => Box::new(KnuthPoisson::seeded(seed)),
            None => Box::new(KnuthPoisson::from_entropy()),
        };
        FaultSimulator::new(self.lambda, self.threshold, source)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub token_file: PathBuf,
    pub log_file: PathBuf,
    pub identity: DeviceIdentity,
    pub handshake: HandshakeConfig,
    pub socket: SocketIoConnector,
    pub upload: UploadConfig,
    pub connection: ConnectionConfig,
    pub fault: FaultConfig,
}

impl Config {
    /// Load configuration from the command line and `SIMIOT_*` variables
    pub fn parse() -> Result<Self> {
        Self::from_cli(crate::cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        let defaults = DeviceIdentity::default();
        let identity = DeviceIdentity {
            serial_no: cli.serial_no.unwrap_or(defaults.serial_no),
            serial_no_hw: cli.serial_no_hw.unwrap_or(defaults.serial_no_hw),
            short_code: cli.short_code.unwrap_or(defaults.short_code),
            firmware: cli.firmware.unwrap_or(defaults.firmware),
            oper_mode: cli.oper_mode.unwrap_or(defaults.oper_mode),
            model_id: cli.model_id.unwrap_or(defaults.model_id),
            site_id: cli.site_id.unwrap_or(defaults.site_id),
        };
        ensure!(!identity.serial_no.is_empty(), "serial number must not be empty");

        let request_timeout = cli
            .request_timeout
            .unwrap_or(Duration::from_millis(timing::REQUEST_TIMEOUT_MS));

        let mut handshake = HandshakeConfig::new(cli.handshake_endpoint);
        handshake.timeout = request_timeout;

        let mut upload = UploadConfig::new(cli.upload_endpoint);
        upload.timeout = request_timeout;
        if let Some(name) = cli.object_name {
            upload.object_name = name;
        }

        let mut connection = ConnectionConfig {
            reconnect_on_disconnect: cli.reconnect_on_disconnect,
            ..Default::default()
        };
        if let Some(period) = cli.heartbeat_interval {
            ensure!(!period.is_zero(), "heartbeat interval must be positive");
            connection.heartbeat_interval = period;
        }
        if let Some(timeout) = cli.connect_timeout {
            connection.connect_timeout = timeout;
        }
        if let Some(delay) = cli.reconnect_delay {
            connection.reconnect_delay = delay;
        }

        let mut fault = FaultConfig {
            seed: cli.fault_seed,
            ..Default::default()
        };
        if let Some(lambda) = cli.fault_lambda {
            ensure!(lambda > 0.0 && lambda.is_finite(), "fault lambda must be positive");
            fault.lambda = lambda;
        }
        if let Some(threshold) = cli.fault_threshold {
            fault.threshold = threshold;
        }

        Ok(Self {
            token_file: cli.token_file,
            log_file: cli.log_file,
            identity,
            handshake,
            socket: SocketIoConnector::new(cli.socket_url).with_path(cli.socket_path),
            upload,
            connection,
            fault,
        })
    }
}
