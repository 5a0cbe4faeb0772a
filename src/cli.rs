use crate::transport::DEFAULT_PATH;
use clap::Parser;
use reqwest::Url;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// File holding the persisted session token
    #[arg(
        env = "SIMIOT_TOKEN_FILE",
        long = "token-file",
        value_name = "path",
        default_value = "sessionID.txt"
    )]
    pub token_file: PathBuf,

    /// Activity log file shipped by `send_logs`
    #[arg(
        env = "SIMIOT_LOG_FILE",
        long = "log-file",
        value_name = "path",
        default_value = "LogRecords.txt"
    )]
    pub log_file: PathBuf,

    /// Session handshake endpoint
    #[arg(
        env = "SIMIOT_HANDSHAKE_ENDPOINT",
        long = "handshake-endpoint",
        value_name = "url",
        default_value = "https://SAMPLE/devices/devicesopen"
    )]
    pub handshake_endpoint: Url,

    /// Base URL of the Socket.IO server
    #[arg(
        env = "SIMIOT_SOCKET_URL",
        long = "socket-url",
        value_name = "url",
        default_value = "https://SAMPLE/"
    )]
    pub socket_url: Url,

    /// Socket.IO endpoint path
    #[arg(
        env = "SIMIOT_SOCKET_PATH",
        long = "socket-path",
        value_name = "path",
        default_value = DEFAULT_PATH
    )]
    pub socket_path: String,

    /// Log upload endpoint
    #[arg(
        env = "SIMIOT_UPLOAD_ENDPOINT",
        long = "upload-endpoint",
        value_name = "url",
        default_value = "https://SAMPLE/deviceslog/devlogup"
    )]
    pub upload_endpoint: Url,

    /// Value of the `sys_objects_name` upload header
    #[arg(env = "SIMIOT_OBJECT_NAME", long = "object-name", value_name = "str")]
    pub object_name: Option<String>,

    /// Device serial number
    #[arg(env = "SIMIOT_SERIAL_NO", long = "serial-no", value_name = "str")]
    pub serial_no: Option<String>,

    /// Hardware serial number
    #[arg(env = "SIMIOT_SERIAL_NO_HW", long = "serial-no-hw", value_name = "str")]
    pub serial_no_hw: Option<String>,

    /// Device short code
    #[arg(env = "SIMIOT_SHORT_CODE", long = "short-code", value_name = "str")]
    pub short_code: Option<String>,

    /// Firmware tag
    #[arg(env = "SIMIOT_FIRMWARE", long = "firmware", value_name = "str")]
    pub firmware: Option<String>,

    /// Operating mode tag, eg. "Prod"
    #[arg(env = "SIMIOT_OPER_MODE", long = "oper-mode", value_name = "str")]
    pub oper_mode: Option<String>,

    /// Model id
    #[arg(env = "SIMIOT_MODEL_ID", long = "model-id", value_name = "str")]
    pub model_id: Option<String>,

    /// Site id
    #[arg(env = "SIMIOT_SITE_ID", long = "site-id", value_name = "str")]
    pub site_id: Option<String>,

    /// Heartbeat period in milliseconds
    #[arg(
        env = "SIMIOT_HEARTBEAT_INTERVAL_MS",
        long = "heartbeat-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub heartbeat_interval: Option<Duration>,

    /// Socket connect timeout in milliseconds
    #[arg(
        env = "SIMIOT_CONNECT_TIMEOUT_MS",
        long = "connect-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub connect_timeout: Option<Duration>,

    /// HTTP request timeout in milliseconds
    #[arg(
        env = "SIMIOT_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub request_timeout: Option<Duration>,

    /// Reconnect after the server drops the link instead of idling
    #[arg(env = "SIMIOT_RECONNECT_ON_DISCONNECT", long = "reconnect-on-disconnect")]
    pub reconnect_on_disconnect: bool,

    /// Delay before such a reconnect in milliseconds
    #[arg(
        env = "SIMIOT_RECONNECT_DELAY_MS",
        long = "reconnect-delay-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub reconnect_delay: Option<Duration>,

    /// Poisson rate of the failure model
    #[arg(
        env = "SIMIOT_FAULT_LAMBDA",
        long = "fault-lambda",
        value_name = "float",
        allow_negative_numbers = true
    )]
    pub fault_lambda: Option<f64>,

    /// Draws at or below this count are failures
    #[arg(env = "SIMIOT_FAULT_THRESHOLD", long = "fault-threshold", value_name = "int")]
    pub fault_threshold: Option<u32>,

    /// Seed for reproducible fault draws
    #[arg(env = "SIMIOT_FAULT_SEED", long = "fault-seed", value_name = "int")]
    pub fault_seed: Option<u64>,
}

pub fn parse() -> Cli {
    Parser::parse()
}
