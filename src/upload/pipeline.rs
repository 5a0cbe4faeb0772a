//! Log upload over multipart HTTP

use crate::logging::LogCapture;
use reqwest::header::COOKIE;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use simiot_shared::{timing, Session};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Header naming the object the log belongs to
pub const OBJECT_NAME_HEADER: &str = "sys_objects_name";
/// Header carrying the backend's device id
pub const DEVICE_ID_HEADER: &str = "p_devices_id";
/// Multipart field holding the log file
pub const FILE_FIELD: &str = "file";

/// Errors that can occur while shipping a log snapshot
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("failed to snapshot log file: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Upload settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub endpoint: Url,
    /// Value of the `sys_objects_name` header
    pub object_name: String,
    /// Where snapshots are staged before sending
    pub temp_dir: PathBuf,
    pub timeout: Duration,
}

impl UploadConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            object_name: "alperen_test".into(),
            temp_dir: std::env::temp_dir(),
            timeout: Duration::from_millis(timing::REQUEST_TIMEOUT_MS),
        }
    }
}

/// Successful upload response
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub status: StatusCode,
    pub body: String,
}

/// Packages the captured log and posts it with the session credentials
pub struct UploadPipeline {
    client: reqwest::Client,
    config: UploadConfig,
    capture: Arc<LogCapture>,
    counter: AtomicU64,
}

impl UploadPipeline {
    pub fn new(config: UploadConfig, capture: Arc<LogCapture>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            capture,
            counter: AtomicU64::new(0),
        })
    }

    /// Snapshot the log and send it; the staged copy is always removed
    pub async fn upload(&self, session: &Session, serial_no: &str) -> Result<UploadReport, UploadError> {
        let staged = self.staging_path(serial_no);
        let result = self.stage_and_send(&staged, session, serial_no).await;
        remove_staged(&staged).await;
        result
    }

    async fn stage_and_send(
        &self,
        staged: &Path,
        session: &Session,
        serial_no: &str,
    ) -> Result<UploadReport, UploadError> {
        let bytes = self.capture.snapshot_to(staged)?;
        debug!("Staged {} bytes at {}", bytes, staged.display());

        let contents = tokio::fs::read(staged).await?;
        let part = Part::bytes(contents)
            .file_name(format!("LogRecords_{}.txt", serial_no))
            .mime_str("text/plain")?;
        let form = Form::new().part(FILE_FIELD, part);

        let mut request = self
            .client
            .post(self.config.endpoint.clone())
            .header(COOKIE, session.cookie())
            .header(OBJECT_NAME_HEADER, &self.config.object_name)
            .multipart(form);
        if let Some(device_id) = &session.device_id {
            request = request.header(DEVICE_ID_HEADER, device_id);
        }

        info!("Uploading log file to {}", self.config.endpoint);
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UploadError::Rejected { status, body });
        }
        Ok(UploadReport { status, body })
    }

    fn staging_path(&self, serial_no: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.config
            .temp_dir
            .join(format!("LogRecords_{}_{}_{}.txt", serial_no, std::process::id(), n))
    }
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove staged log {}: {}", path.display(), e);
        }
    }
}
