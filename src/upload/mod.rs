//! Upload of the captured activity log

mod pipeline;

pub use pipeline::{UploadConfig, UploadError, UploadPipeline, UploadReport};
