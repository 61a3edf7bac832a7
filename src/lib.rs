pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod types;

pub use config::{ContactPolicy, EtlConfig};
pub use error::{EtlError, Result};
pub use pipeline::{BuildStatus, Pipeline, PipelineResult};
