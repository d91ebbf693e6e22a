pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod source;
pub mod storage;
pub mod watermark;

pub use error::{IngestError, Result};
