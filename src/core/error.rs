//! Error types for the streaming engine

use thiserror::Error;

use crate::dataset::DatasetId;
use crate::streaming::loader::LoadError;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    #[error("Unknown dataset: {0:?}")]
    UnknownDataset(DatasetId),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),
}
