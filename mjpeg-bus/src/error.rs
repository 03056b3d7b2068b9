use std::io;

use thiserror::Error;

/// Errors surfaced to the owner of a recording session.
///
/// Frame-level corruption never shows up here: the scanner and the
/// ingestion loop resynchronise and count it instead.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("byte source failed: {0}")]
    Source(#[from] io::Error),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("failed to spawn transcoder: {0}")]
    Spawn(#[source] io::Error),

    #[error("transcoder binary not found: {0}")]
    BinaryNotFound(String),

    #[error("session task failed: {0}")]
    Task(String),
}

impl BusError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        BusError::Config(msg.into())
    }
}

impl From<tokio::task::JoinError> for BusError {
    fn from(err: tokio::task::JoinError) -> Self {
        BusError::Task(err.to_string())
    }
}

impl From<image::ImageError> for BusError {
    fn from(err: image::ImageError) -> Self {
        BusError::Decode(err.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;
