use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("bridge: channel '{0}' already exists")]
    ErrDuplicateChannel(String),
    #[error("bridge: unsupported baud rate {0}")]
    ErrUnsupportedBaudRate(u32),
    #[error("bridge: invalid config: {0}")]
    ErrInvalidConfig(String),
    #[error("bridge: unrecognized config file format '{0}'")]
    ErrUnknownConfigFormat(String),
    #[error("bridge: endpoint already closed")]
    ErrClosed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("{0}")]
    Other(String),
}
