use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the judging infrastructure itself.
///
/// Limits exceeded by the judged program are never errors, they end up as a
/// [`Verdict`](crate::verdict::Verdict).
#[derive(Debug, Error)]
pub enum Error {
    #[error("entity `{0}` not found")]
    NotFound(String),
    #[error("failed in IO")]
    IO(#[from] io::Error),
    #[error("argument provided is error: {0}")]
    Argument(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("failed to spawn `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("result sink error: {0}")]
    Sink(String),
    #[error("environment error: {0}")]
    Environment(String),
    #[error("yaml error")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error")]
    Json(#[from] serde_json::Error),
}
