use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors surfaced to `main`.
#[derive(Error, Debug)]
pub enum PetError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

/// Why a batch did not reach the collector. Always recovered by requeue.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collector answered {0}")]
    Status(u16),

    #[error("could not encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("could not start delivery worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("delivery worker went away")]
    Disconnected,
}

/// Returned by a state subscriber to report that it could not handle a
/// change. The store logs it and keeps notifying the others.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl From<&str> for ListenerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for ListenerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}
