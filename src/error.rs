use ssh_agent_lib::error::AgentError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that end a capture run. Everything here is fatal: the tool
/// either captures the key or stops visibly.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unsupported key type pushed to the agent: {0}")]
    UnsupportedKey(String),

    #[error("failed to convert the captured RSA key")]
    Key(#[from] ssh_key::Error),

    #[error("failed to PEM encode the captured RSA key")]
    Encode(#[from] rsa::pkcs1::Error),

    #[error("failed to write key to {path:?}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create the agent socket at {path:?}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept an agent connection")]
    Accept(#[source] io::Error),

    #[error("agent connection failed")]
    Protocol(#[source] AgentError),

    #[error("agent connection task failed")]
    Task(#[from] tokio::task::JoinError),

    #[error("interrupted by {0}")]
    Interrupted(&'static str),
}
