//! Run an interactive ssh session through a capturing ssh-agent.
//!
//! The agent listens on a private unix socket that the ssh client is pointed
//! at through `SSH_AUTH_SOCK`. When the remote side pushes an RSA private key
//! into the agent, the key is written to the target key file with mode 0600.
//! Once the session is over the file is handed to `ssh-add` so the key ends up
//! in the user's real agent.

pub mod agent;
pub mod args;
mod cmd;
pub mod environment;
pub mod error;
mod expansions;
pub mod logging;
pub mod persist;
pub mod server;
pub mod session;

pub use crate::agent::CaptureAgent;
pub use crate::args::{Args, Config};
pub use crate::error::CaptureError;
pub use crate::server::AgentServer;
pub use crate::session::{run_capture_session, RunSummary, SessionLauncher, SshLauncher};
