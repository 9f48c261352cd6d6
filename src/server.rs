use crate::error::CaptureError;
use futures::{SinkExt, TryStreamExt};
use log::{debug, info};
use ssh_agent_lib::agent::Session;
use ssh_agent_lib::codec::Codec;
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{Request, Response};
use std::fs::{set_permissions, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;

/// A unix socket speaking the ssh-agent protocol. Every accepted connection is
/// served by its own task with its own clone of the agent.
pub struct AgentServer {
    listener: UnixListener,
}

impl AgentServer {
    /// Bind the listening socket at `path`. Must be called from within a tokio runtime.
    pub fn bind(path: &Path) -> Result<Self, CaptureError> {
        let failed = |source: std::io::Error| CaptureError::Bind {
            path: path.to_path_buf(),
            source,
        };
        let listener = UnixListener::bind(path).map_err(failed)?;
        set_permissions(path, Permissions::from_mode(0o600)).map_err(failed)?;
        debug!("listening on {}", path.display());
        Ok(AgentServer { listener })
    }

    /// Accept and serve connections until something fatal happens. Failing to accept a
    /// connection, or a connection failing for any reason other than the peer going away,
    /// ends the whole server with that error.
    pub async fn serve<A>(self, agent: A) -> Result<(), CaptureError>
    where
        A: Session + Clone,
    {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _) = accepted.map_err(CaptureError::Accept)?;
                    debug!("accepted agent connection");
                    connections.spawn(serve_connection(agent.clone(), stream));
                }
                Some(finished) = connections.join_next() => {
                    finished??;
                    debug!("agent connection closed");
                }
            }
        }
    }
}

/// Serve the agent protocol on a single connection until the peer hangs up.
///
/// Requests the agent declines are answered with a failure message and the connection
/// stays open. Any other error from the agent ends the connection and is returned.
pub async fn serve_connection<A, S>(mut agent: A, stream: S) -> Result<(), CaptureError>
where
    A: Session,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, Codec::<Request, Response>::default());
    loop {
        let request = match framed.try_next().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(CaptureError::Protocol(e)),
        };
        let response = match agent.handle(request).await {
            Ok(response) => response,
            Err(AgentError::Failure | AgentError::ExtensionFailure) => Response::Failure,
            Err(e) => return Err(into_capture_error(e)),
        };
        match framed.send(response).await {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(CaptureError::Protocol(e)),
        }
    }
}

fn is_disconnect(error: &AgentError) -> bool {
    match error {
        AgentError::IO(e) => matches!(
            e.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

// The agent reports capture failures wrapped in AgentError::Other, unwrap them again
// so the caller sees what actually went wrong.
fn into_capture_error(error: AgentError) -> CaptureError {
    match error {
        AgentError::Other(inner) => match inner.downcast::<CaptureError>() {
            Ok(capture) => {
                info!("stopping agent: {capture}");
                *capture
            }
            Err(inner) => CaptureError::Protocol(AgentError::Other(inner)),
        },
        other => CaptureError::Protocol(other),
    }
}
