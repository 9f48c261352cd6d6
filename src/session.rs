use crate::agent::CaptureAgent;
use crate::args::Config;
use crate::cmd;
use crate::error::CaptureError;
use crate::server::AgentServer;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// The environment variable ssh reads the agent socket path from.
pub const AUTH_SOCK: &str = "SSH_AUTH_SOCK";

const SOCKET_NAME: &str = "agent.sock";
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
/// How long ssh gets to restore the terminal and exit after SIGTERM.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// The two external steps of a capture run, behind a trait to simplify testing.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Run the interactive session with its agent pointed at `auth_sock` and wait for it to end.
    /// Once `abort` is cancelled the session has to be wound down and this must return.
    async fn run_session(&self, auth_sock: &Path, abort: CancellationToken) -> Result<ExitStatus>;

    /// Hand the key file to the real agent, to be kept for `lifetime` seconds.
    async fn register(&self, key: &Path, lifetime: u64) -> Result<()>;
}

/// Runs `ssh` for the session and `ssh-add` for registration.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    ssh: PathBuf,
    ssh_add: PathBuf,
    host: String,
    port: u16,
    extra_args: Vec<String>,
}

impl SshLauncher {
    pub fn new(config: &Config) -> Self {
        SshLauncher {
            ssh: config.ssh_program.clone(),
            ssh_add: config.ssh_add_program.clone(),
            host: config.server.clone(),
            port: config.port,
            extra_args: config.ssh_args.clone(),
        }
    }
}

#[async_trait]
impl SessionLauncher for SshLauncher {
    async fn run_session(&self, auth_sock: &Path, abort: CancellationToken) -> Result<ExitStatus> {
        // stdio is inherited, so to the user this is a plain ssh invocation
        let mut child = Command::new(&self.ssh)
            .arg("-p")
            .arg(self.port.to_string())
            .args(&self.extra_args)
            .arg(&self.host)
            .env(AUTH_SOCK, auth_sock)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.ssh.display()))?;
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = abort.cancelled() => None,
        };
        match exited {
            Some(status) => Ok(status?),
            None => Ok(terminate(&mut child).await?),
        }
    }

    async fn register(&self, key: &Path, lifetime: u64) -> Result<()> {
        let command = [
            self.ssh_add.to_string_lossy().into_owned(),
            "-t".to_string(),
            lifetime.to_string(),
            key.to_string_lossy().into_owned(),
        ];
        let output = tokio::task::spawn_blocking(move || {
            let command: Vec<&str> = command.iter().map(String::as_str).collect();
            cmd::run(&command, REGISTER_TIMEOUT)
        })
        .await??;
        for line in output.lines() {
            info!("{}: {}", self.ssh_add.display(), line);
        }
        Ok(())
    }
}

/// Ask the child to exit with SIGTERM, which lets ssh put the terminal back the
/// way it found it. SIGKILL is only used if it is still running after [TERMINATE_GRACE].
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        debug!("sending SIGTERM to pid {pid}");
        // SAFETY: the child has not been reaped yet, so the pid still refers to it
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    match timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("session still running {TERMINATE_GRACE:?} after SIGTERM, killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

/// A private temporary directory holding the agent socket. The directory and
/// everything in it is removed when this is dropped.
pub struct Rendezvous {
    dir: TempDir,
    path: PathBuf,
}

impl Rendezvous {
    pub fn create() -> Result<Self, CaptureError> {
        let dir = tempfile::Builder::new()
            .prefix("ssh-agent-download.")
            .tempdir()
            .map_err(|source| CaptureError::Bind {
                path: env::temp_dir(),
                source,
            })?;
        let path = dir.path().join(SOCKET_NAME);
        Ok(Rendezvous { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Signals that abort a run. Registered up front so that a signal arriving during
/// the session is turned into an ordinary error and the socket directory gets cleaned up.
struct Signals {
    terminate: Signal,
    hangup: Signal,
    interrupt: Signal,
}

impl Signals {
    fn new() -> Result<Self> {
        Ok(Signals {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub exit_status: ExitStatus,
    /// Whether the key was handed over to the real agent.
    pub registered: bool,
}

/// Run one capture session: serve a capturing agent on a fresh socket, run the
/// session against it and, once the session is over, register whatever ended up
/// in the target key file with the real agent.
///
/// A fatal error from the agent, or one of SIGTERM, SIGHUP and SIGINT, aborts the
/// session. The run waits for it to wind down and returns the error without
/// registering anything.
pub async fn run_capture_session<L>(config: &Config, launcher: &L) -> Result<RunSummary>
where
    L: SessionLauncher + ?Sized,
{
    let mut signals = Signals::new()?;
    let rendezvous = Rendezvous::create()?;
    info!("created agent socket {}", rendezvous.path().display());

    // listen before the session starts so its first connection can't miss us
    let server = AgentServer::bind(rendezvous.path())?;
    let mut serving = JoinSet::new();
    serving.spawn(server.serve(CaptureAgent::new(&config.target_key)));

    info!("connecting to {}", config.server);
    let abort = CancellationToken::new();
    let mut session = launcher.run_session(rendezvous.path(), abort.clone());
    let ended = tokio::select! {
        biased;
        Some(served) = serving.join_next() => Err(server_stopped(served)),
        name = signals.recv() => Err(CaptureError::Interrupted(name).into()),
        status = &mut session => Ok(status),
    };
    let session_result = match ended {
        Ok(status) => status,
        Err(fatal) => {
            warn!("aborting session: {fatal}");
            abort.cancel();
            match session.await {
                Ok(status) => log_exit(status),
                Err(e) => warn!("session did not stop cleanly: {e:#}"),
            }
            serving.shutdown().await;
            return Err(fatal);
        }
    };
    drop(session);

    // the server may have failed in the same instant the session ended
    if let Some(served) = serving.try_join_next() {
        return Err(server_stopped(served));
    }
    serving.shutdown().await;

    if let Ok(status) = &session_result {
        log_exit(*status);
    }
    if let Err(e) = rendezvous.close() {
        warn!("failed to remove agent socket directory: {e}");
    }

    // runs even when the session could not be started
    info!("adding {} to keychain", config.target_key.display());
    let registered = match launcher
        .register(&config.target_key, config.key_lifetime)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "could not add {} to the ssh-agent: {e:#}",
                config.target_key.display()
            );
            false
        }
    };
    Ok(RunSummary {
        exit_status: session_result?,
        registered,
    })
}

fn log_exit(status: ExitStatus) {
    match status.code() {
        Some(code) => info!("session ended with exit status {code}"),
        None => info!("session ended by signal"),
    }
}

// The server only ever returns when something went wrong.
fn server_stopped(served: Result<Result<(), CaptureError>, JoinError>) -> anyhow::Error {
    match served {
        Ok(Ok(())) => anyhow!("agent server stopped unexpectedly"),
        Ok(Err(e)) => e.into(),
        Err(e) => CaptureError::from(e).into(),
    }
}
