use crate::environment::Environment;
use crate::expansions::resolve_key_path;
use crate::logging::LogTarget;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

const DEFAULT_TARGET_KEY: &str = "~/.ssh/id_rsa_temporary";

/// Command line arguments. The long option names follow the ones the tool has
/// always used, so existing invocations keep working.
#[derive(Debug, Parser)]
#[command(
    name = "ssh-agent-download",
    version,
    about = "Run ssh through a capturing ssh-agent and keep the key the remote side pushes into it"
)]
pub struct Args {
    /// Location to write the SSH key in
    #[arg(
        long = "targetKeyLocation",
        env = "SSH_AGENT_DOWNLOAD_KEY",
        default_value = DEFAULT_TARGET_KEY
    )]
    pub target_key_location: String,

    /// Target SSH server name
    #[arg(
        long = "targetServer",
        env = "SSH_AGENT_DOWNLOAD_SERVER",
        default_value = "localhost"
    )]
    pub target_server: String,

    /// Target SSH server port
    #[arg(
        long = "targetServerPort",
        env = "SSH_AGENT_DOWNLOAD_PORT",
        default_value_t = 22
    )]
    pub target_server_port: u16,

    /// Seconds the key should exist in the SSH agent for
    #[arg(
        long = "keyLifetime",
        env = "SSH_AGENT_DOWNLOAD_LIFETIME",
        default_value_t = 86400,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub key_lifetime: u64,

    /// The ssh client to run
    #[arg(long = "ssh", default_value = "ssh")]
    pub ssh: PathBuf,

    /// The program used to add the captured key to the real agent
    #[arg(long = "ssh-add", default_value = "ssh-add")]
    pub ssh_add: PathBuf,

    /// Log debug output
    #[arg(long)]
    pub debug: bool,

    /// Log to syslog instead of stderr
    #[arg(long)]
    pub syslog: bool,

    /// Extra arguments passed to ssh in front of the server name
    #[arg(last = true)]
    pub ssh_args: Vec<String>,
}

/// Settings for one run, resolved once at startup.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// Absolute path the captured key is written to.
    pub target_key: PathBuf,
    pub server: String,
    pub port: u16,
    /// Seconds the registered key stays in the real agent.
    pub key_lifetime: u64,
    pub ssh_program: PathBuf,
    pub ssh_add_program: PathBuf,
    pub ssh_args: Vec<String>,
}

impl Args {
    pub fn log_target(&self) -> LogTarget {
        if self.syslog {
            LogTarget::Syslog
        } else {
            LogTarget::Stderr
        }
    }

    pub fn into_config(self, env: &dyn Environment) -> Result<Config> {
        Ok(Config {
            target_key: resolve_key_path(&self.target_key_location, env)?,
            server: self.target_server,
            port: self.target_server_port,
            key_lifetime: self.key_lifetime,
            ssh_program: self.ssh,
            ssh_add_program: self.ssh_add,
            ssh_args: self.ssh_args,
        })
    }
}
