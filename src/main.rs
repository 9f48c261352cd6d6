use anyhow::Result;
use clap::Parser;
use log::{error, LevelFilter};
use ssh_agent_download::environment::UnixEnvironment;
use ssh_agent_download::logging::init_logging;
use ssh_agent_download::{run_capture_session, Args, SshLauncher};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if log::max_level() == LevelFilter::Off {
                eprintln!("ssh-agent-download: {err:?}");
            }
            for line in format!("{err:?}").split('\n') {
                error!("{line}")
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.log_target(), args.debug)?;
    let config = args.into_config(&UnixEnvironment)?;
    let launcher = SshLauncher::new(&config);
    run_capture_session(&config, &launcher).await?;
    Ok(())
}
