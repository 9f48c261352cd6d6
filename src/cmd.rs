use anyhow::{anyhow, Result};
use log::info;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Invoke the specified non-interactive command with stdin closed. If the command does not
/// finish within `timeout` it is killed and Err is returned. Anything the command writes to
/// stderr is logged, and on success the trimmed content of stdout is returned.
pub fn run(command: &[&str], timeout: Duration) -> Result<String> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("failed to start '{}': {}", program, e))?;

    let Some(exit_status) = child.wait_timeout(timeout)? else {
        child.kill()?;
        child.wait()?;
        return Err(anyhow!(
            "Timed out waiting for command '{}' after {:?}",
            program,
            timeout
        ));
    };

    let stderr = read_pipe(&mut child, Pipe::Stderr)?;
    for line in stderr.lines() {
        info!("{}: {}", program, line);
    }
    if !exit_status.success() {
        let code = exit_status
            .code()
            .as_ref()
            .map_or("caught signal".into(), i32::to_string);
        return Err(anyhow!(
            "Non-zero exit status from '{}': {}",
            program,
            code
        ));
    }
    Ok(read_pipe(&mut child, Pipe::Stdout)?.trim_end().to_owned())
}

enum Pipe {
    Stdout,
    Stderr,
}

fn read_pipe(child: &mut Child, pipe: Pipe) -> Result<String> {
    let mut buf = Vec::new();
    match pipe {
        Pipe::Stdout => child.stdout.take().map(|mut out| out.read_to_end(&mut buf)),
        Pipe::Stderr => child.stderr.take().map(|mut err| err.read_to_end(&mut buf)),
    }
    .transpose()?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
