use crate::environment::Environment;
use anyhow::Result;
use std::path::PathBuf;

/// Turn a user supplied key location into an absolute path. A leading `~` or
/// `~user` is replaced with the matching home directory, and a relative result
/// is resolved against the current directory.
pub fn resolve_key_path(input: &str, env: &dyn Environment) -> Result<PathBuf> {
    let expanded = expand_homedir(input, |user| {
        Ok(env.get_homedir(user)?.into_owned())
    })?;
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(env.current_dir()?.join(path))
}

fn expand_homedir<F>(input: &str, get_homedir: F) -> Result<String>
where
    F: FnOnce(Option<&str>) -> Result<String>,
{
    let Some(rest) = input.strip_prefix('~') else {
        return Ok(input.to_string());
    };
    let user = get_username(rest);
    let home = get_homedir((!user.is_empty()).then_some(user))?;
    let mut output = home.trim_end_matches('/').to_string();
    output.push_str(&rest[user.len()..]);
    Ok(output)
}

fn get_username(input: &str) -> &str {
    match input.find('/') {
        Some(idx) => &input[..idx],
        None => input,
    }
}
