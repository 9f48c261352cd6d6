use anyhow::anyhow;
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use uzers::os::unix::UserExt;
use uzers::{get_current_uid, get_user_by_name, get_user_by_uid};

/// Process environment lookups needed to resolve the target key path.
pub trait Environment {
    /// The home directory of `user`, or of the user running the process when `None`.
    fn get_homedir(&'_ self, user: Option<&str>) -> anyhow::Result<Cow<'_, str>>;

    fn current_dir(&self) -> anyhow::Result<PathBuf>;
}

pub struct UnixEnvironment;

impl Environment for UnixEnvironment {
    fn get_homedir(&'_ self, user: Option<&str>) -> anyhow::Result<Cow<'_, str>> {
        let found = match user {
            Some(name) => get_user_by_name(name),
            None => get_user_by_uid(get_current_uid()),
        };
        match found {
            Some(user) => Ok(Cow::Owned(user.home_dir().to_string_lossy().to_string())),
            None => Err(anyhow!(
                "homedir for {} not found",
                user.unwrap_or("the current user")
            )),
        }
    }

    fn current_dir(&self) -> anyhow::Result<PathBuf> {
        Ok(env::current_dir()?)
    }
}
