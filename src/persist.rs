use crate::error::CaptureError;
use log::{info, warn};
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Owner read/write only.
pub const KEY_FILE_MODE: u32 = 0o600;

/// Writes `contents` to `path`, replacing whatever was there before. The file is
/// created with mode 0600 so that its content is never visible to other users,
/// and the mode is set explicitly once more in case the umask stripped owner bits.
pub fn persist_key(path: &Path, contents: &[u8]) -> Result<(), CaptureError> {
    let failed = |source: io::Error| CaptureError::Persist {
        path: path.to_path_buf(),
        source,
    };

    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => warn!("replacing existing key file {}", path.display()),
        _ => {}
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(failed(e)),
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(KEY_FILE_MODE)
        .open(path)
        .map_err(failed)?;
    file.set_permissions(Permissions::from_mode(KEY_FILE_MODE))
        .map_err(failed)?;
    file.write_all(contents).map_err(failed)?;
    file.sync_all().map_err(failed)?;

    info!("saved key to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::CaptureError;
    use crate::persist::{persist_key, KEY_FILE_MODE};
    use anyhow::Result;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn mode(path: &Path) -> Result<u32> {
        Ok(fs::metadata(path)?.permissions().mode() & 0o777)
    }

    #[test]
    fn test_new_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("id_rsa_temporary");

        persist_key(&path, b"key material")?;

        assert_eq!(fs::read(&path)?, b"key material");
        assert_eq!(mode(&path)?, KEY_FILE_MODE);
        Ok(())
    }

    #[test]
    fn test_replaces_existing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("id_rsa_temporary");
        fs::write(&path, b"a much longer previous content that must not survive")?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;

        persist_key(&path, b"new")?;

        assert_eq!(fs::read(&path)?, b"new");
        assert_eq!(mode(&path)?, KEY_FILE_MODE);
        Ok(())
    }

    #[test]
    fn test_read_only_existing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("id_rsa_temporary");
        fs::write(&path, b"old")?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o400))?;

        persist_key(&path, b"new")?;

        assert_eq!(fs::read(&path)?, b"new");
        assert_eq!(mode(&path)?, KEY_FILE_MODE);
        Ok(())
    }

    #[test]
    fn test_missing_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("does/not/exist/id_rsa_temporary");

        let Err(CaptureError::Persist { path: failed, .. }) = persist_key(&path, b"key") else {
            panic!("expected a persist failure");
        };
        assert_eq!(failed, path);
        assert!(!path.exists());
        Ok(())
    }
}
