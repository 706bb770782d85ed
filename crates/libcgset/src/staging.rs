use std::{
    fs::{self, DirBuilder, Permissions},
    os::unix::fs::{DirBuilderExt, PermissionsExt},
    path::{Path, PathBuf},
};

use nix::unistd;

use crate::common::{WrapIoResult, WrappedIoError};

const STAGING_TEMPLATE: &str = "XXXXXX";

/// Creates `path` and any missing ancestors. An existing directory is left
/// untouched.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P, mode: u32) -> Result<(), WrappedIoError> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(());
    }

    tracing::debug!("create dir {:?}", path);
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .wrap_create_dir(path)
}

/// Joins `elems` into a base path, makes sure it exists and allocates a
/// uniquely named directory below it.
pub fn create_staging_dir<I, P>(elems: I, mode: u32) -> Result<PathBuf, WrappedIoError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let base: PathBuf = elems.into_iter().collect();
    ensure_dir_exists(&base, mode)?;

    let template = base.join(STAGING_TEMPLATE);
    let staged = unistd::mkdtemp(&template)
        .map_err(std::io::Error::from)
        .wrap_create_dir(&template)?;
    // mkdtemp always creates 0700
    let staged = setup_or_discard(staged, |path| {
        fs::set_permissions(path, Permissions::from_mode(mode)).wrap_other(path)
    })?;

    tracing::debug!("staged cgroup dir {:?}", staged);
    Ok(staged)
}

/// Runs `setup` on a directory that was just created and removes the
/// directory again if it fails.
fn setup_or_discard<F>(staged: PathBuf, setup: F) -> Result<PathBuf, WrappedIoError>
where
    F: FnOnce(&Path) -> Result<(), WrappedIoError>,
{
    if let Err(err) = setup(&staged) {
        if let Err(remove_err) = fs::remove_dir(&staged) {
            tracing::warn!("failed to discard {:?}: {}", staged, remove_err);
        }
        return Err(err);
    }

    Ok(staged)
}

/// Removes a single empty directory. An empty path is a no-op.
pub fn remove<P: AsRef<Path>>(path: P) -> Result<(), WrappedIoError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Ok(());
    }

    tracing::debug!("remove cgroup dir {:?}", path);
    fs::remove_dir(path).wrap_remove(path)
}

/// Tries to remove every path and reports the first failure only.
pub fn remove_all<I, P>(paths: I) -> Result<(), WrappedIoError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut first_err = None;
    for path in paths {
        if let Err(err) = remove(path) {
            if first_err.is_none() {
                first_err = Some(err);
            } else {
                tracing::debug!("suppressed removal error: {}", err);
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
