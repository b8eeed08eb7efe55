//! Create-if-absent Combinators
//!
//! Keyrings, sentinels, data directories, and environment descriptors are
//! all written at most once. Once a path exists it is never overwritten;
//! callers get [`Ensured::AlreadyPresent`] back and move on.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::{debug, warn};

/// What an `ensure_*` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyPresent,
}

impl Ensured {
    pub fn created(&self) -> bool {
        matches!(self, Ensured::Created)
    }
}

/// Create `path` and its parents unless it already exists
pub fn ensure_dir(path: &Path) -> Result<Ensured> {
    if path.is_dir() {
        debug!("{} already exists", path.display());
        return Ok(Ensured::AlreadyPresent);
    }
    fs::create_dir_all(path).map_err(|e| Error::resource("create directory", path, e))?;
    Ok(Ensured::Created)
}

/// Write `contents` to `path` unless the path already exists
///
/// Parent directories are created as needed. The file is opened with
/// `create_new`, so a file that appears between the check and the write is
/// left untouched as well.
pub fn ensure_file(path: &Path, contents: &[u8]) -> Result<Ensured> {
    if path.exists() {
        debug!("{} already exists, not overwriting", path.display());
        return Ok(Ensured::AlreadyPresent);
    }
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(Ensured::AlreadyPresent),
        Err(e) => return Err(Error::resource("create", path, e)),
    };
    if let Err(e) = file.write_all(contents).and_then(|_| file.sync_all()) {
        discard_partial(path);
        return Err(Error::resource("write", path, e));
    }
    Ok(Ensured::Created)
}

/// Let `produce` create `path` unless it already exists
///
/// Used where an external tool writes the file itself. If `produce` fails,
/// whatever it left at `path` is removed before the error is returned.
pub async fn ensure_file_with<F, Fut>(path: &Path, produce: F) -> Result<Ensured>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if path.exists() {
        debug!("{} already exists, not regenerating", path.display());
        return Ok(Ensured::AlreadyPresent);
    }
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    match produce().await {
        Ok(()) => Ok(Ensured::Created),
        Err(e) => {
            discard_partial(path);
            Err(e)
        }
    }
}

/// Return the content of `path`, or whatever `create` produces when absent
///
/// `create` does not write `path`; persisting is left to the caller.
pub async fn read_or_create<F, Fut>(path: &Path, create: F) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    if path.is_file() {
        debug!("{} already exists, returning its content", path.display());
        return fs::read_to_string(path).map_err(|e| Error::resource("read", path, e));
    }
    create().await
}

/// Remove a file if it exists; absence is not an error
pub fn remove_file_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::resource("remove", path, e)),
    }
}

/// Recursively remove a directory if it exists
pub fn remove_dir_all_if_present(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::resource("remove", path, e)),
    }
}

fn discard_partial(path: &Path) {
    if let Err(e) = remove_file_if_present(path) {
        warn!("Could not remove partial file: {}", e);
    }
}
