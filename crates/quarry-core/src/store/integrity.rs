use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, error};

use super::{Outcome, StoreError, StoreOptions};
use crate::transport::{Intent, Transport};

/// Prefix of in-flight files; anything carrying it is never a finished entry.
pub const TMP_PREFIX: &str = ".quarry-tmp-";

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".sha256");
    PathBuf::from(name)
}

pub(crate) fn read_sidecar(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(sidecar_path(path)) {
        Ok(text) => Ok(text.split_whitespace().next().map(str::to_ascii_lowercase)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn write_sidecar(transport: &dyn Transport, path: &Path) -> anyhow::Result<()> {
    let digest = transport.hash(path)?;
    fs::write(sidecar_path(path), format!("{digest}\n"))?;
    Ok(())
}

/// Removes `path` and its sidecar; `false` when there was nothing to remove.
pub(crate) fn remove_entry(path: &Path) -> io::Result<bool> {
    let removed = match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err),
    };
    match fs::remove_file(sidecar_path(path)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    Ok(removed)
}

/// Fresh temporary path next to `dst`, so the final rename stays on one
/// filesystem.
pub(crate) fn staging(dst: &Path) -> Result<TempPath, String> {
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
    tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .tempfile_in(parent)
        .map(tempfile::NamedTempFile::into_temp_path)
        .map_err(|err| format!("failed to stage a file in {}: {err}", parent.display()))
}

/// Checks a staged file against the expected size and digest.
pub(crate) fn verify(
    transport: &dyn Transport,
    staged: &Path,
    dst: &Path,
    expected_size: Option<u64>,
    expected_hash: Option<&str>,
) -> Result<u64, StoreError> {
    let failure = |reason: String| {
        error!(path = %dst.display(), %reason, "integrity check failed");
        StoreError::Integrity {
            path: dst.to_path_buf(),
            reason,
        }
    };
    let actual = transport
        .size(staged)
        .map_err(|err| failure(format!("transferred file is unreadable: {err}")))?;
    if let Some(expected) = expected_size {
        if actual != expected {
            return Err(failure(format!("expected {expected} bytes, got {actual}")));
        }
    }
    if let Some(expected) = expected_hash {
        let digest = transport
            .hash(staged)
            .map_err(|err| failure(format!("cannot hash transferred file: {err}")))?;
        if !digest.eq_ignore_ascii_case(expected) {
            return Err(failure(format!("sha256 {digest} does not match {expected}")));
        }
    }
    Ok(actual)
}

pub(crate) fn commit(staged: TempPath, dst: &Path) -> Result<(), String> {
    staged
        .persist(dst)
        .map_err(|err| format!("failed to move entry into {}: {}", dst.display(), err.error))
}

/// Copies the local file `src` to `dst` through a staged temporary name.
/// With `reuse`, a destination already holding identical bytes counts as
/// done without any transfer. A destination sharing storage with `src` is
/// only reused when the intent allows sharing.
pub(crate) fn install(
    transport: &dyn Transport,
    src: &Path,
    dst: &Path,
    options: &StoreOptions,
    intent: Intent,
    reuse: bool,
) -> Result<Outcome<u64>, StoreError> {
    if !transport.exists(src) {
        return Ok(Outcome::NotFound(format!("{} does not exist", src.display())));
    }
    let source_size = match transport.size(src) {
        Ok(size) => size,
        Err(err) => return Ok(Outcome::Transient(format!("{err:#}"))),
    };
    let expected_size = options.expected_size.unwrap_or(source_size);
    let expected_hash = match &options.expected_hash {
        Some(hash) => Some(hash.to_ascii_lowercase()),
        None => match read_sidecar(src) {
            Ok(hash) => hash,
            Err(err) => return Ok(Outcome::Transient(format!("unreadable sidecar: {err}"))),
        },
    };

    let reusable = intent.may_share() || !shares_storage(src, dst);
    if reuse
        && reusable
        && holds_same(transport, src, dst, expected_size, expected_hash.as_deref())
    {
        debug!(dst = %dst.display(), "destination already holds the entry");
        return Ok(Outcome::Done(expected_size));
    }

    let staged = match staging(dst) {
        Ok(staged) => staged,
        Err(reason) => return Ok(Outcome::Transient(reason)),
    };
    if let Err(err) = transport.copy(src, &staged, intent) {
        return Ok(Outcome::Transient(format!("{err:#}")));
    }
    let size = verify(
        transport,
        &staged,
        dst,
        Some(expected_size),
        expected_hash.as_deref(),
    )?;
    match commit(staged, dst) {
        Ok(()) => Ok(Outcome::Done(size)),
        Err(reason) => Ok(Outcome::Transient(reason)),
    }
}

/// Whether `dst` is the same file as `src`, e.g. a hardlink left by an
/// earlier `in` transfer.
#[cfg(unix)]
fn shares_storage(src: &Path, dst: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(src), fs::metadata(dst)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn shares_storage(_src: &Path, _dst: &Path) -> bool {
    true
}

fn holds_same(
    transport: &dyn Transport,
    src: &Path,
    dst: &Path,
    expected_size: u64,
    expected_hash: Option<&str>,
) -> bool {
    if !transport.exists(dst) || transport.size(dst).ok() != Some(expected_size) {
        return false;
    }
    let Ok(existing) = transport.hash(dst) else {
        return false;
    };
    match expected_hash {
        Some(expected) => existing.eq_ignore_ascii_case(expected),
        None => transport.hash(src).is_ok_and(|source| source == existing),
    }
}
