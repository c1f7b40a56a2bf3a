use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::integrity::{self, TMP_PREFIX};
use super::{Outcome, Store, StoreError, StoreOptions, TierReport};
use crate::location::{Location, EXTRACT_KEY};
use crate::transport::{Intent, Transport};

#[derive(Debug, Clone, Serialize)]
pub struct GcError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub scanned: u64,
    pub removed_entries: u64,
    pub removed_bytes: u64,
    pub errors: Vec<GcError>,
}

/// A directory tree mirroring canonical location paths.
#[derive(Debug)]
pub struct CacheStore {
    name: String,
    scheme: String,
    netloc: String,
    root: PathBuf,
    transport: Arc<dyn Transport>,
    readonly: bool,
    readonly_entries: bool,
    sidecars: bool,
}

impl CacheStore {
    pub fn new(
        name: impl Into<String>,
        netloc: impl Into<String>,
        root: PathBuf,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            scheme: "quarry".to_string(),
            netloc: netloc.into(),
            root,
            transport,
            readonly: false,
            readonly_entries: true,
            sidecars: false,
        }
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    #[must_use]
    pub fn readonly_entries(mut self, enabled: bool) -> Self {
        self.readonly_entries = enabled;
        self
    }

    #[must_use]
    pub fn sidecars(mut self, enabled: bool) -> Self {
        self.sidecars = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the entry for `location` lives. An extracted member gets its own
    /// entry beside the container's.
    pub fn entry_path(&self, location: &Location) -> PathBuf {
        let base = self.root.join(location.path());
        match location.query_value(EXTRACT_KEY) {
            Some(member) => {
                let mut name = base.into_os_string();
                name.push(".members");
                PathBuf::from(name).join(member)
            }
            None => base,
        }
    }

    fn ensure_writeable(&self) -> Result<(), StoreError> {
        if self.readonly {
            return Err(StoreError::Readonly {
                store: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Removes temporary files older than `max_age` left by interrupted
    /// transfers.
    pub fn gc(&self, max_age: Duration) -> Result<GcReport, StoreError> {
        let mut report = GcReport::default();
        if !self.root.exists() {
            return Ok(report);
        }
        let now = SystemTime::now();
        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        return Err(StoreError::Io {
                            context: format!("failed to scan {}", self.root.display()),
                            source: err.into(),
                        });
                    }
                    report.errors.push(GcError {
                        path: err.path().map(Path::to_path_buf).unwrap_or_default(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            report.scanned += 1;
            if !entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    report.errors.push(GcError {
                        path: entry.path().to_path_buf(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    report.removed_entries += 1;
                    report.removed_bytes += metadata.len();
                }
                Err(err) => report.errors.push(GcError {
                    path: entry.path().to_path_buf(),
                    error: err.to_string(),
                }),
            }
        }
        info!(
            root = %self.root.display(),
            removed = report.removed_entries,
            bytes = report.removed_bytes,
            "cache gc finished"
        );
        Ok(report)
    }
}

impl Store for CacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn netloc(&self) -> &str {
        &self.netloc
    }

    fn writeable(&self) -> bool {
        !self.readonly
    }

    fn locate(&self, location: &Location) -> Result<String, StoreError> {
        Ok(self.entry_path(location).display().to_string())
    }

    fn check(&self, location: &Location) -> Result<Outcome<u64>, StoreError> {
        let entry = self.entry_path(location);
        if !self.transport.exists(&entry) {
            return Ok(Outcome::NotFound(format!("no entry at {}", entry.display())));
        }
        Ok(match self.transport.size(&entry) {
            Ok(size) => Outcome::Done(size),
            Err(err) => Outcome::Transient(format!("{err:#}")),
        })
    }

    fn get(
        &self,
        location: &Location,
        local: &Path,
        options: &StoreOptions,
    ) -> Result<Outcome, StoreError> {
        let entry = self.entry_path(location);
        if !self.transport.exists(&entry) {
            debug!(store = %self.name, entry = %entry.display(), "cache miss");
            return Ok(Outcome::NotFound(format!("no entry at {}", entry.display())));
        }
        let outcome =
            integrity::install(&*self.transport, &entry, local, options, options.intent, true)?;
        if outcome.is_done() {
            info!(store = %self.name, entry = %entry.display(), "cache hit");
        }
        Ok(outcome.map(|_| ()))
    }

    fn put(
        &self,
        local: &Path,
        location: &Location,
        options: &StoreOptions,
    ) -> Result<TierReport, StoreError> {
        self.ensure_writeable()?;
        let entry = self.entry_path(location);
        let outcome = integrity::install(&*self.transport, local, &entry, options, Intent::InOut, true)?;
        if outcome.is_done() {
            if self.readonly_entries {
                if let Err(err) = make_readonly(&entry) {
                    debug!(entry = %entry.display(), %err, "could not mark entry read-only");
                }
            }
            if self.sidecars {
                if let Err(err) = integrity::write_sidecar(&*self.transport, &entry) {
                    return Ok(TierReport::single::<()>(
                        &self.name,
                        &Outcome::Transient(format!("failed to write sidecar: {err:#}")),
                    ));
                }
            }
            debug!(store = %self.name, entry = %entry.display(), "cache entry written");
        }
        Ok(TierReport::single(&self.name, &outcome))
    }

    fn delete(&self, location: &Location) -> Result<TierReport, StoreError> {
        self.ensure_writeable()?;
        let entry = self.entry_path(location);
        let outcome = match integrity::remove_entry(&entry) {
            Ok(true) => Outcome::Done(()),
            Ok(false) => Outcome::NotFound(format!("no entry at {}", entry.display())),
            Err(err) => Outcome::Transient(format!("failed to remove {}: {err}", entry.display())),
        };
        Ok(TierReport::single(&self.name, &outcome))
    }
}

fn make_readonly(path: &Path) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sidecar_path;
    use crate::transport::SystemTransport;
    use anyhow::Result;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    fn store(root: &Path) -> CacheStore {
        CacheStore::new(
            "cache",
            "quarry.cache.local",
            root.to_path_buf(),
            Arc::new(SystemTransport::new()),
        )
    }

    #[test]
    fn put_then_get_round_trips() -> Result<()> {
        let temp = tempdir()?;
        let cache = store(&temp.path().join("cache")).sidecars(true);
        let location = Location::parse("quarry://quarry.cache.local/arpege/run/grid.grb")?;
        let local = temp.path().join("grid.grb");
        fs::write(&local, b"grib-bytes")?;

        let report = cache.put(&local, &location, &StoreOptions::default())?;
        assert!(report.all_done());
        let entry = cache.entry_path(&location);
        assert!(fs::metadata(&entry)?.permissions().readonly());
        assert!(sidecar_path(&entry).exists());
        assert_eq!(cache.check(&location)?, Outcome::Done(10));

        let fetched = temp.path().join("fetched.grb");
        let outcome = cache.get(&location, &fetched, &StoreOptions::default())?;
        assert!(outcome.is_done());
        assert_eq!(fs::read(&fetched)?, b"grib-bytes");

        let deleted = cache.delete(&location)?;
        assert!(deleted.all_done());
        assert!(!sidecar_path(&entry).exists());
        assert!(matches!(cache.check(&location)?, Outcome::NotFound(_)));
        Ok(())
    }

    #[test]
    fn writable_intent_never_edits_the_entry() -> Result<()> {
        let temp = tempdir()?;
        let cache = store(&temp.path().join("cache")).readonly_entries(false);
        let location = Location::parse("quarry://quarry.cache.local/arpege/run/work.grb")?;
        let source = temp.path().join("source.grb");
        fs::write(&source, b"pristine")?;
        assert!(cache.put(&source, &location, &StoreOptions::default())?.all_done());

        let work = temp.path().join("work.grb");
        let shared = cache.get(&location, &work, &StoreOptions::with_intent(Intent::In))?;
        assert!(shared.is_done());
        let private = cache.get(&location, &work, &StoreOptions::with_intent(Intent::InOut))?;
        assert!(private.is_done());

        fs::write(&work, b"MUTATED!")?;
        assert_eq!(fs::read(cache.entry_path(&location))?, b"pristine");
        Ok(())
    }

    #[test]
    fn readonly_store_refuses_writes() -> Result<()> {
        let temp = tempdir()?;
        let cache = store(temp.path()).readonly(true);
        let location = Location::parse("quarry://quarry.cache.local/a/b.grb")?;
        let local = temp.path().join("b.grb");
        fs::write(&local, b"x")?;
        assert!(matches!(
            cache.put(&local, &location, &StoreOptions::default()),
            Err(StoreError::Readonly { .. })
        ));
        assert!(matches!(
            cache.delete(&location),
            Err(StoreError::Readonly { .. })
        ));
        assert!(!cache.writeable());
        Ok(())
    }

    #[test]
    fn extracted_members_have_their_own_entry() -> Result<()> {
        let temp = tempdir()?;
        let cache = store(temp.path());
        let location = Location::parse("quarry://quarry.cache.local/a/bundle.tar?extract=x.grb")?;
        assert_eq!(
            cache.entry_path(&location),
            temp.path().join("a/bundle.tar.members/x.grb")
        );
        Ok(())
    }

    #[test]
    fn gc_removes_only_stale_temporaries() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("cache");
        fs::create_dir_all(root.join("a"))?;
        let stale = root.join("a").join(format!("{TMP_PREFIX}stale"));
        let fresh = root.join("a").join(format!("{TMP_PREFIX}fresh"));
        let entry = root.join("a").join("grid.grb");
        fs::write(&stale, b"partial")?;
        fs::write(&fresh, b"partial")?;
        fs::write(&entry, b"complete")?;
        let old = SystemTime::now() - Duration::from_secs(3 * 24 * 60 * 60);
        set_file_mtime(&stale, FileTime::from_system_time(old))?;
        set_file_mtime(&entry, FileTime::from_system_time(old))?;

        let report = store(&root).gc(Duration::from_secs(24 * 60 * 60))?;
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed_entries, 1);
        assert_eq!(report.removed_bytes, 7);
        assert!(report.errors.is_empty());
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(entry.exists());
        Ok(())
    }
}
