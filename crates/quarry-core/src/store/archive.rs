use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use super::integrity;
use super::{Outcome, Store, StoreError, StoreOptions, TierReport};
use crate::location::{Location, EXTRACT_KEY};
use crate::transport::{Intent, Transport};

/// Exit status a command backend uses to say "no such entry".
const COMMAND_NOT_FOUND: i32 = 1;

#[derive(Debug, Clone)]
pub enum ArchiveBackend {
    /// Long-term tree on a mounted filesystem.
    Directory(PathBuf),
    /// External tool driven through templates with `{remote}` and `{local}`
    /// placeholders.
    Command { get: String, put: Option<String> },
}

/// Long-term storage. Reads always transfer bytes; nothing is linked.
#[derive(Debug)]
pub struct ArchiveStore {
    name: String,
    scheme: String,
    netloc: String,
    backend: ArchiveBackend,
    transport: Arc<dyn Transport>,
    readonly: bool,
    sidecars: bool,
}

impl ArchiveStore {
    pub fn new(
        name: impl Into<String>,
        netloc: impl Into<String>,
        backend: ArchiveBackend,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            scheme: "quarry".to_string(),
            netloc: netloc.into(),
            backend,
            transport,
            readonly: false,
            sidecars: false,
        }
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    #[must_use]
    pub fn sidecars(mut self, enabled: bool) -> Self {
        self.sidecars = enabled;
        self
    }

    fn ensure_writeable(&self) -> Result<(), StoreError> {
        if self.writeable() {
            Ok(())
        } else {
            Err(StoreError::Readonly {
                store: self.name.clone(),
            })
        }
    }

    /// Brings the whole archived file behind `location` to `local`.
    fn transfer(
        &self,
        location: &Location,
        local: &Path,
        options: &StoreOptions,
    ) -> Result<Outcome, StoreError> {
        match &self.backend {
            ArchiveBackend::Directory(root) => {
                let src = root.join(location.path());
                integrity::install(&*self.transport, &src, local, options, Intent::InOut, false)
                    .map(|outcome| outcome.map(|_| ()))
            }
            ArchiveBackend::Command { get, .. } => {
                let staged = match integrity::staging(local) {
                    Ok(staged) => staged,
                    Err(reason) => return Ok(Outcome::Transient(reason)),
                };
                let outcome = self.run(get, location.path(), &staged)?;
                if !outcome.is_done() {
                    return Ok(outcome);
                }
                integrity::verify(
                    &*self.transport,
                    &staged,
                    local,
                    options.expected_size,
                    options.expected_hash.as_deref(),
                )?;
                Ok(match integrity::commit(staged, local) {
                    Ok(()) => Outcome::Done(()),
                    Err(reason) => Outcome::Transient(reason),
                })
            }
        }
    }

    fn run(&self, template: &str, remote: &str, local: &Path) -> Result<Outcome, StoreError> {
        let local = local.display().to_string();
        let mut words = template
            .split_whitespace()
            .map(|word| word.replace("{remote}", remote).replace("{local}", &local));
        let Some(program) = words.next() else {
            return Err(StoreError::Configuration(format!(
                "archive command for '{}' is empty",
                self.name
            )));
        };
        let args: Vec<String> = words.collect();
        let output = match self.transport.spawn(&program, &args) {
            Ok(output) => output,
            Err(err) => return Ok(Outcome::Transient(format!("{err:#}"))),
        };
        Ok(match output.code {
            Some(0) => Outcome::Done(()),
            Some(COMMAND_NOT_FOUND) => Outcome::NotFound(format!("{program}: {remote} not archived")),
            code => Outcome::Transient(format!(
                "{program} exited with {}: {}",
                code.map_or_else(|| "a signal".to_string(), |code| code.to_string()),
                output.stderr.trim()
            )),
        })
    }
}

impl Store for ArchiveStore {
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
            && match &self.backend {
                ArchiveBackend::Directory(_) => true,
                ArchiveBackend::Command { put, .. } => put.is_some(),
            }
    }

    fn locate(&self, location: &Location) -> Result<String, StoreError> {
        Ok(match &self.backend {
            ArchiveBackend::Directory(root) => root.join(location.path()).display().to_string(),
            ArchiveBackend::Command { .. } => format!("{}:{}", self.netloc, location.path()),
        })
    }

    fn check(&self, location: &Location) -> Result<Outcome<u64>, StoreError> {
        match &self.backend {
            ArchiveBackend::Directory(root) => {
                let src = root.join(location.path());
                if !self.transport.exists(&src) {
                    return Ok(Outcome::NotFound(format!("{} not archived", location.path())));
                }
                Ok(match self.transport.size(&src) {
                    Ok(size) => Outcome::Done(size),
                    Err(err) => Outcome::Transient(format!("{err:#}")),
                })
            }
            ArchiveBackend::Command { get, .. } => {
                let probe = match tempfile::Builder::new()
                    .prefix(integrity::TMP_PREFIX)
                    .tempfile()
                {
                    Ok(file) => file.into_temp_path(),
                    Err(err) => return Ok(Outcome::Transient(err.to_string())),
                };
                let outcome = self.run(get, location.path(), &probe)?;
                Ok(match outcome {
                    Outcome::Done(()) => match self.transport.size(&probe) {
                        Ok(size) => Outcome::Done(size),
                        Err(err) => Outcome::Transient(format!("{err:#}")),
                    },
                    Outcome::NotFound(reason) => Outcome::NotFound(reason),
                    Outcome::Transient(reason) => Outcome::Transient(reason),
                })
            }
        }
    }

    fn get(
        &self,
        location: &Location,
        local: &Path,
        options: &StoreOptions,
    ) -> Result<Outcome, StoreError> {
        let Some(member) = location.query_value(EXTRACT_KEY) else {
            let outcome = self.transfer(location, local, options)?;
            if outcome.is_done() {
                info!(store = %self.name, path = location.path(), "archive transfer complete");
            }
            return Ok(outcome);
        };
        let container = match integrity::staging(local) {
            Ok(staged) => staged,
            Err(reason) => return Ok(Outcome::Transient(reason)),
        };
        let fetched = self.transfer(
            &location.without(EXTRACT_KEY),
            &container,
            &StoreOptions::default(),
        )?;
        if !fetched.is_done() {
            return Ok(fetched);
        }
        let staged = match integrity::staging(local) {
            Ok(staged) => staged,
            Err(reason) => return Ok(Outcome::Transient(reason)),
        };
        let gzipped = is_gzipped(location.path());
        match extract_member(&container, gzipped, member, &staged) {
            Ok(true) => {}
            Ok(false) => {
                return Ok(Outcome::NotFound(format!(
                    "member {member} not found in {}",
                    location.path()
                )))
            }
            Err(err) => {
                warn!(path = location.path(), member, %err, "extraction failed");
                return Ok(Outcome::Transient(format!("cannot extract {member}: {err}")));
            }
        }
        integrity::verify(
            &*self.transport,
            &staged,
            local,
            options.expected_size,
            options.expected_hash.as_deref(),
        )?;
        debug!(path = location.path(), member, "member extracted");
        Ok(match integrity::commit(staged, local) {
            Ok(()) => Outcome::Done(()),
            Err(reason) => Outcome::Transient(reason),
        })
    }

    fn put(
        &self,
        local: &Path,
        location: &Location,
        options: &StoreOptions,
    ) -> Result<TierReport, StoreError> {
        self.ensure_writeable()?;
        let outcome = match &self.backend {
            ArchiveBackend::Directory(root) => {
                let dst = root.join(location.path());
                let outcome =
                    integrity::install(&*self.transport, local, &dst, options, Intent::InOut, false)?;
                if outcome.is_done() && self.sidecars {
                    if let Err(err) = integrity::write_sidecar(&*self.transport, &dst) {
                        return Ok(TierReport::single::<()>(
                            &self.name,
                            &Outcome::Transient(format!("failed to write sidecar: {err:#}")),
                        ));
                    }
                }
                outcome.map(|_| ())
            }
            ArchiveBackend::Command { put, .. } => {
                let Some(put) = put else {
                    return Err(StoreError::Readonly {
                        store: self.name.clone(),
                    });
                };
                if !self.transport.exists(local) {
                    Outcome::NotFound(format!("{} does not exist", local.display()))
                } else {
                    self.run(put, location.path(), local)?
                }
            }
        };
        Ok(TierReport::single(&self.name, &outcome))
    }

    fn delete(&self, location: &Location) -> Result<TierReport, StoreError> {
        self.ensure_writeable()?;
        let outcome = match &self.backend {
            ArchiveBackend::Directory(root) => {
                let path = root.join(location.path());
                match integrity::remove_entry(&path) {
                    Ok(true) => Outcome::Done(()),
                    Ok(false) => Outcome::NotFound(format!("{} not archived", location.path())),
                    Err(err) => Outcome::Transient(format!("failed to remove {}: {err}", path.display())),
                }
            }
            ArchiveBackend::Command { .. } => {
                return Err(StoreError::Configuration(format!(
                    "archive '{}' has no delete command",
                    self.name
                )))
            }
        };
        Ok(TierReport::single(&self.name, &outcome))
    }
}

fn is_gzipped(path: &str) -> bool {
    path.ends_with(".gz") || path.ends_with(".tgz")
}

/// Copies `member` out of the tar file at `container` into `dst`; `false`
/// when the archive has no such member.
fn extract_member(container: &Path, gzipped: bool, member: &str, dst: &Path) -> io::Result<bool> {
    let file = File::open(container)?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);
    let wanted = Path::new(member.trim_start_matches("./"));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let path = path.strip_prefix(".").unwrap_or(&path);
        if path == wanted && entry.header().entry_type().is_file() {
            let mut out = File::create(dst)?;
            io::copy(&mut entry, &mut out)?;
            out.sync_all()?;
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SpawnOutput, SystemTransport};
    use anyhow::Result;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn directory_store(root: &Path) -> ArchiveStore {
        ArchiveStore::new(
            "archive",
            "quarry.archive.local",
            ArchiveBackend::Directory(root.to_path_buf()),
            Arc::new(SystemTransport::new()),
        )
    }

    fn write_tar_gz(path: &Path, members: &[(&str, &[u8])]) -> Result<()> {
        let file = File::create(path)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn directory_backend_round_trips() -> Result<()> {
        let temp = tempdir()?;
        let archive = directory_store(&temp.path().join("archive"));
        let location = Location::parse("quarry://quarry.archive.local/exp/run/grid.grb")?;
        let local = temp.path().join("grid.grb");
        fs::write(&local, b"archived")?;

        assert!(archive.put(&local, &location, &StoreOptions::default())?.all_done());
        let back = temp.path().join("back.grb");
        let outcome = archive.get(&location, &back, &StoreOptions::with_intent(Intent::In))?;
        assert!(outcome.is_done());
        fs::write(&back, b"edited")?;
        assert_eq!(archive.check(&location)?, Outcome::Done(8));
        assert!(archive.delete(&location)?.all_done());
        assert!(matches!(archive.check(&location)?, Outcome::NotFound(_)));
        Ok(())
    }

    #[test]
    fn extract_pulls_one_member() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("archive");
        fs::create_dir_all(root.join("exp"))?;
        write_tar_gz(
            &root.join("exp/bundle.tgz"),
            &[("a.grb", b"first".as_slice()), ("b.grb", b"second".as_slice())],
        )?;
        let archive = directory_store(&root);

        let local = temp.path().join("b.grb");
        let location = Location::parse("quarry://quarry.archive.local/exp/bundle.tgz?extract=b.grb")?;
        let outcome = archive.get(&location, &local, &StoreOptions::default())?;
        assert!(outcome.is_done());
        assert_eq!(fs::read(&local)?, b"second");

        let missing = Location::parse("quarry://quarry.archive.local/exp/bundle.tgz?extract=z.grb")?;
        let outcome = archive.get(&missing, &temp.path().join("z.grb"), &StoreOptions::default())?;
        assert!(matches!(outcome, Outcome::NotFound(_)));
        Ok(())
    }

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        calls: Mutex<Vec<Vec<String>>>,
        code: i32,
    }

    impl Transport for ScriptedTransport {
        fn copy(&self, src: &Path, dst: &Path, intent: Intent) -> anyhow::Result<()> {
            SystemTransport::new().copy(src, dst, intent)
        }

        fn spawn(&self, program: &str, args: &[String]) -> anyhow::Result<SpawnOutput> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
            if self.code == 0 {
                if let Some(local) = args.last() {
                    fs::write(local, b"from tape")?;
                }
            }
            Ok(SpawnOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: "tape offline".to_string(),
            })
        }

        fn exists(&self, path: &Path) -> bool {
            path.is_file()
        }

        fn size(&self, path: &Path) -> anyhow::Result<u64> {
            SystemTransport::new().size(path)
        }

        fn hash(&self, path: &Path) -> anyhow::Result<String> {
            SystemTransport::new().hash(path)
        }

        fn fetch(&self, _url: &str, _dst: &Path) -> anyhow::Result<Option<u64>> {
            Ok(None)
        }
    }

    fn command_store(code: i32) -> (ArchiveStore, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport {
            code,
            ..ScriptedTransport::default()
        });
        let store = ArchiveStore::new(
            "archive",
            "quarry.archive.local",
            ArchiveBackend::Command {
                get: "tape-get {remote} {local}".to_string(),
                put: None,
            },
            transport.clone(),
        );
        (store, transport)
    }

    #[test]
    fn command_backend_maps_exit_codes() -> Result<()> {
        let temp = tempdir()?;
        let location = Location::parse("quarry://quarry.archive.local/exp/grid.grb")?;
        let local = temp.path().join("grid.grb");

        let (store, transport) = command_store(0);
        assert!(store.get(&location, &local, &StoreOptions::default())?.is_done());
        assert_eq!(fs::read(&local)?, b"from tape");
        let calls = transport.calls.lock().map(|calls| calls.clone()).unwrap_or_default();
        assert_eq!(calls[0][0], "tape-get");
        assert_eq!(calls[0][1], "exp/grid.grb");
        assert!(!store.writeable());

        let (missing, _) = command_store(1);
        let outcome = missing.get(&location, &temp.path().join("x"), &StoreOptions::default())?;
        assert!(matches!(outcome, Outcome::NotFound(_)));

        let (offline, _) = command_store(3);
        let outcome = offline.get(&location, &temp.path().join("y"), &StoreOptions::default())?;
        assert!(matches!(outcome, Outcome::Transient(reason) if reason.contains("tape offline")));
        Ok(())
    }
}
