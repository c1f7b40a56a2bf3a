use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::integrity;
use super::{Outcome, Store, StoreError, StoreOptions, TierReport, TierStatus};
use crate::location::Location;
use crate::transport::{Intent, Transport};

pub const FINDER_SCHEMES: [&str; 6] = ["file", "ftp", "scp", "rcp", "http", "https"];

/// curl's exit status for a missing remote file.
const CURL_REMOTE_MISSING: i32 = 78;

/// Plain filesystem paths and remote URLs, with no tiering of any kind.
#[derive(Debug)]
pub struct FinderStore {
    name: String,
    scheme: String,
    netloc: String,
    transport: Arc<dyn Transport>,
}

impl FinderStore {
    pub fn new(scheme: impl Into<String>, netloc: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let scheme = scheme.into();
        Self {
            name: format!("finder:{scheme}"),
            scheme,
            netloc: netloc.into(),
            transport,
        }
    }

    fn remote_spec(&self, location: &Location) -> String {
        format!("{}:/{}", location.netloc(), location.path())
    }

    /// Downloads into a staged file, then verifies and commits.
    fn download(
        &self,
        location: &Location,
        local: &Path,
        options: &StoreOptions,
    ) -> Result<Outcome, StoreError> {
        let staged = match integrity::staging(local) {
            Ok(staged) => staged,
            Err(reason) => return Ok(Outcome::Transient(reason)),
        };
        let fetched = match self.scheme.as_str() {
            "http" | "https" => match self.transport.fetch(&location.to_string(), &staged) {
                Ok(Some(_)) => Outcome::Done(()),
                Ok(None) => Outcome::NotFound(format!("{location} answered 404")),
                Err(err) => Outcome::Transient(format!("{err:#}")),
            },
            "scp" | "rcp" => {
                let args = vec![self.remote_spec(location), staged.display().to_string()];
                self.spawn(&self.scheme, &args, None)
            }
            _ => {
                let args = vec![
                    "--fail".to_string(),
                    "--silent".to_string(),
                    "--show-error".to_string(),
                    "--output".to_string(),
                    staged.display().to_string(),
                    location.to_string(),
                ];
                self.spawn("curl", &args, Some(CURL_REMOTE_MISSING))
            }
        };
        if !fetched.is_done() {
            return Ok(fetched);
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

    fn spawn(&self, program: &str, args: &[String], missing: Option<i32>) -> Outcome {
        match self.transport.spawn(program, args) {
            Ok(output) if output.success() => Outcome::Done(()),
            Ok(output) if output.code.is_some() && output.code == missing => {
                Outcome::NotFound(output.stderr.trim().to_string())
            }
            Ok(output) => Outcome::Transient(format!(
                "{program} failed ({:?}): {}",
                output.code,
                output.stderr.trim()
            )),
            Err(err) => Outcome::Transient(format!("{err:#}")),
        }
    }
}

impl Store for FinderStore {
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
        matches!(self.scheme.as_str(), "file" | "scp" | "rcp")
    }

    fn locate(&self, location: &Location) -> Result<String, StoreError> {
        Ok(match self.scheme.as_str() {
            "file" => location.fs_path().display().to_string(),
            "scp" | "rcp" => self.remote_spec(location),
            _ => location.to_string(),
        })
    }

    fn check(&self, location: &Location) -> Result<Outcome<u64>, StoreError> {
        if self.scheme != "file" {
            let probe = match tempfile::Builder::new()
                .prefix(integrity::TMP_PREFIX)
                .tempfile()
            {
                Ok(file) => file.into_temp_path(),
                Err(err) => return Ok(Outcome::Transient(err.to_string())),
            };
            let outcome = self.download(location, &probe, &StoreOptions::default())?;
            return Ok(match outcome {
                Outcome::Done(()) => match self.transport.size(&probe) {
                    Ok(size) => Outcome::Done(size),
                    Err(err) => Outcome::Transient(format!("{err:#}")),
                },
                Outcome::NotFound(reason) => Outcome::NotFound(reason),
                Outcome::Transient(reason) => Outcome::Transient(reason),
            });
        }
        let path = location.fs_path();
        if !self.transport.exists(&path) {
            return Ok(Outcome::NotFound(format!("{} does not exist", path.display())));
        }
        Ok(match self.transport.size(&path) {
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
        let outcome = if self.scheme == "file" {
            let src = location.fs_path();
            integrity::install(&*self.transport, &src, local, options, options.intent, true)?
                .map(|_| ())
        } else {
            self.download(location, local, options)?
        };
        if outcome.is_done() {
            info!(location = %location, local = %local.display(), "retrieved");
        } else {
            debug!(location = %location, reason = outcome.reason(), "retrieval failed");
        }
        Ok(outcome)
    }

    fn put(
        &self,
        local: &Path,
        location: &Location,
        options: &StoreOptions,
    ) -> Result<TierReport, StoreError> {
        match self.scheme.as_str() {
            "file" => {
                let dst = location.fs_path();
                let outcome =
                    integrity::install(&*self.transport, local, &dst, options, Intent::InOut, true)?;
                Ok(TierReport::single(&self.name, &outcome))
            }
            "scp" | "rcp" => {
                if !self.transport.exists(local) {
                    return Ok(TierReport::single::<()>(
                        &self.name,
                        &Outcome::NotFound(format!("{} does not exist", local.display())),
                    ));
                }
                let args = vec![local.display().to_string(), self.remote_spec(location)];
                let outcome = self.spawn(&self.scheme, &args, None);
                Ok(TierReport::single(&self.name, &outcome))
            }
            other => {
                let mut report = TierReport::default();
                report.push(
                    &self.name,
                    TierStatus::Failed,
                    Some(format!("uploads over {other} are not supported")),
                );
                Ok(report)
            }
        }
    }

    fn delete(&self, location: &Location) -> Result<TierReport, StoreError> {
        if self.scheme != "file" {
            let mut report = TierReport::default();
            report.push(
                &self.name,
                TierStatus::Failed,
                Some(format!("cannot delete over {}", self.scheme)),
            );
            return Ok(report);
        }
        let path = location.fs_path();
        let outcome = match integrity::remove_entry(&path) {
            Ok(true) => Outcome::Done(()),
            Ok(false) => Outcome::NotFound(format!("{} does not exist", path.display())),
            Err(err) => Outcome::Transient(format!("failed to remove {}: {err}", path.display())),
        };
        Ok(TierReport::single(&self.name, &outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SystemTransport;
    use anyhow::Result;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::fs;
    use std::panic;
    use tempfile::tempdir;

    fn finder(scheme: &str) -> FinderStore {
        FinderStore::new(scheme, "", Arc::new(SystemTransport::new()))
    }

    #[test]
    fn file_scheme_round_trips() -> Result<()> {
        let temp = tempdir()?;
        let store = finder("file");
        let target = temp.path().join("remote/grid.grb");
        let location = Location::parse(&format!("file://{}", target.display()))?;
        let local = temp.path().join("grid.grb");
        fs::write(&local, b"fields")?;

        assert!(store.put(&local, &location, &StoreOptions::default())?.all_done());
        assert_eq!(store.check(&location)?, Outcome::Done(6));
        assert_eq!(store.locate(&location)?, target.display().to_string());

        let back = temp.path().join("back.grb");
        assert!(store.get(&location, &back, &StoreOptions::default())?.is_done());
        assert_eq!(fs::read(&back)?, b"fields");
        assert!(store.delete(&location)?.all_done());
        assert!(matches!(store.check(&location)?, Outcome::NotFound(_)));
        Ok(())
    }

    #[test]
    fn http_get_maps_missing_to_not_found() -> Result<()> {
        let server = match panic::catch_unwind(Server::run) {
            Ok(server) => server,
            Err(_) => {
                eprintln!("skipping http finder test (httptest server unavailable)");
                return Ok(());
            }
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/obs/synop.txt"))
                .respond_with(status_code(200).body("synop")),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/obs/missing.txt"))
                .respond_with(status_code(404)),
        );
        let temp = tempdir()?;
        let store = finder("http");
        let local = temp.path().join("synop.txt");

        let found = Location::parse(&server.url_str("/obs/synop.txt"))?;
        assert!(store.get(&found, &local, &StoreOptions::default())?.is_done());
        assert_eq!(fs::read(&local)?, b"synop");

        let missing = Location::parse(&server.url_str("/obs/missing.txt"))?;
        let outcome = store.get(&missing, &temp.path().join("x"), &StoreOptions::default())?;
        assert!(matches!(outcome, Outcome::NotFound(_)));

        let report = store.put(&local, &found, &StoreOptions::default())?;
        assert_eq!(report.tiers[0].status, TierStatus::Failed);
        Ok(())
    }
}
