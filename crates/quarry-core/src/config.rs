use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dirs_next::home_dir;
use quarry_domain::{AmbiguityPolicy, Environment};
use serde::Serialize;

use crate::store::TransientPolicy;

const DEFAULT_TEMP_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    /// `true` unless the variable is set to `0` or `false`.
    pub(crate) fn toggle(&self, key: &str) -> bool {
        match self.var(key) {
            Some(value) => {
                let lowered = value.to_ascii_lowercase();
                lowered != "0" && lowered != "false"
            }
            None => true,
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Where a store root lives and which setting chose it.
#[derive(Debug, Clone, Serialize)]
pub struct StoreLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub location: StoreLocation,
    pub readonly_entries: bool,
    pub temp_max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub location: StoreLocation,
    /// Command template with `{remote}` and `{local}` placeholders.
    pub get_command: Option<String>,
    pub put_command: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    pub strict: bool,
    pub ambiguity: AmbiguityPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct MultiConfig {
    pub refill: bool,
    pub transient: TransientPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct HashConfig {
    /// Write and verify `<entry>.sha256` sidecars.
    pub sidecars: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) cache: CacheConfig,
    pub(crate) archive: ArchiveConfig,
    pub(crate) matching: MatchConfig,
    pub(crate) multi: MultiConfig,
    pub(crate) hash: HashConfig,
    pub(crate) environment: Environment,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if store roots cannot be resolved or a setting is malformed.
    pub fn from_env() -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot)
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let ambiguity = match snapshot.var("QUARRY_AMBIGUOUS") {
            None | Some("first") => AmbiguityPolicy::FirstDeclared,
            Some("reject") => AmbiguityPolicy::Reject,
            Some(other) => bail!("QUARRY_AMBIGUOUS must be 'first' or 'reject', got '{other}'"),
        };
        let sidecars = match snapshot.var("QUARRY_STOREHASH") {
            None => false,
            Some(value) if value.eq_ignore_ascii_case("sha256") => true,
            Some(other) => bail!("unsupported QUARRY_STOREHASH algorithm '{other}'"),
        };
        let transient = if snapshot.flag_is_enabled("QUARRY_FALLTHROUGH") {
            TransientPolicy::FallThrough
        } else {
            TransientPolicy::Stop
        };
        Ok(Self {
            cache: CacheConfig {
                location: resolve_cache_root(snapshot)?,
                readonly_entries: snapshot.toggle("QUARRY_CACHE_READONLY"),
                temp_max_age: DEFAULT_TEMP_MAX_AGE,
            },
            archive: ArchiveConfig {
                location: resolve_archive_root(snapshot)?,
                get_command: snapshot.var("QUARRY_ARCHIVE_GET").map(ToOwned::to_owned),
                put_command: snapshot.var("QUARRY_ARCHIVE_PUT").map(ToOwned::to_owned),
            },
            matching: MatchConfig {
                strict: snapshot.toggle("QUARRY_STRICT"),
                ambiguity,
            },
            multi: MultiConfig {
                refill: snapshot.toggle("QUARRY_REFILL"),
                transient,
            },
            hash: HashConfig { sidecars },
            environment: Environment::new(
                snapshot.var("HOSTNAME").unwrap_or("localhost"),
                snapshot.var("USER").unwrap_or("anonymous"),
            ),
        })
    }

    /// Self-contained configuration with both stores under `root`.
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self {
            cache: CacheConfig {
                location: StoreLocation {
                    path: root.join("cache"),
                    source: "explicit",
                },
                readonly_entries: true,
                temp_max_age: DEFAULT_TEMP_MAX_AGE,
            },
            archive: ArchiveConfig {
                location: StoreLocation {
                    path: root.join("archive"),
                    source: "explicit",
                },
                get_command: None,
                put_command: None,
            },
            matching: MatchConfig {
                strict: true,
                ambiguity: AmbiguityPolicy::FirstDeclared,
            },
            multi: MultiConfig {
                refill: true,
                transient: TransientPolicy::Stop,
            },
            hash: HashConfig { sidecars: false },
            environment: Environment::new("localhost", "anonymous"),
        }
    }

    #[must_use]
    pub fn with_multi(mut self, multi: MultiConfig) -> Self {
        self.multi = multi;
        self
    }

    #[must_use]
    pub fn with_hash(mut self, hash: HashConfig) -> Self {
        self.hash = hash;
        self
    }

    #[must_use]
    pub fn with_matching(mut self, matching: MatchConfig) -> Self {
        self.matching = matching;
        self
    }

    #[must_use]
    pub fn with_archive_commands(mut self, get: Option<String>, put: Option<String>) -> Self {
        self.archive.get_command = get;
        self.archive.put_command = put;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    #[must_use]
    pub fn archive(&self) -> &ArchiveConfig {
        &self.archive
    }

    #[must_use]
    pub fn matching(&self) -> MatchConfig {
        self.matching
    }

    #[must_use]
    pub fn multi(&self) -> MultiConfig {
        self.multi
    }

    #[must_use]
    pub fn hash(&self) -> HashConfig {
        self.hash
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }
}

fn resolve_cache_root(snapshot: &EnvSnapshot) -> Result<StoreLocation> {
    if let Some(path) = snapshot.var("QUARRY_CACHE_PATH") {
        return Ok(StoreLocation {
            path: absolutize(PathBuf::from(path), "QUARRY_CACHE_PATH")?,
            source: "QUARRY_CACHE_PATH",
        });
    }
    if let Some(base) = snapshot.var("XDG_CACHE_HOME") {
        return Ok(StoreLocation {
            path: PathBuf::from(base).join("quarry").join("cache"),
            source: "XDG_CACHE_HOME",
        });
    }
    if let Some(home) = home_dir() {
        return Ok(StoreLocation {
            path: home.join(".cache").join("quarry").join("cache"),
            source: "HOME/.cache",
        });
    }
    Ok(StoreLocation {
        path: PathBuf::from("/tmp/quarry-cache"),
        source: "default (/tmp/quarry-cache)",
    })
}

fn resolve_archive_root(snapshot: &EnvSnapshot) -> Result<StoreLocation> {
    if let Some(path) = snapshot.var("QUARRY_ARCHIVE_PATH") {
        return Ok(StoreLocation {
            path: absolutize(PathBuf::from(path), "QUARRY_ARCHIVE_PATH")?,
            source: "QUARRY_ARCHIVE_PATH",
        });
    }
    if let Some(base) = snapshot.var("XDG_DATA_HOME") {
        return Ok(StoreLocation {
            path: PathBuf::from(base).join("quarry").join("archive"),
            source: "XDG_DATA_HOME",
        });
    }
    if let Some(home) = home_dir() {
        return Ok(StoreLocation {
            path: home.join(".local").join("share").join("quarry").join("archive"),
            source: "HOME/.local/share",
        });
    }
    Ok(StoreLocation {
        path: PathBuf::from("/tmp/quarry-archive"),
        source: "default (/tmp/quarry-archive)",
    })
}

fn absolutize(path: PathBuf, var: &str) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()
            .with_context(|| format!("failed to resolve {var}"))?
            .join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_home_layout() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[("XDG_CACHE_HOME", "/var/cache")]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(
            config.cache().location.path,
            PathBuf::from("/var/cache/quarry/cache")
        );
        assert_eq!(config.cache().location.source, "XDG_CACHE_HOME");
        assert!(config.cache().readonly_entries);
        assert!(config.matching().strict);
        assert_eq!(config.matching().ambiguity, AmbiguityPolicy::FirstDeclared);
        assert!(config.multi().refill);
        assert_eq!(config.multi().transient, TransientPolicy::Stop);
        assert!(!config.hash().sidecars);
        Ok(())
    }

    #[test]
    fn overrides_are_honoured() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("QUARRY_CACHE_PATH", "/srv/cache"),
            ("QUARRY_ARCHIVE_PATH", "/srv/archive"),
            ("QUARRY_ARCHIVE_GET", "fetch {remote} {local}"),
            ("QUARRY_STRICT", "false"),
            ("QUARRY_AMBIGUOUS", "reject"),
            ("QUARRY_REFILL", "0"),
            ("QUARRY_FALLTHROUGH", "1"),
            ("QUARRY_STOREHASH", "sha256"),
            ("HOSTNAME", "belenos"),
        ]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(config.cache().location.path, PathBuf::from("/srv/cache"));
        assert_eq!(config.archive().location.source, "QUARRY_ARCHIVE_PATH");
        assert_eq!(
            config.archive().get_command.as_deref(),
            Some("fetch {remote} {local}")
        );
        assert!(!config.matching().strict);
        assert_eq!(config.matching().ambiguity, AmbiguityPolicy::Reject);
        assert!(!config.multi().refill);
        assert_eq!(config.multi().transient, TransientPolicy::FallThrough);
        assert!(config.hash().sidecars);
        assert_eq!(config.environment().hostname(), "belenos");
        Ok(())
    }

    #[test]
    fn malformed_settings_are_errors() {
        let snapshot = EnvSnapshot::testing(&[("QUARRY_AMBIGUOUS", "coin-flip")]);
        assert!(Config::from_snapshot(&snapshot).is_err());
        let snapshot = EnvSnapshot::testing(&[("QUARRY_STOREHASH", "md5")]);
        assert!(Config::from_snapshot(&snapshot).is_err());
    }
}
