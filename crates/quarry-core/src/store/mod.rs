//! Storage tiers addressed by `(scheme, netloc)`.
//!
//! Every operation reports one of three outcomes: done, not found, or a
//! transient failure. Only integrity, configuration and read-only violations
//! are raised as [`StoreError`].

mod archive;
mod cache;
mod finder;
mod integrity;
mod multi;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quarry_domain::{bag, diagnostics, Collector, Matcher, Nothing, PriorityTable};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::location::Location;
use crate::transport::{Intent, Transport};

pub use archive::{ArchiveBackend, ArchiveStore};
pub use cache::{CacheStore, GcError, GcReport};
pub use finder::{FinderStore, FINDER_SCHEMES};
pub use integrity::{sidecar_path, TMP_PREFIX};
pub use multi::{MultiStore, TransientPolicy};

/// Tri-state result of one store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T = ()> {
    Done(T),
    NotFound(String),
    Transient(String),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Done(_) => None,
            Outcome::NotFound(reason) | Outcome::Transient(reason) => Some(reason),
        }
    }

    pub fn status(&self) -> TierStatus {
        match self {
            Outcome::Done(_) => TierStatus::Done,
            Outcome::NotFound(_) => TierStatus::NotFound,
            Outcome::Transient(_) => TierStatus::Transient,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::NotFound(reason) => Outcome::NotFound(reason),
            Outcome::Transient(reason) => Outcome::Transient(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("[QY301] integrity check failed for {}: {reason}", .path.display())]
    Integrity { path: PathBuf, reason: String },
    #[error("[QY302] store '{store}' is read-only")]
    Readonly { store: String },
    #[error("[QY303] no store serves {scheme}://{netloc}: {reason}")]
    Unknown {
        scheme: String,
        netloc: String,
        reason: String,
    },
    #[error("[QY304] store configuration error: {0}")]
    Configuration(String),
    #[error("[QY305] {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Integrity { .. } => diagnostics::store::INTEGRITY,
            StoreError::Readonly { .. } => diagnostics::store::READONLY,
            StoreError::Unknown { .. } => diagnostics::store::UNKNOWN,
            StoreError::Configuration(_) => diagnostics::store::CONFIGURATION,
            StoreError::Io { .. } => diagnostics::store::IO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub intent: Intent,
    /// Size the transferred file must have; defaults to the source size.
    pub expected_size: Option<u64>,
    pub expected_hash: Option<String>,
}

impl StoreOptions {
    pub fn with_intent(intent: Intent) -> Self {
        Self {
            intent,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    Done,
    NotFound,
    Transient,
    Failed,
    Skipped,
}

impl fmt::Display for TierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierStatus::Done => "done",
            TierStatus::NotFound => "not_found",
            TierStatus::Transient => "transient",
            TierStatus::Failed => "failed",
            TierStatus::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierOutcome {
    pub store: String,
    pub status: TierStatus,
    pub reason: Option<String>,
}

/// Per-delegate results of a write-side operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierReport {
    pub tiers: Vec<TierOutcome>,
}

impl TierReport {
    pub fn single<T>(store: &str, outcome: &Outcome<T>) -> Self {
        let mut report = Self::default();
        report.record(store, outcome);
        report
    }

    pub fn record<T>(&mut self, store: &str, outcome: &Outcome<T>) {
        self.tiers.push(TierOutcome {
            store: store.to_string(),
            status: outcome.status(),
            reason: outcome.reason().map(ToOwned::to_owned),
        });
    }

    pub fn push(&mut self, store: &str, status: TierStatus, reason: Option<String>) {
        self.tiers.push(TierOutcome {
            store: store.to_string(),
            status,
            reason,
        });
    }

    pub fn extend(&mut self, other: TierReport) {
        self.tiers.extend(other.tiers);
    }

    pub fn any_done(&self) -> bool {
        self.tiers.iter().any(|tier| tier.status == TierStatus::Done)
    }

    pub fn all_done(&self) -> bool {
        !self.tiers.is_empty()
            && self
                .tiers
                .iter()
                .all(|tier| matches!(tier.status, TierStatus::Done | TierStatus::Skipped))
    }
}

/// One storage tier bound to a `(scheme, netloc)` pair.
pub trait Store: fmt::Debug + Send + Sync {
    /// Label used in logs and tier reports.
    fn name(&self) -> &str;
    fn scheme(&self) -> &str;
    fn netloc(&self) -> &str;
    fn writeable(&self) -> bool;
    /// Physical address of the entry behind `location`.
    fn locate(&self, location: &Location) -> Result<String, StoreError>;
    /// Cheap existence probe; `Done` carries the entry size.
    fn check(&self, location: &Location) -> Result<Outcome<u64>, StoreError>;
    fn get(
        &self,
        location: &Location,
        local: &Path,
        options: &StoreOptions,
    ) -> Result<Outcome, StoreError>;
    fn put(
        &self,
        local: &Path,
        location: &Location,
        options: &StoreOptions,
    ) -> Result<TierReport, StoreError>;
    fn delete(&self, location: &Location) -> Result<TierReport, StoreError>;
}

/// Context handed to store constructors.
pub trait StoreEnv {
    fn config(&self) -> &Config;
    fn transport(&self) -> Arc<dyn Transport>;
    fn open(&self, scheme: &str, netloc: &str) -> Result<Arc<dyn Store>, StoreError>;
}

pub type StoreCollector = Collector<dyn Store, dyn StoreEnv>;

const MAX_NESTING: usize = 8;

/// Resolves `(scheme, netloc)` pairs to store instances.
pub struct StoreHub {
    stores: StoreCollector,
    priorities: PriorityTable,
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    nesting: AtomicUsize,
}

impl StoreHub {
    pub fn new(
        stores: StoreCollector,
        priorities: PriorityTable,
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            stores,
            priorities,
            config,
            transport,
            nesting: AtomicUsize::new(0),
        }
    }

    pub fn for_location(&self, location: &Location) -> Result<Arc<dyn Store>, StoreError> {
        self.open(location.scheme(), location.netloc())
    }
}

impl fmt::Debug for StoreHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHub")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl StoreEnv for StoreHub {
    fn config(&self) -> &Config {
        &self.config
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    fn open(&self, scheme: &str, netloc: &str) -> Result<Arc<dyn Store>, StoreError> {
        let unknown = |reason: String| StoreError::Unknown {
            scheme: scheme.to_string(),
            netloc: netloc.to_string(),
            reason,
        };
        let depth = self.nesting.fetch_add(1, Ordering::SeqCst);
        let result = if depth >= MAX_NESTING {
            Err(StoreError::Configuration(format!(
                "store {scheme}://{netloc} nests deeper than {MAX_NESTING} levels"
            )))
        } else {
            let matcher = Matcher::new(&self.priorities, self.config.environment())
                .ambiguity(self.config.matching().ambiguity);
            let request = bag([("scheme", scheme), ("netloc", netloc)]);
            match matcher.pick(&self.stores, &request, &Nothing, self as &dyn StoreEnv) {
                Ok((picked, _)) => {
                    tracing::debug!(scheme, netloc, store = %picked.name, "store dispatch");
                    Ok(Arc::from(picked.instance))
                }
                Err(err) => Err(unknown(err.to_string())),
            }
        };
        self.nesting.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
