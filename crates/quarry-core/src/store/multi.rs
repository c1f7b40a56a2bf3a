use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Outcome, Store, StoreError, StoreOptions, TierReport, TierStatus};
use crate::location::Location;
use crate::transport::Intent;

/// What a tiered read does when one tier fails transiently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransientPolicy {
    /// Report the failure; later tiers are not consulted.
    #[default]
    Stop,
    /// Log the failure and keep going with the next tier.
    FallThrough,
}

/// Ordered list of delegate stores, fastest first.
#[derive(Debug)]
pub struct MultiStore {
    name: String,
    scheme: String,
    netloc: String,
    delegates: Vec<Arc<dyn Store>>,
    refill: bool,
    transient: TransientPolicy,
    readonly: bool,
}

impl MultiStore {
    pub fn new(
        name: impl Into<String>,
        netloc: impl Into<String>,
        delegates: Vec<Arc<dyn Store>>,
    ) -> Self {
        Self {
            name: name.into(),
            scheme: "quarry".to_string(),
            netloc: netloc.into(),
            delegates,
            refill: true,
            transient: TransientPolicy::Stop,
            readonly: false,
        }
    }

    #[must_use]
    pub fn refill(mut self, enabled: bool) -> Self {
        self.refill = enabled;
        self
    }

    #[must_use]
    pub fn transient(mut self, policy: TransientPolicy) -> Self {
        self.transient = policy;
        self
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn delegates(&self) -> &[Arc<dyn Store>] {
        &self.delegates
    }

    /// Copies the freshly retrieved `local` into every writeable tier ahead of
    /// the one that served it. Failures here never fail the read.
    fn promote(&self, served_by: usize, location: &Location, local: &Path) {
        for upper in self.delegates[..served_by].iter().filter(|store| store.writeable()) {
            match upper.check(location) {
                Ok(Outcome::Done(_)) => {
                    debug!(store = upper.name(), "tier already holds the entry");
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(store = upper.name(), %err, "refill probe failed");
                    continue;
                }
            }
            match upper.put(local, location, &StoreOptions::with_intent(Intent::InOut)) {
                Ok(report) if report.all_done() => {
                    info!(
                        store = upper.name(),
                        from = self.delegates[served_by].name(),
                        location = %location,
                        "promoted entry"
                    );
                }
                Ok(report) => {
                    let reason = report
                        .tiers
                        .iter()
                        .find_map(|tier| tier.reason.clone())
                        .unwrap_or_default();
                    warn!(store = upper.name(), %reason, "refill did not complete");
                }
                Err(err) => warn!(store = upper.name(), %err, "refill failed"),
            }
        }
    }

    fn on_transient(&self, store: &dyn Store, reason: &str) -> bool {
        match self.transient {
            TransientPolicy::Stop => false,
            TransientPolicy::FallThrough => {
                warn!(store = store.name(), %reason, "tier unavailable, trying the next one");
                true
            }
        }
    }
}

impl Store for MultiStore {
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
        !self.readonly && self.delegates.iter().any(|store| store.writeable())
    }

    fn locate(&self, location: &Location) -> Result<String, StoreError> {
        let mut parts = Vec::with_capacity(self.delegates.len());
        for store in &self.delegates {
            parts.push(store.locate(location)?);
        }
        Ok(parts.join(";"))
    }

    fn check(&self, location: &Location) -> Result<Outcome<u64>, StoreError> {
        let mut last = Outcome::NotFound(format!("no tier of {} holds {location}", self.name));
        for store in &self.delegates {
            match store.check(location)? {
                Outcome::Done(size) => return Ok(Outcome::Done(size)),
                Outcome::NotFound(reason) => last = Outcome::NotFound(reason),
                Outcome::Transient(reason) => {
                    if !self.on_transient(store.as_ref(), &reason) {
                        return Ok(Outcome::Transient(reason));
                    }
                    last = Outcome::Transient(reason);
                }
            }
        }
        Ok(last)
    }

    fn get(
        &self,
        location: &Location,
        local: &Path,
        options: &StoreOptions,
    ) -> Result<Outcome, StoreError> {
        let mut last = Outcome::NotFound(format!("no tier of {} holds {location}", self.name));
        for (idx, store) in self.delegates.iter().enumerate() {
            match store.get(location, local, options)? {
                Outcome::Done(()) => {
                    debug!(store = store.name(), tier = idx, "served");
                    if idx > 0 && self.refill && !self.readonly {
                        self.promote(idx, location, local);
                    }
                    return Ok(Outcome::Done(()));
                }
                Outcome::NotFound(reason) => {
                    debug!(store = store.name(), %reason, "not in tier");
                    last = Outcome::NotFound(reason);
                }
                Outcome::Transient(reason) => {
                    if !self.on_transient(store.as_ref(), &reason) {
                        return Ok(Outcome::Transient(reason));
                    }
                    last = Outcome::Transient(reason);
                }
            }
        }
        Ok(last)
    }

    fn put(
        &self,
        local: &Path,
        location: &Location,
        options: &StoreOptions,
    ) -> Result<TierReport, StoreError> {
        if !self.writeable() {
            return Err(StoreError::Readonly {
                store: self.name.clone(),
            });
        }
        let mut report = TierReport::default();
        for store in &self.delegates {
            if !store.writeable() {
                report.push(store.name(), TierStatus::Skipped, Some("read-only".to_string()));
                continue;
            }
            match store.put(local, location, options) {
                Ok(tiers) => report.extend(tiers),
                Err(err @ StoreError::Integrity { .. }) => return Err(err),
                Err(err) => {
                    warn!(store = store.name(), %err, "write failed");
                    report.push(store.name(), TierStatus::Failed, Some(err.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn delete(&self, location: &Location) -> Result<TierReport, StoreError> {
        if !self.writeable() {
            return Err(StoreError::Readonly {
                store: self.name.clone(),
            });
        }
        let mut report = TierReport::default();
        for store in &self.delegates {
            if !store.writeable() {
                report.push(store.name(), TierStatus::Skipped, Some("read-only".to_string()));
                continue;
            }
            match store.delete(location) {
                Ok(tiers) => report.extend(tiers),
                Err(err) => report.push(store.name(), TierStatus::Failed, Some(err.to_string())),
            }
        }
        Ok(report)
    }
}
