use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use quarry_domain::{
    diagnostics, Attr, AttrMap, Bag, Deferred, InvalidValue, Picked, Scope, Specification,
    TemplateError, Value,
};
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::location::{Location, LocationError};
use crate::roles::{Container, Provider, Resource};
use crate::store::{Outcome, StoreError, StoreHub, StoreOptions, TierReport, TierStatus};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("[QY211] handler has no {role}")]
    Incomplete { role: &'static str },
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error("cannot set '{attr}': {source}")]
    Invalid {
        attr: String,
        #[source]
        source: InvalidValue,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            HandlerError::Incomplete { .. } => diagnostics::location::INCOMPLETE,
            HandlerError::Location(err) => err.code(),
            HandlerError::Invalid { source, .. } => source.code(),
            HandlerError::Store(err) => err.code(),
        }
    }
}

impl From<TemplateError> for HandlerError {
    fn from(err: TemplateError) -> Self {
        HandlerError::Location(LocationError::Template(err))
    }
}

/// One bound role of a handler.
pub struct Member<T: ?Sized> {
    name: String,
    spec: Arc<Specification>,
    attrs: AttrMap,
    instance: Box<T>,
}

impl<T: ?Sized> Member<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &Specification {
        &self.spec
    }

    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    pub fn instance(&self) -> &T {
        &self.instance
    }

    /// Rebinds `key` when this member's specification tracks it; `false`
    /// otherwise. The value passes the same checks as during matching.
    fn assign(&mut self, key: &str, value: &Value) -> Result<bool, HandlerError> {
        let Some(name) = self.spec.tracks(key) else {
            return Ok(false);
        };
        let Some(aspec) = self.spec.attr(name) else {
            return Ok(false);
        };
        let attr = match value {
            Value::Str(raw) if aspec.is_lazy() => Attr::Deferred(Deferred::template(raw)),
            other => Attr::Literal(aspec.check(other.clone()).map_err(|source| {
                HandlerError::Invalid {
                    attr: name.to_string(),
                    source,
                }
            })?),
        };
        self.attrs.insert(name.to_string(), attr);
        Ok(true)
    }
}

impl<T: ?Sized> From<Picked<T>> for Member<T> {
    fn from(picked: Picked<T>) -> Self {
        Self {
            name: picked.name,
            spec: picked.spec,
            attrs: picked.attrs,
            instance: picked.instance,
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("attrs", &self.attrs)
            .field("instance", &&*self.instance)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub at: String,
    pub action: String,
    pub store: String,
    pub status: TierStatus,
    pub reason: Option<String>,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.at, self.action, self.store, self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// A resource, provider and container bound from one attribute bag.
///
/// The location is rendered from the current members on every call, so
/// reassigning the provider or an attribute retargets the next transfer.
#[derive(Debug)]
pub struct Handler {
    resource: Option<Member<dyn Resource>>,
    provider: Option<Member<dyn Provider>>,
    container: Option<Member<dyn Container>>,
    options: Bag,
    history: Vec<HistoryEntry>,
    stores: Arc<StoreHub>,
    filled: bool,
}

impl Handler {
    pub fn new(
        resource: Option<Member<dyn Resource>>,
        provider: Option<Member<dyn Provider>>,
        container: Option<Member<dyn Container>>,
        options: Bag,
        stores: Arc<StoreHub>,
    ) -> Self {
        Self {
            resource,
            provider,
            container,
            options,
            history: Vec::new(),
            stores,
            filled: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.resource.is_some() && self.provider.is_some() && self.container.is_some()
    }

    pub fn resource(&self) -> Option<&Member<dyn Resource>> {
        self.resource.as_ref()
    }

    pub fn provider(&self) -> Option<&Member<dyn Provider>> {
        self.provider.as_ref()
    }

    pub fn container(&self) -> Option<&Member<dyn Container>> {
        self.container.as_ref()
    }

    /// Bag entries no member consumed.
    pub fn options(&self) -> &Bag {
        &self.options
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Retargets the handler; resource and container are kept.
    pub fn set_provider(&mut self, provider: Member<dyn Provider>) {
        debug!(provider = provider.name(), "provider reassigned");
        self.provider = Some(provider);
    }

    /// Reassigns `key` on every member that tracks it, remapped and checked
    /// against each member's specification. Untracked keys land in the
    /// options.
    pub fn set_attr(&mut self, key: &str, value: impl Into<Value>) -> Result<(), HandlerError> {
        let value = value.into();
        let mut tracked = false;
        if let Some(member) = &mut self.resource {
            tracked |= member.assign(key, &value)?;
        }
        if let Some(member) = &mut self.provider {
            tracked |= member.assign(key, &value)?;
        }
        if let Some(member) = &mut self.container {
            tracked |= member.assign(key, &value)?;
        }
        if !tracked {
            self.options.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn require<'a, T: ?Sized>(
        member: Option<&'a Member<T>>,
        role: &'static str,
    ) -> Result<&'a Member<T>, HandlerError> {
        member.ok_or(HandlerError::Incomplete { role })
    }

    /// Current location of the artifact.
    pub fn location(&self) -> Result<Location, HandlerError> {
        let resource = Self::require(self.resource.as_ref(), "resource")?;
        let provider = Self::require(self.provider.as_ref(), "provider")?;
        let scope = Scope::new()
            .layer(&provider.attrs)
            .layer(&resource.attrs)
            .fallback(&self.options);
        Ok(provider.instance.uri(&*resource.instance, &scope)?)
    }

    /// Physical address inside the store serving the location.
    pub fn locate(&self) -> Result<String, HandlerError> {
        let location = self.location()?;
        let store = self.stores.for_location(&location)?;
        Ok(store.locate(&location)?)
    }

    pub fn local_path(&self) -> Result<PathBuf, HandlerError> {
        let resource = Self::require(self.resource.as_ref(), "resource")?;
        let container = Self::require(self.container.as_ref(), "container")?;
        let scope = Scope::new()
            .layer(&container.attrs)
            .layer(&resource.attrs)
            .fallback(&self.options);
        Ok(container.instance.local_path(&scope)?)
    }

    pub fn get(&mut self, options: &StoreOptions) -> Result<Outcome, HandlerError> {
        let location = self.location()?;
        let local = self.local_path()?;
        let store = self.stores.for_location(&location)?;
        let outcome = match store.get(&location, &local, options) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.record("get", store.name(), TierStatus::Failed, Some(err.to_string()));
                return Err(err.into());
            }
        };
        let reason = outcome.reason().map(ToOwned::to_owned);
        self.record("get", store.name(), outcome.status(), reason);
        if outcome.is_done() {
            self.filled = true;
            info!(location = %location, local = %local.display(), "artifact retrieved");
        }
        Ok(outcome)
    }

    pub fn put(&mut self, options: &StoreOptions) -> Result<TierReport, HandlerError> {
        let location = self.location()?;
        let local = self.local_path()?;
        let store = self.stores.for_location(&location)?;
        let report = match store.put(&local, &location, options) {
            Ok(report) => report,
            Err(err) => {
                self.record("put", store.name(), TierStatus::Failed, Some(err.to_string()));
                return Err(err.into());
            }
        };
        for tier in &report.tiers {
            self.record("put", &tier.store, tier.status, tier.reason.clone());
        }
        Ok(report)
    }

    pub fn check(&mut self) -> Result<Outcome<u64>, HandlerError> {
        let location = self.location()?;
        let store = self.stores.for_location(&location)?;
        let outcome = store.check(&location)?;
        let reason = outcome.reason().map(ToOwned::to_owned);
        self.record("check", store.name(), outcome.status(), reason);
        Ok(outcome)
    }

    pub fn delete(&mut self) -> Result<TierReport, HandlerError> {
        let location = self.location()?;
        let store = self.stores.for_location(&location)?;
        let report = store.delete(&location)?;
        for tier in &report.tiers {
            self.record("delete", &tier.store, tier.status, tier.reason.clone());
        }
        Ok(report)
    }

    /// Removes the local file; `false` when there was none.
    pub fn clear(&mut self) -> Result<bool, HandlerError> {
        let local = self.local_path()?;
        let removed = match fs::remove_file(&local) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(StoreError::Io {
                    context: format!("failed to remove {}", local.display()),
                    source,
                }
                .into())
            }
        };
        self.filled = false;
        Ok(removed)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.clone()
    }

    pub fn last_action(&self) -> Option<String> {
        self.history.last().map(ToString::to_string)
    }

    /// Multi-line summary of the bound members.
    pub fn idcard(&self) -> String {
        let mut lines = Vec::new();
        let mut describe = |role: &str, member: Option<(&str, &str, &AttrMap)>| match member {
            Some((name, realkind, attrs)) => {
                lines.push(format!("{role}: {name} (realkind {realkind})"));
                for (key, attr) in attrs {
                    lines.push(format!("    {key} = {}", attr.describe()));
                }
            }
            None => lines.push(format!("{role}: <unbound>")),
        };
        describe(
            "resource",
            self.resource
                .as_ref()
                .map(|m| (m.name(), m.instance.realkind(), &m.attrs)),
        );
        describe(
            "provider",
            self.provider
                .as_ref()
                .map(|m| (m.name(), m.instance.realkind(), &m.attrs)),
        );
        describe(
            "container",
            self.container
                .as_ref()
                .map(|m| (m.name(), m.instance.realkind(), &m.attrs)),
        );
        for (key, value) in &self.options {
            lines.push(format!("option: {key} = {value}"));
        }
        lines.push(format!("complete: {}", self.is_complete()));
        match self.location() {
            Ok(location) => lines.push(format!("location: {location}")),
            Err(err) => lines.push(format!("location: <{err}>")),
        }
        lines.join("\n")
    }

    fn record(&mut self, action: &str, store: &str, status: TierStatus, reason: Option<String>) {
        let at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        self.history.push(HistoryEntry {
            at,
            action: action.to_string(),
            store: store.to_string(),
            status,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::Session;
    use quarry_domain::bag;
    use tempfile::tempdir;

    fn cached_handler(session: &mut Session, local: &std::path::Path) -> Option<Handler> {
        let raw = bag([
            ("kind", Value::str("analysis")),
            ("model", Value::str("arpege")),
            ("date", Value::str("2024010100")),
            ("cutoff", Value::str("p")),
            ("experiment", Value::str("oper")),
            ("block", Value::str("forecast")),
            ("namespace", Value::str("quarry.cache.local")),
            ("filename", Value::str(local.display().to_string())),
        ]);
        session.handler(&raw).ok().flatten()
    }

    #[test]
    fn transfers_are_logged_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let local = temp.path().join("work").join("analysis.grib");
        fs::create_dir_all(local.parent().ok_or("no parent")?)?;
        fs::write(&local, b"fields")?;
        let mut session = Session::with_builtins(Config::for_root(temp.path()));
        let mut handler = cached_handler(&mut session, &local).ok_or("no handler")?;
        assert!(handler.history().is_empty());
        assert!(handler.last_action().is_none());

        let report = handler.put(&StoreOptions::default())?;
        assert!(report.all_done());
        assert!(handler.check()?.is_done());

        let history = handler.history();
        let actions: Vec<&str> = history.iter().map(|entry| entry.action.as_str()).collect();
        assert_eq!(actions, ["put", "check"]);
        assert!(history.iter().all(|entry| entry.status == TierStatus::Done));
        assert!(handler
            .last_action()
            .ok_or("no action")?
            .ends_with("check cache done"));
        Ok(())
    }

    #[test]
    fn reassigned_values_are_checked_like_matched_ones() -> Result<(), Box<dyn std::error::Error>>
    {
        let temp = tempdir()?;
        let local = temp.path().join("analysis.grib");
        let mut session = Session::with_builtins(Config::for_root(temp.path()));
        let mut handler = cached_handler(&mut session, &local).ok_or("no handler")?;
        assert!(handler.location()?.path().contains("/20240101T0000P/"));

        handler.set_attr("cutoff", "a")?;
        assert!(handler.location()?.path().contains("/20240101T0000A/"));

        let err = handler
            .set_attr("cutoff", "x")
            .err()
            .ok_or("cutoff x was accepted")?;
        assert_eq!(err.code(), "QY205");
        assert!(matches!(err, HandlerError::Invalid { ref attr, .. } if attr == "cutoff"));
        assert!(handler.location()?.path().contains("/20240101T0000A/"));
        Ok(())
    }

    #[test]
    fn clear_removes_the_local_copy_once() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let local = temp.path().join("analysis.grib");
        fs::write(&local, b"fields")?;
        let mut session = Session::with_builtins(Config::for_root(temp.path()));
        let mut handler = cached_handler(&mut session, &local).ok_or("no handler")?;

        assert!(handler.clear()?);
        assert!(!local.exists());
        assert!(!handler.clear()?);
        assert!(!handler.is_filled());
        Ok(())
    }

    #[test]
    fn idcard_lists_members_and_location() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let local = temp.path().join("analysis.grib");
        let mut session = Session::with_builtins(Config::for_root(temp.path()));
        let mut handler = cached_handler(&mut session, &local).ok_or("no handler")?;
        handler.set_attr("role", "Analysis")?;

        let card = handler.idcard();
        assert!(card.contains("resource: artifact (realkind artifact)"));
        assert!(card.contains("provider: experiment (realkind experiment)"));
        assert!(card.contains("container: file (realkind file)"));
        assert!(card.contains("option: role = Analysis"));
        assert!(card.contains("complete: true"));
        assert!(card.contains("location: quarry://quarry.cache.local/"));
        Ok(())
    }
}
