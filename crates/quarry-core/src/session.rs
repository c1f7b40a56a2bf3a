use std::sync::Arc;

use quarry_domain::{
    bag, expand, Attr, Bag, Collector, Lookup, Matcher, Nothing, Picked, RegistryError,
    ResolutionError, ResolutionReport, Value,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::handler::{Handler, HandlerError, Member};
use crate::registry::Registry;
use crate::roles::Provider;
use crate::store::{Outcome, Store, StoreEnv, StoreHub, StoreOptions, TierReport};
use crate::transport::{SystemTransport, Transport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl SessionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Resolution(err) => err.code(),
            SessionError::Registry(err) => err.code(),
            SessionError::Handler(err) => err.code(),
        }
    }
}

/// A handler together with the result of the action run through it.
#[derive(Debug)]
pub struct Retrieval<T> {
    pub handler: Handler,
    pub result: Result<T, HandlerError>,
}

/// Entry point for resolution and transfers: owns the registry, the
/// configuration and the stack of default attributes.
pub struct Session {
    registry: Registry,
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    defaults: Vec<Bag>,
    last_report: Option<ResolutionReport>,
    fatal: bool,
}

impl Session {
    pub fn new(registry: Registry, config: Config) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            transport: Arc::new(SystemTransport::new()),
            defaults: Vec::new(),
            last_report: None,
            fatal: true,
        }
    }

    /// Session over the generic catalogue.
    pub fn with_builtins(config: Config) -> Self {
        Self::new(Registry::with_builtins(), config)
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// With `fatal` off, a role nobody matches leaves the handler incomplete
    /// instead of failing the whole load.
    #[must_use]
    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn push_defaults(&mut self, defaults: Bag) {
        self.defaults.push(defaults);
    }

    pub fn pop_defaults(&mut self) -> Option<Bag> {
        self.defaults.pop()
    }

    /// Runs `f` with `defaults` pushed, popping them afterwards.
    pub fn with_defaults<R>(&mut self, defaults: Bag, f: impl FnOnce(&mut Self) -> R) -> R {
        let depth = self.defaults.len();
        self.defaults.push(defaults);
        let result = f(self);
        self.defaults.truncate(depth);
        result
    }

    /// Report of the most recent role resolution.
    pub fn last_report(&self) -> Option<&ResolutionReport> {
        self.last_report.as_ref()
    }

    /// Store dispatcher over the current registry state.
    pub fn hub(&self) -> StoreHub {
        StoreHub::new(
            self.registry.stores().clone(),
            self.registry.priorities().clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.transport),
        )
    }

    pub fn store(&mut self, scheme: &str, netloc: &str) -> Result<Arc<dyn Store>, SessionError> {
        self.registry.load_pending()?;
        Ok(self.hub().open(scheme, netloc).map_err(HandlerError::from)?)
    }

    /// Local values win; among defaults, the most recently pushed wins.
    fn merged(&self, raw: &Bag) -> Bag {
        let mut merged = raw.clone();
        for layer in self.defaults.iter().rev() {
            for (key, value) in layer {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        merged
    }

    fn matcher(&self) -> Matcher<'_> {
        let matching = self.config.matching();
        Matcher::new(self.registry.priorities(), self.config.environment())
            .strict(matching.strict)
            .ambiguity(matching.ambiguity)
    }

    /// One handler per expanded bag, in input order.
    pub fn load(&mut self, bags: &[Bag]) -> Result<Vec<Handler>, SessionError> {
        self.registry.load_pending()?;
        let hub = Arc::new(self.hub());
        let mut handlers = Vec::new();
        for raw in bags {
            for one in expand(&self.merged(raw)) {
                let (built, report) = self.build(&one, &hub);
                if let Some(report) = report {
                    self.last_report = Some(report);
                }
                handlers.push(built?);
            }
        }
        debug!(count = handlers.len(), "handlers loaded");
        Ok(handlers)
    }

    /// First complete handler for `raw`, if any.
    pub fn handler(&mut self, raw: &Bag) -> Result<Option<Handler>, SessionError> {
        Ok(self
            .load(std::slice::from_ref(raw))?
            .into_iter()
            .find(Handler::is_complete))
    }

    fn build(
        &self,
        one: &Bag,
        hub: &Arc<StoreHub>,
    ) -> (Result<Handler, SessionError>, Option<ResolutionReport>) {
        let matcher = self.matcher();

        let resource = match self.resolve(&matcher, self.registry.resources(), one, &Nothing) {
            Ok((picked, _)) => picked,
            Err(err) => return failed(err),
        };
        let resolved: Bag = resource
            .as_ref()
            .map(|picked| {
                picked
                    .attrs
                    .iter()
                    .filter_map(|(name, attr)| {
                        attr.as_literal().map(|value| (name.clone(), value.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let provider = match self.resolve(&matcher, self.registry.providers(), one, &resolved) {
            Ok((picked, _)) => picked,
            Err(err) => return failed(err),
        };
        let (container, last) =
            match self.resolve(&matcher, self.registry.containers(), one, &resolved) {
                Ok(found) => found,
                Err(err) => return failed(err),
            };

        let consumed: Vec<&String> = [
            resource.as_ref().map(|p| &p.consumed),
            provider.as_ref().map(|p| &p.consumed),
            container.as_ref().map(|p| &p.consumed),
        ]
        .into_iter()
        .flatten()
        .flatten()
        .collect();
        let options: Bag = one
            .iter()
            .filter(|(key, _)| !consumed.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let handler = Handler::new(
            resource.map(Member::from),
            provider.map(Member::from),
            container.map(Member::from),
            options,
            Arc::clone(hub),
        );
        if !handler.is_complete() {
            warn!(bag = ?one.keys().collect::<Vec<_>>(), "handler is incomplete");
        }
        (Ok(handler), Some(last))
    }

    fn resolve<T: ?Sized>(
        &self,
        matcher: &Matcher<'_>,
        collector: &Collector<T>,
        one: &Bag,
        extras: &dyn Lookup,
    ) -> Result<(Option<Picked<T>>, ResolutionReport), ResolutionError> {
        if self.fatal {
            matcher
                .pick(collector, one, extras, &())
                .map(|(picked, report)| (Some(picked), report))
        } else {
            matcher.probe(collector, one, extras, &())
        }
    }

    /// Loads `bags` and retrieves every handler.
    pub fn get(
        &mut self,
        bags: &[Bag],
        options: &StoreOptions,
    ) -> Result<Vec<Retrieval<Outcome>>, SessionError> {
        Ok(self
            .load(bags)?
            .into_iter()
            .map(|mut handler| {
                let result = handler.get(options);
                Retrieval { handler, result }
            })
            .collect())
    }

    /// Loads `bags` and publishes every handler's local file.
    pub fn put(
        &mut self,
        bags: &[Bag],
        options: &StoreOptions,
    ) -> Result<Vec<Retrieval<TierReport>>, SessionError> {
        Ok(self
            .load(bags)?
            .into_iter()
            .map(|mut handler| {
                let result = handler.put(options);
                Retrieval { handler, result }
            })
            .collect())
    }

    /// A provider resolved on its own, for retargeting existing handlers.
    pub fn provider(&mut self, raw: &Bag) -> Result<Member<dyn Provider>, SessionError> {
        self.registry.load_pending()?;
        let merged = self.merged(raw);
        let result = self
            .matcher()
            .pick(self.registry.providers(), &merged, &Nothing, &());
        let (picked, report) = match result {
            Ok(found) => found,
            Err(err) => {
                self.last_report = Some(err.report().clone());
                return Err(err.into());
            }
        };
        self.last_report = Some(report);
        Ok(Member::from(picked))
    }

    /// Handler for a literal location, stored locally at `local`.
    pub fn magic(&mut self, url: &str, local: &str) -> Result<Handler, SessionError> {
        let raw: Bag = bag([
            ("unknown", Value::Bool(true)),
            ("magic", Value::str(url)),
            ("filename", Value::str(local)),
        ]);
        self.load(std::slice::from_ref(&raw))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ResolutionError::NoCandidate {
                    collector: "resource".to_string(),
                    report: Box::new(ResolutionReport::new("resource")),
                }
                .into()
            })
    }

    /// Resolution reports of every role for the first expansion of `raw`,
    /// without failing on a role that nobody matches.
    pub fn explain(&mut self, raw: &Bag) -> Result<Vec<ResolutionReport>, SessionError> {
        self.registry.load_pending()?;
        let Some(one) = expand(&self.merged(raw)).into_iter().next() else {
            return Ok(Vec::new());
        };
        let matcher = self.matcher();
        let (resource, resource_report) =
            matcher.probe(self.registry.resources(), &one, &Nothing, &())?;
        let resolved: Bag = resource
            .map(|picked| {
                picked
                    .attrs
                    .into_iter()
                    .filter_map(|(name, attr)| match attr {
                        Attr::Literal(value) => Some((name, value)),
                        Attr::Deferred(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let (_, provider_report) = matcher.probe(self.registry.providers(), &one, &resolved, &())?;
        let (_, container_report) =
            matcher.probe(self.registry.containers(), &one, &resolved, &())?;
        let reports = vec![resource_report, provider_report, container_report];
        self.last_report = reports.last().cloned();
        Ok(reports)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("defaults", &self.defaults)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

fn failed(err: ResolutionError) -> (Result<Handler, SessionError>, Option<ResolutionReport>) {
    let report = err.report().clone();
    (Err(err.into()), Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn session(root: &Path) -> Session {
        Session::with_builtins(Config::for_root(root))
    }

    fn artifact() -> Bag {
        bag([
            ("kind", Value::str("analysis")),
            ("model", Value::str("arpege")),
            ("date", Value::str("2024010100")),
            ("cutoff", Value::str("a")),
            ("experiment", Value::str("oper")),
            ("block", Value::str("forecast")),
            ("filename", Value::str("[kind].[model]")),
        ])
    }

    #[test]
    fn defaults_apply_under_local_values() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut session = session(temp.path());
        session.push_defaults(bag([("model", "arome"), ("geometry", "franmg")]));
        let mut raw = artifact();
        raw.shift_remove("model");
        let handlers = session.with_defaults(bag([("model", "aladin")]), |session| {
            session.load(std::slice::from_ref(&raw))
        })?;
        let location = handlers[0].location()?;
        assert!(location.path().ends_with("analysis.aladin.franmg.grib"));
        assert_eq!(handlers[0].local_path()?, Path::new("analysis.aladin"));

        let handlers = session.load(&[artifact()])?;
        assert!(handlers[0].location()?.path().ends_with("analysis.arpege.franmg.grib"));
        assert!(session.pop_defaults().is_some());
        assert!(session.pop_defaults().is_none());
        Ok(())
    }

    #[test]
    fn unconsumed_keys_become_options() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut session = session(temp.path());
        let mut raw = artifact();
        raw.insert("role".into(), Value::str("Analysis"));
        let handler = session.handler(&raw)?.ok_or("no complete handler")?;
        assert_eq!(handler.options().get("role"), Some(&Value::str("Analysis")));
        assert!(!handler.options().contains_key("kind"));
        assert!(handler.idcard().contains("complete: true"));
        Ok(())
    }

    #[test]
    fn permissive_sessions_keep_incomplete_handlers() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut raw = artifact();
        raw.shift_remove("filename");

        let mut strict = session(temp.path());
        assert!(matches!(
            strict.load(std::slice::from_ref(&raw)),
            Err(SessionError::Resolution(ResolutionError::NoCandidate { .. }))
        ));
        assert_eq!(
            strict.last_report().map(|report| report.collector.as_str()),
            Some("container")
        );

        let mut lenient = session(temp.path()).fatal(false);
        let handlers = lenient.load(std::slice::from_ref(&raw))?;
        assert_eq!(handlers.len(), 1);
        assert!(!handlers[0].is_complete());
        let report = lenient.last_report().ok_or("no report")?;
        assert_eq!(report.collector, "container");
        assert!(report.selected.is_none());
        assert!(lenient.handler(&raw)?.is_none());
        Ok(())
    }

    #[test]
    fn provider_can_be_retargeted() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut session = session(temp.path());
        let mut handler = session.handler(&artifact())?.ok_or("no handler")?;
        assert_eq!(handler.location()?.netloc(), "quarry.multi.local");

        let cache_side = session.provider(&bag([
            ("experiment", "oper"),
            ("block", "forecast"),
            ("namespace", "quarry.cache.local"),
        ]))?;
        handler.set_provider(cache_side);
        let location = handler.location()?;
        assert_eq!(location.netloc(), "quarry.cache.local");
        assert!(location.path().starts_with("quarry/default/oper/20240101T0000A/forecast/"));
        Ok(())
    }

    #[test]
    fn explain_reports_every_role() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut session = session(temp.path());
        let reports = session.explain(&bag([("kind", "analysis")]))?;
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].collector, "resource");
        assert!(reports[0].selected.is_none());
        let artifact = reports[0].rejection_for("artifact").ok_or("no rejection")?;
        assert_eq!(artifact.attribute.as_deref(), Some("model"));
        Ok(())
    }

    #[test]
    fn magic_with_an_empty_default_list_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut session = session(temp.path());
        session.push_defaults(bag([("member", Value::List(vec![]))]));
        let err = session
            .magic("file:///data/obs/synop.txt", "synop.txt")
            .err()
            .ok_or("expected an error")?;
        assert_eq!(err.code(), "QY101");
        Ok(())
    }

    #[test]
    fn magic_handlers_address_literal_locations() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let mut session = session(temp.path());
        let handler = session.magic("file:///data/obs/synop.txt", "synop.txt")?;
        assert_eq!(handler.location()?.to_string(), "file:///data/obs/synop.txt");
        assert_eq!(handler.locate()?, "/data/obs/synop.txt");
        Ok(())
    }
}
