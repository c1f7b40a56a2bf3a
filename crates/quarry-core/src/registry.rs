use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use quarry_domain::{Attr, Collector, PriorityTable, RegistryError, Specification};
use serde::Serialize;
use tracing::{debug, info};

use crate::roles::{Container, Provider, Resource};
use crate::store::StoreCollector;

pub type ResourceCollector = Collector<dyn Resource>;
pub type ProviderCollector = Collector<dyn Provider>;
pub type ContainerCollector = Collector<dyn Container>;

/// A named unit of candidate registrations, loaded once on demand.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut Registry) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Resource,
    Provider,
    Container,
    Store,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 4] = [
        CollectorKind::Resource,
        CollectorKind::Provider,
        CollectorKind::Container,
        CollectorKind::Store,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectorKind::Resource => "resource",
            CollectorKind::Provider => "provider",
            CollectorKind::Container => "container",
            CollectorKind::Store => "store",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectorKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| RegistryError::UnknownCollector(s.to_string()))
    }
}

/// Listing entry for one registered candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateInfo {
    pub name: String,
    pub priority: String,
    pub info: String,
    pub mandatory: Vec<String>,
    pub optional: Vec<String>,
}

impl CandidateInfo {
    fn of(name: &str, spec: &Specification) -> Self {
        Self {
            name: name.to_string(),
            priority: spec.priority().to_string(),
            info: spec.info().to_string(),
            mandatory: spec.mandatory().into_iter().map(str::to_string).collect(),
            optional: spec.optional().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Every collector a session resolves against, plus the priority table and
/// the plugins still waiting to be loaded.
pub struct Registry {
    resources: ResourceCollector,
    providers: ProviderCollector,
    containers: ContainerCollector,
    stores: StoreCollector,
    priorities: PriorityTable,
    pending: IndexMap<String, Box<dyn Plugin>>,
    loaded: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            resources: Collector::new(CollectorKind::Resource.as_str()),
            providers: Collector::new(CollectorKind::Provider.as_str()),
            containers: Collector::new(CollectorKind::Container.as_str()),
            stores: Collector::new(CollectorKind::Store.as_str()),
            priorities: PriorityTable::new(),
            pending: IndexMap::new(),
            loaded: Vec::new(),
        }
    }

    /// A registry with the generic catalogue queued for loading.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.defer(Box::new(crate::catalog::Builtins));
        registry
    }

    /// Queues `plugin`; nothing is registered until it is loaded.
    pub fn defer(&mut self, plugin: Box<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.loaded.contains(&name) {
            return;
        }
        debug!(plugin = %name, "plugin deferred");
        self.pending.insert(name, plugin);
    }

    /// Loads the named plugin. Loading an already loaded plugin is a no-op.
    pub fn load(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.loaded.iter().any(|loaded| loaded == name) {
            return Ok(());
        }
        let plugin = self
            .pending
            .shift_remove(name)
            .ok_or_else(|| RegistryError::UnknownPlugin(name.to_string()))?;
        plugin
            .register(self)
            .map_err(|err| RegistryError::PluginFailed {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        info!(plugin = name, "plugin loaded");
        self.loaded.push(name.to_string());
        Ok(())
    }

    pub fn load_pending(&mut self) -> Result<(), RegistryError> {
        let names: Vec<String> = self.pending.keys().cloned().collect();
        for name in names {
            self.load(&name)?;
        }
        Ok(())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|loaded| loaded == name)
    }

    pub fn resources(&self) -> &ResourceCollector {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceCollector {
        &mut self.resources
    }

    pub fn providers(&self) -> &ProviderCollector {
        &self.providers
    }

    pub fn providers_mut(&mut self) -> &mut ProviderCollector {
        &mut self.providers
    }

    pub fn containers(&self) -> &ContainerCollector {
        &self.containers
    }

    pub fn containers_mut(&mut self) -> &mut ContainerCollector {
        &mut self.containers
    }

    pub fn stores(&self) -> &StoreCollector {
        &self.stores
    }

    pub fn stores_mut(&mut self) -> &mut StoreCollector {
        &mut self.stores
    }

    pub fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    pub fn priorities_mut(&mut self) -> &mut PriorityTable {
        &mut self.priorities
    }

    /// Removes the named candidate; `false` when it was not registered.
    pub fn unregister(&mut self, kind: CollectorKind, name: &str) -> bool {
        let removed = match kind {
            CollectorKind::Resource => self.resources.unregister(name).is_some(),
            CollectorKind::Provider => self.providers.unregister(name).is_some(),
            CollectorKind::Container => self.containers.unregister(name).is_some(),
            CollectorKind::Store => self.stores.unregister(name).is_some(),
        };
        if removed {
            debug!(collector = %kind, candidate = name, "unregistered");
        }
        removed
    }

    pub fn candidates(&self, kind: CollectorKind) -> Vec<CandidateInfo> {
        match kind {
            CollectorKind::Resource => infos(&self.resources),
            CollectorKind::Provider => infos(&self.providers),
            CollectorKind::Container => infos(&self.containers),
            CollectorKind::Store => infos(&self.stores),
        }
    }

    /// Netloc and namespace values declared by provider and store candidates,
    /// each mapped to the candidates that declare it. `pattern` keeps only
    /// names containing it.
    pub fn namespaces(&self, pattern: Option<&str>) -> IndexMap<String, Vec<String>> {
        let mut found: IndexMap<String, Vec<String>> = IndexMap::new();
        let specs = self
            .providers
            .candidates()
            .iter()
            .map(|candidate| (candidate.name(), candidate.spec()))
            .chain(
                self.stores
                    .candidates()
                    .iter()
                    .map(|candidate| (candidate.name(), candidate.spec())),
            );
        for (name, spec) in specs {
            for attr in ["netloc", "namespace"] {
                let Some(aspec) = spec.attr(attr) else {
                    continue;
                };
                let declared = aspec
                    .allowed()
                    .iter()
                    .chain(aspec.default_attr().and_then(Attr::as_literal))
                    .map(quarry_domain::Value::render);
                for value in declared {
                    if value.is_empty() || pattern.is_some_and(|pattern| !value.contains(pattern)) {
                        continue;
                    }
                    let owners = found.entry(value).or_default();
                    if !owners.iter().any(|owner| owner == name) {
                        owners.push(name.to_string());
                    }
                }
            }
        }
        found.sort_keys();
        found
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("resources", &self.resources.len())
            .field("providers", &self.providers.len())
            .field("containers", &self.containers.len())
            .field("stores", &self.stores.len())
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("loaded", &self.loaded)
            .finish()
    }
}

fn infos<T: ?Sized, C: ?Sized>(collector: &Collector<T, C>) -> Vec<CandidateInfo> {
    collector
        .candidates()
        .iter()
        .map(|candidate| CandidateInfo::of(candidate.name(), candidate.spec()))
        .collect()
}
