//! Generic candidates that make a registry usable without any domain
//! catalogue.

mod containers;
mod providers;
mod resources;
mod stores;

use quarry_domain::{Attr, AttrMap, RegistryError, Value};

use crate::registry::{Plugin, Registry};

pub use containers::FileContainer;
pub use providers::{ExperimentProvider, MagicProvider, RemoteProvider};
pub use resources::{ArtifactResource, UnknownResource};
pub use stores::{ARCHIVE_NETLOC, CACHE_NETLOC, MULTI_NETLOC};

pub const BUILTINS: &str = "builtins";

pub fn register_builtins(registry: &mut Registry) -> Result<(), RegistryError> {
    resources::register(registry)?;
    providers::register(registry)?;
    containers::register(registry)?;
    stores::register(registry)
}

/// The generic catalogue as a deferred plugin.
pub struct Builtins;

impl Plugin for Builtins {
    fn name(&self) -> &str {
        BUILTINS
    }

    fn register(&self, registry: &mut Registry) -> Result<(), RegistryError> {
        register_builtins(registry)
    }
}

fn literal(attrs: &AttrMap, name: &str) -> Option<String> {
    attrs
        .get(name)
        .and_then(Attr::as_literal)
        .map(Value::render)
}
