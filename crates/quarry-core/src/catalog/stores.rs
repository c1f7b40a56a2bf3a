use std::sync::Arc;

use quarry_domain::{AttrMap, AttrSpec, Candidate, RegistryError, Specification};

use super::literal;
use crate::registry::Registry;
use crate::store::{
    ArchiveBackend, ArchiveStore, CacheStore, FinderStore, MultiStore, Store, StoreEnv,
    FINDER_SCHEMES,
};

pub const CACHE_NETLOC: &str = "quarry.cache.local";
pub const ARCHIVE_NETLOC: &str = "quarry.archive.local";
pub const MULTI_NETLOC: &str = "quarry.multi.local";

fn tiered(info: &str, netloc: &str) -> Specification {
    Specification::builder(info)
        .attr("scheme", AttrSpec::string().values(["quarry"]).alias("protocol"))
        .attr("netloc", AttrSpec::string().values([netloc]))
        .build()
}

fn netloc_of(attrs: &AttrMap) -> String {
    literal(attrs, "netloc").unwrap_or_default()
}

pub(super) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    let finder = Specification::builder("Direct file and URL access")
        .attr(
            "scheme",
            AttrSpec::string().values(FINDER_SCHEMES).alias("protocol"),
        )
        .attr("netloc", AttrSpec::string())
        .build();
    registry.stores_mut().register(Candidate::<dyn Store, dyn StoreEnv>::new(
        "finder",
        finder,
        |attrs, env| {
            let scheme = literal(attrs, "scheme").unwrap_or_else(|| "file".to_string());
            let store = FinderStore::new(scheme, netloc_of(attrs), env.transport());
            Ok(Box::new(store) as Box<dyn Store>)
        },
    ))?;

    registry.stores_mut().register(Candidate::<dyn Store, dyn StoreEnv>::new(
        "cache",
        tiered("Local cache tree", CACHE_NETLOC),
        |attrs, env| {
            let config = env.config();
            let store = CacheStore::new(
                "cache",
                netloc_of(attrs),
                config.cache().location.path.clone(),
                env.transport(),
            )
            .readonly_entries(config.cache().readonly_entries)
            .sidecars(config.hash().sidecars);
            Ok(Box::new(store) as Box<dyn Store>)
        },
    ))?;

    registry.stores_mut().register(Candidate::<dyn Store, dyn StoreEnv>::new(
        "archive",
        tiered("Long-term archive", ARCHIVE_NETLOC),
        |attrs, env| {
            let archive = env.config().archive();
            let backend = match &archive.get_command {
                Some(get) => ArchiveBackend::Command {
                    get: get.clone(),
                    put: archive.put_command.clone(),
                },
                None => ArchiveBackend::Directory(archive.location.path.clone()),
            };
            let store = ArchiveStore::new("archive", netloc_of(attrs), backend, env.transport())
                .sidecars(env.config().hash().sidecars);
            Ok(Box::new(store) as Box<dyn Store>)
        },
    ))?;

    registry.stores_mut().register(Candidate::<dyn Store, dyn StoreEnv>::new(
        "multi",
        tiered("Cache backed by the archive", MULTI_NETLOC),
        |attrs, env| {
            let mut delegates: Vec<Arc<dyn Store>> = Vec::new();
            for netloc in [CACHE_NETLOC, ARCHIVE_NETLOC] {
                delegates.push(env.open("quarry", netloc).map_err(|err| err.to_string())?);
            }
            let multi = env.config().multi();
            let store = MultiStore::new("multi", netloc_of(attrs), delegates)
                .refill(multi.refill)
                .transient(multi.transient);
            Ok(Box::new(store) as Box<dyn Store>)
        },
    ))
}
