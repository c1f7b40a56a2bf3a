use std::fmt;
use std::sync::Arc;

use crate::attr::AttrMap;
use crate::error::RegistryError;
use crate::spec::Specification;

/// One registered implementation: a named specification plus the constructor
/// that turns bound attributes into an instance of the role trait `T`.
/// `C` is the context handed to the constructor.
pub struct Candidate<T: ?Sized, C: ?Sized = ()> {
    name: String,
    spec: Arc<Specification>,
    #[allow(clippy::type_complexity)]
    build: Arc<dyn Fn(&AttrMap, &C) -> Result<Box<T>, String> + Send + Sync>,
}

impl<T: ?Sized, C: ?Sized> Candidate<T, C> {
    pub fn new<F>(name: impl Into<String>, spec: Specification, build: F) -> Self
    where
        F: Fn(&AttrMap, &C) -> Result<Box<T>, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            spec: Arc::new(spec),
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &Specification {
        &self.spec
    }

    pub fn shared_spec(&self) -> Arc<Specification> {
        Arc::clone(&self.spec)
    }

    pub fn build(&self, attrs: &AttrMap, ctx: &C) -> Result<Box<T>, String> {
        (self.build)(attrs, ctx)
    }
}

impl<T: ?Sized, C: ?Sized> Clone for Candidate<T, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            spec: Arc::clone(&self.spec),
            build: Arc::clone(&self.build),
        }
    }
}

impl<T: ?Sized, C: ?Sized> fmt::Debug for Candidate<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("name", &self.name)
            .field("info", &self.spec.info())
            .field("priority", &self.spec.priority())
            .finish_non_exhaustive()
    }
}

/// Named bucket of candidates for one role, kept in declaration order.
pub struct Collector<T: ?Sized, C: ?Sized = ()> {
    tag: String,
    items: Vec<Candidate<T, C>>,
}

impl<T: ?Sized, C: ?Sized> Collector<T, C> {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            items: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Adds a candidate; the name and the specification must both be new.
    pub fn register(&mut self, candidate: Candidate<T, C>) -> Result<(), RegistryError> {
        if self.get(candidate.name()).is_some() {
            return Err(RegistryError::DuplicateName {
                collector: self.tag.clone(),
                name: candidate.name().to_string(),
            });
        }
        let fingerprint = candidate.spec().fingerprint();
        if let Some(existing) = self
            .items
            .iter()
            .find(|item| item.spec().fingerprint() == fingerprint)
        {
            return Err(RegistryError::DuplicateSpecification {
                collector: self.tag.clone(),
                name: candidate.name().to_string(),
                existing: existing.name().to_string(),
            });
        }
        tracing::trace!(collector = %self.tag, candidate = candidate.name(), "registered");
        self.items.push(candidate);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Candidate<T, C>> {
        let idx = self.items.iter().position(|item| item.name() == name)?;
        Some(self.items.remove(idx))
    }

    pub fn candidates(&self) -> &[Candidate<T, C>] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&Candidate<T, C>> {
        self.items.iter().find(|item| item.name() == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: ?Sized, C: ?Sized> Clone for Collector<T, C> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            items: self.items.clone(),
        }
    }
}

impl<T: ?Sized, C: ?Sized> fmt::Debug for Collector<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("tag", &self.tag)
            .field("items", &self.items)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrSpec;

    fn spec(values: &[&str]) -> Specification {
        Specification::builder("test")
            .attr("kind", AttrSpec::string().values(values.iter().copied()))
            .build()
    }

    fn candidate(name: &str, values: &[&str]) -> Candidate<str> {
        let label = name.to_string();
        Candidate::new(name, spec(values), move |_, _| {
            Ok(label.clone().into_boxed_str())
        })
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut collector: Collector<str> = Collector::new("resource");
        assert!(collector.register(candidate("a", &["x"])).is_ok());
        assert!(matches!(
            collector.register(candidate("a", &["y"])),
            Err(RegistryError::DuplicateName { .. })
        ));
        assert!(matches!(
            collector.register(candidate("b", &["x"])),
            Err(RegistryError::DuplicateSpecification { existing, .. }) if existing == "a"
        ));
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn unregister_keeps_order() {
        let mut collector: Collector<str> = Collector::new("resource");
        for (name, value) in [("a", "x"), ("b", "y"), ("c", "z")] {
            assert!(collector.register(candidate(name, &[value])).is_ok());
        }
        assert!(collector.unregister("b").is_some());
        assert!(collector.unregister("b").is_none());
        let names: Vec<&str> = collector.candidates().iter().map(Candidate::name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
