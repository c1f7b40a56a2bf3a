use std::cell::Cell;

use indexmap::IndexMap;

use crate::attr::AttrMap;
use crate::error::TemplateError;
use crate::template::Template;
use crate::value::Value;

/// Nesting bound for deferred evaluation and back-reference substitution.
pub const MAX_DEPTH: usize = 25;

/// The caller-supplied mapping of attribute name to raw value.
pub type Bag = IndexMap<String, Value>;

pub fn bag<I, K, V>(pairs: I) -> Bag
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Name-based attribute lookup used to resolve `[attr]` back-references.
pub trait Lookup {
    fn lookup(&self, name: &str) -> Result<Option<Value>, TemplateError>;
}

impl Lookup for Bag {
    fn lookup(&self, name: &str) -> Result<Option<Value>, TemplateError> {
        Ok(self.get(name).cloned())
    }
}

/// An empty lookup.
pub struct Nothing;

impl Lookup for Nothing {
    fn lookup(&self, _name: &str) -> Result<Option<Value>, TemplateError> {
        Ok(None)
    }
}

/// Layered view over bound attribute maps, consulted in order, then over any
/// fallback lookups. Deferred attributes are evaluated against the whole scope
/// on every access.
pub struct Scope<'a> {
    maps: Vec<&'a AttrMap>,
    fallbacks: Vec<&'a dyn Lookup>,
    depth: Cell<usize>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self {
            maps: Vec::new(),
            fallbacks: Vec::new(),
            depth: Cell::new(0),
        }
    }

    #[must_use]
    pub fn layer(mut self, map: &'a AttrMap) -> Self {
        self.maps.push(map);
        self
    }

    #[must_use]
    pub fn fallback(mut self, lookup: &'a dyn Lookup) -> Self {
        self.fallbacks.push(lookup);
        self
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>, TemplateError> {
        self.lookup(name)
    }

    /// Value of a mandatory attribute.
    pub fn value(&self, name: &str) -> Result<Value, TemplateError> {
        self.lookup(name)?
            .ok_or_else(|| TemplateError::Unreachable {
                attr: name.to_string(),
            })
    }

    pub fn text(&self, name: &str) -> Result<String, TemplateError> {
        Ok(self.value(name)?.render())
    }

    pub fn render(&self, text: &str) -> Result<String, TemplateError> {
        Template::parse(text).render(self)
    }
}

impl Default for Scope<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Lookup for Scope<'_> {
    fn lookup(&self, name: &str) -> Result<Option<Value>, TemplateError> {
        for map in &self.maps {
            if let Some(attr) = map.get(name) {
                let depth = self.depth.get();
                if depth >= MAX_DEPTH {
                    return Err(TemplateError::Cycle { passes: MAX_DEPTH });
                }
                self.depth.set(depth + 1);
                let result = attr.eval(self);
                self.depth.set(depth);
                return result.map(Some);
            }
        }
        for fallback in &self.fallbacks {
            if let Some(value) = fallback.lookup(name)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{Attr, Deferred};

    #[test]
    fn earlier_layers_shadow_later_ones() {
        let mut own = AttrMap::new();
        own.insert("model".into(), Attr::value("arome"));
        let mut other = AttrMap::new();
        other.insert("model".into(), Attr::value("arpege"));
        other.insert("geometry".into(), Attr::value("franmg"));
        let extra = bag([("cutoff", "assim")]);

        let scope = Scope::new().layer(&own).layer(&other).fallback(&extra);
        assert_eq!(scope.text("model").ok().as_deref(), Some("arome"));
        assert_eq!(scope.text("geometry").ok().as_deref(), Some("franmg"));
        assert_eq!(scope.text("cutoff").ok().as_deref(), Some("assim"));
        assert!(matches!(
            scope.value("member"),
            Err(TemplateError::Unreachable { .. })
        ));
    }

    #[test]
    fn self_referencing_deferred_hits_the_depth_bound() {
        let mut map = AttrMap::new();
        map.insert(
            "loop".into(),
            Attr::Deferred(Deferred::template("x[loop]")),
        );
        let scope = Scope::new().layer(&map);
        assert!(matches!(
            scope.value("loop"),
            Err(TemplateError::Cycle { .. })
        ));
    }
}
