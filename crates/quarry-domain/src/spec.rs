use indexmap::IndexMap;
use serde::Serialize;

use crate::attr::AttrSpec;
use crate::only::Only;
use crate::value::Value;

pub const DEFAULT_PRIORITY: &str = "toolbox";

/// Whether a specification tolerates bag attributes it does not declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Openness {
    #[default]
    Open,
    Strict,
}

/// Declarative schema of the attributes a candidate accepts.
#[derive(Clone, Debug, Default)]
pub struct Specification {
    info: String,
    attrs: IndexMap<String, AttrSpec>,
    openness: Option<Openness>,
    priority: Option<String>,
    only: Option<Only>,
}

impl Specification {
    pub fn builder(info: impl Into<String>) -> SpecificationBuilder {
        SpecificationBuilder {
            spec: Specification {
                info: info.into(),
                ..Specification::default()
            },
        }
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn openness(&self) -> Openness {
        self.openness.unwrap_or_default()
    }

    pub fn priority(&self) -> &str {
        self.priority.as_deref().unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn only(&self) -> Option<&Only> {
        self.only.as_ref()
    }

    pub fn attr(&self, name: &str) -> Option<&AttrSpec> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &AttrSpec)> {
        self.attrs.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn mandatory(&self) -> Vec<&str> {
        self.attrs()
            .filter(|(_, spec)| !spec.is_optional())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn optional(&self) -> Vec<&str> {
        self.attrs()
            .filter(|(_, spec)| spec.is_optional())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn authorized_values(&self, name: &str) -> Option<&[Value]> {
        self.attrs
            .get(name)
            .map(AttrSpec::allowed)
            .filter(|values| !values.is_empty())
    }

    /// Name of the attribute that consumes bag key `key`, aliases included.
    pub fn tracks(&self, key: &str) -> Option<&str> {
        self.attrs()
            .find(|(name, spec)| spec.answers_to(name, key))
            .map(|(name, _)| name)
    }

    /// Concatenates specifications; later attributes replace earlier ones in place.
    pub fn compose(parts: &[&Specification]) -> Specification {
        let mut out = Specification::default();
        for part in parts {
            if !part.info.is_empty() {
                out.info.clone_from(&part.info);
            }
            for (name, spec) in &part.attrs {
                out.attrs.insert(name.clone(), spec.clone());
            }
            if part.openness.is_some() {
                out.openness = part.openness;
            }
            if part.priority.is_some() {
                out.priority.clone_from(&part.priority);
            }
            if part.only.is_some() {
                out.only.clone_from(&part.only);
            }
        }
        out
    }

    /// Copy in which the named attributes lose their inherited default and
    /// become mandatory.
    #[must_use]
    pub fn nodefault(&self, names: &[&str]) -> Specification {
        let mut out = self.clone();
        for name in names {
            if let Some(spec) = out.attrs.get_mut(*name) {
                *spec = spec.clone().without_default();
            }
        }
        out
    }

    /// Canonical text used to detect two candidates declaring the same schema.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = self
            .attrs
            .iter()
            .map(|(name, spec)| format!("{name}:{}", spec.fingerprint()))
            .collect();
        parts.sort();
        format!(
            "{:?};{};{}",
            self.openness(),
            self.priority(),
            parts.join(";")
        )
    }
}

pub struct SpecificationBuilder {
    spec: Specification,
}

impl SpecificationBuilder {
    #[must_use]
    pub fn attr(mut self, name: &str, spec: AttrSpec) -> Self {
        self.spec.attrs.insert(name.to_string(), spec);
        self
    }

    #[must_use]
    pub fn priority(mut self, level: &str) -> Self {
        self.spec.priority = Some(level.to_string());
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.spec.openness = Some(Openness::Strict);
        self
    }

    #[must_use]
    pub fn open(mut self) -> Self {
        self.spec.openness = Some(Openness::Open);
        self
    }

    #[must_use]
    pub fn only(mut self, only: Only) -> Self {
        self.spec.only = Some(only);
        self
    }

    pub fn build(self) -> Specification {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrSpec;

    fn base() -> Specification {
        Specification::builder("generic artifact")
            .attr("kind", AttrSpec::string())
            .attr("model", AttrSpec::string().defaults_to("arpege"))
            .attr("filename", AttrSpec::string().alias("local"))
            .build()
    }

    #[test]
    fn introspection_lists_mandatory_and_optional() {
        let spec = base();
        assert_eq!(spec.mandatory(), vec!["kind", "filename"]);
        assert_eq!(spec.optional(), vec!["model"]);
        assert_eq!(spec.tracks("local"), Some("filename"));
        assert_eq!(spec.tracks("geometry"), None);
        assert_eq!(spec.priority(), DEFAULT_PRIORITY);
        assert_eq!(spec.openness(), Openness::Open);
    }

    #[test]
    fn compose_overrides_in_place() {
        let extra = Specification::builder("")
            .attr("model", AttrSpec::string().values(["arome"]))
            .attr("term", AttrSpec::term())
            .priority("oper")
            .build();
        let spec = Specification::compose(&[&base(), &extra]);
        let names: Vec<&str> = spec.attrs().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["kind", "model", "filename", "term"]);
        assert_eq!(spec.info(), "generic artifact");
        assert_eq!(spec.priority(), "oper");
        assert_eq!(
            spec.authorized_values("model"),
            Some(&[Value::str("arome")][..])
        );
    }

    #[test]
    fn nodefault_makes_attributes_mandatory() {
        let spec = base().nodefault(&["model"]);
        assert_eq!(spec.mandatory(), vec!["kind", "model", "filename"]);
        assert!(spec.attr("model").and_then(AttrSpec::default_attr).is_none());
    }

    #[test]
    fn fingerprint_ignores_declaration_order() {
        let a = Specification::builder("a")
            .attr("kind", AttrSpec::string())
            .attr("date", AttrSpec::date())
            .build();
        let b = Specification::builder("b")
            .attr("date", AttrSpec::date())
            .attr("kind", AttrSpec::string())
            .build();
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = Specification::builder("c")
            .attr("kind", AttrSpec::string())
            .attr("date", AttrSpec::date())
            .priority("oper")
            .build();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
