use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{CoercionError, InvalidValue, TemplateError};
use crate::report::RejectReason;
use crate::scope::{Lookup, MAX_DEPTH};
use crate::template::Template;
use crate::value::{Date, Term, Value};

/// Attributes bound to one candidate instance.
pub type AttrMap = IndexMap<String, Attr>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Str,
    Int,
    Float,
    Bool,
    Date,
    Term,
    /// A composite value whose `kind()` equals the tag.
    Composite(String),
    Any,
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Str => f.write_str("str"),
            AttrType::Int => f.write_str("int"),
            AttrType::Float => f.write_str("float"),
            AttrType::Bool => f.write_str("bool"),
            AttrType::Date => f.write_str("date"),
            AttrType::Term => f.write_str("term"),
            AttrType::Composite(kind) => write!(f, "composite<{kind}>"),
            AttrType::Any => f.write_str("any"),
        }
    }
}

impl AttrType {
    /// Converts a raw bag value into this type.
    pub fn coerce(&self, value: Value) -> Result<Value, CoercionError> {
        let mismatch = |value: &Value| CoercionError {
            value: value.render(),
            expected: self.to_string(),
        };
        match (self, value) {
            (AttrType::Any, value) => Ok(value),
            (_, value @ Value::List(_)) => Err(mismatch(&value)),
            (AttrType::Str, Value::Str(text)) => Ok(Value::Str(text)),
            (AttrType::Str, value @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
                Ok(Value::Str(value.render()))
            }
            (AttrType::Int, Value::Int(number)) => Ok(Value::Int(number)),
            (AttrType::Int, Value::Str(text)) => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| mismatch(&Value::Str(text.clone()))),
            (AttrType::Float, Value::Float(number)) => Ok(Value::Float(number)),
            #[allow(clippy::cast_precision_loss)]
            (AttrType::Float, Value::Int(number)) => Ok(Value::Float(number as f64)),
            (AttrType::Float, Value::Str(text)) => text
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch(&Value::Str(text.clone()))),
            (AttrType::Bool, Value::Bool(flag)) => Ok(Value::Bool(flag)),
            (AttrType::Bool, Value::Int(0)) => Ok(Value::Bool(false)),
            (AttrType::Bool, Value::Int(1)) => Ok(Value::Bool(true)),
            (AttrType::Bool, Value::Str(text)) => match text.trim().to_ascii_lowercase().as_str()
            {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&Value::Str(text))),
            },
            (AttrType::Date, Value::Date(date)) => Ok(Value::Date(date)),
            (AttrType::Date, Value::Str(text)) => Date::parse(&text)
                .map(Value::Date)
                .map_err(|_| mismatch(&Value::Str(text))),
            (AttrType::Date, Value::Int(number)) => Date::parse(&number.to_string())
                .map(Value::Date)
                .map_err(|_| mismatch(&Value::Int(number))),
            (AttrType::Term, Value::Term(term)) => Ok(Value::Term(term)),
            (AttrType::Term, Value::Int(hours)) => Ok(Value::Term(Term::hours(hours))),
            (AttrType::Term, Value::Str(text)) => Term::parse(&text)
                .map(Value::Term)
                .map_err(|_| mismatch(&Value::Str(text))),
            (AttrType::Composite(kind), Value::Composite(inner)) => {
                if inner.kind() == kind.as_str() {
                    Ok(Value::Composite(inner))
                } else {
                    Err(mismatch(&Value::Composite(inner)))
                }
            }
            (_, value) => Err(mismatch(&value)),
        }
    }
}

type DeferredFn = dyn Fn(&dyn Lookup) -> Result<Value, String> + Send + Sync;

/// A value computed from sibling attributes each time it is read.
#[derive(Clone)]
pub enum Deferred {
    Template(Template),
    Func { label: String, compute: Arc<DeferredFn> },
}

impl Deferred {
    pub fn template(raw: &str) -> Self {
        Deferred::Template(Template::parse(raw))
    }

    pub fn func<F>(label: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&dyn Lookup) -> Result<Value, String> + Send + Sync + 'static,
    {
        Deferred::Func {
            label: label.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn eval(&self, scope: &dyn Lookup) -> Result<Value, TemplateError> {
        match self {
            Deferred::Template(template) => template.evaluate(scope),
            Deferred::Func { label, compute } => {
                compute(scope).map_err(|reason| TemplateError::Deferred {
                    label: label.clone(),
                    reason,
                })
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Deferred::Template(template) => template.raw().to_string(),
            Deferred::Func { label, .. } => format!("<{label}>"),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.describe()).finish()
    }
}

/// A bound attribute: either known now or evaluated on access.
#[derive(Clone, Debug)]
pub enum Attr {
    Literal(Value),
    Deferred(Deferred),
}

impl Attr {
    pub fn value(value: impl Into<Value>) -> Self {
        Attr::Literal(value.into())
    }

    pub fn eval(&self, scope: &dyn Lookup) -> Result<Value, TemplateError> {
        match self {
            Attr::Literal(value) => Ok(value.clone()),
            Attr::Deferred(deferred) => deferred.eval(scope),
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Attr::Literal(value) => Some(value),
            Attr::Deferred(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Attr::Literal(value) => value.render(),
            Attr::Deferred(deferred) => deferred.describe(),
        }
    }
}

/// Declaration of one attribute inside a specification.
#[derive(Clone, Debug)]
pub struct AttrSpec {
    info: String,
    ty: AttrType,
    optional: bool,
    default: Option<Attr>,
    values: Vec<Value>,
    outcast: Vec<Value>,
    remap: IndexMap<String, Value>,
    alias: Vec<String>,
    lazy: bool,
}

impl AttrSpec {
    pub fn of(ty: AttrType) -> Self {
        Self {
            info: String::new(),
            ty,
            optional: false,
            default: None,
            values: Vec::new(),
            outcast: Vec::new(),
            remap: IndexMap::new(),
            alias: Vec::new(),
            lazy: false,
        }
    }

    pub fn string() -> Self {
        Self::of(AttrType::Str)
    }

    pub fn int() -> Self {
        Self::of(AttrType::Int)
    }

    pub fn float() -> Self {
        Self::of(AttrType::Float)
    }

    pub fn boolean() -> Self {
        Self::of(AttrType::Bool)
    }

    pub fn date() -> Self {
        Self::of(AttrType::Date)
    }

    pub fn term() -> Self {
        Self::of(AttrType::Term)
    }

    pub fn composite(kind: impl Into<String>) -> Self {
        Self::of(AttrType::Composite(kind.into()))
    }

    pub fn any() -> Self {
        Self::of(AttrType::Any)
    }

    /// A path-like string whose back-references are rendered on every read
    /// instead of at match time.
    pub fn template() -> Self {
        Self {
            lazy: true,
            ..Self::of(AttrType::Str)
        }
    }

    #[must_use]
    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets a default; only optional attributes take defaults.
    #[must_use]
    pub fn defaults_to(mut self, value: impl Into<Value>) -> Self {
        self.optional = true;
        self.default = Some(Attr::Literal(value.into()));
        self
    }

    #[must_use]
    pub fn deferred_default(mut self, deferred: Deferred) -> Self {
        self.optional = true;
        self.default = Some(Attr::Deferred(deferred));
        self
    }

    #[must_use]
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn outcast<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.outcast = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn remap(mut self, from: &str, to: impl Into<Value>) -> Self {
        self.remap.insert(from.to_string(), to.into());
        self
    }

    #[must_use]
    pub fn alias(mut self, name: &str) -> Self {
        self.alias.push(name.to_string());
        self
    }

    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn describe(&self) -> &str {
        &self.info
    }

    pub fn ty(&self) -> &AttrType {
        &self.ty
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn default_attr(&self) -> Option<&Attr> {
        self.default.as_ref()
    }

    pub fn allowed(&self) -> &[Value] {
        &self.values
    }

    pub fn outcast_values(&self) -> &[Value] {
        &self.outcast
    }

    pub fn aliases(&self) -> &[String] {
        &self.alias
    }

    pub(crate) fn without_default(mut self) -> Self {
        self.default = None;
        self.optional = false;
        self
    }

    /// The bag entry bound by this attribute, looked up by name then aliases.
    pub fn find_in<'b>(&self, name: &str, bag: &'b crate::Bag) -> Option<(&'b str, &'b Value)> {
        std::iter::once(name)
            .chain(self.alias.iter().map(String::as_str))
            .find_map(|key| bag.get_key_value(key))
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn answers_to(&self, name: &str, key: &str) -> bool {
        name == key || self.alias.iter().any(|alias| alias == key)
    }

    /// Follows the remap table to a fixed point; `None` when it cycles.
    pub(crate) fn remap_value(&self, mut value: Value) -> Option<Value> {
        for _ in 0..MAX_DEPTH {
            match self.remap.get(&value.render()) {
                Some(next) if *next != value => value = next.clone(),
                _ => return Some(value),
            }
        }
        None
    }

    /// Remaps, coerces and checks `value` against the allowed and outcast
    /// sets.
    pub fn check(&self, value: Value) -> Result<Value, InvalidValue> {
        let invalid = |reason, detail| InvalidValue { reason, detail };
        let value = self
            .remap_value(value)
            .ok_or_else(|| invalid(RejectReason::Cyclic, "remap table loops".to_string()))?;
        let value = self
            .ty
            .coerce(value)
            .map_err(|err| invalid(RejectReason::WrongType, err.to_string()))?;
        if !self.values.is_empty() && !Self::admits(&self.values, &self.ty, &value) {
            return Err(invalid(
                RejectReason::NotInValues,
                format!("'{}' is not an allowed value", value.render()),
            ));
        }
        if Self::admits(&self.outcast, &self.ty, &value) {
            return Err(invalid(
                RejectReason::Outcast,
                format!("'{}' is explicitly excluded", value.render()),
            ));
        }
        Ok(value)
    }

    pub(crate) fn admits(list: &[Value], ty: &AttrType, value: &Value) -> bool {
        list.iter().any(|candidate| {
            candidate == value
                || ty
                    .coerce(candidate.clone())
                    .is_ok_and(|coerced| &coerced == value)
        })
    }

    pub(crate) fn fingerprint(&self) -> String {
        let render = |values: &[Value]| {
            values
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{}|{}|{}|{}|{}",
            self.ty,
            self.optional,
            render(&self.values),
            render(&self.outcast),
            self.alias.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_applies_remap_values_and_outcast() {
        let cutoff = AttrSpec::string()
            .values(["assim", "production"])
            .remap("p", "production");
        assert_eq!(cutoff.check(Value::str("p")), Ok(Value::str("production")));
        let refused = cutoff.check(Value::str("x")).err();
        assert_eq!(
            refused.as_ref().map(|err| err.reason),
            Some(RejectReason::NotInValues)
        );
        assert_eq!(refused.map(|err| err.code()), Some("QY205"));

        let tube = AttrSpec::string().outcast(["gopher"]);
        assert_eq!(
            tube.check(Value::str("gopher")).map_err(|err| err.reason),
            Err(RejectReason::Outcast)
        );
        let term = AttrSpec::of(AttrType::Term);
        assert_eq!(
            term.check(Value::str("soon")).map_err(|err| err.code()),
            Err("QY204")
        );
    }

    #[test]
    fn strings_coerce_into_typed_values() {
        assert_eq!(AttrType::Int.coerce(Value::str(" 42 ")), Ok(Value::Int(42)));
        assert_eq!(AttrType::Bool.coerce(Value::str("Yes")), Ok(Value::Bool(true)));
        assert_eq!(
            AttrType::Term.coerce(Value::Int(6)),
            Ok(Value::Term(Term::hours(6)))
        );
        assert!(matches!(
            AttrType::Date.coerce(Value::str("2024010112")),
            Ok(Value::Date(_))
        ));
        assert!(AttrType::Int.coerce(Value::str("six")).is_err());
        assert!(AttrType::Str.coerce(Value::from(vec!["a", "b"])).is_err());
    }

    #[test]
    fn remap_follows_chains_and_detects_loops() {
        let spec = AttrSpec::string().remap("a", "assim").remap("p", "production");
        assert_eq!(spec.remap_value(Value::str("a")), Some(Value::str("assim")));
        assert_eq!(spec.remap_value(Value::str("x")), Some(Value::str("x")));

        let looping = AttrSpec::string().remap("x", "y").remap("y", "x");
        assert_eq!(looping.remap_value(Value::str("x")), None);
    }

    #[test]
    fn aliases_bind_bag_keys() {
        let spec = AttrSpec::string().alias("local").alias("file");
        let bag = crate::bag([("local", "out.grb")]);
        assert_eq!(
            spec.find_in("filename", &bag),
            Some(("local", &Value::str("out.grb")))
        );
        assert!(spec.answers_to("filename", "file"));
    }

    #[test]
    fn admits_compares_after_coercion() {
        let values = vec![Value::str("6"), Value::str("12")];
        assert!(AttrSpec::admits(&values, &AttrType::Int, &Value::Int(12)));
        assert!(!AttrSpec::admits(&values, &AttrType::Int, &Value::Int(3)));
    }
}
