use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::attr::{Attr, AttrMap};
use crate::value::Value;

/// Facts about the running host that `only` restrictions are checked against.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Environment {
    hostname: String,
    user: String,
    facts: IndexMap<String, String>,
}

impl Environment {
    pub fn new(hostname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            user: user.into(),
            facts: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "hostname" => Some(&self.hostname),
            "user" => Some(&self.user),
            other => self.facts.get(other).map(String::as_str),
        }
    }
}

type OnlyFn = dyn Fn(&Environment) -> bool + Send + Sync;

/// Exclusivity restriction: a candidate carrying one matches only when every
/// rule holds, checked first against its own bound attributes, then against
/// the environment.
#[derive(Clone, Default)]
pub struct Only {
    rules: Vec<(String, Vec<String>)>,
    predicate: Option<Arc<OnlyFn>>,
}

impl Only {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().rule("hostname", allowed)
    }

    #[must_use]
    pub fn rule<I, S>(mut self, key: &str, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .push((key.to_string(), allowed.into_iter().map(Into::into).collect()));
        self
    }

    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Environment) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// `Err` carries the key of the first rule that failed.
    pub fn allows(&self, attrs: &AttrMap, env: &Environment) -> Result<(), String> {
        for (key, allowed) in &self.rules {
            let actual = attrs
                .get(key)
                .and_then(Attr::as_literal)
                .map(Value::render)
                .or_else(|| env.get(key).map(str::to_string));
            match actual {
                Some(actual) if allowed.iter().any(|value| *value == actual) => {}
                _ => return Err(key.clone()),
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(env) {
                return Err("predicate".to_string());
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Only {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Only")
            .field("rules", &self.rules)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
