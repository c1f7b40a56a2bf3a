use std::cmp::Reverse;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::attr::{Attr, AttrMap, Deferred};
use crate::collector::{Candidate, Collector};
use crate::error::ResolutionError;
use crate::only::Environment;
use crate::priority::PriorityTable;
use crate::report::{RankedEntry, RejectReason, Rejection, ResolutionReport};
use crate::scope::{Bag, Lookup, Scope, MAX_DEPTH};
use crate::spec::{Openness, Specification};
use crate::template::Template;
use crate::value::Value;

/// What to do when several candidates tie on closeness and priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AmbiguityPolicy {
    /// Keep the earliest registered candidate and log the tie.
    #[default]
    FirstDeclared,
    Reject,
}

/// Attributes of a bag bound to one specification.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub attrs: AttrMap,
    /// Attributes that took their declared default.
    pub defaulted: usize,
    /// Bag keys this specification consumed.
    pub consumed: Vec<String>,
}

/// The instantiated winner of a collector.
pub struct Picked<T: ?Sized> {
    pub name: String,
    pub spec: Arc<Specification>,
    pub attrs: AttrMap,
    pub consumed: Vec<String>,
    pub instance: Box<T>,
}

pub struct Matcher<'a> {
    priorities: &'a PriorityTable,
    env: &'a Environment,
    strict: bool,
    ambiguity: AmbiguityPolicy,
}

impl<'a> Matcher<'a> {
    pub fn new(priorities: &'a PriorityTable, env: &'a Environment) -> Self {
        Self {
            priorities,
            env,
            strict: true,
            ambiguity: AmbiguityPolicy::default(),
        }
    }

    /// With `strict` off, strict specifications also tolerate extra attributes.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity = policy;
        self
    }

    /// Binds `bag` to `spec`. `extras` supplies values for attributes the bag
    /// lacks and targets for back-references.
    pub fn resolve(
        &self,
        candidate: &str,
        spec: &Specification,
        bag: &Bag,
        extras: &dyn Lookup,
    ) -> Result<Resolved, Rejection> {
        let reject = |attribute: &str, reason: RejectReason, detail: String| {
            Rejection::new(candidate, Some(attribute), reason, detail)
        };

        let mut attrs = AttrMap::new();
        let mut consumed = Vec::new();
        let mut defaulted = 0;
        for (name, aspec) in spec.attrs() {
            let supplied = aspec
                .find_in(name, bag)
                .filter(|(_, value)| !is_none_marker(value));
            if let Some((key, value)) = supplied {
                consumed.push(key.to_string());
                attrs.insert(name.to_string(), Attr::Literal(value.clone()));
                continue;
            }
            if let Some(default) = aspec.default_attr() {
                defaulted += 1;
                attrs.insert(name.to_string(), default.clone());
                continue;
            }
            match extras.lookup(name) {
                Ok(Some(value)) => {
                    attrs.insert(name.to_string(), Attr::Literal(value));
                }
                Ok(None) if aspec.is_optional() => {}
                Ok(None) => {
                    return Err(reject(name, RejectReason::Missing, "not supplied".into()));
                }
                Err(err) => return Err(reject(name, RejectReason::Unreachable, err.to_string())),
            }
        }

        if self.strict && spec.openness() == Openness::Strict {
            if let Some(key) = bag.keys().find(|key| spec.tracks(key).is_none()) {
                return Err(reject(
                    key,
                    RejectReason::Unexpected,
                    "not declared by a strict specification".into(),
                ));
            }
        }

        for (name, aspec) in spec.attrs() {
            if !aspec.is_lazy() {
                continue;
            }
            let raw = match attrs.get(name) {
                Some(Attr::Literal(Value::Str(raw))) => raw.clone(),
                _ => continue,
            };
            attrs.insert(
                name.to_string(),
                Attr::Deferred(Deferred::template(&raw)),
            );
        }

        substitute(&mut attrs, bag, extras).map_err(|(name, reason, detail)| {
            Rejection::new(candidate, Some(&name), reason, detail)
        })?;

        for (name, aspec) in spec.attrs() {
            let Some(Attr::Literal(value)) = attrs.get(name) else {
                continue;
            };
            let value = aspec
                .check(value.clone())
                .map_err(|err| reject(name, err.reason, err.detail))?;
            attrs.insert(name.to_string(), Attr::Literal(value));
        }

        if let Some(only) = spec.only() {
            if let Err(key) = only.allows(&attrs, self.env) {
                return Err(reject(
                    &key,
                    RejectReason::Restricted,
                    "excluded on this host".into(),
                ));
            }
        }

        Ok(Resolved {
            attrs,
            defaulted,
            consumed,
        })
    }

    /// Resolves every candidate of `collector` and orders the survivors:
    /// fewer defaulted attributes first, then higher priority, then
    /// declaration order.
    pub fn rank<'c, T: ?Sized, C: ?Sized>(
        &self,
        collector: &'c Collector<T, C>,
        bag: &Bag,
        extras: &dyn Lookup,
    ) -> (Vec<(&'c Candidate<T, C>, Resolved)>, ResolutionReport) {
        let mut report = ResolutionReport::new(collector.tag());
        let mut survivors = Vec::new();
        for (idx, candidate) in collector.candidates().iter().enumerate() {
            match self.resolve(candidate.name(), candidate.spec(), bag, extras) {
                Ok(resolved) => {
                    let priority = self.priority_of(candidate.spec());
                    survivors.push((idx, priority, candidate, resolved));
                }
                Err(rejection) => {
                    debug!(
                        collector = collector.tag(),
                        candidate = candidate.name(),
                        attribute = rejection.attribute.as_deref().unwrap_or("-"),
                        reason = %rejection.reason,
                        "candidate rejected"
                    );
                    report.rejections.push(rejection);
                }
            }
        }
        survivors.sort_by_key(|(idx, priority, _, resolved)| {
            (resolved.defaulted, Reverse(*priority), *idx)
        });
        report.ranked = survivors
            .iter()
            .map(|(_, _, candidate, resolved)| RankedEntry {
                candidate: candidate.name().to_string(),
                priority: candidate.spec().priority().to_string(),
                defaulted: resolved.defaulted,
            })
            .collect();
        let ranked = survivors
            .into_iter()
            .map(|(_, _, candidate, resolved)| (candidate, resolved))
            .collect();
        (ranked, report)
    }

    /// Best candidate or `None`; never fails on an empty match.
    pub fn probe<T: ?Sized, C: ?Sized>(
        &self,
        collector: &Collector<T, C>,
        bag: &Bag,
        extras: &dyn Lookup,
        ctx: &C,
    ) -> Result<(Option<Picked<T>>, ResolutionReport), ResolutionError> {
        let (ranked, mut report) = self.rank(collector, bag, extras);
        self.check_ambiguity(&ranked, &report)?;
        for (candidate, resolved) in ranked {
            match candidate.build(&resolved.attrs, ctx) {
                Ok(instance) => {
                    report.selected = Some(candidate.name().to_string());
                    debug!(
                        collector = collector.tag(),
                        candidate = candidate.name(),
                        "candidate selected"
                    );
                    let picked = Picked {
                        name: candidate.name().to_string(),
                        spec: candidate.shared_spec(),
                        attrs: resolved.attrs,
                        consumed: resolved.consumed,
                        instance,
                    };
                    return Ok((Some(picked), report));
                }
                Err(reason) => {
                    warn!(
                        collector = collector.tag(),
                        candidate = candidate.name(),
                        %reason,
                        "candidate matched but could not be built"
                    );
                    report.rejections.push(Rejection::new(
                        candidate.name(),
                        None,
                        RejectReason::BuildFailed,
                        reason,
                    ));
                }
            }
        }
        Ok((None, report))
    }

    /// Best candidate; an empty match is a resolution failure.
    pub fn pick<T: ?Sized, C: ?Sized>(
        &self,
        collector: &Collector<T, C>,
        bag: &Bag,
        extras: &dyn Lookup,
        ctx: &C,
    ) -> Result<(Picked<T>, ResolutionReport), ResolutionError> {
        match self.probe(collector, bag, extras, ctx)? {
            (Some(picked), report) => Ok((picked, report)),
            (None, report) => Err(ResolutionError::NoCandidate {
                collector: collector.tag().to_string(),
                report: Box::new(report),
            }),
        }
    }

    fn priority_of(&self, spec: &Specification) -> usize {
        self.priorities.value(spec.priority()).unwrap_or(0)
    }

    fn check_ambiguity<T: ?Sized, C: ?Sized>(
        &self,
        ranked: &[(&Candidate<T, C>, Resolved)],
        report: &ResolutionReport,
    ) -> Result<(), ResolutionError> {
        let [(first, first_resolved), rest @ ..] = ranked else {
            return Ok(());
        };
        let key = |candidate: &Candidate<T, C>, resolved: &Resolved| {
            (resolved.defaulted, self.priority_of(candidate.spec()))
        };
        let head = key(*first, first_resolved);
        let tied: Vec<String> = std::iter::once(first.name().to_string())
            .chain(
                rest.iter()
                    .take_while(|entry| key(entry.0, &entry.1) == head)
                    .map(|entry| entry.0.name().to_string()),
            )
            .collect();
        if tied.len() < 2 {
            return Ok(());
        }
        match self.ambiguity {
            AmbiguityPolicy::FirstDeclared => {
                warn!(
                    collector = %report.collector,
                    candidates = ?tied,
                    "several candidates match equally well, keeping the first declared"
                );
                Ok(())
            }
            AmbiguityPolicy::Reject => Err(ResolutionError::Ambiguous {
                collector: report.collector.clone(),
                candidates: tied,
                report: Box::new(report.clone()),
            }),
        }
    }
}

fn is_none_marker(value: &Value) -> bool {
    matches!(value, Value::Str(text) if text == "None")
}

fn is_template(attr: &Attr) -> bool {
    matches!(attr, Attr::Literal(Value::Str(text)) if crate::template::has_refs(text))
}

type Failure = (String, RejectReason, String);

/// Replaces back-references in literal string attributes until nothing changes.
/// A reference waits while its target still holds unresolved references.
fn substitute(attrs: &mut AttrMap, bag: &Bag, extras: &dyn Lookup) -> Result<(), Failure> {
    let mut pending: Vec<String> = attrs
        .iter()
        .filter(|(_, attr)| is_template(attr))
        .map(|(name, _)| name.clone())
        .collect();
    let mut passes = 0;
    while !pending.is_empty() {
        passes += 1;
        if passes > MAX_DEPTH {
            return Err((
                pending[0].clone(),
                RejectReason::Cyclic,
                format!("still unresolved after {MAX_DEPTH} passes"),
            ));
        }
        let mut settled = Vec::new();
        {
            let scope = Scope::new().layer(attrs).fallback(bag).fallback(extras);
            for name in &pending {
                let Some(Attr::Literal(Value::Str(raw))) = attrs.get(name) else {
                    continue;
                };
                let template = Template::parse(raw);
                if template.refs().any(|reference| pending.contains(&reference.attr)) {
                    continue;
                }
                match template.evaluate(&scope) {
                    Ok(value) => settled.push((name.clone(), value)),
                    Err(err) => {
                        return Err((name.clone(), RejectReason::Unreachable, err.to_string()))
                    }
                }
            }
        }
        if settled.is_empty() {
            return Err((
                pending[0].clone(),
                RejectReason::Cyclic,
                "back-references depend on each other".into(),
            ));
        }
        for (name, value) in settled {
            let attr = Attr::Literal(value);
            if !is_template(&attr) {
                pending.retain(|other| *other != name);
            }
            attrs.insert(name, attr);
        }
    }
    Ok(())
}
