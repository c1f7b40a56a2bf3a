use thiserror::Error;

use crate::diagnostics;
use crate::report::{RejectReason, ResolutionReport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("[QY201] back-reference to unknown attribute '{attr}'")]
    Unreachable { attr: String },
    #[error("[QY202] sub-attribute '{attr}::{sub}' could not be evaluated: {reason}")]
    Helper {
        attr: String,
        sub: String,
        reason: String,
    },
    #[error("[QY202] deferred value '{label}' could not be evaluated: {reason}")]
    Deferred { label: String, reason: String },
    #[error("[QY203] back-references did not settle after {passes} passes")]
    Cycle { passes: usize },
}

impl TemplateError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            TemplateError::Unreachable { .. } => diagnostics::template::UNREACHABLE,
            TemplateError::Helper { .. } | TemplateError::Deferred { .. } => {
                diagnostics::template::HELPER
            }
            TemplateError::Cycle { .. } => diagnostics::template::CYCLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[QY204] cannot read '{value}' as {expected}")]
pub struct CoercionError {
    pub value: String,
    pub expected: String,
}

/// A value the attribute's specification refuses after coercion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[QY205] {detail}")]
pub struct InvalidValue {
    pub reason: RejectReason,
    pub detail: String,
}

impl InvalidValue {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self.reason {
            RejectReason::WrongType => diagnostics::template::COERCION,
            _ => diagnostics::template::INVALID_VALUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("[QY401] collector '{collector}' already holds a candidate named '{name}'")]
    DuplicateName { collector: String, name: String },
    #[error(
        "[QY402] candidate '{name}' declares the same specification as '{existing}' in collector '{collector}'"
    )]
    DuplicateSpecification {
        collector: String,
        name: String,
        existing: String,
    },
    #[error("[QY403] no plugin named '{0}' is known")]
    UnknownPlugin(String),
    #[error("[QY404] unknown collector '{0}'")]
    UnknownCollector(String),
    #[error("[QY405] plugin '{name}' failed to register: {reason}")]
    PluginFailed { name: String, reason: String },
}

impl RegistryError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::DuplicateName { .. } => diagnostics::registry::DUPLICATE_NAME,
            RegistryError::DuplicateSpecification { .. } => diagnostics::registry::DUPLICATE_SPEC,
            RegistryError::UnknownPlugin(_) => diagnostics::registry::UNKNOWN_PLUGIN,
            RegistryError::UnknownCollector(_) => diagnostics::registry::UNKNOWN_COLLECTOR,
            RegistryError::PluginFailed { .. } => diagnostics::registry::PLUGIN_FAILED,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("[QY101] no {collector} candidate matches the description")]
    NoCandidate {
        collector: String,
        report: Box<ResolutionReport>,
    },
    #[error("[QY102] ambiguous {collector} match between {}", .candidates.join(", "))]
    Ambiguous {
        collector: String,
        candidates: Vec<String>,
        report: Box<ResolutionReport>,
    },
}

impl ResolutionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ResolutionError::NoCandidate { .. } => diagnostics::resolution::NO_CANDIDATE,
            ResolutionError::Ambiguous { .. } => diagnostics::resolution::AMBIGUOUS,
        }
    }

    /// Per-candidate rejection report gathered while matching.
    #[must_use]
    pub fn report(&self) -> &ResolutionReport {
        match self {
            ResolutionError::NoCandidate { report, .. }
            | ResolutionError::Ambiguous { report, .. } => report,
        }
    }
}
