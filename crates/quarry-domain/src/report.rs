use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Missing,
    WrongType,
    NotInValues,
    Outcast,
    Unreachable,
    Unexpected,
    Restricted,
    Cyclic,
    BuildFailed,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Missing => "missing",
            RejectReason::WrongType => "wrong type",
            RejectReason::NotInValues => "not in values",
            RejectReason::Outcast => "is outcast",
            RejectReason::Unreachable => "unreachable back-reference",
            RejectReason::Unexpected => "unexpected attribute",
            RejectReason::Restricted => "only-restriction",
            RejectReason::Cyclic => "does not settle",
            RejectReason::BuildFailed => "construction failed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one candidate was dropped: the first attribute that failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub candidate: String,
    pub attribute: Option<String>,
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejection {
    pub fn new(
        candidate: &str,
        attribute: Option<&str>,
        reason: RejectReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            candidate: candidate.to_string(),
            attribute: attribute.map(str::to_string),
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attribute) => write!(
                f,
                "{}: {} {} ({})",
                self.candidate, attribute, self.reason, self.detail
            ),
            None => write!(f, "{}: {} ({})", self.candidate, self.reason, self.detail),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    pub candidate: String,
    pub priority: String,
    pub defaulted: usize,
}

/// Outcome of matching one bag against one collector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub collector: String,
    pub selected: Option<String>,
    pub ranked: Vec<RankedEntry>,
    pub rejections: Vec<Rejection>,
}

impl ResolutionReport {
    pub fn new(collector: &str) -> Self {
        Self {
            collector: collector.to_string(),
            ..Self::default()
        }
    }

    pub fn rejection_for(&self, candidate: &str) -> Option<&Rejection> {
        self.rejections
            .iter()
            .find(|rejection| rejection.candidate == candidate)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{}: {}",
            self.collector,
            self.selected.as_deref().unwrap_or("<none>")
        )];
        for entry in &self.ranked {
            lines.push(format!(
                "  + {} (priority {}, {} defaulted)",
                entry.candidate, entry.priority, entry.defaulted
            ));
        }
        for rejection in &self.rejections {
            lines.push(format!("  - {rejection}"));
        }
        lines.join("\n")
    }
}
