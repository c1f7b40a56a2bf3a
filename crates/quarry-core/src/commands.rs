use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use quarry_domain::{Bag, ResolutionError, Value};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::config::Config;
use crate::handler::{Handler, HandlerError};
use crate::outcome::ExecutionOutcome;
use crate::registry::CollectorKind;
use crate::session::{Session, SessionError};
use crate::store::{CacheStore, Outcome, StoreError, StoreOptions, TierReport};
use crate::transport::{Intent, SystemTransport};

#[derive(Debug, Clone)]
pub enum QuarryCommand {
    Locate(Bag),
    Get { attrs: Bag, intent: Intent },
    Put(Bag),
    Check(Bag),
    Delete(Bag),
    Explain(Bag),
    Candidates(Option<CollectorKind>),
    CachePath,
    CacheGc { max_age: Option<Duration> },
}

impl QuarryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            QuarryCommand::Locate(_) => "locate",
            QuarryCommand::Get { .. } => "get",
            QuarryCommand::Put(_) => "put",
            QuarryCommand::Check(_) => "check",
            QuarryCommand::Delete(_) => "delete",
            QuarryCommand::Explain(_) => "explain",
            QuarryCommand::Candidates(_) => "candidates",
            QuarryCommand::CachePath => "cache path",
            QuarryCommand::CacheGc { .. } => "cache gc",
        }
    }
}

/// Parses one `key=value` assignment; `a,b` becomes a multi-valued entry.
pub fn parse_assignment(text: &str) -> Result<(String, Value), String> {
    let (key, raw) = text
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{text}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute name in '{text}'"));
    }
    let value = if raw.contains(',') {
        Value::List(raw.split(',').map(|part| Value::str(part.trim())).collect())
    } else {
        Value::str(raw)
    };
    Ok((key.to_string(), value))
}

/// Runs `command` against a session over the process configuration.
pub fn execute(command: &QuarryCommand) -> Result<ExecutionOutcome> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            return Ok(ExecutionOutcome::failure(
                format!("{err:#}"),
                json!({ "reason": "invalid_config" }),
            ))
        }
    };
    let mut session = Session::with_builtins(config);
    execute_in(&mut session, command)
}

pub fn execute_in(session: &mut Session, command: &QuarryCommand) -> Result<ExecutionOutcome> {
    debug!(command = command.name(), "executing");
    let outcome = match command {
        QuarryCommand::Locate(attrs) => locate(session, attrs),
        QuarryCommand::Get { attrs, intent } => get(session, attrs, *intent),
        QuarryCommand::Put(attrs) => put(session, attrs),
        QuarryCommand::Check(attrs) => check(session, attrs),
        QuarryCommand::Delete(attrs) => delete(session, attrs),
        QuarryCommand::Explain(attrs) => explain(session, attrs),
        QuarryCommand::Candidates(kind) => return candidates(session, *kind),
        QuarryCommand::CachePath => return Ok(cache_path(session.config())),
        QuarryCommand::CacheGc { max_age } => return cache_gc(session.config(), *max_age),
    };
    Ok(outcome.unwrap_or_else(|err| session_error_outcome(&err)))
}

fn locate(session: &mut Session, attrs: &Bag) -> Result<ExecutionOutcome, SessionError> {
    let mut entries = Vec::new();
    for handler in session.load(std::slice::from_ref(attrs))? {
        entries.push(json!({
            "location": handler.location()?.to_string(),
            "physical": handler.locate()?,
        }));
    }
    let message = entries
        .iter()
        .filter_map(|entry| entry["physical"].as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExecutionOutcome::success(
        message,
        json!({ "handlers": entries }),
    ))
}

fn handler_details(handler: &Handler) -> JsonValue {
    json!({
        "location": handler.location().map(|location| location.to_string()).ok(),
        "local": handler.local_path().map(|path| path.display().to_string()).ok(),
        "history": handler.history(),
    })
}

fn get(session: &mut Session, attrs: &Bag, intent: Intent) -> Result<ExecutionOutcome, SessionError> {
    let options = StoreOptions::with_intent(intent);
    let mut entries = Vec::new();
    let mut missing = Vec::new();
    for retrieval in session.get(std::slice::from_ref(attrs), &options)? {
        let mut details = handler_details(&retrieval.handler);
        match retrieval.result? {
            Outcome::Done(()) => details["status"] = json!("done"),
            Outcome::NotFound(reason) | Outcome::Transient(reason) => {
                details["status"] = json!("missing");
                details["reason"] = json!(reason.clone());
                missing.push(reason);
            }
        }
        entries.push(details);
    }
    let details = json!({ "handlers": entries });
    if missing.is_empty() {
        Ok(ExecutionOutcome::success(
            format!("retrieved {} artifact(s)", entries_len(&details)),
            details,
        ))
    } else {
        Ok(ExecutionOutcome::user_error(
            format!("{} artifact(s) not retrieved: {}", missing.len(), missing.join("; ")),
            details,
        ))
    }
}

fn entries_len(details: &JsonValue) -> usize {
    details["handlers"].as_array().map_or(0, Vec::len)
}

fn report_outcome(action: &str, reports: Vec<(JsonValue, TierReport)>) -> ExecutionOutcome {
    let ok = reports.iter().all(|(_, report)| report.any_done());
    let entries: Vec<JsonValue> = reports
        .into_iter()
        .map(|(mut details, report)| {
            details["tiers"] = json!(report.tiers);
            details
        })
        .collect();
    let count = entries.len();
    let details = json!({ "handlers": entries });
    if ok {
        ExecutionOutcome::success(format!("{action}: {count} artifact(s)"), details)
    } else {
        ExecutionOutcome::user_error(format!("{action} did not reach any store"), details)
    }
}

fn put(session: &mut Session, attrs: &Bag) -> Result<ExecutionOutcome, SessionError> {
    let mut reports = Vec::new();
    for retrieval in session.put(std::slice::from_ref(attrs), &StoreOptions::default())? {
        let report = retrieval.result?;
        reports.push((handler_details(&retrieval.handler), report));
    }
    Ok(report_outcome("put", reports))
}

fn delete(session: &mut Session, attrs: &Bag) -> Result<ExecutionOutcome, SessionError> {
    let mut reports = Vec::new();
    for mut handler in session.load(std::slice::from_ref(attrs))? {
        let report = handler.delete()?;
        reports.push((handler_details(&handler), report));
    }
    Ok(report_outcome("delete", reports))
}

fn check(session: &mut Session, attrs: &Bag) -> Result<ExecutionOutcome, SessionError> {
    let mut entries = Vec::new();
    let mut present = true;
    for mut handler in session.load(std::slice::from_ref(attrs))? {
        let outcome = handler.check()?;
        let mut details = handler_details(&handler);
        match outcome {
            Outcome::Done(size) => details["size"] = json!(size),
            Outcome::NotFound(reason) | Outcome::Transient(reason) => {
                present = false;
                details["reason"] = json!(reason);
            }
        }
        entries.push(details);
    }
    let details = json!({ "handlers": entries });
    Ok(if present {
        ExecutionOutcome::success("present", details)
    } else {
        ExecutionOutcome::user_error("not present", details)
    })
}

fn explain(session: &mut Session, attrs: &Bag) -> Result<ExecutionOutcome, SessionError> {
    let reports = session.explain(attrs)?;
    let message = reports
        .iter()
        .map(quarry_domain::ResolutionReport::summary)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExecutionOutcome::success(message, json!({ "reports": reports })))
}

fn candidates(session: &mut Session, kind: Option<CollectorKind>) -> Result<ExecutionOutcome> {
    session.registry_mut().load_pending()?;
    let kinds: Vec<CollectorKind> = kind.map_or_else(|| CollectorKind::ALL.to_vec(), |k| vec![k]);
    let mut listing = serde_json::Map::new();
    let mut lines = Vec::new();
    for kind in kinds {
        let infos = session.registry().candidates(kind);
        for info in &infos {
            lines.push(format!("{kind}: {} [{}] {}", info.name, info.priority, info.info));
        }
        listing.insert(kind.to_string(), json!(infos));
    }
    Ok(ExecutionOutcome::success(
        lines.join("\n"),
        JsonValue::Object(listing),
    ))
}

fn cache_path(config: &Config) -> ExecutionOutcome {
    let location = &config.cache().location;
    ExecutionOutcome::success(
        location.path.display().to_string(),
        json!({
            "path": location.path.display().to_string(),
            "source": location.source,
        }),
    )
}

fn cache_gc(config: &Config, max_age: Option<Duration>) -> Result<ExecutionOutcome> {
    let cache = config.cache();
    let store = CacheStore::new(
        "cache",
        crate::catalog::CACHE_NETLOC,
        cache.location.path.clone(),
        Arc::new(SystemTransport::new()),
    );
    let report = store.gc(max_age.unwrap_or(cache.temp_max_age))?;
    Ok(ExecutionOutcome::success(
        format!(
            "removed {} stale entr{} ({} bytes)",
            report.removed_entries,
            if report.removed_entries == 1 { "y" } else { "ies" },
            report.removed_bytes
        ),
        json!(report),
    ))
}

/// Maps a failed resolution or transfer to the outcome class the exit code
/// is derived from.
pub fn session_error_outcome(err: &SessionError) -> ExecutionOutcome {
    let mut details = json!({ "code": err.code() });
    match err {
        SessionError::Resolution(resolution) => {
            let report = match resolution {
                ResolutionError::NoCandidate { report, .. }
                | ResolutionError::Ambiguous { report, .. } => report,
            };
            details["report"] = json!(report);
            ExecutionOutcome::user_error(err.to_string(), details)
        }
        SessionError::Registry(_) => ExecutionOutcome::failure(err.to_string(), details),
        SessionError::Handler(handler) => match handler {
            HandlerError::Store(
                StoreError::Integrity { .. } | StoreError::Configuration(_) | StoreError::Io { .. },
            ) => ExecutionOutcome::failure(err.to_string(), details),
            _ => ExecutionOutcome::user_error(err.to_string(), details),
        },
    }
}
