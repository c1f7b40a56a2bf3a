#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Resource handlers and the tiered stores they read from and write to.
//!
//! A [`Session`] resolves attribute bags into [`Handler`]s through the
//! [`Registry`], then moves artifacts between the local container and the
//! store serving the rendered [`Location`].

pub mod catalog;
pub mod commands;
pub mod config;
pub mod handler;
pub mod location;
pub mod outcome;
pub mod registry;
pub mod roles;
pub mod session;
pub mod store;
pub mod transport;

pub use commands::{execute, execute_in, parse_assignment, session_error_outcome, QuarryCommand};
pub use config::{
    ArchiveConfig, CacheConfig, Config, GlobalOptions, HashConfig, MatchConfig, MultiConfig,
    StoreLocation,
};
pub use handler::{Handler, HandlerError, HistoryEntry, Member};
pub use location::{Location, LocationError};
pub use outcome::{to_json_response, CommandStatus, ExecutionOutcome};
pub use registry::{CandidateInfo, CollectorKind, Plugin, Registry};
pub use roles::{Container, Provider, Resource};
pub use session::{Retrieval, Session, SessionError};
pub use store::{
    Outcome, Store, StoreEnv, StoreError, StoreHub, StoreOptions, TierOutcome, TierReport,
    TierStatus, TransientPolicy,
};
pub use transport::{Intent, SpawnOutput, SystemTransport, Transport};
