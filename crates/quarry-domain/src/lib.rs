#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Attribute-matching model: values, specifications, collectors and the matcher
//! that binds a caller's attribute bag to the best candidate of a collector.

pub mod attr;
pub mod collector;
pub mod diagnostics;
pub mod error;
pub mod expand;
pub mod matcher;
pub mod only;
pub mod priority;
pub mod report;
pub mod scope;
pub mod spec;
pub mod template;
pub mod value;

pub use attr::{Attr, AttrMap, AttrSpec, AttrType, Deferred};
pub use collector::{Candidate, Collector};
pub use error::{CoercionError, InvalidValue, RegistryError, ResolutionError, TemplateError};
pub use expand::expand;
pub use matcher::{AmbiguityPolicy, Matcher, Picked, Resolved};
pub use only::{Environment, Only};
pub use priority::{PriorityError, PriorityTable, DEFAULT_LEVELS};
pub use report::{RankedEntry, RejectReason, Rejection, ResolutionReport};
pub use scope::{bag, Bag, Lookup, Nothing, Scope};
pub use spec::{Openness, Specification, SpecificationBuilder, DEFAULT_PRIORITY};
pub use template::{Reference, Template};
pub use value::{Composite, Date, Helper, Term, Value};
