//! The three roles of a resource handler.
//!
//! Role instances hold no attribute values of their own. Every method reads
//! what it needs from the [`Scope`] the handler builds on each call, so a
//! value reassigned on the handler shows up in the next rendered location.

use std::fmt;
use std::path::PathBuf;

use quarry_domain::{Scope, TemplateError};

use crate::location::{Location, LocationError};

/// What the artifact is.
pub trait Resource: fmt::Debug + Send + Sync {
    fn realkind(&self) -> &str;

    fn basename(&self, scope: &Scope<'_>) -> Result<String, TemplateError>;

    /// Backend-specific query entries, such as an extraction directive.
    fn urlquery(&self, _scope: &Scope<'_>) -> Result<Vec<(String, String)>, TemplateError> {
        Ok(Vec::new())
    }
}

/// Where the artifact lives.
pub trait Provider: fmt::Debug + Send + Sync {
    fn realkind(&self) -> &str;

    fn scheme(&self, scope: &Scope<'_>) -> Result<String, TemplateError>;

    fn netloc(&self, scope: &Scope<'_>) -> Result<String, TemplateError>;

    fn pathname(&self, scope: &Scope<'_>) -> Result<String, TemplateError>;

    fn basename(
        &self,
        resource: &dyn Resource,
        scope: &Scope<'_>,
    ) -> Result<String, TemplateError> {
        resource.basename(scope)
    }

    fn urlquery(
        &self,
        resource: &dyn Resource,
        scope: &Scope<'_>,
    ) -> Result<Vec<(String, String)>, TemplateError> {
        resource.urlquery(scope)
    }

    /// Full location of `resource`.
    fn uri(&self, resource: &dyn Resource, scope: &Scope<'_>) -> Result<Location, LocationError> {
        Location::compose(
            &self.scheme(scope)?,
            &self.netloc(scope)?,
            &self.pathname(scope)?,
            &self.basename(resource, scope)?,
            self.urlquery(resource, scope)?,
        )
    }
}

/// Local storage for the artifact.
pub trait Container: fmt::Debug + Send + Sync {
    fn realkind(&self) -> &str;

    fn local_path(&self, scope: &Scope<'_>) -> Result<PathBuf, TemplateError>;
}
