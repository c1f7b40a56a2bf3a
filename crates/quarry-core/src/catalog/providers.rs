use quarry_domain::{AttrSpec, Candidate, RegistryError, Scope, Specification, TemplateError, Value};

use crate::location::{Location, LocationError};
use crate::registry::Registry;
use crate::roles::{Provider, Resource};

const TUBES: [&str; 6] = ["file", "ftp", "scp", "rcp", "http", "https"];

/// Takes the whole location verbatim from the `magic` attribute.
#[derive(Debug)]
pub struct MagicProvider;

impl MagicProvider {
    fn parsed(scope: &Scope<'_>) -> Result<Location, LocationError> {
        Location::parse(&scope.text("magic")?)
    }

    fn part<F>(scope: &Scope<'_>, sub: &str, pick: F) -> Result<String, TemplateError>
    where
        F: FnOnce(&Location) -> &str,
    {
        let text = scope.text("magic")?;
        let location = Location::parse(&text).map_err(|err| TemplateError::Helper {
            attr: "magic".to_string(),
            sub: sub.to_string(),
            reason: err.to_string(),
        })?;
        Ok(pick(&location).to_string())
    }
}

impl Provider for MagicProvider {
    fn realkind(&self) -> &str {
        "magic"
    }

    fn scheme(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Self::part(scope, "scheme", Location::scheme)
    }

    fn netloc(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Self::part(scope, "netloc", Location::netloc)
    }

    fn pathname(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Self::part(scope, "pathname", Location::path)
    }

    fn uri(&self, _resource: &dyn Resource, scope: &Scope<'_>) -> Result<Location, LocationError> {
        Self::parsed(scope)
    }
}

/// An explicit path, optionally on another host.
#[derive(Debug)]
pub struct RemoteProvider;

impl RemoteProvider {
    fn split(scope: &Scope<'_>) -> Result<(String, String), TemplateError> {
        let remote = scope.text("remote")?;
        Ok(match remote.rsplit_once('/') {
            Some((dir, base)) if dir.is_empty() => ("/".to_string(), base.to_string()),
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), remote),
        })
    }
}

impl Provider for RemoteProvider {
    fn realkind(&self) -> &str {
        "remote"
    }

    fn scheme(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        scope.text("tube")
    }

    fn netloc(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        if scope.text("tube")? == "file" {
            Ok(String::new())
        } else {
            scope.text("hostname")
        }
    }

    fn pathname(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok(Self::split(scope)?.0)
    }

    fn basename(&self, _resource: &dyn Resource, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok(Self::split(scope)?.1)
    }
}

/// Experiment-structured tree served by the `quarry` scheme.
#[derive(Debug)]
pub struct ExperimentProvider;

impl Provider for ExperimentProvider {
    fn realkind(&self) -> &str {
        "experiment"
    }

    fn scheme(&self, _scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok("quarry".to_string())
    }

    fn netloc(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        scope.text("namespace")
    }

    fn pathname(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        let stamp = match scope.value("date")? {
            Value::Date(date) => date.stamp().map_err(|reason| TemplateError::Helper {
                attr: "date".to_string(),
                sub: "stamp".to_string(),
                reason,
            })?,
            other => other.render(),
        };
        let cutoff: String = scope
            .text("cutoff")?
            .chars()
            .take(1)
            .flat_map(char::to_uppercase)
            .collect();
        Ok(format!(
            "{}/{}/{}/{stamp}{cutoff}/{}",
            scope.text("vapp")?,
            scope.text("vconf")?,
            scope.text("experiment")?,
            scope.text("block")?
        ))
    }
}

pub(super) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    let magic = Specification::builder("Location given verbatim")
        .attr("magic", AttrSpec::string().info("Full location"))
        .build();
    registry
        .providers_mut()
        .register(Candidate::new("magic", magic, |_, _| {
            Ok(Box::new(MagicProvider) as Box<dyn Provider>)
        }))?;

    let remote = Specification::builder("Explicit path, local or remote")
        .attr(
            "remote",
            AttrSpec::template().info("Path, may hold back-references"),
        )
        .attr("hostname", AttrSpec::string().defaults_to("localhost"))
        .attr(
            "tube",
            AttrSpec::string()
                .values(TUBES)
                .alias("protocol")
                .defaults_to("file"),
        )
        .build();
    registry
        .providers_mut()
        .register(Candidate::new("remote", remote, |_, _| {
            Ok(Box::new(RemoteProvider) as Box<dyn Provider>)
        }))?;

    let experiment = Specification::builder("Experiment tree")
        .attr("experiment", AttrSpec::string().info("Experiment identifier"))
        .attr("block", AttrSpec::string().info("Task block inside the run"))
        .attr(
            "namespace",
            AttrSpec::string().defaults_to("quarry.multi.local"),
        )
        .attr("vapp", AttrSpec::string().defaults_to("quarry"))
        .attr("vconf", AttrSpec::string().defaults_to("default"))
        .build();
    registry
        .providers_mut()
        .register(Candidate::new("experiment", experiment, |_, _| {
            Ok(Box::new(ExperimentProvider) as Box<dyn Provider>)
        }))
}
