use quarry_domain::{AttrSpec, Candidate, RegistryError, Scope, Specification, TemplateError, Value};

use crate::location::EXTRACT_KEY;
use crate::registry::Registry;
use crate::roles::Resource;

/// Placeholder for artifacts described only by their location.
#[derive(Debug)]
pub struct UnknownResource;

impl Resource for UnknownResource {
    fn realkind(&self) -> &str {
        "unknown"
    }

    fn basename(&self, _scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok(String::new())
    }
}

/// A model artifact named `kind.model.geometry[+term].nativefmt`.
#[derive(Debug)]
pub struct ArtifactResource;

impl Resource for ArtifactResource {
    fn realkind(&self) -> &str {
        "artifact"
    }

    fn basename(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        let mut name = format!(
            "{}.{}.{}",
            scope.text("kind")?,
            scope.text("model")?,
            scope.text("geometry")?
        );
        if let Some(term) = scope.get("term")? {
            let term = match term {
                Value::Term(term) => term.fmth(),
                other => other.render(),
            };
            name.push('+');
            name.push_str(&term);
        }
        name.push('.');
        name.push_str(&scope.text("nativefmt")?);
        Ok(name)
    }

    fn urlquery(&self, scope: &Scope<'_>) -> Result<Vec<(String, String)>, TemplateError> {
        Ok(match scope.get("member")? {
            Some(member) => vec![(EXTRACT_KEY.to_string(), member.render())],
            None => Vec::new(),
        })
    }
}

pub(super) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    let unknown = Specification::builder("Anything, addressed by its location only")
        .attr(
            "unknown",
            AttrSpec::boolean()
                .info("Must be set to true")
                .values([true]),
        )
        .build();
    registry
        .resources_mut()
        .register(Candidate::new("unknown", unknown, |_, _| {
            Ok(Box::new(UnknownResource) as Box<dyn Resource>)
        }))?;

    let artifact = Specification::builder("Generic model artifact")
        .attr("kind", AttrSpec::string().info("Kind of data"))
        .attr("model", AttrSpec::string().info("Producing model"))
        .attr("date", AttrSpec::date().info("Base date"))
        .attr(
            "cutoff",
            AttrSpec::string()
                .info("Data assimilation cutoff")
                .values(["assim", "production"])
                .remap("a", "assim")
                .remap("p", "production"),
        )
        .attr("term", AttrSpec::term().info("Forecast term").optional())
        .attr("geometry", AttrSpec::string().defaults_to("global"))
        .attr("nativefmt", AttrSpec::string().defaults_to("grib"))
        .attr(
            "member",
            AttrSpec::string()
                .info("Member to extract from a tar container")
                .optional(),
        )
        .build();
    registry
        .resources_mut()
        .register(Candidate::new("artifact", artifact, |_, _| {
            Ok(Box::new(ArtifactResource) as Box<dyn Resource>)
        }))
}
