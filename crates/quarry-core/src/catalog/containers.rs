use std::path::PathBuf;

use quarry_domain::{AttrSpec, Candidate, RegistryError, Scope, Specification, TemplateError};

use crate::registry::Registry;
use crate::roles::Container;

/// A plain local file.
#[derive(Debug)]
pub struct FileContainer;

impl Container for FileContainer {
    fn realkind(&self) -> &str {
        "file"
    }

    fn local_path(&self, scope: &Scope<'_>) -> Result<PathBuf, TemplateError> {
        Ok(PathBuf::from(scope.text("filename")?))
    }
}

pub(super) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    let file = Specification::builder("Local file")
        .attr(
            "filename",
            AttrSpec::template()
                .info("Local path, may hold back-references")
                .alias("local")
                .alias("file"),
        )
        .build();
    registry
        .containers_mut()
        .register(Candidate::new("file", file, |_, _| {
            Ok(Box::new(FileContainer) as Box<dyn Container>)
        }))
}
