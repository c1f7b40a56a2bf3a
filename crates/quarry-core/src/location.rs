use std::fmt;
use std::path::PathBuf;

use quarry_domain::{diagnostics, TemplateError};
use serde::Serialize;
use thiserror::Error;
use url::form_urlencoded;

/// Query key marking a `file` path as relative to the working directory.
pub const RELATIVE_KEY: &str = "relative";
/// Query key naming one member to pull out of a tar container.
pub const EXTRACT_KEY: &str = "extract";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("[QY210] invalid location '{text}': {reason}")]
    Invalid { text: String, reason: String },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl LocationError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            LocationError::Invalid { .. } => diagnostics::location::INVALID,
            LocationError::Template(err) => err.code(),
        }
    }

    fn invalid(text: &str, reason: impl Into<String>) -> Self {
        LocationError::Invalid {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

/// A canonical `scheme://netloc/path?query` address. The path is kept
/// normalised and without its leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    scheme: String,
    netloc: String,
    path: String,
    query: Vec<(String, String)>,
}

impl Location {
    pub fn parse(text: &str) -> Result<Self, LocationError> {
        let (scheme, rest) = text
            .split_once("://")
            .ok_or_else(|| LocationError::invalid(text, "missing '://' separator"))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(LocationError::invalid(text, "malformed scheme"));
        }
        let (rest, query) = match rest.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (rest, None),
        };
        let (netloc, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        let query = query
            .map(|raw| {
                form_urlencoded::parse(raw.as_bytes())
                    .map(|(key, value)| (key.into_owned(), value.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            netloc: netloc.to_string(),
            path: normalize(path).map_err(|reason| LocationError::invalid(text, reason))?,
            query,
        })
    }

    /// Joins provider pieces into a location. A `file` pathname without a
    /// leading slash is flagged relative.
    pub fn compose(
        scheme: &str,
        netloc: &str,
        pathname: &str,
        basename: &str,
        query: Vec<(String, String)>,
    ) -> Result<Self, LocationError> {
        let joined = match (pathname.is_empty(), basename.is_empty()) {
            (_, true) => pathname.to_string(),
            (true, false) => basename.to_string(),
            (false, false) => format!("{}/{basename}", pathname.trim_end_matches('/')),
        };
        let display = format!("{scheme}://{netloc}/{joined}");
        if joined.trim_matches('/').is_empty() {
            return Err(LocationError::invalid(&display, "empty path"));
        }
        let mut location = Self {
            scheme: scheme.to_ascii_lowercase(),
            netloc: netloc.to_string(),
            path: normalize(&joined).map_err(|reason| LocationError::invalid(&display, reason))?,
            query,
        };
        if location.scheme == "file" && !joined.starts_with('/') && !location.is_relative() {
            location.query.push((RELATIVE_KEY.to_string(), "1".to_string()));
        }
        Ok(location)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn netloc(&self) -> &str {
        &self.netloc
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_relative(&self) -> bool {
        self.query_value(RELATIVE_KEY) == Some("1")
    }

    /// The path as a local filesystem path.
    pub fn fs_path(&self) -> PathBuf {
        if self.is_relative() {
            PathBuf::from(&self.path)
        } else {
            PathBuf::from(format!("/{}", self.path))
        }
    }

    /// Copy of this location without the `key` query entry.
    #[must_use]
    pub fn without(&self, key: &str) -> Location {
        Location {
            query: self
                .query
                .iter()
                .filter(|(name, _)| name != key)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.netloc, self.path)?;
        if !self.query.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

fn normalize(path: &str) -> Result<String, String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err("path escapes its root".to_string());
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_every_component() -> Result<(), LocationError> {
        let location =
            Location::parse("quarry://quarry.multi.local/arpege/4dvar/20240101T0000P/forecast/grid.grb?extract=a.grb")?;
        assert_eq!(location.scheme(), "quarry");
        assert_eq!(location.netloc(), "quarry.multi.local");
        assert_eq!(
            location.path(),
            "arpege/4dvar/20240101T0000P/forecast/grid.grb"
        );
        assert_eq!(location.query_value(EXTRACT_KEY), Some("a.grb"));
        assert_eq!(
            location.to_string(),
            "quarry://quarry.multi.local/arpege/4dvar/20240101T0000P/forecast/grid.grb?extract=a.grb"
        );
        Ok(())
    }

    #[test]
    fn compose_normalises_and_flags_relative_files() -> Result<(), LocationError> {
        let location = Location::compose("file", "", "data/./run/", "out.grb", Vec::new())?;
        assert_eq!(location.path(), "data/run/out.grb");
        assert!(location.is_relative());
        assert_eq!(location.fs_path(), PathBuf::from("data/run/out.grb"));

        let absolute = Location::compose("file", "", "/data/run", "out.grb", Vec::new())?;
        assert!(!absolute.is_relative());
        assert_eq!(absolute.fs_path(), PathBuf::from("/data/run/out.grb"));
        assert_eq!(absolute.to_string(), "file:///data/run/out.grb");
        Ok(())
    }

    #[test]
    fn malformed_locations_are_rejected() {
        assert!(matches!(
            Location::parse("no-separator"),
            Err(LocationError::Invalid { .. })
        ));
        assert!(Location::parse("file:///../etc/passwd").is_err());
        assert!(Location::compose("file", "", "", "", Vec::new()).is_err());
    }

    #[test]
    fn without_drops_a_query_key() -> Result<(), LocationError> {
        let location = Location::parse("quarry://a/b?extract=x&relative=1")?;
        let stripped = location.without(EXTRACT_KEY);
        assert_eq!(stripped.query_value(EXTRACT_KEY), None);
        assert!(stripped.is_relative());
        Ok(())
    }
}
