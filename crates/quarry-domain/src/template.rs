//! Back-reference templates: `[attr]` and `[attr::sub]` placeholders inside
//! attribute values and provider paths.

use crate::error::TemplateError;
use crate::scope::Lookup;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub attr: String,
    pub sub: Option<String>,
}

impl Reference {
    pub fn resolve(&self, scope: &dyn Lookup) -> Result<Value, TemplateError> {
        let value = scope
            .lookup(&self.attr)?
            .ok_or_else(|| TemplateError::Unreachable {
                attr: self.attr.clone(),
            })?;
        match &self.sub {
            None => Ok(value),
            Some(sub) => value
                .sub(sub, scope)
                .map_err(|reason| TemplateError::Helper {
                    attr: self.attr.clone(),
                    sub: sub.clone(),
                    reason,
                }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Part {
    Text(String),
    Ref(Reference),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

impl Template {
    /// Splits `raw` into literal text and references. Brackets whose content
    /// is not `word` or `word::word` stay literal.
    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = raw;
        while let Some(open) = rest.find('[') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                break;
            };
            if let Some(reference) = parse_reference(&after[..close]) {
                text.push_str(&rest[..open]);
                if !text.is_empty() {
                    parts.push(Part::Text(std::mem::take(&mut text)));
                }
                parts.push(Part::Ref(reference));
                rest = &after[close + 1..];
            } else {
                text.push_str(&rest[..=open]);
                rest = after;
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn has_refs(&self) -> bool {
        self.refs().next().is_some()
    }

    pub fn refs(&self) -> impl Iterator<Item = &Reference> {
        self.parts.iter().filter_map(|part| match part {
            Part::Ref(reference) => Some(reference),
            Part::Text(_) => None,
        })
    }

    /// The reference when the template is exactly one placeholder.
    pub fn single(&self) -> Option<&Reference> {
        match self.parts.as_slice() {
            [Part::Ref(reference)] => Some(reference),
            _ => None,
        }
    }

    pub fn render(&self, scope: &dyn Lookup) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Ref(reference) => out.push_str(&reference.resolve(scope)?.render()),
            }
        }
        Ok(out)
    }

    /// Like `render`, but a lone placeholder yields the referenced value itself
    /// so dates and composites keep their type.
    pub fn evaluate(&self, scope: &dyn Lookup) -> Result<Value, TemplateError> {
        match self.single() {
            Some(reference) => reference.resolve(scope),
            None => self.render(scope).map(Value::Str),
        }
    }
}

pub fn has_refs(text: &str) -> bool {
    Template::parse(text).has_refs()
}

fn parse_reference(inner: &str) -> Option<Reference> {
    let (attr, sub) = match inner.find(':') {
        Some(idx) => (&inner[..idx], Some(inner[idx..].trim_start_matches(':'))),
        None => (inner, None),
    };
    if !is_word(attr) || !sub.map_or(true, is_word) {
        return None;
    }
    Some(Reference {
        attr: attr.to_string(),
        sub: sub.map(str::to_string),
    })
}

fn is_word(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
