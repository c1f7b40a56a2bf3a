use std::fmt;
use std::sync::Arc;

use time::macros::format_description;
use time::{Month, PrimitiveDateTime, Time};

use crate::scope::Lookup;

/// A value with named sub-attributes, addressed as `[attr::sub]` in templates.
///
/// Sub-attributes are computed on every access and never memoized, so a
/// composite may depend on sibling attributes that change after binding.
pub trait Composite: fmt::Debug + Send + Sync {
    /// Type tag checked by `AttrType::Composite`.
    fn kind(&self) -> &str;

    /// Text used when the whole value is substituted into a location.
    fn render(&self) -> String;

    fn sub(&self, name: &str, scope: &dyn Lookup) -> Result<Value, String>;
}

#[derive(Clone, Debug)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(Date),
    Term(Term),
    Composite(Arc<dyn Composite>),
    /// Several candidate values; bags holding lists are expanded before matching.
    List(Vec<Value>),
}

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&Date> {
        match self {
            Value::Date(date) => Some(date),
            _ => None,
        }
    }

    pub fn as_term(&self) -> Option<&Term> {
        match self {
            Value::Term(term) => Some(term),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Date(_) => "date",
            Value::Term(_) => "term",
            Value::Composite(_) => "composite",
            Value::List(_) => "list",
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Looks up a sub-attribute of a composite, date or term value.
    pub fn sub(&self, name: &str, scope: &dyn Lookup) -> Result<Value, String> {
        match self {
            Value::Date(date) => date.sub(name),
            Value::Term(term) => term.sub(name),
            Value::Composite(inner) => inner.sub(name, scope),
            other => Err(format!(
                "{} values have no sub-attribute '{name}'",
                other.type_name()
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(text) => f.write_str(text),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Date(date) => write!(f, "{date}"),
            Value::Term(term) => write!(f, "{term}"),
            Value::Composite(inner) => f.write_str(&inner.render()),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::render).collect();
                f.write_str(&rendered.join(","))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Term(a), Value::Term(b)) => a == b,
            (Value::Composite(a), Value::Composite(b)) => {
                a.kind() == b.kind() && a.render() == b.render()
            }
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(value)
    }
}

impl From<Term> for Value {
    fn from(value: Term) -> Self {
        Value::Term(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// A UTC analysis or validity date, minute resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(PrimitiveDateTime);

impl Date {
    pub fn new(inner: PrimitiveDateTime) -> Self {
        Self(inner)
    }

    /// Parses `YYYYMMDD`, `YYYYMMDDHH` or `YYYYMMDDHHMM`; separators are ignored.
    pub fn parse(text: &str) -> Result<Self, String> {
        let digits: String = text.chars().filter(char::is_ascii_digit).collect();
        if !matches!(digits.len(), 8 | 10 | 12) {
            return Err(format!("'{text}' is not a YYYYMMDD[HH[MM]] date"));
        }
        let field = |range: std::ops::Range<usize>| -> Result<u8, String> {
            digits[range]
                .parse::<u8>()
                .map_err(|err| format!("'{text}': {err}"))
        };
        let year = digits[0..4]
            .parse::<i32>()
            .map_err(|err| format!("'{text}': {err}"))?;
        let month = Month::try_from(field(4..6)?).map_err(|err| format!("'{text}': {err}"))?;
        let day = field(6..8)?;
        let hour = if digits.len() >= 10 { field(8..10)? } else { 0 };
        let minute = if digits.len() == 12 {
            field(10..12)?
        } else {
            0
        };
        let date = time::Date::from_calendar_date(year, month, day)
            .map_err(|err| format!("'{text}': {err}"))?;
        let clock = Time::from_hms(hour, minute, 0).map_err(|err| format!("'{text}': {err}"))?;
        Ok(Self(PrimitiveDateTime::new(date, clock)))
    }

    pub fn inner(&self) -> PrimitiveDateTime {
        self.0
    }

    pub fn ymd(&self) -> String {
        format!(
            "{:04}{:02}{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day()
        )
    }

    pub fn ymdh(&self) -> String {
        format!("{}{:02}", self.ymd(), self.0.hour())
    }

    pub fn ymdhm(&self) -> String {
        format!("{}{:02}", self.ymdh(), self.0.minute())
    }

    /// `20240101T0000` form used in experiment paths.
    pub fn stamp(&self) -> Result<String, String> {
        let format = format_description!("[year][month][day]T[hour][minute]");
        self.0.format(&format).map_err(|err| err.to_string())
    }

    fn sub(&self, name: &str) -> Result<Value, String> {
        let text = match name {
            "ymd" => self.ymd(),
            "ymdh" => self.ymdh(),
            "ymdhm" => self.ymdhm(),
            "stamp" => self.stamp()?,
            "yyyy" => format!("{:04}", self.0.year()),
            "mm" => format!("{:02}", u8::from(self.0.month())),
            "dd" => format!("{:02}", self.0.day()),
            "hh" => format!("{:02}", self.0.hour()),
            other => return Err(format!("dates have no sub-attribute '{other}'")),
        };
        Ok(Value::Str(text))
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ymdh())
    }
}

/// A forecast term (lead time) counted in minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term {
    minutes: i64,
}

impl Term {
    pub fn hours(hours: i64) -> Self {
        Self {
            minutes: hours * 60,
        }
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self { minutes }
    }

    /// Accepts `H`, `HHHH`, `H:MM` and `HHHH:MM`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        let (hours, minutes) = match trimmed.split_once(':') {
            Some((hours, minutes)) => (hours, minutes),
            None => (trimmed, "0"),
        };
        let hours = hours
            .parse::<i64>()
            .map_err(|_| format!("'{text}' is not a term"))?;
        let minutes = minutes
            .parse::<i64>()
            .ok()
            .filter(|value| (0..60).contains(value))
            .ok_or_else(|| format!("'{text}' has an invalid minute field"))?;
        let sign = if trimmed.starts_with('-') { -1 } else { 1 };
        Ok(Self {
            minutes: hours * 60 + sign * minutes,
        })
    }

    pub fn hour(&self) -> i64 {
        self.minutes / 60
    }

    pub fn minute(&self) -> i64 {
        (self.minutes % 60).abs()
    }

    pub fn total_minutes(&self) -> i64 {
        self.minutes
    }

    pub fn fmth(&self) -> String {
        format!("{:04}", self.hour())
    }

    pub fn fmthm(&self) -> String {
        format!("{:04}:{:02}", self.hour(), self.minute())
    }

    fn sub(&self, name: &str) -> Result<Value, String> {
        match name {
            "fmth" => Ok(Value::Str(self.fmth())),
            "fmthm" => Ok(Value::Str(self.fmthm())),
            "fmtraw" => Ok(Value::Str(format!("{:04}{:02}", self.hour(), self.minute()))),
            "hour" => Ok(Value::Int(self.hour())),
            "minute" => Ok(Value::Int(self.minute())),
            other => Err(format!("terms have no sub-attribute '{other}'")),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minute() == 0 {
            write!(f, "{}", self.hour())
        } else {
            write!(f, "{}:{:02}", self.hour(), self.minute())
        }
    }
}

type HelperFn = dyn Fn(&str, &dyn Lookup) -> Result<Value, String> + Send + Sync;

/// A composite whose sub-attributes come from a closure, e.g. a lookup table
/// keyed by the current term.
#[derive(Clone)]
pub struct Helper {
    name: String,
    compute: Arc<HelperFn>,
}

impl Helper {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&str, &dyn Lookup) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Composite(Arc::new(self))
    }
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helper").field("name", &self.name).finish()
    }
}

impl Composite for Helper {
    fn kind(&self) -> &str {
        "helper"
    }

    fn render(&self) -> String {
        self.name.clone()
    }

    fn sub(&self, name: &str, scope: &dyn Lookup) -> Result<Value, String> {
        (self.compute)(name, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Nothing;

    #[test]
    fn dates_parse_all_precisions() -> Result<(), String> {
        let day = Date::parse("20240105")?;
        assert_eq!(day.ymdh(), "2024010500");
        let hour = Date::parse("2024010518")?;
        assert_eq!(hour.ymdhm(), "202401051800");
        let full = Date::parse("2024-01-05 18:30")?;
        assert_eq!(full.stamp()?, "20240105T1830");
        assert!(Date::parse("202401").is_err());
        assert!(Date::parse("20241305").is_err());
        Ok(())
    }

    #[test]
    fn terms_format_hours_and_minutes() -> Result<(), String> {
        let term = Term::parse("6")?;
        assert_eq!(term.fmth(), "0006");
        assert_eq!(term.to_string(), "6");
        let term = Term::parse("12:30")?;
        assert_eq!(term.fmthm(), "0012:30");
        assert_eq!(term.sub("fmtraw")?, Value::str("001230"));
        assert!(Term::parse("3:75").is_err());
        Ok(())
    }

    #[test]
    fn helper_is_recomputed_on_each_access() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let helper = Helper::new("lut", move |sub, _| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Value::str(format!("{sub}-value")))
        })
        .into_value();
        assert_eq!(helper.sub("a", &Nothing), Ok(Value::str("a-value")));
        assert_eq!(helper.sub("a", &Nothing), Ok(Value::str("a-value")));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn lists_render_comma_joined() {
        let value = Value::from(vec!["a", "b"]);
        assert!(value.is_list());
        assert_eq!(value.render(), "a,b");
        assert!(Value::Int(3).sub("x", &Nothing).is_err());
    }
}
