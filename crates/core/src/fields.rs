//! Field model
//!
//! Every block is a bag of named fields. A field belongs to a scope
//! (content, settings, or children), carries a declared type, and has a
//! default that applies when nothing is stored. Values travel as JSON;
//! the codec on [`FieldType`] validates and normalizes them on the way in
//! so that stored documents only ever hold canonical shapes.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use modulestore_keys::UsageKey;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// Which slice of a block a field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Definition payload, shared across branches in the versioned store.
    Content,
    /// Metadata, subject to downward inheritance.
    Settings,
    /// The ordered child reference list.
    Children,
    /// Derived parent pointer, never written directly.
    Parent,
}

impl Scope {
    /// The wire name of this scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Content => "content",
            Scope::Settings => "settings",
            Scope::Children => "children",
            Scope::Parent => "parent",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a field, with a codec for validating raw JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 string.
    Text,
    /// Boolean, coerced from "true"/"false" strings.
    Boolean,
    /// Signed integer, coerced from integral floats and numeric strings.
    Integer,
    /// Floating point number.
    Float,
    /// Instant in time, stored as an RFC 3339 UTC string.
    DateTime,
    /// Duration, stored as whole seconds.
    Timedelta,
    /// JSON array with untyped elements.
    List,
    /// JSON object with untyped values.
    Dict,
    /// A single block reference in deprecated string form.
    Reference,
    /// An ordered list of block references.
    ReferenceList,
    /// Any JSON value, stored verbatim.
    Json,
}

impl FieldType {
    /// The wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::DateTime => "datetime",
            FieldType::Timedelta => "timedelta",
            FieldType::List => "list",
            FieldType::Dict => "dict",
            FieldType::Reference => "reference",
            FieldType::ReferenceList => "reference_list",
            FieldType::Json => "json",
        }
    }

    /// Decode a raw JSON value into a typed [`FieldValue`].
    ///
    /// `null` decodes to [`FieldValue::Null`] for every type. Anything the
    /// codec cannot coerce fails with `Error::Serialization`.
    pub fn decode(&self, raw: &Json) -> Result<FieldValue> {
        if raw.is_null() {
            return Ok(FieldValue::Null);
        }
        match self {
            FieldType::Text => match raw {
                Json::String(s) => Ok(FieldValue::Text(s.clone())),
                other => Err(type_error(self, other)),
            },
            FieldType::Boolean => match raw {
                Json::Bool(b) => Ok(FieldValue::Boolean(*b)),
                Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(FieldValue::Boolean(true)),
                    "false" => Ok(FieldValue::Boolean(false)),
                    _ => Err(type_error(self, raw)),
                },
                other => Err(type_error(self, other)),
            },
            FieldType::Integer => match raw {
                Json::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(FieldValue::Integer(i))
                    } else if let Some(f) = n.as_f64() {
                        if f.fract() == 0.0 {
                            Ok(FieldValue::Integer(f as i64))
                        } else {
                            Err(type_error(self, raw))
                        }
                    } else {
                        Err(type_error(self, raw))
                    }
                }
                Json::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|_| type_error(self, raw)),
                other => Err(type_error(self, other)),
            },
            FieldType::Float => match raw {
                Json::Number(n) => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .ok_or_else(|| type_error(self, raw)),
                Json::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(FieldValue::Float)
                    .map_err(|_| type_error(self, raw)),
                other => Err(type_error(self, other)),
            },
            FieldType::DateTime => match raw {
                Json::String(s) => parse_datetime(s)
                    .map(FieldValue::DateTime)
                    .ok_or_else(|| type_error(self, raw)),
                other => Err(type_error(self, other)),
            },
            FieldType::Timedelta => match raw {
                Json::Number(n) => n
                    .as_i64()
                    .map(FieldValue::Timedelta)
                    .ok_or_else(|| type_error(self, raw)),
                Json::String(s) => parse_timedelta(s)
                    .map(FieldValue::Timedelta)
                    .ok_or_else(|| type_error(self, raw)),
                other => Err(type_error(self, other)),
            },
            FieldType::List => match raw {
                Json::Array(items) => Ok(FieldValue::List(items.clone())),
                other => Err(type_error(self, other)),
            },
            FieldType::Dict => match raw {
                Json::Object(map) => Ok(FieldValue::Dict(map.clone())),
                other => Err(type_error(self, other)),
            },
            FieldType::Reference => match raw {
                Json::String(s) => {
                    UsageKey::parse_deprecated(s)?;
                    Ok(FieldValue::Reference(s.clone()))
                }
                other => Err(type_error(self, other)),
            },
            FieldType::ReferenceList => match raw {
                Json::Array(items) => {
                    let mut refs = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Json::String(s) => {
                                UsageKey::parse_deprecated(s)?;
                                refs.push(s.clone());
                            }
                            other => return Err(type_error(self, other)),
                        }
                    }
                    Ok(FieldValue::ReferenceList(refs))
                }
                other => Err(type_error(self, other)),
            },
            FieldType::Json => Ok(FieldValue::Json(raw.clone())),
        }
    }

    /// Validate and normalize a raw value into its canonical stored form.
    pub fn normalize(&self, raw: &Json) -> Result<Json> {
        Ok(self.decode(raw)?.to_json())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn type_error(ty: &FieldType, raw: &Json) -> Error {
    Error::Serialization(format!("expected {} value, got {}", ty, json_kind(raw)))
}

fn json_kind(raw: &Json) -> &'static str {
    match raw {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Parse an ISO 8601 instant. Date-only strings resolve to midnight UTC.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Parse a duration in one of the accepted spellings into whole seconds.
///
/// Accepted forms:
/// - "HH:MM:SS" and "D day[s], HH:MM:SS"
/// - unit phrases like "1 day 12 hours 59 minutes 59 seconds"
fn parse_timedelta(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // "D day[s], HH:MM:SS" or plain "HH:MM:SS"
    let (day_secs, clock) = match s.split_once(',') {
        Some((days_part, rest)) => {
            let days = days_part
                .trim()
                .strip_suffix("days")
                .or_else(|| days_part.trim().strip_suffix("day"))?
                .trim()
                .parse::<i64>()
                .ok()?;
            (days * 86_400, rest.trim())
        }
        None => (0, s),
    };
    if clock.contains(':') {
        let parts: Vec<&str> = clock.split(':').collect();
        let [h, m, sec] = parts.as_slice() else {
            return None;
        };
        let h = h.trim().parse::<i64>().ok()?;
        let m = m.trim().parse::<i64>().ok()?;
        let sec = sec.trim().parse::<i64>().ok()?;
        return Some(day_secs + h * 3600 + m * 60 + sec);
    }

    // unit phrases: alternating <number> <unit> tokens
    let mut total = 0i64;
    let mut tokens = s.split_whitespace();
    while let Some(count) = tokens.next() {
        let count = count.parse::<i64>().ok()?;
        let unit = tokens.next()?;
        let per = match unit.trim_end_matches('s') {
            "week" => 604_800,
            "day" => 86_400,
            "hour" => 3600,
            "minute" => 60,
            "second" => 1,
            _ => return None,
        };
        total += count * per;
    }
    Some(total)
}

/// A decoded, typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Explicitly unset.
    Null,
    /// String value.
    Text(String),
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// Instant in time.
    DateTime(DateTime<Utc>),
    /// Duration in whole seconds.
    Timedelta(i64),
    /// Untyped array.
    List(Vec<Json>),
    /// Untyped object.
    Dict(serde_json::Map<String, Json>),
    /// A block reference in deprecated string form.
    Reference(String),
    /// An ordered list of block references.
    ReferenceList(Vec<String>),
    /// Arbitrary JSON.
    Json(Json),
}

impl FieldValue {
    /// The canonical JSON form persisted by the stores.
    pub fn to_json(&self) -> Json {
        match self {
            FieldValue::Null => Json::Null,
            FieldValue::Text(s) => Json::String(s.clone()),
            FieldValue::Boolean(b) => Json::Bool(*b),
            FieldValue::Integer(i) => Json::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            FieldValue::DateTime(dt) => {
                Json::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            }
            FieldValue::Timedelta(secs) => Json::from(*secs),
            FieldValue::List(items) => Json::Array(items.clone()),
            FieldValue::Dict(map) => Json::Object(map.clone()),
            FieldValue::Reference(s) => Json::String(s.clone()),
            FieldValue::ReferenceList(refs) => {
                Json::Array(refs.iter().cloned().map(Json::String).collect())
            }
            FieldValue::Json(v) => v.clone(),
        }
    }

    /// True when the value is [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// The string payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean payload, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The instant payload, if this is a datetime value.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

/// Declaration of a single named field: scope, type, and default.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    scope: Scope,
    field_type: FieldType,
    default: Json,
}

impl FieldDescriptor {
    /// Declare a field.
    pub fn new(name: impl Into<String>, scope: Scope, field_type: FieldType, default: Json) -> Self {
        Self {
            name: name.into(),
            scope,
            field_type,
            default,
        }
    }

    /// Declare a settings-scoped field.
    pub fn settings(name: impl Into<String>, field_type: FieldType, default: Json) -> Self {
        Self::new(name, Scope::Settings, field_type, default)
    }

    /// Declare a content-scoped field.
    pub fn content(name: impl Into<String>, field_type: FieldType, default: Json) -> Self {
        Self::new(name, Scope::Content, field_type, default)
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field scope.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Declared type.
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Default in canonical JSON form.
    pub fn default(&self) -> &Json {
        &self.default
    }

    /// Decode the default into a typed value.
    pub fn default_value(&self) -> Result<FieldValue> {
        self.field_type.decode(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========================================
    // Codec Tests
    // ========================================

    #[test]
    fn test_boolean_coercion_from_strings() {
        assert_eq!(
            FieldType::Boolean.decode(&json!("true")).unwrap(),
            FieldValue::Boolean(true)
        );
        assert_eq!(
            FieldType::Boolean.decode(&json!("False")).unwrap(),
            FieldValue::Boolean(false)
        );
        assert!(FieldType::Boolean.decode(&json!("yes")).is_err());
        assert!(FieldType::Boolean.decode(&json!(1)).is_err());
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(
            FieldType::Integer.decode(&json!(42)).unwrap(),
            FieldValue::Integer(42)
        );
        assert_eq!(
            FieldType::Integer.decode(&json!(3.0)).unwrap(),
            FieldValue::Integer(3)
        );
        assert_eq!(
            FieldType::Integer.decode(&json!("17")).unwrap(),
            FieldValue::Integer(17)
        );
        assert!(FieldType::Integer.decode(&json!(3.5)).is_err());
    }

    #[test]
    fn test_null_decodes_for_every_type() {
        for ty in [
            FieldType::Text,
            FieldType::Boolean,
            FieldType::DateTime,
            FieldType::Timedelta,
            FieldType::ReferenceList,
        ] {
            assert_eq!(ty.decode(&Json::Null).unwrap(), FieldValue::Null);
        }
    }

    #[test]
    fn test_datetime_normalization() {
        let normalized = FieldType::DateTime
            .normalize(&json!("2030-01-01T00:00:00+00:00"))
            .unwrap();
        assert_eq!(normalized, json!("2030-01-01T00:00:00Z"));

        let date_only = FieldType::DateTime.normalize(&json!("2030-01-01")).unwrap();
        assert_eq!(date_only, json!("2030-01-01T00:00:00Z"));

        assert!(FieldType::DateTime.decode(&json!("not a date")).is_err());
    }

    #[test]
    fn test_timedelta_clock_forms() {
        assert_eq!(
            FieldType::Timedelta.decode(&json!("01:30:00")).unwrap(),
            FieldValue::Timedelta(5400)
        );
        assert_eq!(
            FieldType::Timedelta
                .decode(&json!("2 days, 00:00:10"))
                .unwrap(),
            FieldValue::Timedelta(2 * 86_400 + 10)
        );
    }

    #[test]
    fn test_timedelta_unit_phrases() {
        assert_eq!(
            FieldType::Timedelta
                .decode(&json!("1 day 12 hours 59 minutes 59 seconds"))
                .unwrap(),
            FieldValue::Timedelta(86_400 + 12 * 3600 + 59 * 60 + 59)
        );
        assert_eq!(
            FieldType::Timedelta.decode(&json!("2 weeks")).unwrap(),
            FieldValue::Timedelta(1_209_600)
        );
        assert_eq!(
            FieldType::Timedelta.decode(&json!(300)).unwrap(),
            FieldValue::Timedelta(300)
        );
        assert!(FieldType::Timedelta.decode(&json!("3 fortnights")).is_err());
    }

    #[test]
    fn test_reference_list_validates_each_entry() {
        let good = json!(["i4x://org/course/html/intro", "i4x://org/course/video/v1"]);
        let decoded = FieldType::ReferenceList.decode(&good).unwrap();
        assert_eq!(
            decoded,
            FieldValue::ReferenceList(vec![
                "i4x://org/course/html/intro".to_string(),
                "i4x://org/course/video/v1".to_string(),
            ])
        );

        let bad = json!(["i4x://org/course/html/intro", "nonsense"]);
        assert!(FieldType::ReferenceList.decode(&bad).is_err());
    }

    #[test]
    fn test_normalize_is_stable() {
        let canonical = json!("2030-01-01T00:00:00Z");
        let once = FieldType::DateTime.normalize(&canonical).unwrap();
        assert_eq!(once, canonical, "canonical form must normalize to itself");
    }

    // ========================================
    // Descriptor Tests
    // ========================================

    #[test]
    fn test_descriptor_default_value() {
        let desc = FieldDescriptor::settings("graded", FieldType::Boolean, json!(false));
        assert_eq!(desc.scope(), Scope::Settings);
        assert_eq!(desc.default_value().unwrap(), FieldValue::Boolean(false));
    }

    #[test]
    fn test_scope_wire_names() {
        assert_eq!(Scope::Content.as_str(), "content");
        assert_eq!(Scope::Settings.as_str(), "settings");
        assert_eq!(Scope::Children.as_str(), "children");
        assert_eq!(Scope::Parent.as_str(), "parent");
    }
}
