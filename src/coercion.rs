//! Conversion of raw cell text into typed leaf values.
//!
//! Each declared value type has a lexical form. What happens when the raw text
//! does not match it is governed by [`MismatchPolicy`]: scalar types fall back
//! to a zero/empty default so dirty spreadsheet input still yields a document,
//! while temporal types are rejected outright and the field is skipped.

use std::fmt;
use std::str::FromStr;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};

use crate::error::{AssemblyError, ConfigurationError};

/// Field separator inside composite cell values.
pub const COMPONENT_SEPARATOR: char = '^';

/// Declared type of a field, parsed case-insensitively from its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ValueType {
    Boolean,
    Code,
    Id,
    Oid,
    Uuid,
    Decimal,
    Integer,
    PositiveInt,
    UnsignedInt,
    Date,
    DateTime,
    Instant,
    Time,
    String,
    Uri,
    Url,
    /// `string[]` - each write appends to a list
    StringList,
    Coding,
    CodeableConcept,
    Address,
    Quantity,
}

/// What to do when raw text does not match a type's lexical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Substitute zero (numeric) or the empty string (textual).
    Default,
    /// Fail the field with [`AssemblyError::ValueFormat`].
    Reject,
    /// Any text is acceptable.
    Verbatim,
}

impl ValueType {
    const ALL: [ValueType; 21] = [
        ValueType::Boolean,
        ValueType::Code,
        ValueType::Id,
        ValueType::Oid,
        ValueType::Uuid,
        ValueType::Decimal,
        ValueType::Integer,
        ValueType::PositiveInt,
        ValueType::UnsignedInt,
        ValueType::Date,
        ValueType::DateTime,
        ValueType::Instant,
        ValueType::Time,
        ValueType::String,
        ValueType::Uri,
        ValueType::Url,
        ValueType::StringList,
        ValueType::Coding,
        ValueType::CodeableConcept,
        ValueType::Address,
        ValueType::Quantity,
    ];

    /// Canonical tag as written in cohort files.
    pub fn tag(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Code => "code",
            ValueType::Id => "id",
            ValueType::Oid => "oid",
            ValueType::Uuid => "uuid",
            ValueType::Decimal => "decimal",
            ValueType::Integer => "integer",
            ValueType::PositiveInt => "positiveInt",
            ValueType::UnsignedInt => "unsignedInt",
            ValueType::Date => "date",
            ValueType::DateTime => "dateTime",
            ValueType::Instant => "instant",
            ValueType::Time => "time",
            ValueType::String => "string",
            ValueType::Uri => "uri",
            ValueType::Url => "url",
            ValueType::StringList => "string[]",
            ValueType::Coding => "Coding",
            ValueType::CodeableConcept => "CodeableConcept",
            ValueType::Address => "Address",
            ValueType::Quantity => "Quantity",
        }
    }

    pub fn mismatch_policy(&self) -> MismatchPolicy {
        match self {
            ValueType::Code
            | ValueType::Id
            | ValueType::Oid
            | ValueType::Uuid
            | ValueType::Decimal
            | ValueType::Integer
            | ValueType::PositiveInt
            | ValueType::UnsignedInt => MismatchPolicy::Default,
            ValueType::Date
            | ValueType::DateTime
            | ValueType::Instant
            | ValueType::Time
            | ValueType::Quantity => MismatchPolicy::Reject,
            ValueType::Boolean
            | ValueType::String
            | ValueType::Uri
            | ValueType::Url
            | ValueType::StringList
            | ValueType::Coding
            | ValueType::CodeableConcept
            | ValueType::Address => MismatchPolicy::Verbatim,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ValueType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ValueType::ALL
            .into_iter()
            .find(|vt| vt.tag().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::UnknownValueType(s.to_string()))
    }
}

impl TryFrom<String> for ValueType {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A coerced leaf value, ready to be placed into a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Boolean(bool),
    Integer(i64),
    Decimal(Number),
    Text(String),
    Date(NaiveDate),
    DateTime { value: NaiveDateTime, zone: Option<Zone> },
    Instant { value: NaiveDateTime, zone: Option<Zone> },
    Time(NaiveTime),
    /// One element to append to a list under the target key
    ListItem(String),
    /// Composite structure (coding, address, quantity, reference)
    Complex(Value),
}

impl TypedValue {
    pub fn into_json(self) -> Value {
        match self {
            TypedValue::Boolean(b) => Value::Bool(b),
            TypedValue::Integer(i) => Value::Number(i.into()),
            TypedValue::Decimal(n) => Value::Number(n),
            TypedValue::Text(s) | TypedValue::ListItem(s) => Value::String(s),
            TypedValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            TypedValue::DateTime { value, zone } | TypedValue::Instant { value, zone } => {
                Value::String(with_zone(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string(), zone))
            }
            TypedValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            TypedValue::Complex(v) => v,
        }
    }
}

/// Zone designator written after a dateTime or instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// `Z`
    Utc,
    /// `+hh:mm` or `-hh:mm`
    Offset(FixedOffset),
}

impl Zone {
    fn parse(text: &str) -> Option<Zone> {
        if text == "Z" {
            return Some(Zone::Utc);
        }
        let (sign, rest) = match (text.strip_prefix('+'), text.strip_prefix('-')) {
            (Some(rest), _) => (1, rest),
            (_, Some(rest)) => (-1, rest),
            _ => return None,
        };
        let (hours, minutes) = rest.split_once(':')?;
        let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
        FixedOffset::east_opt(sign * seconds).map(Zone::Offset)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Utc => f.write_str("Z"),
            Zone::Offset(offset) => {
                let seconds = offset.local_minus_utc();
                let sign = if seconds < 0 { '-' } else { '+' };
                let minutes = seconds.abs() / 60;
                write!(f, "{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
            }
        }
    }
}

fn with_zone(mut text: String, zone: Option<Zone>) -> String {
    if let Some(zone) = zone {
        text.push_str(&zone.to_string());
    }
    text
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in value pattern must compile")
}

static CODE: Lazy<Regex> = Lazy::new(|| pattern(r"[^\s]+( [^\s]+)*"));
static DECIMAL: Lazy<Regex> =
    Lazy::new(|| pattern(r"-?(0|[1-9][0-9]{0,17})(\.[0-9]{1,17})?([eE][+-]?[0-9]{1,9})?"));
static ID: Lazy<Regex> = Lazy::new(|| pattern(r"[A-Za-z0-9\-.]{1,64}"));
static INTEGER: Lazy<Regex> = Lazy::new(|| pattern(r"[-+]?[1-9][0-9]*|0"));
static OID: Lazy<Regex> = Lazy::new(|| pattern(r"urn:oid:[0-2](\.(0|[1-9][0-9]*))+"));
static POSITIVE_INT: Lazy<Regex> = Lazy::new(|| pattern(r"[1-9][0-9]*"));
static UNSIGNED_INT: Lazy<Regex> = Lazy::new(|| pattern(r"[1-9][0-9]*|0"));
static UUID: Lazy<Regex> = Lazy::new(|| {
    pattern(r"urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
});

static DATE: Lazy<Regex> = Lazy::new(|| pattern(r"(\d{4}-\d{2}-\d{2})"));
/// Whole-cell match: anything the pattern cannot read is a mismatch.
static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"^\s*(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})(\.\d{1,9})?(Z|[+-](?:(?:0[0-9]|1[0-3]):[0-5][0-9]|14:00))?\s*$",
    )
});
static TIME: Lazy<Regex> = Lazy::new(|| {
    pattern(r"((?:[01][0-9]|2[0-3]):[0-5][0-9]:(?:[0-5][0-9]|60)(?:\.[0-9]{1,9})?)")
});

/// Coerce raw cell text into a typed value.
///
/// # Errors
///
/// Returns [`AssemblyError::ValueFormat`] only for types whose
/// [`MismatchPolicy`] is `Reject`.
///
/// # Example
///
/// ```
/// use cohort_bundler::coercion::{coerce, ValueType};
///
/// let value = coerce("2017-05-15", ValueType::Date).unwrap();
/// assert_eq!(value.into_json(), serde_json::json!("2017-05-15"));
/// ```
pub fn coerce(raw: &str, value_type: ValueType) -> Result<TypedValue, AssemblyError> {
    if let Some(value) = read_lexical(raw, value_type) {
        return Ok(value);
    }
    match value_type.mismatch_policy() {
        MismatchPolicy::Default => Ok(default_value(value_type)),
        MismatchPolicy::Verbatim => Ok(TypedValue::Text(raw.to_string())),
        MismatchPolicy::Reject => Err(AssemblyError::ValueFormat {
            raw: raw.to_string(),
            value_type: value_type.tag().to_string(),
            reason: expected_form(value_type).to_string(),
        }),
    }
}

/// Read `raw` in the lexical form of `value_type`; `None` on mismatch.
fn read_lexical(raw: &str, value_type: ValueType) -> Option<TypedValue> {
    match value_type {
        ValueType::Boolean => Some(TypedValue::Boolean(raw.to_lowercase().contains("true"))),
        ValueType::Code => extract_text(&CODE, raw),
        ValueType::Id => extract_text(&ID, raw),
        ValueType::Oid => extract_text(&OID, raw),
        ValueType::Uuid => extract_text(&UUID, raw),
        // Number keeps the matched text, so `12.50` stays `12.50`
        ValueType::Decimal => DECIMAL
            .find(raw)
            .and_then(|m| Number::from_str(m.as_str()).ok())
            .map(TypedValue::Decimal),
        ValueType::Integer => extract_integer(&INTEGER, raw),
        ValueType::PositiveInt => extract_integer(&POSITIVE_INT, raw),
        ValueType::UnsignedInt => extract_integer(&UNSIGNED_INT, raw),
        ValueType::Date => {
            let caps = DATE.captures(raw)?;
            NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d")
                .ok()
                .map(TypedValue::Date)
        }
        ValueType::DateTime => {
            let (value, zone) = read_date_time(raw)?;
            Some(TypedValue::DateTime { value, zone })
        }
        ValueType::Instant => {
            let (value, zone) = read_date_time(raw)?;
            Some(TypedValue::Instant { value, zone })
        }
        ValueType::Time => {
            let caps = TIME.captures(raw)?;
            NaiveTime::parse_from_str(&caps[1], "%H:%M:%S%.f")
                .ok()
                .map(TypedValue::Time)
        }
        ValueType::String | ValueType::Uri | ValueType::Url => {
            Some(TypedValue::Text(raw.to_string()))
        }
        ValueType::StringList => Some(TypedValue::ListItem(raw.to_string())),
        ValueType::Coding => Some(TypedValue::Complex(Value::Object(coding(raw)))),
        ValueType::CodeableConcept => Some(TypedValue::Complex(codeable_concept(raw))),
        ValueType::Address => Some(TypedValue::Complex(address(raw))),
        ValueType::Quantity => quantity(raw).map(TypedValue::Complex),
    }
}

fn default_value(value_type: ValueType) -> TypedValue {
    match value_type {
        ValueType::Decimal => TypedValue::Decimal(Number::from(0)),
        ValueType::Integer | ValueType::PositiveInt | ValueType::UnsignedInt => {
            TypedValue::Integer(0)
        }
        _ => TypedValue::Text(String::new()),
    }
}

fn expected_form(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Date => "expected YYYY-MM-DD",
        ValueType::DateTime => "expected YYYY-MM-DDThh:mm:ss[.fff][Z|+hh:mm]",
        ValueType::Instant => "expected YYYY-MM-DDThh:mm:ss[.fff][Z|+hh:mm]",
        ValueType::Time => "expected hh:mm:ss[.fff]",
        ValueType::Quantity => "quantity value is not numeric",
        _ => "unrecognized value",
    }
}

fn extract_text(re: &Regex, raw: &str) -> Option<TypedValue> {
    re.find(raw).map(|m| TypedValue::Text(m.as_str().to_string()))
}

fn extract_integer(re: &Regex, raw: &str) -> Option<TypedValue> {
    re.find(raw)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(TypedValue::Integer)
}

fn read_date_time(raw: &str) -> Option<(NaiveDateTime, Option<Zone>)> {
    let caps = DATE_TIME.captures(raw)?;
    let fraction = caps.get(3).map_or("", |m| m.as_str());
    let text = format!("{}T{}{}", &caps[1], &caps[2], fraction);
    let value = NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    let zone = match caps.get(4) {
        Some(m) => Some(Zone::parse(m.as_str())?),
        None => None,
    };
    Some((value, zone))
}

/// Split a composite value positionally; blank components become `None`.
fn components(raw: &str) -> Vec<Option<&str>> {
    raw.split(COMPONENT_SEPARATOR)
        .map(str::trim)
        .map(|c| (!c.is_empty()).then_some(c))
        .collect()
}

fn insert_components(target: &mut Map<String, Value>, keys: &[&str], parts: &[Option<&str>]) {
    for (key, part) in keys.iter().zip(parts) {
        if let Some(text) = part {
            target.insert(key.to_string(), Value::String(text.to_string()));
        }
    }
}

/// `system^code^display`
fn coding(raw: &str) -> Map<String, Value> {
    let mut coding = Map::new();
    insert_components(&mut coding, &["system", "code", "display"], &components(raw));
    coding
}

fn codeable_concept(raw: &str) -> Value {
    json!({ "coding": [coding(raw)] })
}

/// `line^city^district^postalCode^state^country`
fn address(raw: &str) -> Value {
    let parts = components(raw);
    let mut address = Map::new();
    if let Some(Some(line)) = parts.first() {
        address.insert("line".to_string(), json!([line]));
    }
    insert_components(
        &mut address,
        &["city", "district", "postalCode", "state", "country"],
        parts.get(1..).unwrap_or_default(),
    );
    Value::Object(address)
}

/// `value^unit`; the unit is everything after the first separator.
fn quantity(raw: &str) -> Option<Value> {
    let (value, unit) = match raw.split_once(COMPONENT_SEPARATOR) {
        Some((value, unit)) => (value.trim(), Some(unit.trim())),
        None => (raw.trim(), None),
    };
    let number = Number::from_str(value).ok()?;

    let mut quantity = Map::new();
    quantity.insert("value".to_string(), Value::Number(number));
    if let Some(unit) = unit.filter(|u| !u.is_empty()) {
        quantity.insert("unit".to_string(), Value::String(unit.to_string()));
    }
    Some(Value::Object(quantity))
}
