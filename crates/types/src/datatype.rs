//! The closed set of datatypes a form field can declare.

use crate::{geo, temporal};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

static INT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?[0-9]+$").expect("BUG: invalid INT regex literal")
});
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?$")
        .expect("BUG: invalid DECIMAL regex literal")
});

/// A field datatype. Names that are not recognized behave like `string`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    String,
    Int,
    Decimal,
    Date,
    DateTime,
    Time,
    Geopoint,
    Geotrace,
    Geoshape,
    Binary,
    Unknown,
}

impl DataType {
    /// Resolves a type name as found in a form's `bind` (`xsd:` prefixes and case are ignored).
    pub fn from_name(name: &str) -> Self {
        let local = name.rsplit(':').next().unwrap_or(name).to_ascii_lowercase();
        match local.as_str() {
            "string" => DataType::String,
            "int" | "integer" => DataType::Int,
            "decimal" => DataType::Decimal,
            "date" => DataType::Date,
            "datetime" => DataType::DateTime,
            "time" => DataType::Time,
            "geopoint" => DataType::Geopoint,
            "geotrace" => DataType::Geotrace,
            "geoshape" => DataType::Geoshape,
            "binary" => DataType::Binary,
            _ => DataType::Unknown,
        }
    }

    /// Whether `value` is a valid lexical form of this type. Callers treat the empty
    /// value as valid before asking.
    pub fn validate(self, value: &str) -> bool {
        match self {
            DataType::String | DataType::Binary | DataType::Unknown => true,
            DataType::Int => {
                let v = value.trim();
                INT.is_match(v) && v.parse::<i64>().is_ok()
            }
            DataType::Decimal => DECIMAL.is_match(value.trim()),
            DataType::Date => temporal::is_valid_date(&temporal::convert_date(value)),
            DataType::DateTime => !temporal::convert_datetime(value).is_empty(),
            DataType::Time => temporal::is_valid_time(value),
            DataType::Geopoint => geo::is_valid_point(value),
            DataType::Geotrace => geo::is_valid_trace(value),
            DataType::Geoshape => geo::is_valid_shape(value),
        }
    }

    /// Converts `value` to this type's canonical text form. Never fails: values that
    /// cannot be converted come back unchanged, or empty for numeric and temporal types.
    pub fn convert(self, value: &str) -> String {
        match self {
            DataType::String | DataType::Unknown => {
                if value.trim().is_empty() {
                    String::new()
                } else {
                    value.to_string()
                }
            }
            DataType::Int => match js_number(value) {
                Some(n) => format!("{}", (n + 0.5).floor()),
                None => String::new(),
            },
            DataType::Decimal => match js_number(value) {
                Some(n) if n == 0.0 => "0".to_string(),
                Some(n) => format!("{}", n),
                None => String::new(),
            },
            DataType::Date => temporal::convert_date(value),
            DataType::DateTime => temporal::convert_datetime(value),
            DataType::Time => temporal::convert_time(value),
            DataType::Geopoint | DataType::Geotrace | DataType::Geoshape | DataType::Binary => {
                value.to_string()
            }
        }
    }
}

impl From<&str> for DataType {
    fn from(name: &str) -> Self {
        DataType::from_name(name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Decimal => "decimal",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Time => "time",
            DataType::Geopoint => "geopoint",
            DataType::Geotrace => "geotrace",
            DataType::Geoshape => "geoshape",
            DataType::Binary => "binary",
            DataType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(DataType::from_name(&name))
    }
}

/// A finite number read from user text: surrounding whitespace is allowed, blank is not.
fn js_number(value: &str) -> Option<f64> {
    let v = value.trim();
    if !DECIMAL.is_match(v) {
        return None;
    }
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}
