//! The OpenRosa extension function library used by form logic.
//!
//! Only the extended [`FunctionRegistry`](crate::FunctionRegistry) dispatches here. Dates
//! and datetimes are plain strings in this dialect; used as numbers they count days since
//! the Unix epoch.

use crate::datasource::DataSourceNode;
use crate::engine::{EvaluationContext, XPathValue};
use crate::error::XPathError;
use crate::functions::{check_arity, node_set_arg, xpath_round};
use crate::operators;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

/// Every function name the extended registry adds to XPath 1.0. `round` and `position`
/// are listed because their extension forms take an extra argument.
pub const EXTENSION_FUNCTIONS: &[&str] = &[
    "if",
    "coalesce",
    "selected",
    "selected-at",
    "count-selected",
    "count-non-empty",
    "join",
    "min",
    "max",
    "int",
    "pow",
    "round",
    "substr",
    "regex",
    "ends-with",
    "boolean-from-string",
    "checklist",
    "weighted-checklist",
    "once",
    "uuid",
    "random",
    "today",
    "now",
    "date",
    "decimal-date-time",
    "decimal-time",
    "format-date",
    "format-date-time",
    "position",
    "abs",
    "exp",
    "exp10",
    "log",
    "log10",
    "sqrt",
    "sin",
    "cos",
    "tan",
    "asin",
    "acos",
    "atan",
    "atan2",
    "pi",
    "area",
    "distance",
];

const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Longest token `uuid(n)` generates.
pub const MAX_TOKEN_LENGTH: usize = 1024;

static EXTENSION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    let names = EXTENSION_FUNCTIONS
        .iter()
        .filter(|name| !matches!(**name, "round" | "position"))
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?:^|[^\w.:-])(?:(?:{})\s*\(|position\s*\(\s*[^\s)])",
        names
    ))
    .expect("BUG: invalid EXTENSION_CALL regex")
});

/// True if `expr` calls an extension function, or the one-argument form of `position`.
///
/// A two-argument `round` is not detected: the standard evaluator rejects it by arity,
/// which triggers the fallback anyway.
pub fn contains_extension_call(expr: &str) -> bool {
    EXTENSION_CALL.is_match(expr)
}

pub(crate) fn evaluate<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let value = match name {
        "if" => {
            check_arity(name, &args, 3, 3)?;
            let otherwise = args.remove(2);
            let then = args.remove(1);
            if args.remove(0).to_bool() { then } else { otherwise }
        }
        "coalesce" => {
            check_arity(name, &args, 2, 2)?;
            let second = args.remove(1).to_string();
            let first = args.remove(0).to_string();
            XPathValue::String(if first.is_empty() { second } else { first })
        }
        "selected" => {
            check_arity(name, &args, 2, 2)?;
            let wanted = args.remove(1).to_string();
            let list = args.remove(0).to_string();
            XPathValue::Boolean(list.split_whitespace().any(|item| item == wanted.trim()))
        }
        "selected-at" => {
            check_arity(name, &args, 2, 2)?;
            let index = num(&args.remove(1));
            let list = args.remove(0).to_string();
            let item = if index >= 0.0 {
                list.split_whitespace().nth(index as usize)
            } else {
                None
            };
            XPathValue::String(item.unwrap_or_default().to_string())
        }
        "count-selected" => {
            check_arity(name, &args, 1, 1)?;
            XPathValue::Number(args.remove(0).to_string().split_whitespace().count() as f64)
        }
        "count-non-empty" => {
            check_arity(name, &args, 1, 1)?;
            let nodes = node_set_arg(name, args.remove(0))?;
            let count = nodes
                .iter()
                .filter(|n| !n.string_value().is_empty())
                .count();
            XPathValue::Number(count as f64)
        }
        "join" => {
            check_arity(name, &args, 1, usize::MAX)?;
            let separator = args.remove(0).to_string();
            XPathValue::String(flatten_strings(args).join(&separator))
        }
        "min" | "max" => {
            check_arity(name, &args, 1, usize::MAX)?;
            let numbers: Vec<f64> = flatten_strings(args)
                .iter()
                .map(|s| num(&XPathValue::<N>::String(s.clone())))
                .collect();
            let result = if numbers.is_empty() || numbers.iter().any(|n| n.is_nan()) {
                f64::NAN
            } else if name == "min" {
                numbers.iter().copied().fold(f64::INFINITY, f64::min)
            } else {
                numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            };
            XPathValue::Number(result)
        }
        "int" => {
            check_arity(name, &args, 1, 1)?;
            XPathValue::Number(num(&args.remove(0)).trunc())
        }
        "pow" => {
            check_arity(name, &args, 2, 2)?;
            let exponent = num(&args.remove(1));
            XPathValue::Number(num(&args.remove(0)).powf(exponent))
        }
        "round" => {
            check_arity(name, &args, 1, 2)?;
            let digits = if args.len() == 2 {
                num(&args.remove(1)).trunc()
            } else {
                0.0
            };
            let n = num(&args.remove(0));
            let factor = 10f64.powf(digits);
            XPathValue::Number(xpath_round(n * factor) / factor)
        }
        "substr" => {
            check_arity(name, &args, 2, 3)?;
            let chars: Vec<char> = args[0].to_string().chars().collect();
            let len = chars.len() as f64;
            let clamp = |v: f64| -> usize {
                let v = if v < 0.0 { len + v } else { v };
                v.clamp(0.0, len) as usize
            };
            let start = clamp(num(&args[1]).trunc());
            let end = match args.get(2) {
                Some(end) => clamp(num(end).trunc()),
                None => chars.len(),
            };
            let result: String = if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            };
            XPathValue::String(result)
        }
        "regex" => {
            check_arity(name, &args, 2, 2)?;
            let pattern = args.remove(1).to_string();
            let value = args.remove(0).to_string();
            let re = Regex::new(&pattern).map_err(|e| XPathError::FunctionError {
                function: "regex()".to_string(),
                message: e.to_string(),
            })?;
            XPathValue::Boolean(re.is_match(&value))
        }
        "ends-with" => {
            check_arity(name, &args, 2, 2)?;
            let suffix = args.remove(1).to_string();
            XPathValue::Boolean(args.remove(0).to_string().ends_with(&suffix))
        }
        "boolean-from-string" => {
            check_arity(name, &args, 1, 1)?;
            let s = args.remove(0).to_string();
            XPathValue::Boolean(s == "true" || s == "1")
        }
        "checklist" => {
            check_arity(name, &args, 2, usize::MAX)?;
            let rest = args.split_off(2);
            let trues = rest
                .into_iter()
                .flat_map(|v| flatten_values(v))
                .filter(|v| v.to_bool())
                .count();
            XPathValue::Boolean(within_bounds(trues as f64, &args[0], &args[1]))
        }
        "weighted-checklist" => {
            check_arity(name, &args, 2, usize::MAX)?;
            let rest = args.split_off(2);
            if rest.len() % 2 != 0 {
                return Err(XPathError::arity(name, "value/weight pairs"));
            }
            let mut total = 0.0;
            for pair in rest.chunks(2) {
                if pair[0].to_bool() {
                    total += num(&pair[1]);
                }
            }
            XPathValue::Boolean(within_bounds(total, &args[0], &args[1]))
        }
        "once" => {
            check_arity(name, &args, 1, 1)?;
            let current = e_ctx.context_node.string_value();
            if current.is_empty() {
                args.remove(0)
            } else {
                XPathValue::String(current)
            }
        }
        "uuid" => {
            check_arity(name, &args, 0, 1)?;
            if args.is_empty() {
                XPathValue::String(uuid::Uuid::new_v4().to_string())
            } else {
                let requested = num(&args.remove(0)).max(0.0);
                if requested > MAX_TOKEN_LENGTH as f64 {
                    log::warn!(
                        "uuid({}) exceeds the maximum token length, using {}",
                        requested,
                        MAX_TOKEN_LENGTH
                    );
                }
                let len = requested.min(MAX_TOKEN_LENGTH as f64) as usize;
                let token: String = rand::rng()
                    .sample_iter(rand::distr::Alphanumeric)
                    .take(len)
                    .map(char::from)
                    .collect();
                XPathValue::String(token)
            }
        }
        "random" => {
            check_arity(name, &args, 0, 0)?;
            XPathValue::Number(rand::random::<f64>())
        }
        "today" => {
            check_arity(name, &args, 0, 0)?;
            XPathValue::String(Local::now().format("%Y-%m-%d").to_string())
        }
        "now" => {
            check_arity(name, &args, 0, 0)?;
            XPathValue::String(Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string())
        }
        "date" => {
            check_arity(name, &args, 1, 1)?;
            let value = args.remove(0);
            match to_datetime(&value) {
                Some(dt) => XPathValue::String(dt.format("%Y-%m-%d").to_string()),
                None => {
                    log::debug!("date() could not interpret '{}'", value);
                    XPathValue::String(String::new())
                }
            }
        }
        "decimal-date-time" => {
            check_arity(name, &args, 1, 1)?;
            XPathValue::Number(num(&args.remove(0)))
        }
        "decimal-time" => {
            check_arity(name, &args, 1, 1)?;
            XPathValue::Number(decimal_time(&args.remove(0).to_string()).unwrap_or(f64::NAN))
        }
        "format-date" | "format-date-time" => {
            check_arity(name, &args, 2, 2)?;
            let format = args.remove(1).to_string();
            let formatted = to_datetime(&args.remove(0)).map(|dt| format_datetime(dt, &format));
            XPathValue::String(formatted.unwrap_or_default())
        }
        "position" => {
            check_arity(name, &args, 0, 1)?;
            if args.is_empty() {
                XPathValue::Number(e_ctx.context_position as f64)
            } else {
                let nodes = node_set_arg(name, args.remove(0))?;
                let Some(node) = nodes.first() else {
                    return Err(XPathError::FunctionError {
                        function: "position()".to_string(),
                        message: "Expected a non-empty node-set".to_string(),
                    });
                };
                let name = node.name();
                let preceding = node
                    .parent()
                    .map(|p| {
                        p.children()
                            .take_while(|s| s != node)
                            .filter(|s| s.node_type() == node.node_type() && s.name() == name)
                            .count()
                    })
                    .unwrap_or(0);
                XPathValue::Number((preceding + 1) as f64)
            }
        }
        "abs" | "exp" | "exp10" | "log" | "log10" | "sqrt" | "sin" | "cos" | "tan" | "asin"
        | "acos" | "atan" => {
            check_arity(name, &args, 1, 1)?;
            let n = num(&args.remove(0));
            XPathValue::Number(match name {
                "abs" => n.abs(),
                "exp" => n.exp(),
                "exp10" => 10f64.powf(n),
                "log" => n.ln(),
                "log10" => n.log10(),
                "sqrt" => n.sqrt(),
                "sin" => n.sin(),
                "cos" => n.cos(),
                "tan" => n.tan(),
                "asin" => n.asin(),
                "acos" => n.acos(),
                _ => n.atan(),
            })
        }
        "atan2" => {
            check_arity(name, &args, 2, 2)?;
            let x = num(&args.remove(1));
            XPathValue::Number(num(&args.remove(0)).atan2(x))
        }
        "pi" => {
            check_arity(name, &args, 0, 0)?;
            XPathValue::Number(std::f64::consts::PI)
        }
        "area" | "distance" => {
            check_arity(name, &args, 1, 1)?;
            let points = parse_points(args.remove(0));
            let Some(points) = points else {
                return Ok(XPathValue::Number(f64::NAN));
            };
            XPathValue::Number(if name == "area" {
                polygon_area(&points)
            } else {
                path_distance(&points)
            })
        }
        _ => return Err(XPathError::UnknownFunction(name.to_string())),
    };
    Ok(value)
}

fn num<'a, N: DataSourceNode<'a>>(value: &XPathValue<N>) -> f64 {
    operators::number(value, true)
}

/// Node-set arguments contribute one string per node; other values contribute themselves.
fn flatten_strings<'a, N: DataSourceNode<'a>>(args: Vec<XPathValue<N>>) -> Vec<String> {
    args.into_iter()
        .flat_map(|v| flatten_values(v))
        .map(|v| v.to_string())
        .collect()
}

fn flatten_values<'a, N: DataSourceNode<'a>>(value: XPathValue<N>) -> Vec<XPathValue<N>> {
    match value {
        XPathValue::NodeSet(nodes) => nodes
            .into_iter()
            .map(|n| XPathValue::String(n.string_value()))
            .collect(),
        other => vec![other],
    }
}

/// A bound of -1 means unbounded.
fn within_bounds<'a, N: DataSourceNode<'a>>(
    value: f64,
    min: &XPathValue<N>,
    max: &XPathValue<N>,
) -> bool {
    let min = num(min);
    let max = num(max);
    (min == -1.0 || value >= min) && (max == -1.0 || value <= max)
}

fn epoch() -> NaiveDateTime {
    DateTime::UNIX_EPOCH.naive_utc()
}

/// Reads `YYYY-MM-DD` or an RFC 3339 style datetime (offset optional) as days since the
/// Unix epoch. Date-only values count from midnight.
pub fn date_to_days(s: &str) -> Option<f64> {
    let dt = parse_datetime(s.trim())?;
    let millis = (dt - epoch()).num_milliseconds();
    Some(millis as f64 / 86_400_000.0)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Numbers are days since the epoch, strings are dates or datetimes.
fn to_datetime<'a, N: DataSourceNode<'a>>(value: &XPathValue<N>) -> Option<NaiveDateTime> {
    let days = match value {
        XPathValue::Number(n) => *n,
        other => {
            let s = other.to_string();
            if let Some(dt) = parse_datetime(s.trim()) {
                return Some(dt);
            }
            num(other)
        }
    };
    if !days.is_finite() {
        return None;
    }
    epoch().checked_add_signed(TimeDelta::try_milliseconds(
        (days * 86_400_000.0).round() as i64,
    )?)
}

/// `HH:MM:SS[.sss][offset]` as a fraction of a day. The offset is ignored.
fn decimal_time(s: &str) -> Option<f64> {
    let s = s.trim();
    let clock = s
        .find(['+', '-', 'Z'])
        .map(|i| &s[..i])
        .unwrap_or(s);
    let time = NaiveTime::parse_from_str(clock, "%H:%M:%S%.f").ok()?;
    let seconds = time.num_seconds_from_midnight() as f64 + time.nanosecond() as f64 / 1e9;
    Some(seconds / 86_400.0)
}

/// Expands the OpenRosa `%` tokens of `format-date`.
fn format_datetime(dt: NaiveDateTime, format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(token) = chars.next() else {
            out.push('%');
            break;
        };
        let directive = match token {
            'Y' => "%Y",
            'y' => "%y",
            'm' => "%m",
            'n' => "%-m",
            'b' => "%b",
            'd' => "%d",
            'e' => "%-d",
            'a' => "%a",
            'H' => "%H",
            'h' => "%-H",
            'M' => "%M",
            'S' => "%S",
            '3' => "%3f",
            other => {
                out.push('%');
                out.push(other);
                continue;
            }
        };
        out.push_str(&dt.format(directive).to_string());
    }
    out
}

/// Geopoints as `(lat, lng)` from either a node-set (one point per node) or a
/// `;`-separated string.
fn parse_points<'a, N: DataSourceNode<'a>>(value: XPathValue<N>) -> Option<Vec<(f64, f64)>> {
    let raw: Vec<String> = match value {
        XPathValue::NodeSet(nodes) if nodes.len() > 1 => {
            nodes.iter().map(|n| n.string_value()).collect()
        }
        other => other
            .to_string()
            .split(';')
            .map(|s| s.to_string())
            .collect(),
    };
    raw.iter()
        .map(|p| {
            let mut coords = p.split_whitespace().map(|c| c.parse::<f64>());
            match (coords.next(), coords.next()) {
                (Some(Ok(lat)), Some(Ok(lng))) => Some((lat, lng)),
                _ => None,
            }
        })
        .collect()
}

fn path_distance(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let (lat1, lng1) = (w[0].0.to_radians(), w[0].1.to_radians());
            let (lat2, lng2) = (w[1].0.to_radians(), w[1].1.to_radians());
            let a = ((lat2 - lat1) / 2.0).sin().powi(2)
                + lat1.cos() * lat2.cos() * ((lng2 - lng1) / 2.0).sin().powi(2);
            2.0 * EARTH_RADIUS_M * a.sqrt().asin()
        })
        .sum()
}

/// Spherical excess approximation over a closed ring.
fn polygon_area(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..points.len() {
        let (lat1, lng1) = points[i];
        let (lat2, lng2) = points[(i + 1) % points.len()];
        total += (lng2 - lng1).to_radians()
            * (2.0 + lat1.to_radians().sin() + lat2.to_radians().sin());
    }
    (total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}

/// Renders a day count the way `date()` does, for callers outside the evaluator.
pub fn days_to_date(days: f64) -> Option<String> {
    if !days.is_finite() {
        return None;
    }
    let dt = epoch().checked_add_signed(TimeDelta::try_days(days.floor() as i64)?)?;
    Some(dt.format("%Y-%m-%d").to_string())
}
