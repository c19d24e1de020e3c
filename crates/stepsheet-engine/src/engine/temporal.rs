//! Datetime and timedelta parsing and rendering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use std::sync::OnceLock;

/// Candidate formats tried, in order, when inferring a column's format.
pub const DEFAULT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%b %d %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%Y%m%d",
];

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// Parse with a single `strftime` format, accepting date-only formats.
pub fn parse_with_format(text: &str, format: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parse a datetime by trying every candidate format, then RFC 3339.
pub fn parse_datetime<S: AsRef<str>>(text: &str, formats: &[S]) -> Option<NaiveDateTime> {
    formats
        .iter()
        .find_map(|f| parse_with_format(text, f.as_ref()))
        .or_else(|| {
            DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// The first candidate format that parses every non-empty value, if any.
pub fn infer_datetime_format<'a, S: AsRef<str>>(
    values: impl IntoIterator<Item = &'a str> + Clone,
    formats: &[S],
) -> Option<String> {
    let mut non_empty = values.clone().into_iter().filter(|v| !v.trim().is_empty()).peekable();
    non_empty.peek()?;
    formats
        .iter()
        .map(AsRef::as_ref)
        .find(|format| {
            values
                .clone()
                .into_iter()
                .filter(|v| !v.trim().is_empty())
                .all(|v| parse_with_format(v, format).is_some())
        })
        .map(str::to_string)
}

/// Seconds since the Unix epoch; `None` outside the nanosecond range
/// pandas timestamps can represent.
pub fn datetime_from_seconds(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let nanos = seconds * NANOS_PER_SECOND as f64;
    if nanos < i64::MIN as f64 || nanos >= i64::MAX as f64 {
        return None;
    }
    Some(DateTime::from_timestamp_nanos(nanos as i64).naive_utc())
}

/// Nanoseconds since the Unix epoch.
pub fn datetime_to_nanos(dt: &NaiveDateTime) -> Option<i64> {
    dt.and_utc().timestamp_nanos_opt()
}

pub fn timedelta_from_seconds(seconds: f64) -> Option<TimeDelta> {
    if !seconds.is_finite() || seconds.abs() >= i64::MAX as f64 / 1_000.0 {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * NANOS_PER_SECOND as f64).round() as i64;
    let (whole, nanos) = if nanos >= NANOS_PER_SECOND {
        (whole as i64 + 1, 0)
    } else {
        (whole as i64, nanos)
    };
    TimeDelta::new(whole, nanos as u32)
}

pub fn timedelta_total_seconds(td: &TimeDelta) -> f64 {
    td.num_seconds() as f64 + td.subsec_nanos() as f64 / NANOS_PER_SECOND as f64
}

fn clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?<days>-?\d+)\s+days?,?\s*)?(?<sign>[+-])?(?<h>\d+):(?<m>\d{2}):(?<s>\d{2}(?:\.\d+)?)$")
            .expect("timedelta clock regex must compile")
    })
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?<n>-?\d+(?:\.\d+)?)\s*(?<unit>[A-Za-z]+)?$").expect("timedelta unit regex must compile")
    })
}

/// Parse `N days HH:MM:SS[.f]`, `HH:MM:SS`, or a number with a unit suffix.
pub fn parse_timedelta(text: &str) -> Option<TimeDelta> {
    let text = text.trim();
    if let Some(caps) = clock_re().captures(text) {
        let days: f64 = caps.name("days").map_or(Ok(0.0), |d| d.as_str().parse()).ok()?;
        let hours: f64 = caps["h"].parse().ok()?;
        let minutes: f64 = caps["m"].parse().ok()?;
        let seconds: f64 = caps["s"].parse().ok()?;
        let mut clock = hours * 3600.0 + minutes * 60.0 + seconds;
        if caps.name("sign").is_some_and(|s| s.as_str() == "-") {
            clock = -clock;
        }
        return timedelta_from_seconds(days * SECONDS_PER_DAY as f64 + clock);
    }
    if let Some(caps) = unit_re().captures(text) {
        let n: f64 = caps["n"].parse().ok()?;
        let unit = caps.name("unit").map_or("s", |u| u.as_str()).to_ascii_lowercase();
        let scale = match unit.as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
            "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3600.0,
            "d" | "day" | "days" => SECONDS_PER_DAY as f64,
            "w" | "week" | "weeks" => 7.0 * SECONDS_PER_DAY as f64,
            _ => return None,
        };
        return timedelta_from_seconds(n * scale);
    }
    None
}

/// Render a datetime the way `strftime('%Y-%m-%d %X')` does.
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render a timedelta the way pandas prints one (`1 days 02:03:04`,
/// `-1 days +23:59:59`).
pub fn format_timedelta(td: &TimeDelta) -> String {
    let total_seconds = td.num_seconds() - i64::from(td.subsec_nanos() < 0);
    let nanos = td.subsec_nanos().rem_euclid(NANOS_PER_SECOND as i32);
    let days = total_seconds.div_euclid(SECONDS_PER_DAY);
    let rem = total_seconds.rem_euclid(SECONDS_PER_DAY);
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    let sign = if days < 0 { "+" } else { "" };
    let mut out = format!("{} days {}{:02}:{:02}:{:02}", days, sign, h, m, s);
    if nanos != 0 {
        if nanos % 1_000 == 0 {
            out.push_str(&format!(".{:06}", nanos / 1_000));
        } else {
            out.push_str(&format!(".{:09}", nanos));
        }
    }
    out
}
