// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsing of sshd authentication log lines into [`FailedConnEvent`]s.
//!
//! A [`Parser`] holds an ordered list of [`Dialect`]s, one per supported log
//! format. Each dialect pairs a regular expression with the layout of the
//! timestamp it captures. Dialects are tried in order and the first one whose
//! pattern matches decides the outcome of the line: if one of its captured
//! fields does not parse, the line is [`ParseError::WrongFormat`] and later
//! dialects are not consulted.
//!
//! Classic syslog timestamps carry no year. The year is synthesised the same
//! way for every yearless layout: the most recent year, not after the current
//! one, in which the timestamp is a valid date no more than one day ahead of
//! the reference clock. A `Dec 31` line read on `Jan 1` therefore lands in the
//! previous year, and `Feb 29` lands in the last leap year.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::ParseError;
use crate::event::{FailedConnEvent, SourceAddress};

/// Capture groups every dialect pattern must define.
pub const REQUIRED_CAPTURES: [&str; 4] = ["ts", "user", "addr", "port"];

// How far back year synthesis looks for a valid date. Eight years always
// contains a leap year.
const MAX_YEAR_LOOKBACK: i32 = 8;

const SYSLOG_LAYOUT: &str = "%Y %b %d %H:%M:%S";

// Shared tail of every built-in pattern: the event keyword and the captured
// username, source address and source port.
const ATTEMPT_PATTERN: &str = r"\s.*?(?:Invalid user|Failed password for(?: invalid user)?) (?P<user>\S+) from (?P<addr>\S+) port (?P<port>\S+)(?:\s.*)?$";

const ISO8601_TS_PATTERN: &str =
    r"^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)";

const SYSLOG_TS_PATTERN: &str = r"^(?P<ts>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})";

#[allow(clippy::expect_used)]
fn builtin_pattern(ts_pattern: &str) -> Regex {
    Regex::new(&format!("{ts_pattern}{ATTEMPT_PATTERN}")).expect("invalid built-in dialect pattern")
}

lazy_static! {
    static ref ISO8601_PATTERN: Regex = builtin_pattern(ISO8601_TS_PATTERN);
    static ref SYSLOG_PATTERN: Regex = builtin_pattern(SYSLOG_TS_PATTERN);
}

#[derive(Debug, thiserror::Error)]
pub enum DialectError {
    #[error("invalid dialect pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("dialect pattern is missing the `{0}` capture group")]
    MissingCapture(&'static str),
}

/// How the `ts` capture of a dialect is turned into a UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampLayout {
    /// RFC 3339 / ISO 8601 with optional fractional seconds and optional
    /// offset. Values without an offset are taken as UTC.
    Iso8601,
    /// `Mon _2 HH:MM:SS`, taken as UTC, with a synthesised year.
    Syslog,
}

impl TimestampLayout {
    fn parse(self, token: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Iso8601 => parse_iso8601(token),
            Self::Syslog => {
                let normalized = token.split_whitespace().collect::<Vec<_>>().join(" ");
                synthesize_year(&normalized, SYSLOG_LAYOUT, now)
            }
        }
    }
}

fn parse_iso8601(token: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(token) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Completes a yearless timestamp. `layout` must start with `%Y `.
fn synthesize_year(token: &str, layout: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let horizon = now + Duration::days(1);
    (0..MAX_YEAR_LOOKBACK)
        .map(|back| now.year() - back)
        .filter_map(|year| NaiveDateTime::parse_from_str(&format!("{year} {token}"), layout).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .find(|ts| *ts <= horizon)
}

/// One supported log line convention.
#[derive(Debug, Clone)]
pub struct Dialect {
    name: String,
    pattern: Regex,
    layout: TimestampLayout,
}

impl Dialect {
    /// Builds a custom dialect. The pattern must define the capture groups
    /// listed in [`REQUIRED_CAPTURES`].
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        layout: TimestampLayout,
    ) -> Result<Self, DialectError> {
        let pattern = Regex::new(pattern)?;
        let names: Vec<&str> = pattern.capture_names().flatten().collect();
        if let Some(missing) = REQUIRED_CAPTURES.into_iter().find(|c| !names.contains(c)) {
            return Err(DialectError::MissingCapture(missing));
        }
        Ok(Self {
            name: name.into(),
            pattern,
            layout,
        })
    }

    /// rsyslog high precision format, e.g. `2023-06-01T10:15:30.000Z host sshd[1]: ...`
    pub fn iso8601() -> Self {
        Self {
            name: "iso8601".to_string(),
            pattern: ISO8601_PATTERN.clone(),
            layout: TimestampLayout::Iso8601,
        }
    }

    /// Traditional syslog format, e.g. `Jun  1 10:15:30 host sshd[1]: ...`
    pub fn syslog() -> Self {
        Self {
            name: "syslog".to_string(),
            pattern: SYSLOG_PATTERN.clone(),
            layout: TimestampLayout::Syslog,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> TimestampLayout {
        self.layout
    }
}

/// Maps raw log lines to failed connection events.
#[derive(Debug, Clone)]
pub struct Parser {
    dialects: Vec<Dialect>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::with_dialects(vec![Dialect::iso8601(), Dialect::syslog()])
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialects(dialects: Vec<Dialect>) -> Self {
        Self { dialects }
    }

    pub fn dialects(&self) -> &[Dialect] {
        &self.dialects
    }

    pub fn parse(&self, line: &str) -> Result<FailedConnEvent, ParseError> {
        self.parse_at(line, Utc::now())
    }

    /// Parses a raw line as read from the log file.
    pub fn parse_bytes(&self, line: &[u8]) -> Result<FailedConnEvent, ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;
        self.parse(line)
    }

    /// Parses `line`, using `now` as the reference clock for year synthesis.
    pub fn parse_at(&self, line: &str, now: DateTime<Utc>) -> Result<FailedConnEvent, ParseError> {
        let (dialect, captures) = self
            .dialects
            .iter()
            .find_map(|d| d.pattern.captures(line).map(|c| (d, c)))
            .ok_or(ParseError::WrongFormat)?;

        let field = |name: &str| {
            captures
                .name(name)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .ok_or(ParseError::WrongFormat)
        };

        let port = field("port")?
            .parse::<u16>()
            .map_err(|_| ParseError::WrongFormat)?;
        let timestamp = dialect
            .layout
            .parse(field("ts")?, now)
            .ok_or(ParseError::WrongFormat)?;

        Ok(FailedConnEvent::new(
            field("user")?,
            SourceAddress::parse(field("addr")?),
            port,
            timestamp,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::UNKNOWN_COUNTRY;
    use std::net::{IpAddr, Ipv4Addr};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_iso8601_invalid_user() {
        let parser = Parser::new();
        let event = parser
            .parse_at(
                "2023-06-01T10:15:30.000Z host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
                now(),
            )
            .unwrap();

        assert_eq!(event.username, "bob");
        assert_eq!(
            event.address,
            SourceAddress::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
        );
        assert_eq!(event.port, 2222);
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2023, 6, 1, 10, 15, 30).unwrap()
        );
        assert_eq!(event.country.as_str(), UNKNOWN_COUNTRY);
    }

    #[test]
    fn test_parse_iso8601_offsets_normalized_to_utc() {
        let parser = Parser::new();
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 8, 15, 30).unwrap();
        for ts in [
            "2023-06-01T10:15:30.123456+02:00",
            "2023-06-01T10:15:30+0200",
            "2023-06-01T08:15:30",
        ] {
            let line = format!("{ts} host sshd[77]: Invalid user bob from 10.0.0.5 port 2222");
            let event = parser.parse_at(&line, now()).unwrap();
            assert_eq!(
                event.timestamp.timestamp(),
                expected.timestamp(),
                "timestamp {ts} should normalize to {expected}"
            );
        }
    }

    #[test]
    fn test_parse_syslog_failed_password() {
        let parser = Parser::new();
        let event = parser
            .parse_at(
                "Jun  1 10:15:30 host sshd[1]: Failed password for root from 192.168.1.9 port 50022 ssh2",
                now(),
            )
            .unwrap();

        assert_eq!(event.username, "root");
        assert_eq!(event.address.to_string(), "192.168.1.9");
        assert_eq!(event.port, 50022);
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 15, 30).unwrap()
        );
    }

    #[test]
    fn test_parse_failed_password_for_invalid_user() {
        let parser = Parser::new();
        let event = parser
            .parse_at(
                "Jun 14 03:04:05 host sshd[9]: Failed password for invalid user admin from 203.0.113.7 port 41000 ssh2",
                now(),
            )
            .unwrap();
        assert_eq!(event.username, "admin");
        assert_eq!(event.port, 41000);
    }

    #[test]
    fn test_dialects_agree_on_same_attempt() {
        let parser = Parser::new();
        let iso = parser
            .parse_at(
                "2023-06-01T10:15:30.000Z ... Invalid user bob from 10.0.0.5 port 2222",
                now(),
            )
            .unwrap();
        let syslog = parser
            .parse_at(
                "Jun  1 10:15:30 host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
                now(),
            )
            .unwrap();

        assert_eq!(iso.username, syslog.username);
        assert_eq!(iso.address, syslog.address);
        assert_eq!(iso.port, syslog.port);
    }

    #[test]
    fn test_non_matching_lines_are_wrong_format() {
        let parser = Parser::new();
        for line in [
            "",
            "garbage",
            "Jun  1 10:15:30 host sshd[1]: Accepted publickey for bob from 10.0.0.5 port 2222 ssh2",
            "Jun  1 10:15:30 host sshd[1]: Connection closed by 10.0.0.5 port 2222 [preauth]",
            "Jun  1 10:15:30 host sshd[1]: Invalid user  from 10.0.0.5 port 2222",
            "host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
            "Invalid user bob from 10.0.0.5 port 2222",
        ] {
            assert_eq!(
                parser.parse_at(line, now()),
                Err(ParseError::WrongFormat),
                "line {line:?} should not parse"
            );
        }
    }

    #[test]
    fn test_bad_port_is_wrong_format() {
        let parser = Parser::new();
        for port in ["abc", "65536", "-1", "22x"] {
            let line = format!("Jun  1 10:15:30 host sshd[1]: Invalid user bob from 10.0.0.5 port {port}");
            assert_eq!(parser.parse_at(&line, now()), Err(ParseError::WrongFormat));
        }
    }

    #[test]
    fn test_bad_timestamp_is_wrong_format() {
        let parser = Parser::new();
        for line in [
            "2023-13-01T10:15:30Z host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
            "Jux  1 10:15:30 host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
            "Jun 31 10:15:30 host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
        ] {
            assert_eq!(parser.parse_at(line, now()), Err(ParseError::WrongFormat));
        }
    }

    #[test]
    fn test_unparsed_address_is_preserved() {
        let parser = Parser::new();
        let event = parser
            .parse_at(
                "Jun  1 10:15:30 host sshd[1]: Invalid user bob from not-an-ip port 2222",
                now(),
            )
            .unwrap();
        assert_eq!(
            event.address,
            SourceAddress::Unparsed("not-an-ip".to_string())
        );
    }

    #[test]
    fn test_ipv6_address() {
        let parser = Parser::new();
        let event = parser
            .parse_at(
                "Jun  1 10:15:30 host sshd[1]: Invalid user bob from 2001:db8::1 port 2222",
                now(),
            )
            .unwrap();
        assert_eq!(event.address.ip(), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_year_synthesis_uses_current_year() {
        let parser = Parser::new();
        let event = parser
            .parse_at(
                "Jul 15 11:59:00 host sshd[1]: Invalid user bob from 10.0.0.5 port 22",
                now(),
            )
            .unwrap();
        assert_eq!(event.timestamp.year(), 2024);

        // Within the one day tolerance for clock skew.
        let event = parser
            .parse_at(
                "Jul 16 06:00:00 host sshd[1]: Invalid user bob from 10.0.0.5 port 22",
                now(),
            )
            .unwrap();
        assert_eq!(event.timestamp.year(), 2024);
    }

    #[test]
    fn test_year_synthesis_rolls_back_future_dates() {
        let parser = Parser::new();
        let new_year = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let event = parser
            .parse_at(
                "Dec 31 23:59:58 host sshd[1]: Invalid user bob from 10.0.0.5 port 22",
                new_year,
            )
            .unwrap();
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap()
        );
    }

    #[test]
    fn test_year_synthesis_leap_day() {
        let parser = Parser::new();
        let reference = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let event = parser
            .parse_at(
                "Feb 29 10:00:00 host sshd[1]: Invalid user bob from 10.0.0.5 port 22",
                reference,
            )
            .unwrap();
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        let parser = Parser::new();
        assert_eq!(
            parser.parse_bytes(b"Jun  1 10:15:30 host sshd[1]: Invalid user \xff from 10.0.0.5 port 22"),
            Err(ParseError::InvalidEncoding)
        );
        assert_eq!(parser.parse_bytes(b"hello"), Err(ParseError::WrongFormat));
    }

    #[test]
    fn test_custom_dialect() {
        let dialect = Dialect::new(
            "bracketed",
            r"^\[(?P<ts>[^\]]+)\] auth failure user=(?P<user>\S+) ip=(?P<addr>\S+) port=(?P<port>\d+)$",
            TimestampLayout::Iso8601,
        )
        .unwrap();
        assert_eq!(dialect.name(), "bracketed");

        let parser = Parser::with_dialects(vec![dialect]);
        let event = parser
            .parse_at(
                "[2023-06-01T10:15:30Z] auth failure user=eve ip=10.1.1.1 port=22",
                now(),
            )
            .unwrap();
        assert_eq!(event.username, "eve");

        // Built-in formats are not known to this parser.
        assert_eq!(
            parser.parse_at(
                "Jun  1 10:15:30 host sshd[1]: Invalid user bob from 10.0.0.5 port 2222",
                now()
            ),
            Err(ParseError::WrongFormat)
        );
    }

    #[test]
    fn test_custom_dialect_requires_captures() {
        let result = Dialect::new("broken", r"^(?P<ts>\S+) (?P<user>\S+)$", TimestampLayout::Syslog);
        assert!(matches!(result, Err(DialectError::MissingCapture("addr"))));

        let result = Dialect::new("broken", r"(", TimestampLayout::Syslog);
        assert!(matches!(result, Err(DialectError::Regex(_))));
    }

    #[test]
    fn test_default_dialect_order() {
        let parser = Parser::default();
        let names: Vec<&str> = parser.dialects().iter().map(Dialect::name).collect();
        assert_eq!(names, vec!["iso8601", "syslog"]);
        assert_eq!(parser.dialects()[1].layout(), TimestampLayout::Syslog);
    }
}
