//! Date and time coercions.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::core::value::Cell;

/// A timestamp parsed from text, with or without an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTimestamp {
    Aware(DateTime<Utc>),
    Naive(NaiveDateTime),
}

impl ParsedTimestamp {
    /// Naive instants are read as UTC.
    pub fn to_utc(self) -> DateTime<Utc> {
        match self {
            ParsedTimestamp::Aware(dt) => dt,
            ParsedTimestamp::Naive(n) => n.and_utc(),
        }
    }

    /// Aware instants are shifted to UTC before dropping the offset.
    pub fn to_naive_utc(self) -> NaiveDateTime {
        match self {
            ParsedTimestamp::Aware(dt) => dt.naive_utc(),
            ParsedTimestamp::Naive(n) => n,
        }
    }
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse ISO-like timestamp text: RFC 3339, the PostgreSQL text form
/// (`2024-01-01 10:00:00+00`), Django's SQLite form, or a bare date.
pub fn parse_timestamp(text: &str) -> Option<ParsedTimestamp> {
    let s = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ParsedTimestamp::Aware(dt.with_timezone(&Utc)));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(ParsedTimestamp::Aware(dt.with_timezone(&Utc)));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ParsedTimestamp::Naive(n));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| ParsedTimestamp::Naive(midnight(d)))
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

pub(super) fn to_timestamp(cell: Cell) -> Cell {
    match cell {
        Cell::Timestamp(ts) => Cell::Timestamp(ts),
        Cell::TimestampTz(ts) => Cell::Timestamp(ts.naive_utc()),
        Cell::Date(d) => Cell::Timestamp(midnight(d)),
        Cell::Text(s) => match parse_timestamp(&s) {
            Some(p) => Cell::Timestamp(p.to_naive_utc()),
            None => Cell::Text(s),
        },
        other => other,
    }
}

pub(super) fn to_timestamptz(cell: Cell) -> Cell {
    match cell {
        Cell::TimestampTz(ts) => Cell::TimestampTz(ts),
        Cell::Timestamp(ts) => Cell::TimestampTz(ts.and_utc()),
        Cell::Date(d) => Cell::TimestampTz(midnight(d).and_utc()),
        Cell::Text(s) => match parse_timestamp(&s) {
            Some(p) => Cell::TimestampTz(p.to_utc()),
            None => Cell::Text(s),
        },
        other => other,
    }
}

pub(super) fn to_date(cell: Cell) -> Cell {
    match cell {
        Cell::Date(d) => Cell::Date(d),
        Cell::Timestamp(ts) => Cell::Date(ts.date()),
        Cell::TimestampTz(ts) => Cell::Date(ts.date_naive()),
        Cell::Text(s) => match parse_timestamp(&s) {
            Some(p) => Cell::Date(p.to_naive_utc().date()),
            None => Cell::Text(s),
        },
        other => other,
    }
}

pub(super) fn to_time(cell: Cell) -> Cell {
    match cell {
        Cell::Time(t) => Cell::Time(t),
        Cell::Timestamp(ts) => Cell::Time(ts.time()),
        Cell::TimestampTz(ts) => Cell::Time(ts.naive_utc().time()),
        Cell::Text(s) => {
            let trimmed = s.trim();
            match NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            {
                Ok(t) => Cell::Time(t),
                Err(_) => Cell::Text(s),
            }
        }
        other => other,
    }
}
