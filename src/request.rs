//! Request strings of the form `path[:run[:variation[:time]]]`.
//!
//! Empty fields fall back to their defaults, so `/a/t::mc` asks for run 0 of
//! variation `mc`. Times are written `YYYY[-MM[-DD[-hh[-mm[-ss]]]]]` with any
//! non-digit separators and stand for the end of the period they name:
//! `2024-05` means the last microsecond of May 2024.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::construct::{RunNumber, normalize_path};
use crate::error::{CcdbError, Result};

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"\d+").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub path: String,
    pub run: Option<RunNumber>,
    pub variation: Option<String>,
    pub time: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            run: None,
            variation: None,
            time: None,
        }
    }
    pub fn run_or_default(&self) -> RunNumber {
        self.run.unwrap_or(0)
    }
}

impl FromStr for Request {
    type Err = CcdbError;

    fn from_str(text: &str) -> Result<Self> {
        let mut fields = text.trim().splitn(4, ':');
        let path = fields.next().unwrap_or_default().trim();
        if path.is_empty() {
            return Err(CcdbError::Parse {
                message: format!("request '{}' names no path", text),
                position: Some(0),
            });
        }
        let mut request = Request::new(path);
        let mut position = path.len() + 1;
        if let Some(run) = fields.next() {
            if !run.trim().is_empty() {
                request.run = Some(run.trim().parse().map_err(|_| CcdbError::Parse {
                    message: format!("'{}' is not a run number", run),
                    position: Some(position),
                })?);
            }
            position += run.len() + 1;
        }
        if let Some(variation) = fields.next() {
            if !variation.trim().is_empty() {
                request.variation = Some(variation.trim().to_string());
            }
            position += variation.len() + 1;
        }
        if let Some(time) = fields.next() {
            if !time.trim().is_empty() {
                request.time = Some(parse_time(time).map_err(|e| match e {
                    CcdbError::Parse { message, .. } => CcdbError::Parse {
                        message,
                        position: Some(position),
                    },
                    other => other,
                })?);
            }
        }
        Ok(request)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:", self.path, self.run_or_default())?;
        if let Some(variation) = &self.variation {
            write!(f, "{}", variation)?;
        }
        if let Some(time) = &self.time {
            write!(f, ":{}", time.format("%Y-%m-%d-%H-%M-%S"))?;
        }
        Ok(())
    }
}

/// Reads `YYYY[-MM[-DD[-hh[-mm[-ss]]]]]` as the end of the named period.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let invalid = || CcdbError::Parse {
        message: format!("'{}' is not a time of the form YYYY-MM-DD-hh-mm-ss", text),
        position: None,
    };
    let parts: Vec<u32> = DIGITS
        .find_iter(text)
        .map(|m| m.as_str().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| invalid())?;
    if parts.is_empty() || parts.len() > 6 {
        return Err(invalid());
    }
    let part = |i: usize, default: u32| parts.get(i).copied().unwrap_or(default);
    let start: NaiveDateTime = NaiveDate::from_ymd_opt(parts[0] as i32, part(1, 1), part(2, 1))
        .and_then(|d| d.and_hms_opt(part(3, 0), part(4, 0), part(5, 0)))
        .ok_or_else(invalid)?;
    let next = match parts.len() {
        1 => start.checked_add_months(Months::new(12)),
        2 => start.checked_add_months(Months::new(1)),
        3 => start.checked_add_signed(TimeDelta::days(1)),
        4 => start.checked_add_signed(TimeDelta::hours(1)),
        5 => start.checked_add_signed(TimeDelta::minutes(1)),
        _ => start.checked_add_signed(TimeDelta::seconds(1)),
    }
    .ok_or_else(invalid)?;
    Ok((next - TimeDelta::microseconds(1)).and_utc())
}
