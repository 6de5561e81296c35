use crate::domain::calendar::DateRange;
use crate::domain::identity::{Actor, RequesterIdentity};
use crate::error::{BookingError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Check,
    Quote,
    Create,
    Draft,
    Submit,
    Pay,
    Complete,
    Fail,
    Cancel,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Quote => "quote",
            Self::Create => "create",
            Self::Draft => "draft",
            Self::Submit => "submit",
            Self::Pay => "pay",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }
}

/// One row of a command script.
///
/// `booking` is a label local to the script that later rows use to refer
/// to the reservation created under it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub command: CommandKind,
    #[serde(default)]
    pub booking: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub guests: Option<u32>,
    /// Option ids separated by `;`.
    #[serde(default)]
    pub options: Option<String>,
    /// `user:<id>`, `guest:<email>` or `admin:<id>`.
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CommandRecord {
    pub fn range(&self) -> Result<DateRange> {
        let start = self
            .start
            .ok_or_else(|| BookingError::InvalidRequest("start date is required".to_string()))?;
        match self.end {
            Some(end) => DateRange::new(start, end),
            None => DateRange::single_day(start),
        }
    }

    pub fn option_ids(&self) -> Vec<String> {
        self.options
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn actor(&self) -> Result<Actor> {
        let raw = self
            .requester
            .as_deref()
            .ok_or_else(|| BookingError::InvalidRequest("requester is required".to_string()))?;
        parse_actor(raw)
    }
}

/// Parses `user:<id>`, `guest:<email>` and `admin:<id>`.
pub fn parse_actor(raw: &str) -> Result<Actor> {
    let (kind, value) = raw
        .split_once(':')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| {
            BookingError::InvalidRequest(format!("requester '{}' must be kind:value", raw))
        })?;
    match kind {
        "user" => Ok(Actor::requester(RequesterIdentity::user(value))),
        "admin" => Ok(Actor::admin(RequesterIdentity::user(value))),
        "guest" => {
            let name = value.split('@').next().unwrap_or(value);
            Ok(Actor::requester(RequesterIdentity::guest(name, value, None)))
        }
        other => Err(BookingError::InvalidRequest(format!(
            "unknown requester kind '{}'",
            other
        ))),
    }
}

/// Reads command rows from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted; missing trailing
/// columns read as empty.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a malformed row yields an error and reading continues.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BookingError::from))
    }
}
