//! Shared model for imaptidy: configuration, mailbox rules and run bookkeeping.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone};

pub mod config;

pub use config::{
    CleanseRule, Config, ConfigError, ConnectionConfig, FlagRule, OptionsFile, Overrides,
    load_options_file, parse_options,
};

/// Sequence number of a message inside the currently selected mailbox.
pub type MessageRef = u32;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Floor for search cutoffs; `date-year` is four digits.
pub const EARLIEST_IMAP_DATE: &str = "01-Jan-0001";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: usize,
    pub mailboxes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    Deleted,
    Flagged,
    Keyword(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Deleted => f.write_str("\\Deleted"),
            Flag::Flagged => f.write_str("\\Flagged"),
            Flag::Keyword(keyword) => f.write_str(keyword),
        }
    }
}

/// Flags applied together to every batch of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet(Vec<Flag>);

impl FlagSet {
    pub fn new(flags: Vec<Flag>) -> Self {
        Self(flags)
    }

    /// STORE item adding the flags without an untagged FETCH echo.
    pub fn store_query(&self) -> String {
        let list = self
            .0
            .iter()
            .map(|flag| flag.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        format!("+FLAGS.SILENT ({})", list)
    }
}

/// Ordered prefix table below a root mailbox.
///
/// The selector keeps a mailbox when `matches` is true and the query strategies
/// look up the per-prefix parameter with `resolve`, so both sides agree on which
/// entry applies. Entries are consulted in declaration order and the first
/// prefix that fits wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxRules<T> {
    root: String,
    entries: Vec<(String, T)>,
}

impl<T> MailboxRules<T> {
    pub fn new(root: &str, entries: Vec<(String, T)>) -> Self {
        Self {
            root: normalize_root(root),
            entries,
        }
    }

    /// Root with its trailing separator, or empty.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(prefix, _)| prefix.as_str())
    }

    pub fn matches(&self, mailbox: &str) -> bool {
        self.resolve(mailbox).is_some()
    }

    pub fn resolve(&self, mailbox: &str) -> Option<(&str, &T)> {
        let relative = mailbox.strip_prefix(self.root.as_str())?;
        self.entries
            .iter()
            .find(|(prefix, _)| relative.starts_with(prefix.as_str()))
            .map(|(prefix, value)| (prefix.as_str(), value))
    }

    /// Keeps only the named prefixes, preserving declaration order.
    pub fn restrict(self, boxes: &[String]) -> Result<Self, ConfigError> {
        if let Some(unknown) = boxes
            .iter()
            .find(|name| !self.entries.iter().any(|(prefix, _)| prefix == *name))
        {
            return Err(ConfigError::UnknownBox(unknown.clone()));
        }
        let entries = self
            .entries
            .into_iter()
            .filter(|(prefix, _)| boxes.contains(prefix))
            .collect();
        Ok(Self {
            root: self.root,
            entries,
        })
    }
}

pub fn normalize_root(root: &str) -> String {
    if root.is_empty() || root.ends_with('/') {
        root.to_string()
    } else {
        format!("{}/", root)
    }
}

/// IMAP search date (`date-text`), e.g. `01-Jan-2024`.
pub fn imap_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format("%d-%b-%Y").to_string()
}

/// Date `age_days` whole days before `now`, in IMAP search form.
///
/// Ages reaching past year 1 clamp to [`EARLIEST_IMAP_DATE`].
pub fn cutoff_date<Tz: TimeZone>(now: &DateTime<Tz>, age_days: u32) -> String
where
    Tz::Offset: fmt::Display,
{
    let age = Duration::seconds(i64::from(age_days) * SECONDS_PER_DAY);
    match now.clone().checked_sub_signed(age) {
        Some(cutoff) if cutoff.year() >= 1 => imap_date(&cutoff),
        _ => EARLIEST_IMAP_DATE.to_string(),
    }
}

/// Splits a comma separated `--boxes` value.
pub fn parse_box_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
