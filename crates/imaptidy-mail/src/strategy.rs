use chrono::{DateTime, FixedOffset};
use imaptidy_core::{Flag, FlagSet, MailboxRules, MessageRef, cutoff_date};
use tracing::info;

use crate::maintenance::find_mailboxes;
use crate::{MailError, MailSession, Result, quote};

/// Keyword set next to `\Flagged` so a message the user unflags again is
/// not flagged a second time.
pub const AUTO_FLAG_KEYWORD: &str = "IMAPFLAG_AUTO_FLAGGED";

const MESSAGE_ID: &str = "MESSAGE-ID";

/// How a pass decides which messages of the selected mailbox to touch.
#[derive(Debug, Clone)]
pub enum QueryStrategy {
    Cleanse(CleanseQuery),
    Flag(FlagQuery),
}

impl QueryStrategy {
    pub fn description(&self) -> &'static str {
        match self {
            QueryStrategy::Cleanse(_) => "Cleansing read, unflagged old messages",
            QueryStrategy::Flag(_) => "Flagging messages",
        }
    }

    pub fn flags(&self) -> FlagSet {
        match self {
            QueryStrategy::Cleanse(_) => FlagSet::new(vec![Flag::Deleted]),
            QueryStrategy::Flag(_) => FlagSet::new(vec![
                Flag::Flagged,
                Flag::Keyword(AUTO_FLAG_KEYWORD.to_string()),
            ]),
        }
    }

    pub fn find_mailboxes<S>(&self, session: &mut S) -> Result<Vec<String>>
    where
        S: MailSession + ?Sized,
    {
        match self {
            QueryStrategy::Cleanse(query) => find_mailboxes(session, &query.rules),
            QueryStrategy::Flag(query) => find_mailboxes(session, &query.rules),
        }
    }

    /// Messages to mark in `mailbox`, which must be the selected mailbox.
    pub fn find_messages<S>(&self, session: &mut S, mailbox: &str) -> Result<Vec<MessageRef>>
    where
        S: MailSession + ?Sized,
    {
        match self {
            QueryStrategy::Cleanse(query) => query.find_messages(session, mailbox),
            QueryStrategy::Flag(query) => query.find_messages(session, mailbox),
        }
    }
}

/// Read, unflagged messages older than the per-prefix age.
#[derive(Debug, Clone)]
pub struct CleanseQuery {
    rules: MailboxRules<u32>,
    now: DateTime<FixedOffset>,
}

impl CleanseQuery {
    pub fn new(rules: MailboxRules<u32>, now: DateTime<FixedOffset>) -> Self {
        Self { rules, now }
    }

    pub fn search_query(&self, age_days: u32) -> String {
        format!(
            "NOT NEW NOT FLAGGED BEFORE {}",
            cutoff_date(&self.now, age_days)
        )
    }

    fn find_messages<S>(&self, session: &mut S, mailbox: &str) -> Result<Vec<MessageRef>>
    where
        S: MailSession + ?Sized,
    {
        let (_, age) = resolve(&self.rules, mailbox)?;
        search(session, &self.search_query(*age), "read, unflagged messages")
    }
}

/// Messages from a conversation the user took part in: answered ones, ones
/// the user wrote, and replies to those.
#[derive(Debug, Clone)]
pub struct FlagQuery {
    rules: MailboxRules<Vec<String>>,
}

impl FlagQuery {
    pub fn new(rules: MailboxRules<Vec<String>>) -> Self {
        Self { rules }
    }

    /// Sub-query results are concatenated without deduplication.
    fn find_messages<S>(&self, session: &mut S, mailbox: &str) -> Result<Vec<MessageRef>>
    where
        S: MailSession + ?Sized,
    {
        let (_, addresses) = resolve(&self.rules, mailbox)?;
        let mut messages = answered(session)?;
        messages.extend(written_by(session, addresses)?);
        messages.extend(responses_to(session, addresses)?);
        Ok(messages)
    }
}

fn not_auto_flagged() -> String {
    format!("NOT FLAGGED NOT KEYWORD {}", AUTO_FLAG_KEYWORD)
}

fn answered<S>(session: &mut S) -> Result<Vec<MessageRef>>
where
    S: MailSession + ?Sized,
{
    search(
        session,
        &format!("ANSWERED {}", not_auto_flagged()),
        "answered messages",
    )
}

fn written_by<S>(session: &mut S, addresses: &[String]) -> Result<Vec<MessageRef>>
where
    S: MailSession + ?Sized,
{
    let mut messages = Vec::new();
    for address in addresses {
        messages.extend(search(
            session,
            &format!("FROM {} {}", quote(address), not_auto_flagged()),
            &format!("messages by {}", address),
        )?);
    }
    Ok(messages)
}

fn responses_to<S>(session: &mut S, addresses: &[String]) -> Result<Vec<MessageRef>>
where
    S: MailSession + ?Sized,
{
    info!("  Scanning for responses to messages I wrote");
    let mut mine = Vec::new();
    for address in addresses {
        mine.extend(session.search(&format!("FROM {}", quote(address)))?);
    }
    if mine.is_empty() {
        info!("    Found 0 messages");
        return Ok(Vec::new());
    }

    let headers = session.fetch_headers(&mine, &[MESSAGE_ID])?;
    let mut messages = Vec::new();
    for (_, raw) in headers {
        let Some(id) = message_id(&raw) else {
            continue;
        };
        messages.extend(session.search(&format!(
            "HEADER In-Reply-To {} {}",
            quote(&id),
            not_auto_flagged()
        ))?);
    }
    info!("    Found {} messages", messages.len());
    Ok(messages)
}

/// Bare Message-Id value out of a fetched header block.
fn message_id(raw: &[u8]) -> Option<String> {
    let (headers, _) = mailparse::parse_headers(raw).ok()?;
    headers
        .iter()
        .find(|header| header.get_key_ref().eq_ignore_ascii_case(MESSAGE_ID))
        .map(|header| header.get_value().trim().to_string())
        .filter(|id| !id.is_empty())
}

fn search<S>(session: &mut S, query: &str, what: &str) -> Result<Vec<MessageRef>>
where
    S: MailSession + ?Sized,
{
    info!("  Scanning for {}", what);
    let messages = session.search(query)?;
    info!("    Found {} messages", messages.len());
    Ok(messages)
}

fn resolve<'a, T>(rules: &'a MailboxRules<T>, mailbox: &str) -> Result<(&'a str, &'a T)> {
    rules
        .resolve(mailbox)
        .ok_or_else(|| MailError::NoMatchingPrefix {
            mailbox: mailbox.to_string(),
        })
}
