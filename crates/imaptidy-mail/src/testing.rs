//! Recording stand-in for an IMAP session.

use imaptidy_core::{FlagSet, MessageRef};

use crate::{MailSession, MailboxEntry, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(String, String),
    Select(String),
    Search(String, String),
    Fetch(String, Vec<MessageRef>, Vec<String>),
    Store(String, Vec<MessageRef>, String),
    Expunge(String),
    Logout,
}

/// Answers searches from canned `(mailbox, query)` responses and records every
/// call together with the mailbox selected at the time.
#[derive(Debug, Default)]
pub struct FakeSession {
    pub mailboxes: Vec<String>,
    pub noselect: Vec<String>,
    pub fail_select: Vec<String>,
    pub calls: Vec<Call>,
    responses: Vec<(String, String, Vec<MessageRef>)>,
    headers: Vec<(String, MessageRef, String)>,
    selected: String,
}

impl FakeSession {
    pub fn with_mailboxes(names: &[&str]) -> Self {
        Self {
            mailboxes: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn respond(&mut self, mailbox: &str, query: &str, refs: Vec<MessageRef>) {
        self.responses
            .push((mailbox.to_string(), query.to_string(), refs));
    }

    pub fn header(&mut self, mailbox: &str, seq: MessageRef, raw: &str) {
        self.headers
            .push((mailbox.to_string(), seq, raw.to_string()));
    }

    pub fn selected(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Select(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn store_sizes(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Store(_, refs, _) => Some(refs.len()),
                _ => None,
            })
            .collect()
    }
}

impl MailSession for FakeSession {
    fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<MailboxEntry>> {
        self.calls
            .push(Call::List(reference.to_string(), pattern.to_string()));
        Ok(self
            .mailboxes
            .iter()
            .filter(|name| name.starts_with(reference))
            .map(|name| MailboxEntry {
                name: name.clone(),
                selectable: !self.noselect.contains(name),
            })
            .collect())
    }

    fn select(&mut self, mailbox: &str) -> Result<()> {
        if self.fail_select.iter().any(|m| m == mailbox) {
            return Err(imap::Error::Io(std::io::Error::other("NO no such mailbox")).into());
        }
        self.calls.push(Call::Select(mailbox.to_string()));
        self.selected = mailbox.to_string();
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<MessageRef>> {
        self.calls
            .push(Call::Search(self.selected.clone(), query.to_string()));
        Ok(self
            .responses
            .iter()
            .find(|(mailbox, q, _)| *mailbox == self.selected && q == query)
            .map(|(_, _, refs)| refs.clone())
            .unwrap_or_default())
    }

    fn fetch_headers(
        &mut self,
        refs: &[MessageRef],
        fields: &[&str],
    ) -> Result<Vec<(MessageRef, Vec<u8>)>> {
        self.calls.push(Call::Fetch(
            self.selected.clone(),
            refs.to_vec(),
            fields.iter().map(|f| f.to_string()).collect(),
        ));
        Ok(refs
            .iter()
            .map(|seq| {
                let raw = self
                    .headers
                    .iter()
                    .find(|(mailbox, s, _)| *mailbox == self.selected && s == seq)
                    .map(|(_, _, raw)| raw.as_bytes().to_vec())
                    .unwrap_or_default();
                (*seq, raw)
            })
            .collect())
    }

    fn store(&mut self, refs: &[MessageRef], flags: &FlagSet) -> Result<()> {
        self.calls.push(Call::Store(
            self.selected.clone(),
            refs.to_vec(),
            flags.store_query(),
        ));
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        self.calls.push(Call::Expunge(self.selected.clone()));
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.calls.push(Call::Logout);
        Ok(())
    }
}
