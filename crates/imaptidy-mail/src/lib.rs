//! IMAP side of imaptidy: session seam, connection bootstrap and the maintenance passes.

use std::io::{Read, Write};

use imap::{ClientBuilder, ConnectionMode};
use imaptidy_core::{ConnectionConfig, FlagSet, MessageRef};
use tracing::{debug, info};

mod maintenance;
mod strategy;
#[cfg(test)]
mod testing;

pub use maintenance::{STORE_CHUNK_SIZE, find_mailboxes, mark, run, run_strategy};
pub use strategy::{AUTO_FLAG_KEYWORD, CleanseQuery, FlagQuery, QueryStrategy};

pub type Result<T, E = MailError> = std::result::Result<T, E>;

/// Mechanisms this client can answer challenges for, most preferred first.
pub const SUPPORTED_AUTH: &[&str] = &["PLAIN", "LOGIN"];

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("couldn't find a supported auth type")]
    NoSupportedAuth,
    #[error("server does not advertise AUTH={0}")]
    AuthNotAdvertised(String),
    #[error("auth type {0} is not supported by this client")]
    UnsupportedAuth(String),
    #[error("mailbox {mailbox:?} does not match any configured prefix")]
    NoMatchingPrefix { mailbox: String },
    #[error(transparent)]
    Imap(#[from] imap::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    pub name: String,
    pub selectable: bool,
}

/// Operations the maintenance passes need from an authenticated IMAP session.
///
/// Sequence numbers are only valid for the mailbox most recently passed to
/// `select`.
pub trait MailSession {
    fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<MailboxEntry>>;
    fn select(&mut self, mailbox: &str) -> Result<()>;
    fn search(&mut self, query: &str) -> Result<Vec<MessageRef>>;
    /// Raw header block per message for the given header field names.
    fn fetch_headers(
        &mut self,
        refs: &[MessageRef],
        fields: &[&str],
    ) -> Result<Vec<(MessageRef, Vec<u8>)>>;
    fn store(&mut self, refs: &[MessageRef], flags: &FlagSet) -> Result<()>;
    fn expunge(&mut self) -> Result<()>;
    fn logout(&mut self) -> Result<()>;
}

impl<T: Read + Write> MailSession for imap::Session<T> {
    fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<MailboxEntry>> {
        let names = imap::Session::list(self, Some(reference), Some(pattern))?;
        debug!("imap_list reference={} raw_count={}", reference, names.len());
        Ok(names
            .iter()
            .map(|name| MailboxEntry {
                name: name.name().to_string(),
                selectable: !name
                    .attributes()
                    .iter()
                    .any(|attr| matches!(attr, imap_proto::NameAttribute::NoSelect)),
            })
            .collect())
    }

    fn select(&mut self, mailbox: &str) -> Result<()> {
        let selected = imap::Session::select(self, mailbox)?;
        debug!("imap_select mailbox={} exists={}", mailbox, selected.exists);
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<MessageRef>> {
        debug!("imap_search query={}", query);
        let found = imap::Session::search(self, query)?;
        let mut refs: Vec<MessageRef> = found.into_iter().collect();
        refs.sort_unstable();
        Ok(refs)
    }

    fn fetch_headers(
        &mut self,
        refs: &[MessageRef],
        fields: &[&str],
    ) -> Result<Vec<(MessageRef, Vec<u8>)>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("BODY.PEEK[HEADER.FIELDS ({})]", fields.join(" "));
        debug!("imap_fetch count={} query={}", refs.len(), query);
        let fetches = imap::Session::fetch(self, seq_set(refs), query)?;
        let mut headers: Vec<(MessageRef, Vec<u8>)> = fetches
            .iter()
            .map(|fetch| (fetch.message, fetch.header().unwrap_or(&[]).to_vec()))
            .collect();
        headers.sort_by_key(|(seq, _)| *seq);
        Ok(headers)
    }

    fn store(&mut self, refs: &[MessageRef], flags: &FlagSet) -> Result<()> {
        imap::Session::store(self, seq_set(refs), flags.store_query())?;
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        imap::Session::expunge(self)?;
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        imap::Session::logout(self)?;
        Ok(())
    }
}

pub type ImapSession = imap::Session<imap::Connection>;

/// Opens the connection and authenticates, picking a mechanism from the
/// server capabilities when none is configured.
pub fn connect(config: &ConnectionConfig) -> Result<ImapSession> {
    let mode = if config.tls {
        ConnectionMode::Tls
    } else {
        ConnectionMode::Plaintext
    };
    let mut client = ClientBuilder::new(config.host.as_str(), config.port)
        .tls_kind(imap::TlsKind::Native)
        .mode(mode)
        .connect()?;
    info!("Connected to {}:{}", config.host, config.port);

    let capabilities = client.capabilities()?;
    let advertised = capabilities
        .iter()
        .filter_map(|cap| match cap {
            imap_proto::Capability::Auth(mechanism) => Some(mechanism.to_string()),
            _ => None,
        })
        .collect::<Vec<_>>();
    debug!("imap_connect advertised_auth={:?}", advertised);
    let mechanism = choose_mechanism(config.auth.as_deref(), &advertised)?;

    info!("Trying {} authentication", mechanism);
    let credentials = SaslCredentials {
        mechanism: mechanism.clone(),
        username: config.username.clone(),
        password: config.password.clone(),
    };
    let session = client
        .authenticate(mechanism.as_str(), &credentials)
        .map_err(|e| e.0)?;
    info!("Logged in as {}", config.username);
    Ok(session)
}

/// Picks the SASL mechanism to use.
///
/// A requested mechanism is upper-cased and must be both advertised and
/// speakable. Otherwise the first entry of [`SUPPORTED_AUTH`] the server
/// advertises wins.
pub fn choose_mechanism(requested: Option<&str>, advertised: &[String]) -> Result<String> {
    let is_advertised =
        |mechanism: &str| advertised.iter().any(|a| a.eq_ignore_ascii_case(mechanism));
    if let Some(requested) = requested {
        let mechanism = requested.trim().to_ascii_uppercase();
        if !is_advertised(&mechanism) {
            return Err(MailError::AuthNotAdvertised(mechanism));
        }
        if !SUPPORTED_AUTH.contains(&mechanism.as_str()) {
            return Err(MailError::UnsupportedAuth(mechanism));
        }
        return Ok(mechanism);
    }
    SUPPORTED_AUTH
        .iter()
        .find(|&&mechanism| is_advertised(mechanism))
        .map(|mechanism| mechanism.to_string())
        .ok_or(MailError::NoSupportedAuth)
}

/// Challenge responder for the plain-credential mechanisms.
struct SaslCredentials {
    mechanism: String,
    username: String,
    password: String,
}

impl imap::Authenticator for SaslCredentials {
    type Response = Vec<u8>;

    fn process(&self, challenge: &[u8]) -> Self::Response {
        credential_response(&self.mechanism, &self.username, &self.password, challenge)
    }
}

fn credential_response(mechanism: &str, username: &str, password: &str, challenge: &[u8]) -> Vec<u8> {
    match mechanism {
        "LOGIN" => {
            let prompt = String::from_utf8_lossy(challenge).to_ascii_lowercase();
            if prompt.contains("password") {
                password.as_bytes().to_vec()
            } else {
                username.as_bytes().to_vec()
            }
        }
        _ => format!("\0{}\0{}", username, password).into_bytes(),
    }
}

pub fn seq_set(refs: &[MessageRef]) -> String {
    refs.iter()
        .map(|seq| seq.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Quotes a search argument as an IMAP quoted string.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
