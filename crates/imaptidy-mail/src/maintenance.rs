use imaptidy_core::{FlagSet, MailboxRules, MessageRef, RunSummary};
use tracing::info;

use crate::strategy::QueryStrategy;
use crate::{MailSession, Result};

/// Upper bound on sequence numbers per STORE command.
pub const STORE_CHUNK_SIZE: usize = 500;

/// Lists selectable mailboxes under the rules' root whose relative name starts
/// with one of the configured prefixes, sorted case-insensitively.
pub fn find_mailboxes<S, T>(session: &mut S, rules: &MailboxRules<T>) -> Result<Vec<String>>
where
    S: MailSession + ?Sized,
{
    let listed = session.list(rules.root(), "*")?;
    if listed.is_empty() {
        info!(
            "Found no mailboxes under {:?}, you may have an incorrect root",
            rules.root()
        );
        return Ok(Vec::new());
    }
    let mut mailboxes = listed
        .into_iter()
        .filter(|entry| entry.selectable)
        .map(|entry| entry.name)
        .filter(|name| rules.matches(name))
        .collect::<Vec<_>>();
    mailboxes.sort_by_cached_key(|name| name.to_lowercase());
    info!("Found {} mailboxes to search:", mailboxes.len());
    for mailbox in &mailboxes {
        info!("\t{}", mailbox);
    }
    Ok(mailboxes)
}

/// Adds `flags` to `refs` in the selected mailbox, at most
/// [`STORE_CHUNK_SIZE`] messages per STORE.
pub fn mark<S>(session: &mut S, refs: &[MessageRef], flags: &FlagSet) -> Result<()>
where
    S: MailSession + ?Sized,
{
    for chunk in refs.chunks(STORE_CHUNK_SIZE) {
        session.store(chunk, flags)?;
    }
    info!("Marked messages with flags");
    Ok(())
}

/// One maintenance pass over every matching mailbox.
///
/// `after_mark` runs for each mailbox that had matches, after flagging (or
/// after the flagging was skipped in noop mode). Any error aborts the pass.
pub fn run<S, F>(
    session: &mut S,
    description: &str,
    flags: &FlagSet,
    strategy: &QueryStrategy,
    noop: bool,
    mut after_mark: Option<F>,
) -> Result<RunSummary>
where
    S: MailSession + ?Sized,
    F: FnMut(&mut S, &str, &[MessageRef]) -> Result<()>,
{
    info!("{}", description);

    let mailboxes = strategy.find_mailboxes(session)?;
    let mut summary = RunSummary {
        mailboxes: mailboxes.len(),
        ..RunSummary::default()
    };

    for mailbox in &mailboxes {
        session.select(mailbox)?;
        info!("Selected {}", mailbox);

        let messages = strategy.find_messages(session, mailbox)?;
        if messages.is_empty() {
            continue;
        }

        if noop {
            info!("Noop - not marking");
        } else {
            mark(session, &messages, flags)?;
        }

        if let Some(callback) = after_mark.as_mut() {
            callback(session, mailbox, &messages)?;
        }

        summary.messages += messages.len();
    }

    info!(
        "Done. Found {} messages in {} mailboxes",
        summary.messages, summary.mailboxes
    );
    Ok(summary)
}

/// Runs the pass belonging to `strategy`: cleanse marks `\Deleted` and
/// expunges each touched mailbox, flag only adds the flags.
pub fn run_strategy<S>(session: &mut S, strategy: &QueryStrategy, noop: bool) -> Result<RunSummary>
where
    S: MailSession + ?Sized,
{
    let flags = strategy.flags();
    match strategy {
        QueryStrategy::Cleanse(_) => run(
            session,
            strategy.description(),
            &flags,
            strategy,
            noop,
            Some(|s: &mut S, _: &str, _: &[MessageRef]| -> Result<()> {
                if noop {
                    info!("Noop - not expunging");
                    return Ok(());
                }
                s.expunge()?;
                info!("Expunged deleted messages");
                Ok(())
            }),
        ),
        QueryStrategy::Flag(_) => run(
            session,
            strategy.description(),
            &flags,
            strategy,
            noop,
            None::<fn(&mut S, &str, &[MessageRef]) -> Result<()>>,
        ),
    }
}
