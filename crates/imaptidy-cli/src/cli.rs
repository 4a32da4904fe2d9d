use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use imaptidy_core::{Overrides, parse_box_list};

#[derive(Parser, Debug)]
#[command(
    name = "imaptidy",
    version,
    about = "Cleanse old mail and flag your conversations on an IMAP server",
    after_help = "Options may also be set in the options file (imaptidy.toml)."
)]
pub(crate) struct Cli {
    /// Options file to read instead of the default locations
    #[arg(short = 'c', long = "config", global = true)]
    pub(crate) config: Option<PathBuf>,
    #[command(flatten)]
    pub(crate) connection: ConnectionArgs,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Args, Debug)]
pub(crate) struct ConnectionArgs {
    /// IMAP server host
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,
    /// IMAP server port (default: 993 with SSL, 143 without)
    #[arg(short = 'P', long, global = true)]
    port: Option<u16>,
    /// Use SSL for the IMAP connection (default)
    #[arg(short = 's', long, global = true, overrides_with = "no_ssl")]
    ssl: bool,
    /// Connect without SSL
    #[arg(long, global = true, overrides_with = "ssl")]
    no_ssl: bool,
    /// IMAP username (default: $USER)
    #[arg(short = 'u', long, global = true)]
    username: Option<String>,
    /// IMAP password
    #[arg(short = 'p', long, global = true)]
    password: Option<String>,
    /// Authentication mechanism override, auto-discovered when unset
    #[arg(short = 'a', long, global = true)]
    auth: Option<String>,
    /// Root of the mailbox hierarchy (default: mail)
    #[arg(short = 'r', long, global = true)]
    root: Option<String>,
    /// Perform no destructive operations; best used with --verbose
    #[arg(short = 'n', long, global = true)]
    noop: bool,
    /// Be verbose
    #[arg(short = 'v', long, global = true, overrides_with = "no_verbose")]
    verbose: bool,
    /// Only report errors
    #[arg(long, global = true, overrides_with = "verbose")]
    no_verbose: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Delete read, unflagged messages older than the configured age
    Cleanse(ModeArgs),
    /// Flag answered messages, messages you wrote and replies to them
    Flag(ModeArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ModeArgs {
    /// Comma-separated list of configured mailbox prefixes to process
    #[arg(short = 'b', long)]
    boxes: Option<String>,
}

impl ModeArgs {
    pub(crate) fn boxes(&self) -> Option<Vec<String>> {
        self.boxes.as_deref().map(parse_box_list)
    }
}

impl ConnectionArgs {
    pub(crate) fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            ssl: switch(self.ssl, self.no_ssl),
            username: self.username.clone(),
            password: self.password.clone(),
            auth: self.auth.clone(),
            root: self.root.clone(),
            noop: self.noop.then_some(true),
            verbose: switch(self.verbose, self.no_verbose),
        }
    }
}

fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}
