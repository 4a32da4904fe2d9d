use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use imaptidy_core::{Config, load_options_file};
use imaptidy_mail::{CleanseQuery, FlagQuery, QueryStrategy, connect, run_strategy};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, CliCommand};

/// Overrides the verbosity derived from `--verbose` (EnvFilter syntax).
const LOG_ENV: &str = "IMAPTIDY_LOG";

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = load_options_file(cli.config.as_deref())?;
    let config = Config::resolve(file, cli.connection.overrides(), std::env::var("USER").ok())?;
    init_tracing(config.verbose);

    let strategy = build_strategy(&config, &cli.command)?;
    let mut session = connect(&config.connection).with_context(|| {
        format!(
            "failed to log in to {}:{}",
            config.connection.host, config.connection.port
        )
    })?;
    let summary = match run_strategy(&mut session, &strategy, config.noop) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("Failed to finish: {:#}", anyhow::Error::from(err));
            std::process::exit(1);
        }
    };
    debug!(
        "run_summary messages={} mailboxes={}",
        summary.messages, summary.mailboxes
    );
    session.logout()?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_level(false),
        )
        .init();
}

fn build_strategy(config: &Config, command: &CliCommand) -> Result<QueryStrategy> {
    let strategy = match command {
        CliCommand::Cleanse(mode) => {
            let mut rules = config.cleanse_rules()?;
            if let Some(boxes) = mode.boxes() {
                rules = rules.restrict(&boxes)?;
            }
            QueryStrategy::Cleanse(CleanseQuery::new(rules, Local::now().fixed_offset()))
        }
        CliCommand::Flag(mode) => {
            let mut rules = config.flag_rules()?;
            if let Some(boxes) = mode.boxes() {
                rules = rules.restrict(&boxes)?;
            }
            QueryStrategy::Flag(FlagQuery::new(rules))
        }
    };
    Ok(strategy)
}
