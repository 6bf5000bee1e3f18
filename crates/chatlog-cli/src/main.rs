use std::io::{self, Write};

use chatlog_cli::commands;
use chatlog_cli::config::{Cli, CliConfig, Command};
use chatlog_logging::ChatlogSubscriberBuilder;
use chatlog_store::LogManager;
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;

    // Set up logging; the guard flushes the log file on exit
    let mut builder = ChatlogSubscriberBuilder::new().with_config(config.logging);
    if let Some(level) = cli.log_level {
        builder = builder.with_level(level);
    }
    let _guard = builder.init()?;

    debug!(store = ?config.store, "Loaded configuration");
    let manager = LogManager::new(config.store);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Walk {
            target,
            mask,
            batch,
            max,
            grep,
        } => {
            let account = target.account.to_account()?;
            let printed = commands::walk(
                &manager,
                &account,
                &target.to_entity(),
                mask,
                batch,
                max,
                grep,
                &mut out,
            )
            .await?;
            debug!(printed, "Walk finished");
        }

        Command::Dates { target, mask } => {
            let account = target.account.to_account()?;
            commands::dates(&manager, &account, &target.to_entity(), mask, &mut out).await?;
        }

        Command::Day { target, date, mask } => {
            let account = target.account.to_account()?;
            commands::day(&manager, &account, &target.to_entity(), mask, date, &mut out).await?;
        }

        Command::Search { text, mask } => {
            let found = commands::search(&manager, &text, mask, &mut out).await?;
            debug!(found, "Search finished");
        }

        Command::Entities { account } => {
            let account = account.to_account()?;
            commands::entities(&manager, &account, &mut out).await?;
        }
    }

    out.flush()?;
    Ok(())
}
