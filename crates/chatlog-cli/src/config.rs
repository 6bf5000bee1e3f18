use std::path::{Path, PathBuf};

use anyhow::Context;
use chatlog_core::{Account, CoreError, Entity, EventMask};
use chatlog_logging::LogConfig;
use chatlog_store::StoreConfig;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Settings read from the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    pub logging: LogConfig,
}

impl CliConfig {
    /// Load from `path`, or from the default location when it exists
    ///
    /// With no explicit path and no file at the default location the
    /// built-in defaults are used.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// `$XDG_CONFIG_HOME/chatlog/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatlog").join("config.toml"))
}

#[derive(Parser)]
#[command(name = "chatlog", about = "Browse instant-messaging logs")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print events newest first, in batches
    Walk {
        #[command(flatten)]
        target: TargetArgs,
        /// Event kinds to include (text, call, any)
        #[arg(long, default_value = "any")]
        mask: EventMask,
        /// Events fetched per batch
        #[arg(long, default_value_t = 10)]
        batch: usize,
        /// Stop after this many events
        #[arg(long)]
        max: Option<usize>,
        /// Only text messages containing this string
        #[arg(long)]
        grep: Option<String>,
    },
    /// List the dates with logs
    Dates {
        #[command(flatten)]
        target: TargetArgs,
        /// Event kinds to include (text, call, any)
        #[arg(long, default_value = "any")]
        mask: EventMask,
    },
    /// Print the events of one date, oldest first
    Day {
        #[command(flatten)]
        target: TargetArgs,
        /// Date to print (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        /// Event kinds to include (text, call, any)
        #[arg(long, default_value = "any")]
        mask: EventMask,
    },
    /// List the conversation days whose messages contain a text
    Search {
        /// Text to look for, ignoring case
        text: String,
        /// Event kinds to include (text, call, any)
        #[arg(long, default_value = "any")]
        mask: EventMask,
    },
    /// List the contacts and rooms with logs
    Entities {
        #[command(flatten)]
        account: AccountArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct AccountArgs {
    /// Account object path or its suffix
    #[arg(long)]
    pub account: String,
    /// Protocol name, used by the Pidgin store
    #[arg(long)]
    pub protocol: Option<String>,
    /// Account parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

impl AccountArgs {
    pub fn to_account(&self) -> Result<Account, CoreError> {
        let mut account = Account::new(&self.account)?;
        if let Some(protocol) = &self.protocol {
            account = account.with_protocol(protocol);
        }
        for (key, value) in &self.params {
            account = account.with_parameter(key, value);
        }
        Ok(account)
    }
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    #[command(flatten)]
    pub account: AccountArgs,
    /// Contact or room identifier
    #[arg(long)]
    pub target: String,
    /// The target is a chat room
    #[arg(long)]
    pub room: bool,
}

impl TargetArgs {
    pub fn to_entity(&self) -> Entity {
        if self.room {
            Entity::room(&self.target)
        } else {
            Entity::contact(&self.target)
        }
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}
