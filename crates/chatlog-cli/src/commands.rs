//! Subcommand implementations
//!
//! Each command reads through a [`LogManager`] and prints one line per
//! event or date to `out`.

use std::io::Write;
use std::sync::Arc;

use chatlog_core::{Account, Entity, Event, EventMask};
use chatlog_store::{LogEventFilter, LogManager, PageSource};
use chrono::NaiveDate;
use tracing::debug;

/// Filter keeping text events whose message contains `needle`
pub fn grep_filter(needle: impl Into<String>) -> LogEventFilter {
    let needle = needle.into();
    Arc::new(move |event: &Event| event.as_text().is_some_and(|t| t.message.contains(&needle)))
}

/// Print events newest first, `batch` at a time, until the logs run out
/// or `max` events have been printed
///
/// Returns the number of events printed.
#[allow(clippy::too_many_arguments)]
pub async fn walk<S, W>(
    manager: &LogManager<S>,
    account: &Account,
    target: &Entity,
    mask: EventMask,
    batch: usize,
    max: Option<usize>,
    grep: Option<String>,
    out: &mut W,
) -> anyhow::Result<usize>
where
    S: PageSource + Clone,
    W: Write,
{
    let filter = grep.map(grep_filter);
    let mut walker = manager.walk_filtered_events(account, target, mask, filter).await?;
    let batch = batch.max(1);
    let mut printed = 0;

    loop {
        let want = match max {
            Some(max) if printed >= max => break,
            Some(max) => batch.min(max - printed),
            None => batch,
        };
        let events = walker.get_events(want).await?;
        debug!(requested = want, received = events.len(), "Fetched batch");
        for event in &events {
            writeln!(out, "{}", event)?;
        }
        printed += events.len();
        if events.len() < want {
            break;
        }
    }

    Ok(printed)
}

/// Print the dates with logs, oldest first
pub async fn dates<S, W>(
    manager: &LogManager<S>,
    account: &Account,
    target: &Entity,
    mask: EventMask,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: PageSource + Clone,
    W: Write,
{
    for date in manager.get_dates(account, target, mask).await? {
        writeln!(out, "{}", date)?;
    }
    Ok(())
}

/// Print the events of `date`, oldest first
pub async fn day<S, W>(
    manager: &LogManager<S>,
    account: &Account,
    target: &Entity,
    mask: EventMask,
    date: NaiveDate,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: PageSource + Clone,
    W: Write,
{
    for event in manager.get_events_for_date(account, target, mask, date).await? {
        writeln!(out, "{}", event)?;
    }
    Ok(())
}

/// Print one line per day whose messages contain `text`
///
/// Returns the number of hits.
pub async fn search<S, W>(
    manager: &LogManager<S>,
    text: &str,
    mask: EventMask,
    out: &mut W,
) -> anyhow::Result<usize>
where
    S: PageSource + Clone,
    W: Write,
{
    let hits = manager.search(text, mask).await?;
    for hit in &hits {
        writeln!(out, "{}", hit)?;
    }
    Ok(hits.len())
}

pub async fn entities<S, W>(
    manager: &LogManager<S>,
    account: &Account,
    out: &mut W,
) -> anyhow::Result<()>
where
    S: PageSource + Clone,
    W: Write,
{
    for entity in manager.get_entities(account).await? {
        writeln!(out, "{}", entity)?;
    }
    Ok(())
}
