//! Accretion watcher daemon
//!
//! Reads object-write notifications from stdin, one JSON document per line,
//! and runs an independent replication watch for each.
//!
//! Environment: `ACCRETION_REGION`, `ACCRETION_BUCKET` and
//! `ACCRETION_TOPIC` select what is watched and where completions go;
//! `ACCRETION_LOG_FORMAT=json` switches to JSON log lines.

use std::sync::Arc;

use accretion_core::{
    init_tracing, LogFormat, ObjectWriteEvent, ReplicationWatcher, WatchOutcome, WatchState,
    WatcherConfig,
};
use accretion_remote::{HttpControlPlane, TopicSink};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn, Level};

/// What the daemon watches.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DaemonSettings {
    region: String,
    bucket: String,
    topic_arn: String,
}

impl DaemonSettings {
    fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{name} must be set"))
        };
        Ok(Self {
            region: var("ACCRETION_REGION")?,
            bucket: var("ACCRETION_BUCKET")?,
            topic_arn: var("ACCRETION_TOPIC")?,
        })
    }
}

/// Tally of one stdin session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ServeSummary {
    notified: usize,
    ignored: usize,
    timed_out: usize,
    failed: usize,
    malformed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let format = match std::env::var("ACCRETION_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };
    init_tracing(format, Level::INFO);

    let settings = DaemonSettings::from_env()?;
    let client =
        HttpControlPlane::from_env().context("Failed to configure control-plane client")?;
    let sink = Arc::new(TopicSink::new(
        client.clone(),
        &settings.region,
        &settings.topic_arn,
    ));
    let client = Arc::new(client);
    let config = WatcherConfig::from_env();
    info!(
        region = %settings.region,
        bucket = %settings.bucket,
        topic = %settings.topic_arn,
        max_attempts = config.max_read_attempts,
        "watcher daemon started"
    );

    let watcher = Arc::new(ReplicationWatcher::new(
        &settings.region,
        &settings.bucket,
        client.clone(),
        client,
        sink,
        config,
    ));
    let (progress, _) = watch::channel(ServeSummary::default());
    let summary = serve(
        watcher,
        &settings.bucket,
        BufReader::new(tokio::io::stdin()),
        progress,
    )
    .await?;
    info!(
        notified = summary.notified,
        ignored = summary.ignored,
        timed_out = summary.timed_out,
        failed = summary.failed,
        malformed = summary.malformed,
        "input closed"
    );
    Ok(())
}

/// Accepts a raw notification or a plain `{"bucket", "key"}` event.
fn parse_event(line: &str) -> Result<ObjectWriteEvent> {
    let raw: serde_json::Value = serde_json::from_str(line).context("not JSON")?;
    match ObjectWriteEvent::from_notification(&raw) {
        Ok(event) => Ok(event),
        Err(notification_err) => serde_json::from_value(raw)
            .map_err(|_| notification_err)
            .context("not an object-write notification"),
    }
}

/// Run one watch per input line. Finished watches are tallied and logged
/// as they complete; once the input closes, the remaining watches are
/// drained. `progress` always holds the running tally.
async fn serve<R>(
    watcher: Arc<ReplicationWatcher>,
    bucket: &str,
    input: R,
    progress: watch::Sender<ServeSummary>,
) -> Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut watches = JoinSet::new();
    let mut lines = input.lines();
    let mut input_open = true;

    while input_open || !watches.is_empty() {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read input")? {
                    Some(line) => dispatch(&watcher, bucket, &line, &mut watches, &progress),
                    None => input_open = false,
                }
            }
            Some(joined) = watches.join_next(), if !watches.is_empty() => {
                record(&progress, joined);
            }
        }
    }

    let summary = progress.borrow().clone();
    Ok(summary)
}

type WatchTask = (ObjectWriteEvent, accretion_core::Result<WatchOutcome>);

fn dispatch(
    watcher: &Arc<ReplicationWatcher>,
    bucket: &str,
    line: &str,
    watches: &mut JoinSet<WatchTask>,
    progress: &watch::Sender<ServeSummary>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let event = match parse_event(line) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "skipping malformed input line");
            progress.send_modify(|s| s.malformed += 1);
            return;
        }
    };
    if event.bucket != bucket {
        warn!(bucket = %event.bucket, key = %event.key, "event for another bucket");
        progress.send_modify(|s| s.ignored += 1);
        return;
    }

    let watcher = Arc::clone(watcher);
    watches.spawn(async move {
        let result = watcher.run(&event).await;
        (event, result)
    });
}

fn record(
    progress: &watch::Sender<ServeSummary>,
    joined: std::result::Result<WatchTask, JoinError>,
) {
    match joined {
        Ok((event, Ok(outcome))) => {
            let state = outcome.final_state;
            progress.send_modify(|s| match state {
                WatchState::Notified => s.notified += 1,
                WatchState::Ignored => s.ignored += 1,
                _ => s.timed_out += 1,
            });
            match outcome.into_result() {
                Ok(_) => info!(key = %event.key, state = %state.as_str(), "watch finished"),
                Err(e) => warn!(key = %event.key, error = %e, "watch timed out"),
            }
        }
        Ok((event, Err(e))) => {
            error!(key = %event.key, kind = %e.kind(), error = %e, "watch failed");
            progress.send_modify(|s| s.failed += 1);
        }
        Err(e) => {
            error!(error = %e, "watch task did not complete");
            progress.send_modify(|s| s.failed += 1);
        }
    }
}
