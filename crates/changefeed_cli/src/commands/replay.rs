//! Replay command implementation.

use crate::Mode;
use changefeed_follower::{
    ChangeRecord, ChangesFollower, FollowMode, FollowerConfig, MemoryFeed,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// Options for the replay command.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Sequence token to start after.
    pub since: String,
    /// Maximum records to emit.
    pub limit: Option<u64>,
    /// Follow mode.
    pub mode: Mode,
    /// Records requested per fetch.
    pub batch_size: Option<u64>,
    /// Include document bodies.
    pub include_docs: bool,
    /// Output format (text, json).
    pub format: String,
}

/// One line of a captured change log.
#[derive(Debug, Deserialize)]
struct LogEntry {
    id: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    doc: Option<Value>,
}

/// Final outcome of a replay, printed after the records.
#[derive(Debug, Serialize)]
struct ReplaySummary {
    state: String,
    checkpoint: String,
    records: u64,
    batches: u64,
    transient_failures: u64,
}

/// Runs the replay command.
pub async fn run(log: &Path, options: ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(log)
        .map_err(|e| format!("cannot read {}: {e}", log.display()))?;
    let feed = load_log(&text)?;
    info!(path = %log.display(), changes = feed.len(), "loaded change log");

    let follower = ChangesFollower::new(feed, build_config(&options));
    let mut stream = follower.start()?;

    if options.mode == Mode::Listen {
        let handle = follower.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.stop();
            }
        });
    }

    let json = options.format == "json";
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => print_record(&record, json)?,
            Err(err) => failure = Some(err),
        }
    }
    drop(stream);

    let stats = follower.stats();
    let summary = ReplaySummary {
        state: follower.state().to_string(),
        checkpoint: follower.checkpoint(),
        records: stats.records_emitted,
        batches: stats.batches_fetched,
        transient_failures: stats.transient_failures,
    };
    print_summary(&summary, json)?;

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn build_config(options: &ReplayOptions) -> FollowerConfig {
    let mode = match options.mode {
        Mode::Finite => FollowMode::Finite,
        Mode::Listen => FollowMode::Listen,
    };

    let mut config = FollowerConfig::new("replay")
        .with_since(options.since.clone())
        .with_mode(mode)
        .with_include_docs(options.include_docs);
    if let Some(limit) = options.limit {
        config = config.with_limit(limit);
    }
    if let Some(batch_size) = options.batch_size {
        config = config.with_batch_size(batch_size);
    }
    config
}

/// Loads a JSON-lines change log into an in-memory feed.
fn load_log(text: &str) -> Result<MemoryFeed, Box<dyn std::error::Error>> {
    let feed = MemoryFeed::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let entry: LogEntry =
            serde_json::from_str(line).map_err(|e| format!("line {}: {e}", index + 1))?;

        if entry.deleted {
            if feed.delete(&entry.id).is_none() {
                warn!(line = index + 1, id = %entry.id, "delete of unknown document skipped");
            }
        } else {
            let doc = entry.doc.unwrap_or_else(|| Value::Object(Default::default()));
            feed.put(&entry.id, doc);
        }
    }

    Ok(feed)
}

fn print_record(record: &ChangeRecord, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(record)?);
        return Ok(());
    }

    let marker = if record.deleted { " (deleted)" } else { "" };
    println!(
        "{}\t{}\t{}{}",
        record.sequence,
        record.document_id,
        record.revision().unwrap_or("-"),
        marker
    );
    if let Some(doc) = &record.document {
        println!("  {doc}");
    }
    Ok(())
}

fn print_summary(summary: &ReplaySummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(summary)?);
        return Ok(());
    }

    println!();
    println!("State:              {}", summary.state);
    println!("Checkpoint:         {}", summary.checkpoint);
    println!("Records:            {}", summary.records);
    println!("Batches:            {}", summary.batches);
    println!("Transient failures: {}", summary.transient_failures);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use changefeed_follower::{FollowerState, StopReason};
    use std::io::Write;

    fn options(mode: Mode) -> ReplayOptions {
        ReplayOptions {
            since: "0".into(),
            limit: None,
            mode,
            batch_size: None,
            include_docs: false,
            format: "text".into(),
        }
    }

    #[test]
    fn load_log_collapses_documents() {
        let text = r#"
{"id":"a","doc":{"n":1}}
{"id":"b"}
{"id":"a","doc":{"n":2}}
{"id":"b","deleted":true}
{"id":"ghost","deleted":true}
"#;
        let feed = load_log(text).unwrap();
        assert_eq!(feed.len(), 2);
        assert!(feed.update_seq().starts_with("4-"));
    }

    #[test]
    fn load_log_reports_bad_line() {
        let err = load_log("{\"id\":\"a\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn config_from_options() {
        let mut opts = options(Mode::Finite);
        opts.limit = Some(3);
        opts.batch_size = Some(2);
        opts.include_docs = true;

        let config = build_config(&opts);
        assert_eq!(config.mode, FollowMode::Finite);
        assert_eq!(config.limit, Some(3));
        assert_eq!(config.batch_size, 2);
        assert!(config.include_docs);
        assert_eq!(config.since, "0");

        assert_eq!(build_config(&options(Mode::Listen)).mode, FollowMode::Listen);
    }

    #[tokio::test]
    async fn replay_reads_log_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id":"a","doc":{{"n":1}}}}"#).unwrap();
        writeln!(file, r#"{{"id":"b","doc":{{"n":2}}}}"#).unwrap();

        let mut opts = options(Mode::Finite);
        opts.format = "json".into();
        run(file.path(), opts).await.unwrap();
    }

    #[tokio::test]
    async fn finite_replay_stops_caught_up() {
        let feed = load_log("{\"id\":\"a\"}\n{\"id\":\"b\"}\n").unwrap();
        let follower = ChangesFollower::new(feed, build_config(&options(Mode::Finite)));
        let records = follower.start().unwrap().collect_all().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(
            follower.state(),
            FollowerState::Stopped(StopReason::CaughtUp)
        );
    }

    #[tokio::test]
    async fn missing_log_is_an_error() {
        let err = run(Path::new("/nonexistent/changes.jsonl"), options(Mode::Finite))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
