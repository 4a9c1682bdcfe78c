//! Log pipeline
//!
//! Attaches to a container's multiplexed stdout+stderr stream and turns raw
//! engine chunks into clean, classified records: ANSI SGR sequences and
//! engine timestamps stripped, one leading bracketed tag removed, severity
//! classified by substring. Every record is published on the instance's
//! event room and appended to that instance's daily log file, and each line
//! participates in the online-promotion sentinel check.

use crate::events::{Event, EventBus};
use crate::runtime::Runtime;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

static ANSI_SGR: Lazy<Regex> = Lazy::new(|| Regex::new("\u{1b}\\[[0-9;]*m").expect("ansi regex"));

static ENGINE_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z?\s*").expect("timestamp regex")
});

static LEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[[^\]]*\]:?\s*").expect("tag regex"));

static FILE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\]]+)\] \[([A-Z]+)\] (.*)$").expect("file line regex"));

/// Severity attached to each log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Debug,
    Info,
}

impl LogLevel {
    fn as_upper(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
        }
    }

    fn from_upper(s: &str) -> Option<Self> {
        match s {
            "ERROR" => Some(LogLevel::Error),
            "WARNING" => Some(LogLevel::Warning),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            _ => None,
        }
    }
}

/// One cleaned log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Strip ANSI SGR sequences, a leading engine timestamp, and one leading
/// bracketed tag, then trim surrounding whitespace.
pub fn sanitize_line(raw: &str) -> String {
    let no_ansi = ANSI_SGR.replace_all(raw, "");
    let no_ts = ENGINE_TIMESTAMP.replace(no_ansi.as_ref(), "");
    let no_tag = LEADING_TAG.replace(no_ts.as_ref(), "");
    no_tag.trim().to_string()
}

/// Case-insensitive severity classification by substring
pub fn classify(message: &str) -> LogLevel {
    let lower = message.to_lowercase();
    if lower.contains("error") || lower.contains("exception") || lower.contains("fatal") {
        LogLevel::Error
    } else if lower.contains("warn") {
        LogLevel::Warning
    } else if lower.contains("debug") {
        LogLevel::Debug
    } else {
        // "info" and "done" both land here anyway
        LogLevel::Info
    }
}

/// Path of an instance's log file for a given day
fn day_file(logs_dir: &Path, id: &str, day: DateTime<Utc>) -> PathBuf {
    logs_dir
        .join(id)
        .join(format!("{}.log", day.format("%Y-%m-%d")))
}

/// Append one record to the instance's daily file, creating directories as
/// needed. Format: `[<iso-ts>] [<LEVEL>] <msg>`.
pub fn append_record(logs_dir: &Path, id: &str, record: &LogRecord) -> std::io::Result<()> {
    let path = day_file(logs_dir, id, record.timestamp);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(
        file,
        "[{}] [{}] {}",
        record.timestamp.to_rfc3339(),
        record.level.as_upper(),
        record.message
    )
}

/// Last `lines` records from today's file; empty when none exists yet
pub fn tail_records(logs_dir: &Path, id: &str, lines: usize) -> Vec<LogRecord> {
    let path = day_file(logs_dir, id, Utc::now());
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut records: Vec<LogRecord> = content
        .lines()
        .filter_map(|line| {
            let caps = FILE_LINE.captures(line)?;
            Some(LogRecord {
                timestamp: DateTime::parse_from_rfc3339(&caps[1]).ok()?.with_timezone(&Utc),
                level: LogLevel::from_upper(&caps[2])?,
                message: caps[3].to_string(),
            })
        })
        .collect();

    if records.len() > lines {
        records.drain(..records.len() - lines);
    }
    records
}

/// Tuning for one pipeline attachment
#[derive(Default)]
pub struct PipelineOptions {
    /// Substring whose appearance marks the server as online
    pub sentinel: Option<String>,
    /// Force every record to one level (install output is all `info`)
    pub level_override: Option<LogLevel>,
    /// Notified once when the sentinel first matches
    pub sentinel_tx: Option<mpsc::Sender<()>>,
}

/// Attach to `container` and pump its stream until it ends or the task is
/// aborted. Returns the pump task handle; the caller owns cancellation.
pub fn spawn_pipeline(
    runtime: Arc<dyn Runtime>,
    container: String,
    server_id: String,
    bus: Arc<EventBus>,
    logs_dir: PathBuf,
    mut opts: PipelineOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match runtime.attach_logs(&container).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "failed to attach log stream");
                return;
            }
        };

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(server = %server_id, error = %e, "log stream error");
                    break;
                }
            };

            for raw_line in chunk.lines() {
                let message = sanitize_line(raw_line);
                if message.is_empty() {
                    continue;
                }

                if let Some(sentinel) = &opts.sentinel {
                    if message.contains(sentinel.as_str()) {
                        if let Some(tx) = opts.sentinel_tx.take() {
                            let _ = tx.try_send(());
                        }
                    }
                }

                let level = opts.level_override.unwrap_or_else(|| classify(&message));
                let record = LogRecord::now(level, message);

                bus.publish(&server_id, Event::ServerLog(record.clone()))
                    .await;

                if let Err(e) = append_record(&logs_dir, &server_id, &record) {
                    tracing::warn!(server = %server_id, error = %e, "failed to append log file");
                }
            }
        }

        tracing::debug!(server = %server_id, container = %container, "log stream ended");
    })
}
