//! Structured per-attempt log, adapted from the teacher's
//! `handler::connection_log::ConnectionLog`. Attached to a `SendAttempt` so a
//! dead-letter record carries the full raw-protocol trace for diagnosis (spec
//! §7 "raw protocol lines go to structured logs").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AttemptLog {
    lines: Vec<LogLine>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct LogLine {
    time: DateTime<Utc>,
    level: LogLevel,
    msg: String,
}

impl AttemptLog {
    pub fn log(&mut self, level: LogLevel, msg: impl Display) {
        self.lines.push(LogLine {
            time: Utc::now(),
            level,
            msg: msg.to_string(),
        });
    }

    pub fn lines(&self) -> impl Iterator<Item = (DateTime<Utc>, LogLevel, &str)> {
        self.lines
            .iter()
            .map(|l| (l.time, l.level, l.msg.as_str()))
    }
}
