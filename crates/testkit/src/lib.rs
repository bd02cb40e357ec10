#![warn(missing_docs)]
//! Test surfaces for the sync core: a recording channel, server-event
//! fixtures, and a JSONL traffic log for inspecting sessions after the fact.

mod fixtures;
mod publisher;

use anyhow::Result;
use chrono::{DateTime, Utc};
use klyra_net::{ClientMessage, ServerMessage};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub use fixtures::*;
pub use publisher::RecordingPublisher;

/// Which way a logged message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to server.
    Outbound,
    /// Server to client.
    Inbound,
}

/// One message captured by a test harness.
#[derive(Debug, Serialize)]
pub struct TrafficRecord {
    /// Capture time.
    pub at: DateTime<Utc>,
    /// Direction of travel.
    pub direction: Direction,
    /// The message itself, as JSON.
    pub message: serde_json::Value,
}

impl TrafficRecord {
    /// Record an outbound message.
    pub fn outbound(message: &ClientMessage) -> Result<Self> {
        Ok(Self {
            at: Utc::now(),
            direction: Direction::Outbound,
            message: serde_json::to_value(message)?,
        })
    }

    /// Record an inbound message.
    pub fn inbound(message: &ServerMessage) -> Result<Self> {
        Ok(Self {
            at: Utc::now(),
            direction: Direction::Inbound,
            message: serde_json::to_value(message)?,
        })
    }
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
    written: usize,
}

impl JsonlSink {
    /// Create a new sink at `path`, creating parent dirs if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            file: File::create(path)?,
            written: 0,
        })
    }

    /// Append a record to the log.
    pub fn write(&mut self, record: &TrafficRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}
