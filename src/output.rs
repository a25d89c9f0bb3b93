//! Local capture of published telemetry.
//!
//! During local runs every published message is appended to a CSV file so a
//! run can be inspected offline without any transport configured.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::infra::TelemetryPublisher;
use crate::messages::iso_micros;

#[derive(Debug, Serialize)]
struct CaptureRow<'a> {
    received_at: String,
    topic: &'a str,
    payload: &'a str,
}

/// Appends one captured message as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_capture(path: &str, topic: &str, payload: &str) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending capture record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(CaptureRow {
        received_at: iso_micros(Utc::now()),
        topic,
        payload,
    })?;
    writer.flush()?;

    Ok(())
}

/// A [`TelemetryPublisher`] that writes every message to a local CSV file.
pub struct CapturePublisher {
    path: String,
    guard: Mutex<()>,
}

impl CapturePublisher {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            guard: Mutex::new(()),
        }
    }
}

#[async_trait]
impl TelemetryPublisher for CapturePublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let payload = String::from_utf8_lossy(&payload);
        let _append = self.guard.lock().expect("capture file poisoned");
        append_capture(&self.path, topic, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", std::env::temp_dir().display(), name)
    }

    #[test]
    fn test_append_capture_creates_file() {
        let path = temp_path("fleetsim_test_create.csv");
        let _ = fs::remove_file(&path); // clean up any prior run

        append_capture(&path, "a/b", "{}").unwrap();

        assert!(Path::new(&path).exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.is_empty());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_capture_writes_header_once() {
        let path = temp_path("fleetsim_test_header.csv");
        let _ = fs::remove_file(&path);

        append_capture(&path, "a/b", "{}").unwrap();
        append_capture(&path, "a/b", "{}").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        // Header line should appear exactly once
        let header_count = content
            .lines()
            .filter(|l| l.contains("received_at"))
            .count();
        assert_eq!(header_count, 1);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_capture_publisher_appends_rows() {
        let path = temp_path("fleetsim_test_rows.csv");
        let _ = fs::remove_file(&path);

        let publisher = CapturePublisher::new(&path);
        publisher
            .publish("fleet/v1", Bytes::from_static(b"{\"speed\":1}"))
            .await
            .unwrap();
        publisher
            .publish("fleet/v1", Bytes::from_static(b"{\"speed\":2}"))
            .await
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        // 1 header + 2 data rows
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }
}
