//! JSONL telemetry log with record-count rotation
//!
//! Each reading becomes one line:
//! `{"timestamp":"2024-05-01T12:00:00.000+02:00","channel":"temperature","value":61.5}`

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};

use super::TelemetrySink;
use crate::dtouch::protocol::Update;
use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Debug, Serialize)]
struct TelemetryRecord<'a> {
    timestamp: String,
    channel: &'a str,
    value: f32,
}

/// Writes readings to `telemetry_<timestamp>_<seq>.jsonl` files
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    sequence: u32,
}

impl JsonlSink {
    /// Create the sink, creating `dir` if needed
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            sequence: 0,
        })
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            self.sequence,
            FILE_EXTENSION
        );
        self.sequence = self.sequence.wrapping_add(1);

        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Writing telemetry to {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune()
    }

    /// Delete the oldest log files beyond `max_files_to_keep`
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_telemetry_file(path))
            .collect();

        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old telemetry file {}: {}", path.display(), e);
            }
        }

        Ok(())
    }
}

fn is_telemetry_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX));
    let extension_matches = path.extension().is_some_and(|ext| ext == FILE_EXTENSION);
    name_matches && extension_matches
}

impl TelemetrySink for JsonlSink {
    fn publish(&mut self, update: &Update) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let channel = update.channel.name();
        let record = TelemetryRecord {
            timestamp: Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
            channel: &channel,
            value: update.value,
        };

        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, &record).map_err(std::io::Error::from)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            self.records_in_file += 1;
        }

        Ok(())
    }
}
