//! JSONL changelog source.
//!
//! Reads change events from JSONL files, one JSON `ChangeEvent` per line.
//! A directory input is processed file by file in sorted order.

use super::{ChangelogSource, SourceStats};
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use timeline_core::ChangeEvent;

/// Configuration for the JSONL source.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file or directory path.
    pub input: PathBuf,

    /// Log and skip unparseable lines instead of failing.
    pub continue_on_error: bool,

    /// Progress reporting interval (events).
    pub progress_interval: usize,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            continue_on_error: true,
            progress_interval: 100_000,
        }
    }
}

/// JSONL file changelog source.
pub struct JsonlChangelogSource {
    config: JsonlConfig,
}

impl JsonlChangelogSource {
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }

    /// Collect files to process based on input path.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.config.input;

        if input.is_file() {
            return Ok(vec![input.clone()]);
        }
        if !input.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input path does not exist: {}", input.display()),
            )));
        }

        let mut files: Vec<_> = fs::read_dir(input)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext == "jsonl" || ext == "ndjson")
            })
            .collect();

        // Sort for deterministic processing order
        files.sort();
        Ok(files)
    }

    /// Process a single file. Returns `Ok(false)` if the handler stopped.
    fn process_file<F>(&self, path: &Path, handler: &mut F, stats: &mut SourceStats) -> Result<bool>
    where
        F: FnMut(ChangeEvent) -> Result<bool>,
    {
        let reader = BufReader::new(File::open(path)?);

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            stats.total_events += 1;

            let event = match ChangeEvent::from_json(&line) {
                Ok(event) => event,
                Err(e) => {
                    stats.parse_errors += 1;
                    if !self.config.continue_on_error {
                        return Err(Error::Json(format!(
                            "{}:{}: {}",
                            path.display(),
                            line_num + 1,
                            e
                        )));
                    }
                    tracing::warn!("{}:{}: skipping event: {}", path.display(), line_num + 1, e);
                    continue;
                }
            };

            stats.delivered_events += 1;
            if !handler(event)? {
                tracing::info!("Handler signaled stop");
                return Ok(false);
            }

            if stats.total_events.is_multiple_of(self.config.progress_interval) {
                tracing::info!(
                    "Progress: {} events, {} delivered, {} unparseable",
                    stats.total_events,
                    stats.delivered_events,
                    stats.parse_errors
                );
            }
        }

        Ok(true)
    }
}

impl ChangelogSource for JsonlChangelogSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(ChangeEvent) -> Result<bool>,
    {
        let mut stats = SourceStats::default();

        let files = self.collect_files()?;
        tracing::info!("Found {} JSONL files to process", files.len());

        for (idx, path) in files.iter().enumerate() {
            tracing::debug!("[{}/{}] Processing: {}", idx + 1, files.len(), path.display());
            if !self.process_file(path, &mut handler, &mut stats)? {
                stats.stopped_early = true;
                break;
            }
        }

        Ok(stats)
    }
}
