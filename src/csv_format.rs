//! CSV file format for sample persistence
//!
//! One file per run, created fresh with a fixed header row. Samples
//! accumulate in an in-memory chunk of `save_interval` rows; a full chunk
//! is appended in a single bulk write and flushed, keeping disk traffic
//! off the per-sample path. Rows are written in arrival order, never
//! reordered or deduplicated.

use crate::adxl357::PhysicalSample;
use crate::error::Result;
use csv::Writer;
use std::fs::File;
use std::path::Path;

/// Fixed header row of every run file
pub const CSV_HEADER: [&str; 4] = ["time/timestamp", "accel_x", "accel_y", "accel_z"];

/// Chunked CSV writer for one run.
pub struct CsvSink {
    writer: Writer<File>,
    chunk: Vec<PhysicalSample>,
    save_interval: usize,
    rows_written: usize,
    chunks_written: usize,
}

impl CsvSink {
    /// Create a fresh run file (truncating any existing file) and write
    /// the header row.
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `save_interval` - Rows accumulated per bulk append (must be non-zero)
    pub fn create<P: AsRef<Path>>(path: P, save_interval: usize) -> Result<Self> {
        if save_interval == 0 {
            return Err(crate::error::MonitorError::InvalidConfig(
                "save interval must be non-zero".into(),
            ));
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        let mut writer = Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        log::info!("created run file {}", path.as_ref().display());
        Ok(Self {
            writer,
            chunk: Vec::with_capacity(save_interval),
            save_interval,
            rows_written: 0,
            chunks_written: 0,
        })
    }

    /// Buffer one sample; performs a bulk append once the chunk is full.
    pub fn push(&mut self, sample: PhysicalSample) -> Result<()> {
        self.chunk.push(sample);
        if self.chunk.len() >= self.save_interval {
            self.write_chunk()?;
        }
        Ok(())
    }

    /// Append whatever is buffered, even a partial chunk, and flush.
    ///
    /// Called at shutdown so the tail of a run is never lost.
    pub fn finish(&mut self) -> Result<()> {
        if !self.chunk.is_empty() {
            self.write_chunk()?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Rows appended to the file so far (excluding the header)
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Bulk appends performed so far
    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    /// Samples currently buffered and not yet on disk
    pub fn pending(&self) -> usize {
        self.chunk.len()
    }

    fn write_chunk(&mut self) -> Result<()> {
        for sample in &self.chunk {
            self.writer
                .serialize((sample.timestamp, sample.x, sample.y, sample.z))?;
        }
        self.writer.flush()?;
        self.rows_written += self.chunk.len();
        self.chunks_written += 1;
        log::debug!(
            "appended chunk of {} rows ({} total)",
            self.chunk.len(),
            self.rows_written
        );
        self.chunk.clear();
        Ok(())
    }
}
