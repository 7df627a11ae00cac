//! The durable log: an ordered collection of segments under one directory.
//!
//! Appends go to the active segment, the newest one; when it reaches a size
//! cap a new segment is created at the next offset. Reads are routed to the
//! segment covering the requested offset. On open the segment list is
//! rebuilt from the files found in the log directory.

use std::{
  io::Read,
  path::{Path, PathBuf},
  sync::RwLock,
};

use anyhow::Result;
use tracing::{debug, info};

use crate::{
  api,
  commit_log::{CommitLog, CommitLogError},
  config::Config,
  segment::Segment,
  store::StoreReader,
};

#[derive(Debug)]
pub struct Log {
  directory: PathBuf,
  config: Config,
  /// Segments ordered from oldest to newest. The newest segment is the
  /// active one and the only one that receives appends. Never empty.
  segments: RwLock<Vec<Segment>>,
}

impl Log {
  pub fn new(directory: impl Into<PathBuf>, mut config: Config) -> Result<Self> {
    if config.segment.max_store_bytes == 0 {
      config.segment.max_store_bytes = 1024;
    }
    if config.segment.max_index_bytes == 0 {
      config.segment.max_index_bytes = 1024;
    }

    let directory = directory.into();
    std::fs::create_dir_all(&directory)?;

    let mut segments = Self::read_segments_from_disk(&directory, config)?;

    // If the log is new and there are no segments on disk, create the
    // first one.
    if segments.is_empty() {
      segments.push(Segment::new(
        &directory,
        config.segment.initial_offset,
        config,
      )?);
    }

    debug!(directory = %directory.display(), segments = segments.len(), "opened log");

    Ok(Self {
      directory,
      config,
      segments: RwLock::new(segments),
    })
  }

  fn read_segments_from_disk(directory: &Path, config: Config) -> Result<Vec<Segment>> {
    // Store and index files come in pairs sharing a base offset, so
    // scanning one of the two extensions yields each base offset once.
    let mut base_offsets: Vec<u64> = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok())
      .filter_map(|entry| entry.file_name().into_string().ok())
      .filter_map(|file_name| {
        file_name
          .strip_suffix(".store")
          .and_then(|base| base.parse().ok())
      })
      .collect();

    base_offsets.sort_unstable();

    base_offsets
      .into_iter()
      .map(|base_offset| Segment::new(directory, base_offset, config))
      .collect()
  }

  /// Appends a new record to the active segment and returns the offset it
  /// was assigned.
  ///
  /// If the segment reaches one of its size caps because of the new record,
  /// a new active segment is created at the following offset.
  pub fn append(&self, record: api::v1::Record) -> Result<u64> {
    let mut segments = self.segments.write().unwrap();

    let active = segments.last_mut().unwrap();
    let offset = active.append(record)?;

    if active.is_maxed() {
      let base_offset = active.next_offset();
      info!(base_offset, "active segment maxed, rolling over");
      segments.push(Segment::new(&self.directory, base_offset, self.config)?);
    }

    Ok(offset)
  }

  /// Reads the record stored at the given offset.
  pub fn read(&self, offset: u64) -> Result<api::v1::Record> {
    let segments = self.segments.read().unwrap();

    // Segments are sorted by base offset, so the candidate is the last
    // segment whose base offset is at or below the wanted offset.
    let candidate = segments.partition_point(|segment| segment.base_offset() <= offset);
    if candidate == 0 {
      return Err(CommitLogError::OffsetOutOfBounds(offset).into());
    }

    let segment = &segments[candidate - 1];
    if offset >= segment.next_offset() {
      return Err(CommitLogError::OffsetOutOfBounds(offset).into());
    }

    segment.read(offset)
  }

  /// Returns the base offset of the first segment.
  pub fn lowest_offset(&self) -> Result<u64> {
    let segments = self.segments.read().unwrap();

    Ok(segments.first().unwrap().base_offset())
  }

  /// Returns the offset of the newest record, or 0 when nothing was ever
  /// appended at initial offset 0.
  pub fn highest_offset(&self) -> Result<u64> {
    let segments = self.segments.read().unwrap();

    let next_offset = segments.last().unwrap().next_offset();

    Ok(if next_offset == 0 { 0 } else { next_offset - 1 })
  }

  /// Removes every segment whose records all sit below `lowest`. Segments
  /// that straddle `lowest` are kept whole: the log truncates at segment
  /// granularity, never inside one.
  pub fn truncate(&self, lowest: u64) -> Result<()> {
    let mut segments = self.segments.write().unwrap();

    let removed = segments.partition_point(|segment| segment.next_offset() <= lowest + 1);
    for segment in segments.drain(..removed) {
      segment.remove()?;
    }

    debug!(lowest, removed, "truncated log");

    Ok(())
  }

  /// Returns a reader over the concatenation of every segment's store
  /// file, oldest first. The reader works on a snapshot: records appended
  /// after this call are not part of the stream.
  pub fn reader(&self) -> Result<LogReader> {
    let segments = self.segments.read().unwrap();

    let readers = segments
      .iter()
      .map(Segment::reader)
      .collect::<std::io::Result<Vec<_>>>()?;

    Ok(LogReader {
      readers,
      current: 0,
    })
  }

  /// Closes every segment in the log.
  pub fn close(self) -> Result<()> {
    let segments = self.segments.into_inner().unwrap();

    for segment in segments {
      segment.close()?;
    }

    Ok(())
  }

  /// Closes the log and then deletes its directory.
  pub fn remove(self) -> Result<()> {
    let directory = self.directory.clone();

    self.close()?;

    std::fs::remove_dir_all(directory)?;

    Ok(())
  }

  /// Removes the log and re-creates it empty in the same directory with
  /// the same configuration.
  pub fn reset(self) -> Result<Log> {
    let directory = self.directory.clone();
    let config = self.config;

    self.remove()?;

    Log::new(directory, config)
  }
}

impl CommitLog for Log {
  fn append(&self, record: api::v1::Record) -> Result<u64> {
    Log::append(self, record)
  }

  fn read(&self, offset: u64) -> Result<api::v1::Record> {
    Log::read(self, offset)
  }
}

/// Reads the store files of a log back to back, as handed out by
/// [`Log::reader`].
#[derive(Debug)]
pub struct LogReader {
  readers: Vec<StoreReader>,
  current: usize,
}

impl Read for LogReader {
  fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
    while let Some(reader) = self.readers.get_mut(self.current) {
      let bytes_read = reader.read(buffer)?;
      if bytes_read > 0 {
        return Ok(bytes_read);
      }

      self.current += 1;
    }

    Ok(0)
  }
}
