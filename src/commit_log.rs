//! The log capability front-ends depend on, plus an in-memory
//! implementation.
//!
//! Front-ends talk to `dyn CommitLog` (or are generic over it) instead of a
//! concrete log, so the durable log can be swapped for the in-memory one in
//! tests.

use std::sync::RwLock;

use anyhow::Result;
use thiserror::Error;

use crate::api;

#[derive(Debug, PartialEq, Error)]
pub enum CommitLogError {
  #[error("offset is out of bounds, the log does not contain offset {0}")]
  OffsetOutOfBounds(u64),
}

pub trait CommitLog: Send + Sync {
  /// Appends a record and returns the offset it was assigned.
  fn append(&self, record: api::v1::Record) -> Result<u64>;

  /// Returns the record stored at the given offset. Fails with
  /// `CommitLogError::OffsetOutOfBounds` when the log does not contain it.
  fn read(&self, offset: u64) -> Result<api::v1::Record>;
}

/// A commit log that keeps its records in memory, ordered by offset.
#[derive(Debug, Default)]
pub struct MemoryLog {
  records: RwLock<Vec<api::v1::Record>>,
}

impl MemoryLog {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CommitLog for MemoryLog {
  fn append(&self, mut record: api::v1::Record) -> Result<u64> {
    let mut records = self.records.write().unwrap();

    let offset = records.len() as u64;
    record.offset = offset;
    records.push(record);

    Ok(offset)
  }

  fn read(&self, offset: u64) -> Result<api::v1::Record> {
    let records = self.records.read().unwrap();

    records
      .get(offset as usize)
      .cloned()
      .ok_or_else(|| CommitLogError::OffsetOutOfBounds(offset).into())
  }
}
