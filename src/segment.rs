//! The segment wraps the index and store types to coordinate operations
//! across the two.
//!
//! When the log appends a record to the active segment, the segment writes
//! the data to its store and adds a new entry to its index. For reads, the
//! segment looks up the entry in the index and then fetches the data from
//! the store.

use std::{fs::OpenOptions, path::Path};

use anyhow::Result;
use prost::Message;

use crate::{
  api,
  config::Config,
  index::Index,
  store::{Store, StoreReader},
};

#[derive(Debug)]
pub struct Segment {
  store: Store,
  index: Index,
  /// Smallest absolute offset this segment may hold. Also part of the
  /// segment's file names.
  base_offset: u64,
  /// Absolute offset the next append will assign.
  next_offset: u64,
  config: Config,
}

impl Segment {
  /// Opens the segment files in `directory` for the given base offset,
  /// creating them if they do not exist, and recovers `next_offset` from
  /// the last index entry.
  pub fn new(directory: impl AsRef<Path>, base_offset: u64, config: Config) -> Result<Self> {
    let directory = directory.as_ref();

    let store_path = directory.join(format!("{}.store", base_offset));
    let store_file = OpenOptions::new()
      .read(true)
      .append(true)
      .create(true)
      .open(&store_path)?;
    let store = Store::new(store_file, &store_path)?;

    let index_path = directory.join(format!("{}.index", base_offset));
    let index_file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(&index_path)?;
    let index = Index::new(index_file, &index_path, config)?;

    let next_offset = match index.last_entry() {
      Some((relative_offset, _)) => base_offset + relative_offset as u64 + 1,
      None => base_offset,
    };

    Ok(Self {
      store,
      index,
      base_offset,
      next_offset,
      config,
    })
  }

  /// Stamps the record with the next offset, appends it to the store and
  /// indexes its position. Returns the offset the record was assigned.
  ///
  /// If the index is full the error surfaces unchanged and the store write
  /// is not rolled back; the orphan payload is unreachable because no index
  /// entry points at it.
  pub fn append(&mut self, mut record: api::v1::Record) -> Result<u64> {
    let offset = self.next_offset;
    record.offset = offset;

    let mut buffer = Vec::with_capacity(record.encoded_len());
    record.encode(&mut buffer)?;

    let output = self.store.append(&buffer)?;
    self
      .index
      .write((offset - self.base_offset) as u32, output.position)?;

    self.next_offset += 1;

    Ok(offset)
  }

  /// Reads the record stored at the given absolute offset. Callers are
  /// expected to hand in an offset at or past `base_offset`.
  pub fn read(&self, offset: u64) -> Result<api::v1::Record> {
    let position = self.index.read(offset - self.base_offset)?;

    let bytes = self.store.read(position)?;
    let record = api::v1::Record::decode(bytes.as_slice())?;

    Ok(record)
  }

  /// Returns true when the store or the index is at or past its byte cap.
  pub fn is_maxed(&self) -> bool {
    self.store.size() >= self.config.segment.max_store_bytes
      || self.index.size() >= self.config.segment.max_index_bytes
  }

  pub fn reader(&self) -> std::io::Result<StoreReader> {
    self.store.reader()
  }

  pub fn base_offset(&self) -> u64 {
    self.base_offset
  }

  pub fn next_offset(&self) -> u64 {
    self.next_offset
  }

  /// Closes the segment and deletes its store and index files.
  pub fn remove(self) -> Result<()> {
    let store_path = self.store.path().to_owned();
    let index_path = self.index.path().to_owned();

    self.close()?;

    std::fs::remove_file(index_path)?;
    std::fs::remove_file(store_path)?;

    Ok(())
  }

  /// Closes the index, which truncates and unmaps it, then the store,
  /// which flushes it.
  pub fn close(self) -> Result<()> {
    self.index.close()?;
    self.store.close()?;

    Ok(())
  }
}
