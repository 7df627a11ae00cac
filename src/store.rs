//! Store represents a file where records are stored.
//!
//! Records are framed by a length prefix: `[len: u64 BE][payload: len bytes]`.

use std::{
  fs::File,
  io::{BufWriter, Write},
  os::unix::prelude::FileExt,
  path::{Path, PathBuf},
  sync::Mutex,
};

use anyhow::Result;
use thiserror::Error;

/// Number of bytes used by the length prefix of each record.
pub(crate) static LEN_WIDTH: u64 = 8;

#[derive(Debug)]
pub struct Store {
  /// File is wrapped in a BufWriter because it can be inefficient
  /// to work directly with something that implements Write
  /// because it may issue too many system calls.
  ///
  /// BufWriter keeps an in-memory buffer of data and writes it to the
  /// underlying writer in batches. Buffered bytes are invisible to
  /// positioned reads, so every read path flushes while holding the
  /// same mutex.
  writer: Mutex<BufWriter<File>>,
  /// File size in bytes, counting bytes still sitting in the write buffer.
  size: u64,
  path: PathBuf,
}

#[derive(Debug)]
pub struct AppendOutput {
  /// Bytes appended to the store, length prefix included.
  pub bytes_written: u64,
  /// Byte offset at which the record's length prefix begins.
  pub position: u64,
}

#[derive(Debug, PartialEq, Error)]
pub enum StoreError {
  #[error(
    "corrupt record at position {position}: length prefix {length} exceeds store size {store_size}"
  )]
  Corruption {
    position: u64,
    length: u64,
    store_size: u64,
  },
}

impl Store {
  pub fn new(file: File, path: impl Into<PathBuf>) -> Result<Self> {
    let metadata = file.metadata()?;

    Ok(Self {
      size: metadata.len(),
      writer: Mutex::new(BufWriter::new(file)),
      path: path.into(),
    })
  }

  /// Appends the length-prefixed record to the store and returns the
  /// number of bytes written and the position the record was written at.
  pub fn append(&mut self, record: &[u8]) -> Result<AppendOutput> {
    let mut writer = self.writer.lock().unwrap();

    let position = self.size;

    writer.write_all(&(record.len() as u64).to_be_bytes())?;
    writer.write_all(record)?;

    let bytes_written = LEN_WIDTH + record.len() as u64;
    self.size += bytes_written;

    Ok(AppendOutput {
      bytes_written,
      position,
    })
  }

  /// Reads the record whose length prefix begins at `position`.
  pub fn read(&self, position: u64) -> Result<Vec<u8>> {
    let mut writer = self.writer.lock().unwrap();

    // Flush so that records still sitting in the buffer are visible
    // to the positioned reads below.
    writer.flush()?;

    let file = writer.get_ref();

    let mut length_buffer = [0u8; 8];
    file.read_exact_at(&mut length_buffer, position)?;
    let length = u64::from_be_bytes(length_buffer);

    if position + LEN_WIDTH + length > self.size {
      return Err(
        StoreError::Corruption {
          position,
          length,
          store_size: self.size,
        }
        .into(),
      );
    }

    let mut record = vec![0u8; length as usize];
    file.read_exact_at(&mut record, position + LEN_WIDTH)?;

    Ok(record)
  }

  /// Positioned read into `buffer`. Short reads return the short count.
  pub fn read_at(&self, buffer: &mut [u8], position: u64) -> std::io::Result<usize> {
    let mut writer = self.writer.lock().unwrap();

    writer.flush()?;

    writer.get_ref().read_at(buffer, position)
  }

  /// Returns a forward-only reader over the store bytes as they are now.
  /// Appends made after this call are not observed.
  pub fn reader(&self) -> std::io::Result<StoreReader> {
    let mut writer = self.writer.lock().unwrap();

    writer.flush()?;

    Ok(StoreReader {
      file: writer.get_ref().try_clone()?,
      position: 0,
      size: self.size,
    })
  }

  pub fn size(&self) -> u64 {
    self.size
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Flushes buffered records and closes the file.
  pub fn close(self) -> Result<()> {
    let mut writer = self.writer.into_inner().unwrap();

    writer.flush()?;

    Ok(())
  }
}

/// Reads a store file from byte 0 up to the size it had when the reader
/// was created.
#[derive(Debug)]
pub struct StoreReader {
  file: File,
  position: u64,
  size: u64,
}

impl std::io::Read for StoreReader {
  fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
    if self.position >= self.size {
      return Ok(0);
    }

    let remaining = (self.size - self.position) as usize;
    let length = buffer.len().min(remaining);

    let bytes_read = self.file.read_at(&mut buffer[..length], self.position)?;
    self.position += bytes_read as u64;

    Ok(bytes_read)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Read;

  use super::*;
  use tempfile::NamedTempFile;

  static TEST_PAYLOAD: &[u8] = b"hello world";

  fn record_width() -> u64 {
    TEST_PAYLOAD.len() as u64 + LEN_WIDTH
  }

  #[test]
  fn append_read_and_recover() {
    let file = NamedTempFile::new().unwrap();
    let file_copy = file.reopen().unwrap();
    let path = file.path().to_owned();

    let mut store = Store::new(file.into_file(), &path).unwrap();

    for i in 1..4 {
      let output = store.append(TEST_PAYLOAD).unwrap();
      assert_eq!(record_width() * i, output.position + output.bytes_written);
    }

    let mut position = 0;
    for _ in 1..4 {
      assert_eq!(TEST_PAYLOAD, store.read(position).unwrap().as_slice());
      position += record_width();
    }

    // A store created over the same file recovers its size and reads
    // the same records.
    let recovered = Store::new(file_copy, &path).unwrap();
    assert_eq!(record_width() * 3, recovered.size());
    assert_eq!(TEST_PAYLOAD, recovered.read(0).unwrap().as_slice());
  }

  #[test]
  fn read_at_walks_frames() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_owned();

    let mut store = Store::new(file.into_file(), &path).unwrap();

    for _ in 1..4 {
      store.append(TEST_PAYLOAD).unwrap();
    }

    let mut position = 0;
    for _ in 1..4 {
      let mut length_buffer = [0u8; 8];
      let bytes_read = store.read_at(&mut length_buffer, position).unwrap();
      assert_eq!(LEN_WIDTH as usize, bytes_read);
      position += bytes_read as u64;

      let record_size = u64::from_be_bytes(length_buffer);
      let mut record = vec![0u8; record_size as usize];
      let bytes_read = store.read_at(&mut record, position).unwrap();
      assert_eq!(TEST_PAYLOAD, record.as_slice());
      assert_eq!(record_size as usize, bytes_read);
      position += bytes_read as u64;
    }
  }

  #[test]
  fn close_flushes_buffered_records() {
    let file = NamedTempFile::new().unwrap();
    let file_copy = file.reopen().unwrap();
    let path = file.path().to_owned();

    let mut store = Store::new(file.into_file(), &path).unwrap();
    store.append(TEST_PAYLOAD).unwrap();

    let size_before_close = file_copy.metadata().unwrap().len();

    store.close().unwrap();

    let size_after_close = file_copy.metadata().unwrap().len();
    assert!(size_after_close > size_before_close);
    assert_eq!(record_width(), size_after_close);
  }

  #[test]
  fn read_detects_corrupt_length_prefix() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_owned();

    let mut store = Store::new(file.into_file(), &path).unwrap();
    store.append(TEST_PAYLOAD).unwrap();

    // Byte 8 is the middle of the payload. Interpreted as a length
    // prefix it points far past the end of the store.
    let error = store.read(LEN_WIDTH).unwrap_err();
    assert!(error.downcast_ref::<StoreError>().is_some());
  }

  #[test]
  fn reader_does_not_observe_later_appends() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_owned();

    let mut store = Store::new(file.into_file(), &path).unwrap();
    store.append(TEST_PAYLOAD).unwrap();

    let mut reader = store.reader().unwrap();

    store.append(TEST_PAYLOAD).unwrap();

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).unwrap();

    assert_eq!(record_width() as usize, buffer.len());
    assert_eq!(TEST_PAYLOAD, &buffer[LEN_WIDTH as usize..]);
  }
}
