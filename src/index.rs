//! Index maps record offsets to their positions in the store file.
//!
//! The index file is a sequence of fixed-width entries, each holding the
//! record's offset relative to the segment's base and the position of its
//! length prefix in the store. The file is grown to its maximum size before
//! being memory mapped, since the mapping cannot grow afterwards, and is
//! truncated back to the written entries on close. Skipping the truncate
//! would make the zeroed tail of the file read back as a phantom entry at
//! relative offset 0, position 0 after a re-open.

use std::{
  fs::File,
  path::{Path, PathBuf},
};

use anyhow::Result;
use memmap::MmapMut;
use thiserror::Error;

use crate::config::Config;

/// WIDTH statics define the number of bytes that make up each index entry:
/// the relative offset is stored as 4 bytes and the position as 8.
static OFFSET_WIDTH: u64 = 4;
static POSITION_WIDTH: u64 = 8;
pub(crate) static ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

#[derive(Debug)]
pub struct Index {
  file: File,
  /// Bytes of written content. Also where the next entry will be written.
  /// Distinct from the file length, which stays at the mapped maximum
  /// until close.
  size: u64,
  mmap: MmapMut,
  path: PathBuf,
}

#[derive(Debug, PartialEq, Error)]
pub enum IndexError {
  #[error("index has reached its maximum amount of entries")]
  IndexIsFull,
  #[error("index with len {index_len} does not contain offset {offset}")]
  OffsetOutOfBounds { offset: u64, index_len: u64 },
}

impl Index {
  pub fn new(file: File, path: impl Into<PathBuf>, config: Config) -> Result<Self> {
    let metadata = file.metadata()?;

    // Grow the file to the max index size before memory mapping it
    // because the file cannot be resized while it is mapped.
    file.set_len(config.segment.max_index_bytes)?;

    let mmap = unsafe { MmapMut::map_mut(&file)? };

    Ok(Self {
      file,
      mmap,
      size: metadata.len(),
      path: path.into(),
    })
  }

  /// Returns how many entries the index contains.
  fn len(&self) -> u64 {
    self.size / ENTRY_WIDTH
  }

  /// Returns true when the index contains no entries.
  fn is_empty(&self) -> bool {
    self.size == 0
  }

  /// Returns true when the index has no room left for another entry.
  fn is_full(&self) -> bool {
    (self.mmap.len() as u64) < self.size + ENTRY_WIDTH
  }

  /// Appends the given relative offset and position to the index.
  ///
  /// Returns `IndexError::IndexIsFull` if the index file does not contain
  /// enough space for the new entry.
  pub fn write(&mut self, offset: u32, position: u64) -> Result<(), IndexError> {
    if self.is_full() {
      return Err(IndexError::IndexIsFull);
    }

    let entry_starts_at = self.size as usize;
    let offset_ends_at = entry_starts_at + OFFSET_WIDTH as usize;
    let position_ends_at = offset_ends_at + POSITION_WIDTH as usize;

    self.mmap[entry_starts_at..offset_ends_at].copy_from_slice(&offset.to_be_bytes());
    self.mmap[offset_ends_at..position_ends_at].copy_from_slice(&position.to_be_bytes());

    self.size += ENTRY_WIDTH;

    Ok(())
  }

  /// Takes an entry offset and returns the associated record's position in
  /// the store.
  ///
  /// The given offset is relative to the segment's base offset: 0 is always
  /// the offset of the index's first entry, 1 the second, and so on.
  pub fn read(&self, offset: u64) -> Result<u64, IndexError> {
    if self.is_empty() || offset >= self.len() {
      return Err(IndexError::OffsetOutOfBounds {
        offset,
        index_len: self.len(),
      });
    }

    let position_starts_at = (offset * ENTRY_WIDTH + OFFSET_WIDTH) as usize;

    let mut buffer = [0u8; 8];
    buffer.copy_from_slice(&self.mmap[position_starts_at..position_starts_at + POSITION_WIDTH as usize]);

    Ok(u64::from_be_bytes(buffer))
  }

  /// Returns the relative offset and position of the last written entry,
  /// or `None` when the index is empty. Segments use this to recover the
  /// offset the next append should assign.
  pub fn last_entry(&self) -> Option<(u32, u64)> {
    if self.is_empty() {
      return None;
    }

    let entry_starts_at = ((self.len() - 1) * ENTRY_WIDTH) as usize;
    let position_starts_at = entry_starts_at + OFFSET_WIDTH as usize;

    let mut offset_buffer = [0u8; 4];
    offset_buffer.copy_from_slice(&self.mmap[entry_starts_at..position_starts_at]);

    let mut position_buffer = [0u8; 8];
    position_buffer
      .copy_from_slice(&self.mmap[position_starts_at..position_starts_at + POSITION_WIDTH as usize]);

    Some((
      u32::from_be_bytes(offset_buffer),
      u64::from_be_bytes(position_buffer),
    ))
  }

  pub fn size(&self) -> u64 {
    self.size
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Syncs the memory map to the file, truncates the file to the amount of
  /// data that is actually in it so a re-open can recover `size` from the
  /// file length, syncs the file to stable storage and closes it.
  pub fn close(mut self) -> Result<(), std::io::Error> {
    self.sync_and_truncate()
  }

  fn sync_and_truncate(&mut self) -> Result<(), std::io::Error> {
    self.mmap.flush()?;
    self.file.set_len(self.size)?;
    self.file.sync_all()?;

    Ok(())
  }
}

impl Drop for Index {
  /// The truncate-to-content step must happen on every exit path, not just
  /// the explicit `close`. Running it again after `close` is idempotent.
  fn drop(&mut self) {
    let _ = self.sync_and_truncate();
  }
}

#[cfg(test)]
mod tests {
  use std::io::Read;

  use super::*;
  use crate::config::SegmentConfig;
  use tempfile::NamedTempFile;

  fn test_config() -> Config {
    Config {
      segment: SegmentConfig {
        max_index_bytes: 1024,
        ..SegmentConfig::default()
      },
    }
  }

  #[test]
  fn rebuilds_state_from_a_non_empty_file() {
    let file = NamedTempFile::new().unwrap();
    let file_copy = file.reopen().unwrap();
    let path = file.path().to_owned();

    let mut index = Index::new(file.into_file(), &path, test_config()).unwrap();

    index.write(0, 0).unwrap();
    index.write(1, 16).unwrap();

    // Reading at the entry count is one past the last entry.
    assert_eq!(
      Err(IndexError::OffsetOutOfBounds {
        offset: 2,
        index_len: 2,
      }),
      index.read(2)
    );

    // Ensure file contents are flushed and truncated.
    index.close().unwrap();

    // The file has two entries, so an index created from it recovers them.
    let index = Index::new(file_copy, &path, test_config()).unwrap();
    assert_eq!(Some((1, 16)), index.last_entry());
    assert_eq!(Ok(16), index.read(1));
  }

  #[test]
  fn close_truncates_the_file_to_its_entries() {
    let file = NamedTempFile::new().unwrap();
    let mut file_read = file.reopen().unwrap();
    let path = file.path().to_owned();

    let mut index = Index::new(file.into_file(), &path, test_config()).unwrap();

    index.write(0, 0).unwrap();
    index.write(1, 10).unwrap();
    index.write(2, 1000).unwrap();

    index.close().unwrap();

    let mut buffer: Vec<u8> = Vec::new();
    file_read.read_to_end(&mut buffer).unwrap();

    // Three 12-byte entries and nothing else, offsets and positions in
    // big-endian.
    let expected = vec![
      0, 0, 0, 0, // offset (4 bytes) = 0
      0, 0, 0, 0, 0, 0, 0, 0, // position (8 bytes) = 0
      0, 0, 0, 1, // offset (4 bytes) = 1
      0, 0, 0, 0, 0, 0, 0, 10, // position (8 bytes) = 10
      0, 0, 0, 2, // offset (4 bytes) = 2
      0, 0, 0, 0, 0, 0, 3, 232, // position (8 bytes) = 1000
    ];

    assert_eq!(expected, buffer);
  }

  #[test]
  fn read_returns_error_if_offset_is_past_the_entries() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_owned();

    let mut index = Index::new(file.into_file(), &path, test_config()).unwrap();

    // Index is empty.
    assert_eq!(
      Err(IndexError::OffsetOutOfBounds {
        offset: 0,
        index_len: 0,
      }),
      index.read(0)
    );
    assert_eq!(None, index.last_entry());

    index.write(0, 11).unwrap();

    // Index has one entry, readable at offset 0 only.
    assert_eq!(
      Err(IndexError::OffsetOutOfBounds {
        offset: 1,
        index_len: 1,
      }),
      index.read(1)
    );
  }

  #[test]
  fn read_returns_position_mapped_to_the_offset() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_owned();

    let mut index = Index::new(file.into_file(), &path, test_config()).unwrap();

    index.write(0, 10).unwrap();
    index.write(1, 0).unwrap();
    index.write(2, 1).unwrap();
    index.write(3, 333).unwrap();

    assert_eq!(Ok(10), index.read(0));
    assert_eq!(Ok(0), index.read(1));
    assert_eq!(Ok(1), index.read(2));
    assert_eq!(Ok(333), index.read(3));
    assert_eq!(Some((3, 333)), index.last_entry());
  }

  #[test]
  fn write_fails_when_the_index_is_full() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_owned();

    let config = Config {
      segment: SegmentConfig {
        max_index_bytes: ENTRY_WIDTH * 2,
        ..SegmentConfig::default()
      },
    };

    let mut index = Index::new(file.into_file(), &path, config).unwrap();

    index.write(0, 0).unwrap();
    index.write(1, 19).unwrap();

    assert_eq!(Err(IndexError::IndexIsFull), index.write(2, 38));
  }
}
