#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
  pub segment: SegmentConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentConfig {
  /// Store file byte cap. A segment whose store reaches it is maxed.
  pub max_store_bytes: u64,
  /// Index file byte cap and the size the index file is mapped at.
  pub max_index_bytes: u64,
  /// Base offset of the first segment when the log directory is empty.
  pub initial_offset: u64,
}
