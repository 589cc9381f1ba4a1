use std::path::PathBuf;

/// Configuration for a segmented log store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the segment files.
    pub dir: PathBuf,

    /// Rollover threshold for the active segment file (default: 10MB).
    pub max_segment_size: u64,

    /// Common prefix of segment file names (default: "current-data").
    pub file_prefix: String,

    /// Pending writes the queue holds before producers block (default: 100).
    pub write_queue_depth: usize,

    /// Segment count that triggers a compaction pass after a rollover
    /// (default: 3).
    pub compact_min_segments: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./segkv"),
            max_segment_size: 10 * 1024 * 1024, // 10MB
            file_prefix: "current-data".to_string(),
            write_queue_depth: 100,
            compact_min_segments: 3,
        }
    }
}

impl StoreConfig {
    /// Create a new config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the active segment rollover threshold.
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Set the segment file name prefix.
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Set the write queue depth.
    pub fn write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth;
        self
    }

    /// Set the segment count that triggers compaction.
    pub fn compact_min_segments(mut self, count: usize) -> Self {
        self.compact_min_segments = count;
        self
    }

    /// Path of the segment file with the given counter value.
    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}{}", self.file_prefix, id))
    }
}
