//! Ingestion and analysis settings.

use log::LevelFilter;

use crate::arena::DEFAULT_CHUNK_SIZE;

/// Default number of line batches circulating in the pipeline.
pub const DEFAULT_BUFFERS: usize = 2;

/// Default capacity of one line batch in bytes (1 MiB).
pub const DEFAULT_BATCH_BYTES: usize = 1 << 20;

/// Largest batch capacity. Token offsets within a batch are 32-bit.
pub const MAX_BATCH_BYTES: usize = 1 << 30;

/// Default maximum number of lines in one batch.
pub const DEFAULT_BATCH_LINES: usize = 16 * 1024;

/// Default number of prior task names kept for display.
pub const DEFAULT_NAME_HISTORY: usize = 4;

#[derive(Clone, Debug)]
pub struct Config {
    /// Verbosity level (0 = warn, 1 = info, 2 = debug, 3+ = trace)
    pub verbosity: u8,
    /// Line batches shared by the reader and parser threads (at least 2)
    pub buffers: usize,
    /// Soft byte capacity of one batch
    pub batch_bytes: usize,
    /// Maximum lines per batch
    pub batch_lines: usize,
    /// Size of each mmap'd arena chunk
    pub chunk_size: usize,
    /// Prior names remembered per task
    pub name_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbosity: 0,
            buffers: DEFAULT_BUFFERS,
            batch_bytes: DEFAULT_BATCH_BYTES,
            batch_lines: DEFAULT_BATCH_LINES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            name_history: DEFAULT_NAME_HISTORY,
        }
    }
}

impl Config {
    /// Log filter matching `verbosity`.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Batch capacity clamped to what token offsets can address.
    pub(crate) fn batch_capacity(&self) -> usize {
        self.batch_bytes.clamp(1, MAX_BATCH_BYTES)
    }

    /// Batch count clamped to the two the handshake needs.
    pub(crate) fn buffer_count(&self) -> usize {
        self.buffers.max(2)
    }
}
