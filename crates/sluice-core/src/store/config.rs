//! Event store configuration.

use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// Default number of slots in the ring buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default size of one memory unit in bytes (1 KiB).
pub const DEFAULT_BUFFER_MEM_UNIT: u64 = 1024;

/// How batch sizes and buffer capacity are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Batch sizes count events.
    #[default]
    ItemSize,

    /// Batch sizes count memory units (`batch_size × buffer_mem_unit` bytes),
    /// and the buffer additionally enforces a byte ceiling of
    /// `buffer_size × buffer_mem_unit`.
    MemSize,
}

impl BatchMode {
    /// Returns `true` for [`BatchMode::ItemSize`].
    #[must_use]
    pub fn is_item_size(self) -> bool {
        self == Self::ItemSize
    }

    /// Returns `true` for [`BatchMode::MemSize`].
    #[must_use]
    pub fn is_mem_size(self) -> bool {
        self == Self::MemSize
    }
}

/// Configuration for a [`RingBufferStore`](super::RingBufferStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of slots; must be a power of two.
    pub buffer_size: usize,

    /// Bytes per memory unit (byte-budget mode only).
    pub buffer_mem_unit: u64,

    /// Batching discipline.
    pub batch_mode: BatchMode,

    /// Deliver schema changes as singleton batches.
    pub ddl_isolation: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_mem_unit: DEFAULT_BUFFER_MEM_UNIT,
            batch_mode: BatchMode::ItemSize,
            ddl_isolation: false,
        }
    }
}

impl StoreConfig {
    /// Creates a count-mode configuration with the given number of slots.
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Byte ceiling enforced in byte-budget mode.
    #[must_use]
    pub fn mem_capacity(&self) -> u64 {
        (self.buffer_size as u64).saturating_mul(self.buffer_mem_unit)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the buffer size is not a
    /// power of two, or in byte-budget mode if the memory unit is zero or
    /// the byte ceiling overflows `u64`.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !self.buffer_size.is_power_of_two() {
            return Err(StoreError::InvalidConfig(format!(
                "buffer_size must be a power of 2, got {}",
                self.buffer_size
            )));
        }
        if self.batch_mode.is_mem_size() && self.buffer_mem_unit == 0 {
            return Err(StoreError::InvalidConfig(
                "buffer_mem_unit must be > 0 in mem_size mode".to_string(),
            ));
        }
        if self.batch_mode.is_mem_size()
            && (self.buffer_size as u64)
                .checked_mul(self.buffer_mem_unit)
                .is_none()
        {
            return Err(StoreError::InvalidConfig(format!(
                "buffer_size {} x buffer_mem_unit {} overflows",
                self.buffer_size, self.buffer_mem_unit
            )));
        }
        Ok(())
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    buffer_size: Option<usize>,
    buffer_mem_unit: Option<u64>,
    batch_mode: Option<BatchMode>,
    ddl_isolation: Option<bool>,
}

impl StoreConfigBuilder {
    /// Sets the number of slots.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Sets the memory unit in bytes.
    #[must_use]
    pub fn buffer_mem_unit(mut self, unit: u64) -> Self {
        self.buffer_mem_unit = Some(unit);
        self
    }

    /// Sets the batching discipline.
    #[must_use]
    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = Some(mode);
        self
    }

    /// Enables or disables DDL isolation.
    #[must_use]
    pub fn ddl_isolation(mut self, enabled: bool) -> Self {
        self.ddl_isolation = Some(enabled);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> StoreConfig {
        let defaults = StoreConfig::default();
        StoreConfig {
            buffer_size: self.buffer_size.unwrap_or(defaults.buffer_size),
            buffer_mem_unit: self.buffer_mem_unit.unwrap_or(defaults.buffer_mem_unit),
            batch_mode: self.batch_mode.unwrap_or(defaults.batch_mode),
            ddl_isolation: self.ddl_isolation.unwrap_or(defaults.ddl_isolation),
        }
    }
}
