//! Engine configuration.
//!
//! Every struct deserialises with `#[serde(default)]`, so a partial document
//! only overrides the values it names. Defaults match the timings the
//! supported devices were characterised with.

use std::num::NonZeroUsize;
use std::time::Duration;

use hostflash_errors::{Result, UpdateError};
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Register arbitration
    pub arbitration: ArbitrationConfig,
    /// Chunk transfer
    pub transfer: TransferConfig,
    /// Lifecycle
    pub lifecycle: LifecycleConfig,
}

impl EngineConfig {
    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        self.arbitration.validate()?;
        self.transfer.validate()?;
        self.lifecycle.validate()
    }
}

/// Arbitration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Deadline for the granted bit, in milliseconds.
    ///
    /// Default: 200ms.
    pub timeout_ms: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self { timeout_ms: 200 }
    }
}

impl ArbitrationConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `timeout_ms` is outside 1..=10000.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10_000).contains(&self.timeout_ms) {
            return Err(UpdateError::invalid_config(
                "arbitration.timeout_ms must be between 1 and 10000",
            ));
        }
        Ok(())
    }

    /// Grant deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Status-handshake polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Queries before a handshake is declared failed.
    ///
    /// Default: 100.
    pub attempts: u32,
    /// Pause before each query, in milliseconds.
    ///
    /// Default: 50ms.
    pub interval_ms: u64,
    /// Device settle time after each framed block, in milliseconds.
    ///
    /// Default: 150ms.
    pub settle_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: 100,
            interval_ms: 50,
            settle_ms: 150,
        }
    }
}

impl HandshakeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `attempts` is zero or a delay exceeds 10s.
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(UpdateError::invalid_config(
                "transfer.handshake.attempts must be at least 1",
            ));
        }
        if self.interval_ms > 10_000 || self.settle_ms > 10_000 {
            return Err(UpdateError::invalid_config(
                "transfer.handshake delays must not exceed 10000ms",
            ));
        }
        Ok(())
    }

    /// Pause before each status query.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Settle time after each framed block.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Chunk transfer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Override of the device's native chunk size, for devices whose framing
    /// allows it.
    pub chunk_size: Option<usize>,
    /// Pause between chunks, in milliseconds.
    ///
    /// Default: 10ms.
    pub inter_chunk_delay_ms: u64,
    /// Attempts of the whole write phase on transport failure.
    ///
    /// Default: 5.
    pub write_attempts: u32,
    /// Attempts of the read-back phase on transport failure.
    ///
    /// Default: 5.
    pub read_attempts: u32,
    /// Status handshakes
    pub handshake: HandshakeConfig,
    /// Read back and compare after writing.
    ///
    /// Default: true.
    pub verify_readback: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: None,
            inter_chunk_delay_ms: 10,
            write_attempts: 5,
            read_attempts: 5,
            handshake: HandshakeConfig::default(),
            verify_readback: true,
        }
    }
}

impl TransferConfig {
    /// Largest accepted chunk size.
    pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a zero or oversized chunk, zero attempts, or a
    /// delay above 10s.
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.chunk_size
            && !(1..=Self::MAX_CHUNK_SIZE).contains(&size)
        {
            return Err(UpdateError::invalid_config(format!(
                "transfer.chunk_size must be between 1 and {}",
                Self::MAX_CHUNK_SIZE
            )));
        }
        if self.write_attempts == 0 || self.read_attempts == 0 {
            return Err(UpdateError::invalid_config(
                "transfer attempts must be at least 1",
            ));
        }
        if self.inter_chunk_delay_ms > 10_000 {
            return Err(UpdateError::invalid_config(
                "transfer.inter_chunk_delay_ms must not exceed 10000",
            ));
        }
        self.handshake.validate()
    }

    /// The configured chunk size, or `native` when none is set.
    #[must_use]
    pub fn chunk_size_or(&self, native: NonZeroUsize) -> NonZeroUsize {
        self.chunk_size.and_then(NonZeroUsize::new).unwrap_or(native)
    }

    /// Pause between chunks.
    #[must_use]
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

/// Lifecycle settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Re-enumeration wait for devices whose descriptor names none, in
    /// milliseconds.
    pub default_remove_delay_ms: u64,
}

impl LifecycleConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the remove delay exceeds five minutes.
    pub fn validate(&self) -> Result<()> {
        if self.default_remove_delay_ms > 300_000 {
            return Err(UpdateError::invalid_config(
                "lifecycle.default_remove_delay_ms must not exceed 300000",
            ));
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the arbitration deadline in milliseconds.
    #[must_use]
    pub fn arbitration_timeout_ms(mut self, ms: u64) -> Self {
        self.config.arbitration.timeout_ms = ms;
        self
    }

    /// Override the chunk size.
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.transfer.chunk_size = Some(size);
        self
    }

    /// Set the pause between chunks in milliseconds.
    #[must_use]
    pub fn inter_chunk_delay_ms(mut self, ms: u64) -> Self {
        self.config.transfer.inter_chunk_delay_ms = ms;
        self
    }

    /// Set the write and read-back attempt bounds.
    #[must_use]
    pub fn attempts(mut self, write: u32, read: u32) -> Self {
        self.config.transfer.write_attempts = write;
        self.config.transfer.read_attempts = read;
        self
    }

    /// Set the handshake polling parameters.
    #[must_use]
    pub fn handshake(mut self, attempts: u32, interval_ms: u64, settle_ms: u64) -> Self {
        self.config.transfer.handshake = HandshakeConfig {
            attempts,
            interval_ms,
            settle_ms,
        };
        self
    }

    /// Enable or disable read-back verification.
    #[must_use]
    pub fn verify_readback(mut self, enabled: bool) -> Self {
        self.config.transfer.verify_readback = enabled;
        self
    }

    /// Set the default re-enumeration wait in milliseconds.
    #[must_use]
    pub fn default_remove_delay_ms(mut self, ms: u64) -> Self {
        self.config.lifecycle.default_remove_delay_ms = ms;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration is invalid.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
