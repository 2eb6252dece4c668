//! Engine configuration

/// Settings fixed when an [`Engine`](crate::Engine) is created.
///
/// ```
/// use klingt_pd::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_sample_rate(48_000)
///     .with_block_size(128);
/// assert_eq!(config.channels, 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per block used by [`Engine::process`](crate::Engine::process)
    pub block_size: usize,
    /// Output channels handed to the audio backend
    pub channels: usize,
    /// Capacity of the cross-thread control queue, in messages
    pub control_queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 64,
            channels: 2,
            control_queue_size: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Set the number of output channels (builder pattern). At least one.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_control_queue_size(mut self, size: usize) -> Self {
        self.control_queue_size = size.max(1);
        self
    }
}
