use crate::ConfigError;

/// Configuration for a [`BufferedBridge`](crate::BufferedBridge).
///
/// Fixed at construction; the bridge never reconfigures itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Buffer capacity. For an unbounded buffer this is the link size used
    /// as a growth hint, not a limit.
    pub capacity: usize,
    /// Use a growable buffer that never rejects items.
    pub unbounded: bool,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl BridgeConfig {
    /// Creates a new configuration with custom settings.
    pub const fn new(capacity: usize, unbounded: bool, enable_metrics: bool) -> Self {
        Self {
            capacity,
            unbounded,
            enable_metrics,
        }
    }

    /// A bounded buffer that rejects items once `capacity` are held.
    pub const fn bounded(capacity: usize) -> Self {
        Self::new(capacity, false, false)
    }

    /// An unbounded buffer that grows in links of `link_size` items.
    pub const fn unbounded(link_size: usize) -> Self {
        Self::new(link_size, true, false)
    }

    /// Sets whether metrics are collected.
    pub const fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Checks that the configuration can back a buffer.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if !self.unbounded && self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

/// Small bounded buffer (32 slots)
pub const SMALL_BUFFER_CONFIG: BridgeConfig = BridgeConfig::bounded(32);

/// Default bounded buffer (256 slots)
pub const DEFAULT_CONFIG: BridgeConfig = BridgeConfig::bounded(256);
