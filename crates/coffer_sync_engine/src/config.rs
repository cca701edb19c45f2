//! Configuration for the sync engine.

/// Configuration for a sync engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Device ID (unique per device, stable across restarts).
    pub device_id: [u8; 16],
    /// Chunk size for stored and transferred content, in bytes.
    pub chunk_size: u32,
    /// Whether uploads may transmit delta patches against the synced
    /// ancestor. Deltas are a bandwidth optimization only; reconstruction
    /// is byte-identical either way.
    pub delta_enabled: bool,
    /// Bounded history kept by the event bus for polling catch-up.
    pub event_history: usize,
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but the device.
    #[must_use]
    pub fn new(device_id: [u8; 16]) -> Self {
        Self {
            device_id,
            chunk_size: 64 * 1024,
            delta_enabled: true,
            event_history: 4096,
        }
    }

    /// Sets the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enables or disables delta uploads.
    #[must_use]
    pub fn with_delta_enabled(mut self, enabled: bool) -> Self {
        self.delta_enabled = enabled;
        self
    }

    /// Sets the event history bound.
    #[must_use]
    pub fn with_event_history(mut self, events: usize) -> Self {
        self.event_history = events;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new([0u8; 16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::new([7u8; 16])
            .with_chunk_size(1024)
            .with_delta_enabled(false)
            .with_event_history(16);

        assert_eq!(config.device_id, [7u8; 16]);
        assert_eq!(config.chunk_size, 1024);
        assert!(!config.delta_enabled);
        assert_eq!(config.event_history, 16);
    }

    #[test]
    fn defaults_are_sensible() {
        let config = EngineConfig::default();
        assert!(config.chunk_size > 0);
        assert!(config.delta_enabled);
    }
}
