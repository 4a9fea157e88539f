//! Relay and port finder configuration

use crate::port_finder::PortFinderError;

/// Default relay buffer size (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for a relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Size of the buffer each direction reads into
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// Configuration for a [`PortFinder`](crate::PortFinder)
///
/// The default range stays below the ephemeral port range, so that tunnel
/// listeners do not collide with outbound client connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFinderConfig {
    /// First port of the range (inclusive)
    pub range_start: u16,

    /// End of the range (exclusive)
    pub range_end: u16,

    /// Random draws to make before giving up
    pub max_attempts: usize,
}

impl Default for PortFinderConfig {
    fn default() -> Self {
        Self {
            range_start: 10000,
            range_end: 49000,
            max_attempts: 1000,
        }
    }
}

impl PortFinderConfig {
    pub fn with_range(mut self, range_start: u16, range_end: u16) -> Self {
        self.range_start = range_start;
        self.range_end = range_end;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn validate(&self) -> Result<(), PortFinderError> {
        if self.range_start == 0 {
            return Err(PortFinderError::InvalidConfig(
                "range must not include port 0".to_string(),
            ));
        }
        if self.range_start >= self.range_end {
            return Err(PortFinderError::InvalidConfig(format!(
                "empty port range {}..{}",
                self.range_start, self.range_end
            )));
        }
        if self.max_attempts == 0 {
            return Err(PortFinderError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
