use crate::net::codec::{DEFAULT_MAX_FRAME_LENGTH, MIN_FRAME_LENGTH};
use std::time::Duration;

/// Limits shared by stubs and skeletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    max_frame_length: usize,
    timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            timeout: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest accepted frame body. Clamped to at least 4 MiB.
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length.max(MIN_FRAME_LENGTH);
        self
    }

    /// Bounds a whole client call, and how long a skeleton waits for a request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_limit_has_a_floor() {
        let config = Config::new().with_max_frame_length(16);
        assert_eq!(config.max_frame_length(), MIN_FRAME_LENGTH);
        assert_eq!(Config::default().timeout(), None);
    }
}
