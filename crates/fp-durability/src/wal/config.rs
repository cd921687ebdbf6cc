//! WAL rotation configuration.

use thiserror::Error;

/// Thresholds that trigger WAL segment rotation.
///
/// `max_wal_age_seconds` is only consulted by the dated engine — the
/// spec scopes wall-clock-age rotation to that variant; the collection
/// engine rotates on size and record count alone.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Maximum segment size in bytes before rotation (default: 10MB,
    /// matching the original implementation's default).
    pub max_wal_size: u64,
    /// Maximum record count in a segment before rotation (default: 1000).
    pub batch_size: usize,
    /// Maximum segment age in seconds before rotation. `None` disables
    /// age-based rotation (the collection engine's default).
    pub max_wal_age_seconds: Option<u64>,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            max_wal_size: 10 * 1024 * 1024,
            batch_size: 1000,
            max_wal_age_seconds: None,
        }
    }
}

impl WalConfig {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size-based rotation threshold (builder pattern).
    pub fn with_max_wal_size(mut self, bytes: u64) -> Self {
        self.max_wal_size = bytes;
        self
    }

    /// Set the record-count rotation threshold (builder pattern).
    pub fn with_batch_size(mut self, records: usize) -> Self {
        self.batch_size = records;
        self
    }

    /// Set the age-based rotation threshold (builder pattern).
    pub fn with_max_wal_age_seconds(mut self, seconds: u64) -> Self {
        self.max_wal_age_seconds = Some(seconds);
        self
    }

    /// A configuration tuned for fast rotation in tests.
    pub fn for_testing() -> Self {
        WalConfig {
            max_wal_size: 64 * 1024,
            batch_size: 16,
            max_wal_age_seconds: None,
        }
    }

    /// Validate the declared thresholds.
    pub fn validate(&self) -> Result<(), WalConfigError> {
        if self.max_wal_size < 64 {
            return Err(WalConfigError::MaxWalSizeTooSmall);
        }
        if self.batch_size == 0 {
            return Err(WalConfigError::BatchSizeZero);
        }
        Ok(())
    }
}

/// Errors raised when a [`WalConfig`] declares an unusable threshold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalConfigError {
    /// `max_wal_size` is too small to hold even a single typical record.
    #[error("max_wal_size must be at least 64 bytes")]
    MaxWalSizeTooSmall,
    /// `batch_size` of zero would rotate on every single append.
    #[error("batch_size must be at least 1")]
    BatchSizeZero,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_implementation() {
        let config = WalConfig::default();
        assert_eq!(config.max_wal_size, 10 * 1024 * 1024);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.max_wal_age_seconds, None);
    }

    #[test]
    fn builder_pattern() {
        let config = WalConfig::new()
            .with_max_wal_size(1024)
            .with_batch_size(10)
            .with_max_wal_age_seconds(300);
        assert_eq!(config.max_wal_size, 1024);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_wal_age_seconds, Some(300));
    }

    #[test]
    fn rejects_tiny_size() {
        let config = WalConfig::new().with_max_wal_size(1);
        assert_eq!(config.validate(), Err(WalConfigError::MaxWalSizeTooSmall));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = WalConfig::new().with_batch_size(0);
        assert_eq!(config.validate(), Err(WalConfigError::BatchSizeZero));
    }

    #[test]
    fn for_testing_is_valid() {
        assert!(WalConfig::for_testing().validate().is_ok());
    }
}
