//! Configuration types for the SearchIndexService.

/// Default number of documents sent per bulk request.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 2000;

/// Configuration for the SearchIndexService.
///
/// Controls how large collections are split before they are sent to the
/// search engine, so a single sync of many rows never produces one
/// oversized bulk request.
#[derive(Debug, Clone)]
pub struct SearchIndexServiceConfig {
    /// Maximum number of documents sent in a single bulk request.
    ///
    /// Larger collections are split into consecutive chunks of this size.
    /// Defaults to 2000.
    pub bulk_chunk_size: usize,
}

impl Default for SearchIndexServiceConfig {
    fn default() -> Self {
        Self {
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
        }
    }
}

impl SearchIndexServiceConfig {
    /// Create a config with a custom chunk size.
    ///
    /// # Arguments
    ///
    /// * `bulk_chunk_size` - Maximum number of documents per bulk request; zero is treated as one
    ///
    /// # Returns
    ///
    /// A `SearchIndexServiceConfig` with the specified chunk size.
    pub fn with_bulk_chunk_size(bulk_chunk_size: usize) -> Self {
        Self {
            bulk_chunk_size: bulk_chunk_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size() {
        assert_eq!(SearchIndexServiceConfig::default().bulk_chunk_size, 2000);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        assert_eq!(SearchIndexServiceConfig::with_bulk_chunk_size(0).bulk_chunk_size, 1);
    }
}
