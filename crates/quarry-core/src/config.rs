//! Engine configuration.

/// Default maximum relation traversal depth.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Default maximum filter nesting depth.
pub const DEFAULT_MAX_FILTER_DEPTH: usize = 16;

/// Configuration for the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum nesting of relation reads, and of cascading deletes.
    pub max_depth: usize,

    /// Maximum nesting of filter expressions, counting every And/Or/Not and
    /// relation quantifier on the way to a leaf.
    pub max_filter_depth: usize,

    /// Upper bound on `take`. None means any non-negative take is accepted.
    pub max_take: Option<u64>,

    /// Seal the schema registry when the engine is constructed.
    pub auto_seal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_take: None,
            auto_seal: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum relation depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the maximum filter nesting depth.
    pub fn with_max_filter_depth(mut self, depth: usize) -> Self {
        self.max_filter_depth = depth;
        self
    }

    /// Set an upper bound on `take`.
    pub fn with_max_take(mut self, max: u64) -> Self {
        self.max_take = Some(max);
        self
    }

    /// Leave the registry open; the caller seals it.
    pub fn without_auto_seal(mut self) -> Self {
        self.auto_seal = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.max_filter_depth, 16);
        assert!(config.max_take.is_none());
        assert!(config.auto_seal);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_max_depth(2)
            .with_max_filter_depth(4)
            .with_max_take(100)
            .without_auto_seal();

        assert_eq!(config.max_depth, 2);
        assert_eq!(config.max_filter_depth, 4);
        assert_eq!(config.max_take, Some(100));
        assert!(!config.auto_seal);
    }
}
