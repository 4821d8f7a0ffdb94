//! Engine configuration.
//!
//! A single [`EngineConfig`] travels inside the engine context; there is no
//! hidden global state. Defaults suit embedded use.

/// Tunables for a [`crate::engine::Silt`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Master switch for the per-table result cache. With caching off every
    /// SELECT recomputes; correctness is unaffected.
    pub cache_enabled: bool,

    /// Rows returned per ORM expansion when the [`crate::query::OrmSpec`]
    /// does not set its own limit.
    pub orm_row_limit: usize,

    /// Fuzzy-match tolerance: a word matches a query term when their
    /// levenshtein distance is at most `max(1, term_len / divisor)`.
    /// Larger divisors are stricter.
    pub fuzzy_distance_divisor: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_enabled: true,
            orm_row_limit: 5,
            fuzzy_distance_divisor: 3,
        }
    }
}
