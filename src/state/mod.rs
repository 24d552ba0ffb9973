pub mod content;
pub mod eviction;
pub mod listing_cache;
