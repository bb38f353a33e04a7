//! Eviction policy implementations (replacers).
//!
//! - [`LruReplacer`] - Least Recently Used, skipping pinned frames

mod lru;

pub use self::lru::LruReplacer;
