//! LRU (Least Recently Used) replacement policy.

use lru::LruCache;

use crate::common::FrameId;

/// Evicts the least recently accessed unpinned frame.
///
/// Every tracked frame sits in one recency list together with its
/// evictable flag. Pinned frames stay in the list so that unpinning them
/// does not lose their position.
pub struct LruReplacer {
    /// Frame → evictable, most recently used first.
    entries: LruCache<FrameId, bool>,
    evictable: usize,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            evictable: 0,
        }
    }

    /// Record that a frame was accessed, making it most recently used.
    ///
    /// New frames start out non-evictable.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if self.entries.get(&frame_id).is_none() {
            self.entries.put(frame_id, false);
        }
    }

    /// Mark whether a frame may be chosen as a victim.
    ///
    /// Does not change its recency. Unknown frames are ignored.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(flag) = self.entries.peek_mut(&frame_id) {
            match (*flag, evictable) {
                (false, true) => self.evictable += 1,
                (true, false) => self.evictable -= 1,
                _ => {}
            }
            *flag = evictable;
        }
    }

    /// Select and forget the least recently used evictable frame.
    ///
    /// Returns `None` if every tracked frame is pinned.
    pub fn evict(&mut self) -> Option<FrameId> {
        let victim = self
            .entries
            .iter()
            .rev()
            .find(|(_, evictable)| **evictable)
            .map(|(frame_id, _)| *frame_id)?;

        self.entries.pop(&victim);
        self.evictable -= 1;
        Some(victim)
    }

    /// Stop tracking a frame.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(true) = self.entries.pop(&frame_id) {
            self.evictable -= 1;
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(replacer: &mut LruReplacer, ids: &[usize]) {
        for &id in ids {
            replacer.record_access(FrameId::new(id));
            replacer.set_evictable(FrameId::new(id), true);
        }
    }

    #[test]
    fn test_lru_evicts_oldest_first() {
        let mut replacer = LruReplacer::new();
        frames(&mut replacer, &[0, 1, 2]);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_reaccess_reorders() {
        let mut replacer = LruReplacer::new();
        frames(&mut replacer, &[0, 1, 2]);

        // Touch 0 again: 1 becomes the oldest
        replacer.record_access(FrameId::new(0));

        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_skips_pinned() {
        let mut replacer = LruReplacer::new();
        frames(&mut replacer, &[0, 1, 2]);
        replacer.set_evictable(FrameId::new(0), false);
        replacer.set_evictable(FrameId::new(2), false);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), None);

        // Unpinning keeps the original position
        replacer.set_evictable(FrameId::new(2), true);
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_remove() {
        let mut replacer = LruReplacer::new();
        frames(&mut replacer, &[0, 1]);

        replacer.remove(FrameId::new(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_set_evictable_is_idempotent() {
        let mut replacer = LruReplacer::new();
        frames(&mut replacer, &[3]);
        replacer.set_evictable(FrameId::new(3), true);
        replacer.set_evictable(FrameId::new(9), true);

        assert_eq!(replacer.size(), 1);
    }
}
