use ahash::AHashSet;
use lru::LruCache;

use super::FrameId;

/// Eviction policy for buffer pool frames.
///
/// Every frame the policy knows about is either pinned (never a victim)
/// or evictable. Implementations only order frames; the buffer pool owns
/// the frames themselves.
pub trait Replacer: Send {
    /// Remove and return the frame to evict next, if any is evictable
    fn victim(&mut self) -> Option<FrameId>;

    /// Make `frame_id` ineligible for eviction
    fn pin(&mut self, frame_id: FrameId);

    /// Make `frame_id` eligible for eviction
    fn unpin(&mut self, frame_id: FrameId);

    /// Hand back a frame returned by `victim` that could not be evicted.
    /// It becomes the next victim again.
    fn restore_victim(&mut self, frame_id: FrameId);

    /// Number of evictable frames
    fn size(&self) -> usize;
}

/// Strict least-recently-unpinned policy
pub struct LruReplacer {
    /// Evictable frames, least recently unpinned at the LRU end
    evictable: LruCache<FrameId, ()>,
    pinned: AHashSet<FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            evictable: LruCache::unbounded(),
            pinned: AHashSet::new(),
        }
    }

    pub fn is_pinned(&self, frame_id: FrameId) -> bool {
        self.pinned.contains(&frame_id)
    }

    pub fn is_evictable(&self, frame_id: FrameId) -> bool {
        self.evictable.contains(&frame_id)
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        self.evictable.pop_lru().map(|(frame_id, ())| frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.evictable.pop(&frame_id);
        self.pinned.insert(frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        self.pinned.remove(&frame_id);
        // Re-unpinning keeps the original position; `contains` does not promote
        if !self.evictable.contains(&frame_id) {
            self.evictable.put(frame_id, ());
        }
    }

    fn restore_victim(&mut self, frame_id: FrameId) {
        self.pinned.remove(&frame_id);
        self.evictable.put(frame_id, ());
        self.evictable.demote(&frame_id);
    }

    fn size(&self) -> usize {
        self.evictable.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_follows_unpin_order() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_pin_removes_from_evictable() {
        let mut replacer = LruReplacer::new();
        for frame_id in 0..4 {
            replacer.unpin(frame_id);
        }

        replacer.pin(0);
        replacer.pin(2);
        assert_eq!(replacer.size(), 2);
        assert!(replacer.is_pinned(0));
        assert!(!replacer.is_evictable(0));

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_absent_frame_is_harmless() {
        let mut replacer = LruReplacer::new();
        replacer.pin(7);
        replacer.pin(7);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_repin_moves_to_mru_end() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);
        replacer.unpin(1);

        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_double_unpin_keeps_position() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(1);

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_restored_victim_keeps_lru_position() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        let victim = replacer.victim().unwrap();
        assert_eq!(victim, 1);
        replacer.restore_victim(victim);

        assert_eq!(replacer.size(), 3);
        assert!(replacer.is_evictable(1));
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
    }

    #[test]
    fn test_frame_in_exactly_one_partition() {
        let mut replacer = LruReplacer::new();
        replacer.pin(5);
        assert!(replacer.is_pinned(5) && !replacer.is_evictable(5));

        replacer.unpin(5);
        assert!(!replacer.is_pinned(5) && replacer.is_evictable(5));

        replacer.victim();
        assert!(!replacer.is_pinned(5) && !replacer.is_evictable(5));
    }
}
