//! Process-wide chain head state.
//!
//! Written only by the event ingestor; everything else reads snapshots.

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeadSnapshot {
    pub last_block: u64,
    pub reorg_count: u64,
    pub last_reorg_from_block: Option<u64>,
}

/// Current view of the chain as observed through the feed
#[derive(Debug, Default)]
pub struct ChainHead {
    inner: RwLock<HeadSnapshot>,
}

impl ChainHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block observation; the head only ever moves forward here.
    pub fn observe_block(&self, block: u64) {
        let mut inner = self.inner.write();
        inner.last_block = inner.last_block.max(block);
    }

    /// Record a reorg; the head rewinds to just before the reorg point so
    /// replayed events are observed as forward progress again.
    pub fn observe_reorg(&self, from_block: u64) {
        let mut inner = self.inner.write();
        inner.reorg_count += 1;
        inner.last_reorg_from_block = Some(from_block);
        inner.last_block = inner.last_block.min(from_block.saturating_sub(1));
    }

    pub fn snapshot(&self) -> HeadSnapshot {
        *self.inner.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_advances_monotonically() {
        let head = ChainHead::new();
        head.observe_block(10);
        head.observe_block(7);
        assert_eq!(head.snapshot().last_block, 10);
    }

    #[test]
    fn reorg_rewinds_head_and_counts() {
        let head = ChainHead::new();
        head.observe_block(120);
        head.observe_reorg(118);

        let snap = head.snapshot();
        assert_eq!(snap.last_block, 117);
        assert_eq!(snap.reorg_count, 1);
        assert_eq!(snap.last_reorg_from_block, Some(118));

        head.observe_block(118);
        assert_eq!(head.snapshot().last_block, 118);
    }
}
