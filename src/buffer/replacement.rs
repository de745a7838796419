//! Frame replacement strategies.
//!
//! All strategies honor the same contract: pinned frames are never
//! candidates, and `choose_victim` returns `None` when every occupied
//! frame is pinned. The buffer manager reports a pin-sequence number to
//! `on_pin` on every pin, including re-pins of resident pages, so the
//! recency- and frequency-based strategies stay accurate.

use crate::buffer::frame::FrameInfo;
use crate::common::FrameId;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Which replacement strategy the buffer manager should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    Random,
    Lru,
    /// Least-recently-used considering the k-th most recent pin; `k` is
    /// configured separately.
    LruK,
    Lfu,
    Clock,
}

/// Pluggable victim selection.
pub trait ReplacementStrategy: Send {
    /// Called on every pin with the frame index and the globally
    /// monotonic pin-sequence number.
    fn on_pin(&mut self, frame_id: FrameId, sequence: u64) {
        let _ = (frame_id, sequence);
    }

    /// Pick an occupied, unpinned frame to evict, or `None` if there is
    /// no candidate.
    fn choose_victim(&mut self, frames: &mut [FrameInfo]) -> Option<FrameId>;

    fn name(&self) -> &'static str;
}

/// Build the strategy for a policy. `lru_k` only matters for
/// [`ReplacementPolicy::LruK`].
pub fn create_strategy(
    policy: ReplacementPolicy,
    lru_k: usize,
    num_frames: usize,
) -> Box<dyn ReplacementStrategy> {
    match policy {
        ReplacementPolicy::Random => Box::new(RandomStrategy),
        ReplacementPolicy::Lru => Box::new(LruStrategy),
        ReplacementPolicy::LruK => Box::new(LruKStrategy { k: lru_k.max(1) }),
        ReplacementPolicy::Lfu => Box::new(LfuStrategy),
        ReplacementPolicy::Clock => Box::new(ClockStrategy {
            hand: 0,
            num_frames,
        }),
    }
}

fn candidates(frames: &[FrameInfo]) -> impl Iterator<Item = (FrameId, &FrameInfo)> {
    frames
        .iter()
        .enumerate()
        .filter(|(_, info)| info.is_occupied() && !info.is_pinned())
}

// ============================================================================
// Random
// ============================================================================

pub struct RandomStrategy;

impl ReplacementStrategy for RandomStrategy {
    fn choose_victim(&mut self, frames: &mut [FrameInfo]) -> Option<FrameId> {
        let ids: Vec<FrameId> = candidates(frames).map(|(id, _)| id).collect();
        if ids.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..ids.len());
        Some(ids[pick])
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

// ============================================================================
// LRU
// ============================================================================

/// Evicts the unpinned frame with the smallest last-pin sequence number.
pub struct LruStrategy;

impl ReplacementStrategy for LruStrategy {
    fn choose_victim(&mut self, frames: &mut [FrameInfo]) -> Option<FrameId> {
        candidates(frames)
            .min_by_key(|(_, info)| info.last_pin())
            .map(|(id, _)| id)
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

// ============================================================================
// LRU-K
// ============================================================================

/// Evicts the unpinned frame whose k-th most recent pin is oldest. Frames
/// with fewer than `k` pins report sequence 0 and go first.
pub struct LruKStrategy {
    k: usize,
}

impl ReplacementStrategy for LruKStrategy {
    fn choose_victim(&mut self, frames: &mut [FrameInfo]) -> Option<FrameId> {
        candidates(frames)
            .min_by_key(|(_, info)| info.kth_recent_pin(self.k))
            .map(|(id, _)| id)
    }

    fn name(&self) -> &'static str {
        "lru-k"
    }
}

// ============================================================================
// LFU
// ============================================================================

/// Evicts the unpinned frame with the fewest total pins.
pub struct LfuStrategy;

impl ReplacementStrategy for LfuStrategy {
    fn choose_victim(&mut self, frames: &mut [FrameInfo]) -> Option<FrameId> {
        candidates(frames)
            .min_by_key(|(_, info)| info.total_pins())
            .map(|(id, _)| id)
    }

    fn name(&self) -> &'static str {
        "lfu"
    }
}

// ============================================================================
// Clock (Second-Chance)
// ============================================================================

/// Cyclic hand over the frame table. Pinned frames are skipped; an
/// occupied unpinned frame with its second-chance bit set has the bit
/// cleared and is passed over once; the first frame found with the bit
/// clear is evicted.
pub struct ClockStrategy {
    hand: usize,
    num_frames: usize,
}

impl ReplacementStrategy for ClockStrategy {
    fn choose_victim(&mut self, frames: &mut [FrameInfo]) -> Option<FrameId> {
        if frames.is_empty() {
            return None;
        }
        debug_assert_eq!(frames.len(), self.num_frames);

        // Two sweeps suffice: the first clears every set bit on a
        // candidate, the second must find one clear.
        for _ in 0..frames.len() * 2 {
            let pos = self.hand;
            self.hand = (self.hand + 1) % frames.len();

            let info = &mut frames[pos];
            if !info.is_occupied() || info.is_pinned() {
                continue;
            }
            if info.take_second_chance() {
                continue;
            }
            return Some(pos);
        }
        None
    }

    fn name(&self) -> &'static str {
        "clock"
    }
}
