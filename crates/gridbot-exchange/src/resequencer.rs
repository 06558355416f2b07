//! Per-symbol fill resequencing.
//!
//! The user-data stream can deliver fills out of order across reconnects.
//! Position arithmetic is order-sensitive, so fills are buffered and
//! released strictly by sequence number.

use gridbot_core::types::Fill;
use std::collections::BTreeMap;
use tracing::warn;

/// The exchange numbers fills from 1 per symbol channel.
const STREAM_START: u64 = 1;

/// Buffers out-of-order fills and releases them in sequence.
#[derive(Debug)]
pub struct Resequencer {
    /// Next sequence number to release; None until sequence 1 is seen
    next: Option<u64>,
    buffer: BTreeMap<u64, Fill>,
    capacity: usize,
}

impl Resequencer {
    /// `capacity` bounds the out-of-order buffer. When it overflows the
    /// missing sequence is declared lost and release resumes from the
    /// lowest buffered fill.
    pub fn new(capacity: usize) -> Self {
        Self {
            next: None,
            buffer: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Accept a fill, returning every fill now releasable in order.
    ///
    /// Duplicates (sequence already released) are dropped. Until the
    /// release watermark is established, everything is held: the first
    /// arrival is not the baseline, because a lower sequence may still
    /// be in flight.
    pub fn push(&mut self, fill: Fill) -> Vec<Fill> {
        if let Some(next) = self.next {
            if fill.sequence < next {
                warn!(
                    symbol = %fill.symbol,
                    sequence = fill.sequence,
                    expected = next,
                    "dropping duplicate fill"
                );
                return Vec::new();
            }
        }
        self.buffer.insert(fill.sequence, fill);

        if self.next.is_none() && self.buffer.contains_key(&STREAM_START) {
            self.next = Some(STREAM_START);
        }

        if self.buffer.len() > self.capacity {
            // The gap is not going to close; resume from what we have.
            if let Some(&lowest) = self.buffer.keys().next() {
                warn!(
                    resuming_from = lowest,
                    "fill buffer overflow, sequence gap declared lost"
                );
                self.next = Some(lowest);
            }
        }

        self.drain_ready()
    }

    /// Fills still waiting on a gap.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Reset after reconciliation replaces local state wholesale.
    ///
    /// Everything seen so far is reflected in the snapshot, so the
    /// release watermark moves past the highest buffered sequence and
    /// redelivered older fills drop as duplicates.
    pub fn reset(&mut self) {
        if let Some(&highest) = self.buffer.keys().next_back() {
            let resume = highest + 1;
            self.next = Some(self.next.map_or(resume, |n| n.max(resume)));
        }
        self.buffer.clear();
    }

    fn drain_ready(&mut self) -> Vec<Fill> {
        let mut released = Vec::new();
        while let Some(next) = self.next {
            match self.buffer.remove(&next) {
                Some(fill) => {
                    self.next = Some(next + 1);
                    released.push(fill);
                }
                None => break,
            }
        }
        released
    }
}

impl Default for Resequencer {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridbot_core::types::Side;
    use rust_decimal_macros::dec;

    fn fill(sequence: u64) -> Fill {
        Fill {
            id: format!("f{sequence}"),
            order_id: "o1".into(),
            symbol: "BTC_USDT".into(),
            side: Side::Buy,
            quantity: dec!(1),
            price: dec!(30000),
            fee: dec!(0),
            sequence,
            timestamp: Utc::now(),
        }
    }

    fn sequences(fills: &[Fill]) -> Vec<u64> {
        fills.iter().map(|f| f.sequence).collect()
    }

    #[test]
    fn test_in_order_passes_through() {
        let mut reseq = Resequencer::new(16);
        assert_eq!(sequences(&reseq.push(fill(1))), vec![1]);
        assert_eq!(sequences(&reseq.push(fill(2))), vec![2]);
    }

    #[test]
    fn test_out_of_order_held_then_released() {
        let mut reseq = Resequencer::new(16);
        reseq.push(fill(1));

        // 3 arrives before 2: held.
        assert!(reseq.push(fill(3)).is_empty());
        assert_eq!(reseq.pending(), 1);

        // 2 closes the gap and both release in order.
        assert_eq!(sequences(&reseq.push(fill(2))), vec![2, 3]);
        assert_eq!(reseq.pending(), 0);
    }

    #[test]
    fn test_duplicate_dropped() {
        let mut reseq = Resequencer::new(16);
        reseq.push(fill(1));
        reseq.push(fill(2));
        assert!(reseq.push(fill(1)).is_empty());
    }

    #[test]
    fn test_out_of_order_at_stream_start_held() {
        let mut reseq = Resequencer::new(16);

        // 2 arrives before anything else: it is not the baseline.
        assert!(reseq.push(fill(2)).is_empty());
        assert_eq!(reseq.pending(), 1);

        assert_eq!(sequences(&reseq.push(fill(1))), vec![1, 2]);
    }

    #[test]
    fn test_reset_advances_watermark_past_buffered() {
        let mut reseq = Resequencer::new(16);
        assert_eq!(sequences(&reseq.push(fill(1))), vec![1]);
        // 3 waits on the missing 2 when the reconciliation hits.
        assert!(reseq.push(fill(3)).is_empty());

        reseq.reset();

        // Both are already reflected in the snapshot.
        assert!(reseq.push(fill(2)).is_empty());
        assert!(reseq.push(fill(3)).is_empty());
        assert_eq!(sequences(&reseq.push(fill(4))), vec![4]);
    }

    #[test]
    fn test_overflow_skips_lost_sequence() {
        let mut reseq = Resequencer::new(2);
        reseq.push(fill(1));

        // 2 never arrives; 3 and 4 buffer, 5 overflows the buffer.
        assert!(reseq.push(fill(3)).is_empty());
        assert!(reseq.push(fill(4)).is_empty());
        let released = reseq.push(fill(5));
        assert_eq!(sequences(&released), vec![3, 4, 5]);
    }
}
