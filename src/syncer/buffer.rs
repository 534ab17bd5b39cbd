// Copyright (c) Matic Network
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

use crate::types::{LightHeader, ScanRange};

/// In-order queue turning a stream of raw headers into confirmed scan ranges.
///
/// Single writer, single reader. Headers age in the queue until the
/// confirmation delay has elapsed; drained heights are unlikely to be
/// reorged, and deeper reorgs are out of scope here.
#[derive(Debug, Default)]
pub struct HeaderBuffer {
    queue: VecDeque<LightHeader>,
    confirmation_time: u64,
}

impl HeaderBuffer {
    pub fn new(confirmation_time: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            confirmation_time,
        }
    }

    /// Enqueue at the tail. No dedup; ordering is by arrival.
    pub fn push(&mut self, header: LightHeader) {
        self.queue.push_back(header);
    }

    /// Pop the maximal prefix of headers confirmed at `now` and return the
    /// scan range they cover, or `None` if nothing has aged enough.
    pub fn drain(&mut self, now: u64) -> Option<ScanRange> {
        let mut range: Option<ScanRange> = None;
        while let Some(head) = self.queue.front() {
            if head.time + self.confirmation_time > now {
                break;
            }
            let number = head.number;
            range = Some(match range {
                None => ScanRange {
                    from: number,
                    to: number,
                },
                Some(r) => ScanRange {
                    from: r.from,
                    to: number,
                },
            });
            self.queue.pop_front();
        }
        range
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u64, time: u64) -> LightHeader {
        LightHeader { number, time }
    }

    #[test]
    fn test_drain_empty_is_none() {
        let mut buffer = HeaderBuffer::new(10);
        assert_eq!(buffer.drain(1_000), None);
    }

    #[test]
    fn test_drain_respects_confirmation_delay() {
        let mut buffer = HeaderBuffer::new(10);
        buffer.push(header(100, 1000));
        buffer.push(header(101, 1001));

        // Neither header has aged 10 seconds yet
        assert_eq!(buffer.drain(1005), None);
        assert_eq!(buffer.len(), 2);

        // Both confirmed at t=1020
        assert_eq!(
            buffer.drain(1020),
            Some(ScanRange { from: 100, to: 101 })
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_pops_maximal_prefix_only() {
        let mut buffer = HeaderBuffer::new(10);
        buffer.push(header(50, 500));
        buffer.push(header(51, 501));
        buffer.push(header(52, 530));

        // 50 and 51 are confirmed at t=520; 52 is not
        assert_eq!(buffer.drain(520), Some(ScanRange { from: 50, to: 51 }));
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.drain(540), Some(ScanRange { from: 52, to: 52 }));
    }

    #[test]
    fn test_drain_boundary_is_inclusive() {
        // time + delay <= now confirms; the exact boundary drains
        let mut buffer = HeaderBuffer::new(10);
        buffer.push(header(7, 100));
        assert_eq!(buffer.drain(109), None);
        assert_eq!(buffer.drain(110), Some(ScanRange { from: 7, to: 7 }));
    }

    #[test]
    fn test_ordering_is_by_arrival() {
        // No dedup and no reordering: a stale header delivered late still
        // bounds the range by arrival position.
        let mut buffer = HeaderBuffer::new(0);
        buffer.push(header(10, 100));
        buffer.push(header(9, 100));
        assert_eq!(buffer.drain(200), Some(ScanRange { from: 10, to: 9 }));
    }
}
