/*
Copyright 2026 The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Circular slot cursor
//!
//! [`RingCursor`] keeps the software side indices of a descriptor ring and
//! splits every put or get into at most two contiguous runs, one up to the end
//! of the ring and one from slot 0 after the wrap. The cursor never touches
//! descriptor memory itself; it hands slot ranges to a [`SlotWriter`] or
//! [`SlotReader`].
//!
//! Two ring shapes are supported:
//!
//! - **separate**: commands and results live in different rings (the command
//!   ring). Without a known device read position all slots may be filled, the
//!   writer and the hand-over counter have to prevent overruns.
//! - **combined**: the same slots are written (prepared) and read back (the
//!   result ring). One slot is always kept empty so that a full ring can be
//!   told apart from an empty one.
//!
//! ```text
//!   combined ring, 8 slots
//!   ┌───┬───┬───┬───┬───┬───┬───┬───┐
//!   │   │ R │ R │ R │   │   │   │   │
//!   └───┴───┴───┴───┴───┴───┴───┴───┘
//!         ^           ^
//!      out_head     in_tail
//! ```

use crate::error::Result;

/// Destination of [`RingCursor::put`].
pub trait SlotWriter {
    /// Write up to `count` items into the slots starting at `index`.
    ///
    /// `skip` is the number of items of the caller batch already written by
    /// an earlier call of the same put. Returns the number of items written;
    /// fewer than `count` stops the put.
    fn write_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize>;

    /// Slot the device will read next, when the device exposes it. Only
    /// consulted for separate rings.
    fn device_read_position(&mut self) -> Option<usize> {
        None
    }
}

/// Source of [`RingCursor::get`].
pub trait SlotReader {
    /// Read up to `count` items from the slots starting at `index`.
    ///
    /// `skip` is the number of items already read by an earlier call of the
    /// same get. Returns the number of items read; fewer than `count` stops
    /// the get.
    fn read_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize>;
}

/// Snapshot of the cursor, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorDump {
    pub in_size: usize,
    pub in_tail: usize,
    pub out_size: usize,
    pub out_head: usize,
    pub separate: bool,
}

/// Software side indices of a descriptor ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingCursor {
    in_size: usize,
    in_tail: usize,
    out_size: usize,
    out_head: usize,
    separate: bool,
}

impl RingCursor {
    /// Cursor over separate input and output rings. A zero `out_size` means
    /// the cursor only produces.
    pub const fn separate(in_size: usize, out_size: usize) -> Self {
        Self {
            in_size,
            in_tail: 0,
            out_size,
            out_head: 0,
            separate: true,
        }
    }

    /// Cursor over one ring that is both written and read back.
    pub const fn combined(size: usize) -> Self {
        Self {
            in_size: size,
            in_tail: 0,
            out_size: size,
            out_head: 0,
            separate: false,
        }
    }

    #[inline]
    pub fn is_separate(&self) -> bool {
        self.separate
    }

    #[inline]
    pub fn in_tail(&self) -> usize {
        self.in_tail
    }

    #[inline]
    pub fn out_head(&self) -> usize {
        self.out_head
    }

    /// Forget all positions.
    pub fn rewind(&mut self) {
        self.in_tail = 0;
        self.out_head = 0;
    }

    /// Free slots available to the next put.
    fn available<W: SlotWriter + ?Sized>(&self, writer: &mut W) -> usize {
        let head = if self.separate {
            match writer.device_read_position() {
                Some(pos) => pos,
                None => return self.in_size,
            }
        } else {
            self.out_head
        };

        let free = if self.in_tail < head {
            head - self.in_tail
        } else {
            self.in_size - (self.in_tail - head)
        };

        free.saturating_sub(1)
    }

    /// Write up to `count` items at the tail, wrapping at most once.
    ///
    /// Returns the number of items written. Nothing is written when the ring
    /// has no free slot.
    pub fn put<W: SlotWriter + ?Sized>(&mut self, writer: &mut W, count: usize) -> Result<usize> {
        if count == 0 || self.in_size == 0 {
            return Ok(0);
        }

        let avail = self.available(writer).min(count);
        let first = avail.min(self.in_size - self.in_tail);
        if first == 0 {
            return Ok(0);
        }

        let w1 = writer.write_slots(self.in_tail, first, 0)?;
        if w1 == 0 {
            return Ok(0);
        }

        let mut w2 = 0;
        if w1 == first && w1 < count && avail > first {
            w2 = writer.write_slots(0, avail - first, w1)?;
        }

        self.in_tail = wrap(self.in_tail + w1 + w2, self.in_size);
        Ok(w1 + w2)
    }

    /// Read up to `limit` items at the head, wrapping at most once.
    ///
    /// `ready` is the number of items known to be complete, `None` when the
    /// reader decides slot by slot.
    pub fn get<R: SlotReader + ?Sized>(
        &mut self,
        reader: &mut R,
        limit: usize,
        ready: Option<usize>,
    ) -> Result<usize> {
        if limit == 0 || ready == Some(0) || self.out_size == 0 {
            return Ok(0);
        }

        let ready_max = ready.unwrap_or(usize::MAX);
        let first = (self.out_size - self.out_head).min(limit).min(ready_max);

        let r1 = reader.read_slots(self.out_head, first, 0)?;
        if r1 == 0 {
            return Ok(0);
        }

        let mut r2 = 0;
        if r1 == first && r1 < limit && Some(r1) != ready {
            let second = self.out_head.min(limit - r1).min(ready_max - r1);
            if second > 0 {
                r2 = reader.read_slots(0, second, r1)?;
            }
        }

        self.out_head = wrap(self.out_head + r1 + r2, self.out_size);
        Ok(r1 + r2)
    }

    /// Occupied slots of a combined ring, `None` for separate rings.
    ///
    /// A partially filled ring reports one more than the slots in use, the
    /// slot that is always kept free.
    pub fn fill_level(&self) -> Option<usize> {
        self.used().map(|used| match used {
            0 => 0,
            n if n < self.in_size => n + 1,
            n => n,
        })
    }

    /// Slots written and not yet read back on a combined ring, `None` for
    /// separate rings.
    pub fn used(&self) -> Option<usize> {
        if self.separate {
            return None;
        }

        Some(if self.in_tail < self.out_head {
            self.in_size - (self.out_head - self.in_tail)
        } else {
            self.in_tail - self.out_head
        })
    }

    pub fn dump(&self) -> CursorDump {
        CursorDump {
            in_size: self.in_size,
            in_tail: self.in_tail,
            out_size: self.out_size,
            out_head: self.out_head,
            separate: self.separate,
        }
    }
}

#[inline]
fn wrap(i: usize, size: usize) -> usize {
    if i >= size { i - size } else { i }
}

/// Slots reported for a hand-over counter of `words`.
///
/// Same convention as [`RingCursor::fill_level`]: a partially filled ring
/// reports one slot more than it holds, a full ring reports its capacity.
pub(crate) fn fill_slots(words: usize, ring_size_words: usize, stride_words: usize) -> usize {
    if stride_words == 0 || words == 0 {
        0
    } else if words < ring_size_words {
        words / stride_words + 1
    } else {
        ring_size_words / stride_words
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    /// Slot storage that records every callback.
    pub(crate) struct VecSlots {
        pub(crate) slots: Vec<Option<u32>>,
        pub(crate) batch: Vec<u32>,
        pub(crate) calls: Vec<(usize, usize, usize)>,
        pub(crate) out: Vec<u32>,
        pub(crate) device_pos: Option<usize>,
    }

    impl VecSlots {
        pub(crate) fn new(size: usize) -> Self {
            Self {
                slots: vec![None; size],
                batch: Vec::new(),
                calls: Vec::new(),
                out: Vec::new(),
                device_pos: None,
            }
        }
    }

    impl SlotWriter for VecSlots {
        fn write_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize> {
            self.calls.push((index, count, skip));
            for i in 0..count {
                self.slots[index + i] = Some(self.batch[skip + i]);
            }
            Ok(count)
        }

        fn device_read_position(&mut self) -> Option<usize> {
            self.device_pos
        }
    }

    impl SlotReader for VecSlots {
        fn read_slots(&mut self, index: usize, count: usize, skip: usize) -> Result<usize> {
            self.calls.push((index, count, skip));
            let mut n = 0;
            for i in 0..count {
                match self.slots[index + i].take() {
                    Some(v) => {
                        self.out.push(v);
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    #[test]
    fn separate_ring_without_device_position_fills_completely() {
        let mut cursor = RingCursor::separate(4, 0);
        let mut slots = VecSlots::new(4);
        slots.batch = vec![1, 2, 3, 4, 5];

        assert_eq!(cursor.put(&mut slots, 5).unwrap(), 4);
        assert_eq!(cursor.in_tail(), 0);
        assert_eq!(cursor.fill_level(), None);
        assert_eq!(cursor.used(), None);
    }

    #[test]
    fn separate_ring_with_device_position_keeps_one_free() {
        let mut cursor = RingCursor::separate(4, 0);
        let mut slots = VecSlots::new(4);
        slots.batch = vec![1, 2, 3, 4];
        slots.device_pos = Some(0);

        assert_eq!(cursor.put(&mut slots, 4).unwrap(), 3);
    }

    #[test]
    fn combined_ring_keeps_one_slot_free() {
        let mut cursor = RingCursor::combined(4);
        let mut slots = VecSlots::new(4);
        slots.batch = vec![1, 2, 3, 4];

        assert_eq!(cursor.put(&mut slots, 4).unwrap(), 3);
        assert_eq!(cursor.put(&mut slots, 1).unwrap(), 0);
        assert_eq!(cursor.fill_level(), Some(4));
        assert_eq!(cursor.used(), Some(3));
    }

    #[test]
    fn put_wraps_with_skip_count() {
        let mut cursor = RingCursor::combined(8);
        let mut slots = VecSlots::new(8);
        slots.batch = vec![0; 6];
        cursor.put(&mut slots, 6).unwrap();
        cursor.get(&mut slots, 6, None).unwrap();
        assert_eq!(cursor.fill_level(), Some(0));

        slots.calls.clear();
        slots.batch = vec![10, 11, 12, 13, 14];
        assert_eq!(cursor.put(&mut slots, 5).unwrap(), 5);
        assert_eq!(slots.calls, vec![(6, 2, 0), (0, 3, 2)]);
        assert_eq!(cursor.in_tail(), 3);
        assert_eq!(slots.slots[0], Some(12));
    }

    #[test]
    fn get_wraps_and_stops_at_ready() {
        let mut cursor = RingCursor::combined(8);
        let mut slots = VecSlots::new(8);
        slots.batch = vec![0; 6];
        cursor.put(&mut slots, 6).unwrap();
        cursor.get(&mut slots, 6, Some(6)).unwrap();

        slots.batch = vec![20, 21, 22, 23, 24];
        cursor.put(&mut slots, 5).unwrap();

        slots.calls.clear();
        slots.out.clear();
        assert_eq!(cursor.get(&mut slots, 10, Some(4)).unwrap(), 4);
        assert_eq!(slots.calls, vec![(6, 2, 0), (0, 2, 2)]);
        assert_eq!(slots.out, vec![20, 21, 22, 23]);
        assert_eq!(cursor.out_head(), 2);
    }

    #[test]
    fn get_does_not_wrap_after_short_read() {
        let mut cursor = RingCursor::combined(4);
        let mut slots = VecSlots::new(4);
        slots.batch = vec![1];
        cursor.put(&mut slots, 1).unwrap();

        slots.calls.clear();
        assert_eq!(cursor.get(&mut slots, 4, None).unwrap(), 1);
        assert_eq!(slots.calls, vec![(0, 4, 0)]);
    }

    #[test]
    fn zero_limits_touch_nothing() {
        let mut cursor = RingCursor::combined(4);
        let mut slots = VecSlots::new(4);
        assert_eq!(cursor.put(&mut slots, 0).unwrap(), 0);
        assert_eq!(cursor.get(&mut slots, 0, None).unwrap(), 0);
        assert_eq!(cursor.get(&mut slots, 4, Some(0)).unwrap(), 0);
        assert!(slots.calls.is_empty());
    }

    #[test]
    fn counter_fill_convention() {
        assert_eq!(fill_slots(0, 32, 4), 0);
        assert_eq!(fill_slots(4, 32, 4), 2);
        assert_eq!(fill_slots(28, 32, 4), 8);
        assert_eq!(fill_slots(32, 32, 4), 8);
    }

    #[test]
    fn dump_reports_positions() {
        let mut cursor = RingCursor::combined(4);
        let mut slots = VecSlots::new(4);
        slots.batch = vec![1, 2];
        cursor.put(&mut slots, 2).unwrap();
        assert_eq!(
            cursor.dump(),
            CursorDump {
                in_size: 4,
                in_tail: 2,
                out_size: 4,
                out_head: 0,
                separate: false
            }
        );
    }
}
