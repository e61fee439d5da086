//! Three-segment network buffer
//!
//! [`NetBuf`] partitions one contiguous allocation into head room, data, and
//! tail room, each tracked as an (offset, len) pair. Push and pop operations
//! move bytes between adjacent segments by adjusting the bookkeeping only;
//! nothing is ever copied or reallocated. This lets protocol layers prepend
//! and strip headers in place.
//!
//! # Example
//!
//! ```
//! use flowctl::NetBuf;
//!
//! let mut nb = NetBuf::with_head_room(64, 16);
//! nb.push_data(4).unwrap().copy_from_slice(b"body");
//! nb.push_head(4).unwrap().copy_from_slice(b"head");
//! assert_eq!(nb.data(), b"headbody");
//! ```

use std::collections::VecDeque;

/// One segment of the allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    offset: usize,
    len: usize,
}

/// Three-segment contiguous buffer
///
/// Layout invariant: head, data, and tail are adjacent, in that order, and
/// together cover the whole allocation.
#[derive(Debug)]
pub struct NetBuf {
    mem: Box<[u8]>,
    head: Segment,
    data: Segment,
    tail: Segment,
}

impl NetBuf {
    /// Allocate a buffer of `capacity` bytes
    ///
    /// Everything starts as tail room, so the first bytes go in through
    /// [`push_data`](Self::push_data).
    pub fn alloc(capacity: usize) -> Self {
        Self {
            mem: vec![0u8; capacity].into_boxed_slice(),
            head: Segment { offset: 0, len: 0 },
            data: Segment { offset: 0, len: 0 },
            tail: Segment {
                offset: 0,
                len: capacity,
            },
        }
    }

    /// Allocate a buffer with `reserve` bytes of head room already set aside
    ///
    /// A reserve larger than the capacity is clamped to the capacity.
    pub fn with_head_room(capacity: usize, reserve: usize) -> Self {
        let reserve = reserve.min(capacity);
        Self {
            mem: vec![0u8; capacity].into_boxed_slice(),
            head: Segment {
                offset: 0,
                len: reserve,
            },
            data: Segment {
                offset: reserve,
                len: 0,
            },
            tail: Segment {
                offset: reserve,
                len: capacity - reserve,
            },
        }
    }

    /// Build a buffer holding a copy of `payload`, with no spare room
    pub fn from_slice(payload: &[u8]) -> Self {
        let mut nb = Self::alloc(payload.len());
        if let Some(region) = nb.push_data(payload.len()) {
            region.copy_from_slice(payload);
        }
        nb
    }

    /// Total allocation size
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Current data length
    pub fn data_len(&self) -> usize {
        self.data.len
    }

    /// Bytes available in front of the data segment
    pub fn head_room(&self) -> usize {
        self.head.len
    }

    /// Bytes available behind the data segment
    pub fn tail_room(&self) -> usize {
        self.tail.len
    }

    /// The data segment
    pub fn data(&self) -> &[u8] {
        &self.mem[self.data.offset..self.data.offset + self.data.len]
    }

    /// The data segment, mutably
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.mem[self.data.offset..self.data.offset + self.data.len]
    }

    /// Grow the data segment forward into head room
    ///
    /// Returns the newly exposed front region for the caller to fill, or
    /// `None` when the head room holds fewer than `len` bytes. On `None`
    /// the buffer is unchanged.
    pub fn push_head(&mut self, len: usize) -> Option<&mut [u8]> {
        if self.head.len < len {
            return None;
        }
        self.head.len -= len;
        self.data.offset -= len;
        self.data.len += len;
        Some(&mut self.mem[self.data.offset..self.data.offset + len])
    }

    /// Shrink the data segment from the front
    ///
    /// The removed region becomes head room; the removed bytes are returned
    /// so a caller can read a header before discarding it. `None` when the
    /// data segment holds fewer than `len` bytes.
    pub fn pop_head(&mut self, len: usize) -> Option<&[u8]> {
        if self.data.len < len {
            return None;
        }
        let start = self.data.offset;
        self.head.len += len;
        self.data.offset += len;
        self.data.len -= len;
        Some(&self.mem[start..start + len])
    }

    /// Grow the data segment backward into tail room
    ///
    /// Returns the newly exposed back region for the caller to fill, or
    /// `None` when the tail room holds fewer than `len` bytes.
    pub fn push_data(&mut self, len: usize) -> Option<&mut [u8]> {
        if self.tail.len < len {
            return None;
        }
        let start = self.tail.offset;
        self.data.len += len;
        self.tail.offset += len;
        self.tail.len -= len;
        Some(&mut self.mem[start..start + len])
    }

    /// Shrink the data segment from the back
    ///
    /// The removed region becomes tail room; the removed bytes are returned.
    /// `None` when the data segment holds fewer than `len` bytes.
    pub fn pop_data(&mut self, len: usize) -> Option<&[u8]> {
        if self.data.len < len {
            return None;
        }
        self.data.len -= len;
        self.tail.offset -= len;
        self.tail.len += len;
        Some(&self.mem[self.tail.offset..self.tail.offset + len])
    }
}

/// FIFO of [`NetBuf`]s
///
/// Plain ordered storage with no locking of its own; shared queues live
/// behind the per-class lock in
/// [`FlowControlQueue`](crate::queues::FlowControlQueue).
#[derive(Debug)]
pub struct NetBufQueue {
    bufs: VecDeque<NetBuf>,
}

impl NetBufQueue {
    pub fn new() -> Self {
        Self {
            bufs: VecDeque::new(),
        }
    }

    /// Append a buffer at the back
    pub fn enqueue(&mut self, nb: NetBuf) {
        self.bufs.push_back(nb);
    }

    /// Remove and return the oldest buffer
    pub fn dequeue(&mut self) -> Option<NetBuf> {
        self.bufs.pop_front()
    }

    /// The oldest buffer, without removing it
    pub fn peek(&self) -> Option<&NetBuf> {
        self.bufs.front()
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// Drop every queued buffer
    pub fn clear(&mut self) {
        self.bufs.clear();
    }

    /// Move every buffer of `front` ahead of this queue's current contents
    ///
    /// Used to return undrained buffers to a live queue without losing their
    /// FIFO position relative to buffers that arrived in the meantime.
    pub fn prepend(&mut self, mut front: NetBufQueue) {
        front.bufs.append(&mut self.bufs);
        self.bufs = front.bufs;
    }
}

impl Default for NetBufQueue {
    fn default() -> Self {
        Self::new()
    }
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        PushHead(usize),
        PopHead(usize),
        PushData(usize),
        PopData(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..48).prop_map(Op::PushHead),
            (0usize..48).prop_map(Op::PopHead),
            (0usize..48).prop_map(Op::PushData),
            (0usize..48).prop_map(Op::PopData),
        ]
    }

    fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(op_strategy(), 1..64)
    }

    fn apply(nb: &mut NetBuf, op: Op) {
        match op {
            Op::PushHead(n) => {
                let _ = nb.push_head(n);
            }
            Op::PopHead(n) => {
                let _ = nb.pop_head(n);
            }
            Op::PushData(n) => {
                let _ = nb.push_data(n);
            }
            Op::PopData(n) => {
                let _ = nb.pop_data(n);
            }
        }
    }

    proptest! {
        /// Property: head + data + tail partition the allocation after every
        /// operation, whether it succeeded or not
        #[test]
        fn prop_segments_partition_allocation(ops in ops_strategy()) {
            let mut nb = NetBuf::with_head_room(128, 32);
            for op in ops {
                apply(&mut nb, op);
                prop_assert_eq!(
                    nb.head_room() + nb.data_len() + nb.tail_room(),
                    nb.capacity()
                );
            }
        }

        /// Property: a data push of L grows the data length by exactly L and
        /// the matching pop shrinks it back; a refused push changes nothing
        #[test]
        fn prop_data_push_pop_exact(ops in ops_strategy(), push_len in 1usize..32) {
            let mut nb = NetBuf::with_head_room(128, 32);
            for op in ops {
                apply(&mut nb, op);
            }

            let before = nb.data_len();
            if nb.push_data(push_len).is_some() {
                prop_assert_eq!(nb.data_len(), before + push_len);
                prop_assert!(nb.pop_data(push_len).is_some());
                prop_assert_eq!(nb.data_len(), before);
            } else {
                prop_assert!(nb.tail_room() < push_len);
                prop_assert_eq!(nb.data_len(), before);
            }
        }

        /// Property: data length never underflows across arbitrary pop storms
        #[test]
        fn prop_data_len_never_negative(pops in proptest::collection::vec(1usize..64, 1..32)) {
            let mut nb = NetBuf::with_head_room(64, 16);
            let _ = nb.push_data(24);

            for n in pops {
                let before = nb.data_len();
                if nb.pop_head(n).is_none() {
                    prop_assert!(before < n);
                    prop_assert_eq!(nb.data_len(), before);
                } else {
                    prop_assert_eq!(nb.data_len(), before - n);
                }
            }
        }
    }
}
