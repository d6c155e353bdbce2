//! Bounded output history replayed to viewers when they attach.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// Default scrollback budget per session.
pub const DEFAULT_SCROLLBACK_BYTES: usize = 50 * 1024;

/// Ordered output chunks capped by their combined length.
///
/// Eviction removes whole chunks from the front. A single chunk larger than
/// the budget is kept intact, so the buffer may exceed the budget by that
/// one chunk until the next append evicts it.
#[derive(Debug)]
pub struct Scrollback {
    chunks: VecDeque<Bytes>,
    total_bytes: usize,
    budget: usize,
}

impl Scrollback {
    pub fn new(budget: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            budget,
        }
    }

    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.total_bytes > self.budget && self.chunks.len() > 1 {
            if let Some(removed) = self.chunks.pop_front() {
                self.total_bytes -= removed.len();
            }
        }
    }

    /// Concatenation of every retained chunk, oldest first.
    pub fn snapshot(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }

    pub fn len_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(buf: &mut Scrollback, data: &'static str) {
        buf.append(Bytes::from_static(data.as_bytes()));
    }

    #[test]
    fn evicts_oldest_whole_chunk() {
        let mut buf = Scrollback::new(10);
        push(&mut buf, "abcde");
        push(&mut buf, "fghij");
        assert_eq!(buf.len_bytes(), 10);

        push(&mut buf, "k");
        assert_eq!(&buf.snapshot()[..], b"fghijk");
        assert_eq!(buf.len_bytes(), 6);
        assert_eq!(buf.chunk_count(), 2);
    }

    #[test]
    fn oversized_chunk_is_kept_alone() {
        let mut buf = Scrollback::new(10);
        push(&mut buf, "abc");
        push(&mut buf, "0123456789abcdef");

        assert_eq!(buf.chunk_count(), 1);
        assert_eq!(&buf.snapshot()[..], b"0123456789abcdef");

        // The next append pushes the oversized chunk out.
        push(&mut buf, "xy");
        assert_eq!(&buf.snapshot()[..], b"xy");
        assert_eq!(buf.len_bytes(), 2);
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut buf = Scrollback::new(64);
        push(&mut buf, "hello ");
        push(&mut buf, "world");

        assert_eq!(buf.snapshot(), buf.snapshot());
        assert_eq!(&buf.snapshot()[..], b"hello world");
    }

    #[test]
    fn empty_chunks_are_ignored() {
        let mut buf = Scrollback::new(8);
        buf.append(Bytes::new());
        assert!(buf.is_empty());
        assert_eq!(buf.len_bytes(), 0);
    }

    #[test]
    fn size_stays_within_budget_for_small_chunks() {
        let mut buf = Scrollback::new(100);
        for i in 0..500usize {
            let len = (i % 17) + 1;
            buf.append(Bytes::from(vec![b'x'; len]));
            assert!(buf.len_bytes() <= buf.budget());
        }
    }
}
