//! Word ring buffer between the transfer engine and the real-time loop.
//!
//! One side produces, the other consumes; which is which depends on the
//! transport direction. Indices are free-running counters, so all `N`
//! slots are usable and full/empty are never ambiguous.
//!
//! Only atomic loads and stores are used. The Cortex-M0+ has no
//! read-modify-write atomics, and a single writer per index needs none.
//!
//! # Safety Contract
//!
//! - Only ONE context may call the producer methods (`try_push`, `push`,
//!   `write`, `push_frames`, `push_slice`).
//! - Only ONE context may call the consumer methods (`try_pop`, `pop`,
//!   `read`, `pop_frames`, `pop_slice`).

use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Fixed-capacity SPSC ring of 32-bit words.
///
/// `N` must be a power of two.
pub struct AudioRingBuffer<const N: usize> {
    slots: [AtomicU32; N],
    /// Words ever written (only advanced by the producer).
    head: AtomicUsize,
    /// Words ever read (only advanced by the consumer).
    tail: AtomicUsize,
}

impl<const N: usize> AudioRingBuffer<N> {
    const MASK: usize = N - 1;

    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// Compile-time assertion: `N` must be a non-zero power of two.
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        AudioRingBuffer {
            slots: [const { AtomicU32::new(0) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Words available to the consumer.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Room available to the producer.
    pub fn free(&self) -> usize {
        N - self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    // ── Producer side ─────────────────────────────────────────────────

    /// Enqueue `word` if there is room.
    pub fn try_push(&self, word: u32) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        if head.wrapping_sub(self.tail.load(Ordering::Acquire)) == N {
            return false;
        }
        self.slots[head & Self::MASK].store(word, Ordering::Relaxed);
        // Release publishes the slot before the new head.
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Enqueue `word`, spinning until there is room.
    pub fn push(&self, word: u32) {
        while !self.try_push(word) {
            spin_loop();
        }
    }

    /// Blocking or non-blocking enqueue. Returns whether `word` was stored.
    pub fn write(&self, word: u32, blocking: bool) -> bool {
        if blocking {
            self.push(word);
            true
        } else {
            self.try_push(word)
        }
    }

    /// Enqueue as many leading words of `words` as fit. Returns the count.
    pub fn push_slice(&self, words: &[u32]) -> usize {
        let room = self.free().min(words.len());
        self.push_n(&words[..room]);
        room
    }

    /// Enqueue whole frames (`frame_words` each) from `words`. Returns the
    /// number of words stored, always a multiple of `frame_words`.
    pub fn push_frames(&self, words: &[u32], frame_words: usize) -> usize {
        let room = self.free().min(words.len());
        let room = room - room % frame_words;
        self.push_n(&words[..room]);
        room
    }

    fn push_n(&self, words: &[u32]) {
        let head = self.head.load(Ordering::Relaxed);
        for (i, &word) in words.iter().enumerate() {
            self.slots[head.wrapping_add(i) & Self::MASK].store(word, Ordering::Relaxed);
        }
        self.head
            .store(head.wrapping_add(words.len()), Ordering::Release);
    }

    // ── Consumer side ─────────────────────────────────────────────────

    /// Dequeue one word if any is available.
    pub fn try_pop(&self) -> Option<u32> {
        let tail = self.tail.load(Ordering::Relaxed);
        if self.head.load(Ordering::Acquire) == tail {
            return None;
        }
        let word = self.slots[tail & Self::MASK].load(Ordering::Relaxed);
        // Release hands the slot back only after it has been read.
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(word)
    }

    /// Dequeue one word, spinning until one arrives.
    pub fn pop(&self) -> u32 {
        loop {
            if let Some(word) = self.try_pop() {
                return word;
            }
            spin_loop();
        }
    }

    /// Blocking or non-blocking dequeue.
    pub fn read(&self, blocking: bool) -> Option<u32> {
        if blocking {
            Some(self.pop())
        } else {
            self.try_pop()
        }
    }

    /// Dequeue into the front of `out`. Returns the count.
    pub fn pop_slice(&self, out: &mut [u32]) -> usize {
        let count = self.len().min(out.len());
        self.pop_n(&mut out[..count]);
        count
    }

    /// Dequeue whole frames into the front of `out`. Returns the number of
    /// words read, always a multiple of `frame_words`.
    pub fn pop_frames(&self, out: &mut [u32], frame_words: usize) -> usize {
        let count = self.len().min(out.len());
        let count = count - count % frame_words;
        self.pop_n(&mut out[..count]);
        count
    }

    fn pop_n(&self, out: &mut [u32]) {
        let tail = self.tail.load(Ordering::Relaxed);
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.slots[tail.wrapping_add(i) & Self::MASK].load(Ordering::Relaxed);
        }
        self.tail
            .store(tail.wrapping_add(out.len()), Ordering::Release);
    }
}

impl<const N: usize> Default for AudioRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
