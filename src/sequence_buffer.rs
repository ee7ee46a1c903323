//! A fixed-capacity circular table keyed by packet sequence number.
//!
//! Slots are addressed by `sequence % capacity`, which maps many sequence
//!  numbers onto the same slot over time. Each slot therefore carries an
//!  occupant tag holding the sequence number that currently owns it; every
//!  lookup checks the tag, never just the index. The buffer tracks a moving
//!  window: inserting a sequence number ahead of the current window advances
//!  it and evicts everything the window moved past, and inserting a sequence
//!  number behind the trailing edge is rejected. This keeps memory constant
//!  no matter how packets are lost or reordered.

use crate::sequence::{sequence_greater_than, sequence_less_than};

const EMPTY: u32 = 0xFFFF_FFFF;

pub struct SequenceBuffer<T> {
    /// the most recently inserted sequence number plus one, i.e. the next
    ///  expected insertion point
    sequence: u16,
    entry_sequence: Vec<u32>,
    entries: Vec<T>,
}

impl<T: Default> SequenceBuffer<T> {
    pub fn new(capacity: usize) -> SequenceBuffer<T> {
        assert!(capacity > 0);
        assert!(capacity <= 65536);

        SequenceBuffer {
            sequence: 0,
            entry_sequence: vec![EMPTY; capacity],
            entries: (0..capacity).map(|_| T::default()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// the next expected insertion point, i.e. the most recently inserted
    ///  sequence number plus one
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    pub fn reset(&mut self) {
        self.sequence = 0;
        self.entry_sequence.fill(EMPTY);
        for entry in self.entries.iter_mut() {
            *entry = T::default();
        }
    }

    /// Stores an entry for `sequence`, returning a mutable reference to the
    ///  stored value, or `None` if the sequence number is too old to fit the
    ///  trailing window. Inserting ahead of the window advances it, evicting
    ///  every entry the window moves past.
    pub fn insert(&mut self, sequence: u16, entry: T) -> Option<&mut T> {
        if sequence_greater_than(sequence.wrapping_add(1), self.sequence) {
            self.remove_range(self.sequence, sequence);
            self.sequence = sequence.wrapping_add(1);
        }
        else if sequence_less_than(sequence, self.sequence.wrapping_sub(self.capacity() as u16)) {
            return None;
        }
        let index = sequence as usize % self.capacity();
        self.entry_sequence[index] = sequence as u32;
        self.entries[index] = entry;
        Some(&mut self.entries[index])
    }

    /// Empties the slot at `sequence % capacity` unconditionally
    ///  (idempotent). The entry value is defaulted so that large payload
    ///  allocations are released on removal, not when the slot is reused.
    pub fn remove(&mut self, sequence: u16) {
        let index = sequence as usize % self.capacity();
        self.entry_sequence[index] = EMPTY;
        self.entries[index] = T::default();
    }

    fn remove_range(&mut self, start_sequence: u16, finish_sequence: u16) {
        let start = start_sequence as usize;
        let mut finish = finish_sequence as usize;
        if finish < start {
            finish += 65535;
        }
        if finish - start < self.capacity() {
            for sequence in start..=finish {
                let index = sequence % self.capacity();
                self.entry_sequence[index] = EMPTY;
                self.entries[index] = T::default();
            }
        }
        else {
            // the window moved further than the whole buffer - everything is
            //  stale, and iterating the cyclic range could spin for up to
            //  65536 steps for nothing
            self.entry_sequence.fill(EMPTY);
            for entry in self.entries.iter_mut() {
                *entry = T::default();
            }
        }
    }

    /// true iff the slot that `sequence` maps to is empty
    pub fn is_available(&self, sequence: u16) -> bool {
        self.entry_sequence[sequence as usize % self.capacity()] == EMPTY
    }

    /// true iff an entry for exactly this sequence number is resident - an
    ///  index match alone is not sufficient because of modular slot reuse
    pub fn exists(&self, sequence: u16) -> bool {
        self.entry_sequence[sequence as usize % self.capacity()] == sequence as u32
    }

    pub fn find(&self, sequence: u16) -> Option<&T> {
        let index = sequence as usize % self.capacity();
        if self.entry_sequence[index] == sequence as u32 {
            Some(&self.entries[index])
        }
        else {
            None
        }
    }

    pub fn find_mut(&mut self, sequence: u16) -> Option<&mut T> {
        let index = sequence as usize % self.capacity();
        if self.entry_sequence[index] == sequence as u32 {
            Some(&mut self.entries[index])
        }
        else {
            None
        }
    }

    /// entry at a raw slot index, for bulk iteration where the caller keeps
    ///  track of which index holds which sequence number
    pub fn at_index(&self, index: usize) -> Option<&T> {
        if self.entry_sequence[index] != EMPTY {
            Some(&self.entries[index])
        }
        else {
            None
        }
    }

    /// occupant sequence number and entry at a raw slot index
    pub fn entry_at(&self, index: usize) -> Option<(u16, &T)> {
        if self.entry_sequence[index] != EMPTY {
            Some((self.entry_sequence[index] as u16, &self.entries[index]))
        }
        else {
            None
        }
    }

    /// Ack information derived from the buffer's contents: the most recently
    ///  inserted sequence number, and a bitfield whose bit `k` is set iff an
    ///  entry for `ack - (k + 1)` is resident. Meant for the buffer tracking
    ///  received packets, where this acknowledges up to 33 packets at once.
    pub fn ack_info(&self) -> (u16, u32) {
        let ack = self.sequence.wrapping_sub(1);
        let mut ack_bits = 0u32;
        for k in 0..32u16 {
            if self.exists(ack.wrapping_sub(k + 1)) {
                ack_bits |= 1 << k;
            }
        }
        (ack, ack_bits)
    }
}
