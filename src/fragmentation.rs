//! Reassembly state for payloads that were split into fragments on the
//!  sending side.
//!
//! One [`ReassemblyData`] entry accumulates the fragments of a single packet
//!  sequence number inside the endpoint's reassembly sequence buffer. The
//!  entry is created by the first fragment that arrives (fragments arrive in
//!  any order), grows a presence bit per fragment, and is torn down either
//!  on completion or by silent eviction when newer packets advance the
//!  reassembly buffer's window past it. Inconsistent framing - a fragment
//!  disagreeing with the entry about the fragment count, or slice lengths
//!  that cannot come from an honest sender - poisons the whole entry rather
//!  than being patched over.

use std::time::Duration;

use bit_set::BitSet;
use tracing::warn;

use crate::safe_converter::SafeCast;

/// What became of a fragment offered to a reassembly entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FragmentOutcome {
    Stored,
    /// this fragment id was already present - ignored
    Duplicate,
    /// inconsistent framing; the caller must discard the whole entry
    Corrupt,
}

#[derive(Debug, Default)]
pub(crate) struct ReassemblyData {
    num_fragments: u16,
    num_received: u16,
    fragment_received: BitSet,
    fragment_size: usize,
    final_fragment_len: usize,
    first_fragment_time: Duration,
    /// sized `num_fragments * fragment_size` up front; the actual payload
    ///  length is only known once the final fragment arrived
    payload: Vec<u8>,
    /// wire bytes across all fragments, for the received-packet record
    wire_bytes: u32,
}

impl ReassemblyData {
    pub fn new(now: Duration, num_fragments: u16, fragment_size: usize) -> ReassemblyData {
        ReassemblyData {
            num_fragments,
            num_received: 0,
            fragment_received: BitSet::with_capacity(num_fragments.safe_cast()),
            fragment_size,
            final_fragment_len: 0,
            first_fragment_time: now,
            payload: vec![0; <u16 as SafeCast<usize>>::safe_cast(num_fragments) * fragment_size],
            wire_bytes: 0,
        }
    }

    pub fn first_fragment_time(&self) -> Duration {
        self.first_fragment_time
    }

    pub fn wire_bytes(&self) -> u32 {
        self.wire_bytes
    }

    pub fn accept(&mut self, fragment_id: u8, fragment_count: u16, data: &[u8], wire_bytes: u32) -> FragmentOutcome {
        if fragment_count != self.num_fragments {
            warn!("fragment declares {} fragments but the reassembly was started with {} - discarding the reassembly",
                fragment_count, self.num_fragments);
            return FragmentOutcome::Corrupt;
        }
        if fragment_id as u16 >= self.num_fragments {
            warn!("fragment id {} out of range for {} fragments - discarding the reassembly", fragment_id, self.num_fragments);
            return FragmentOutcome::Corrupt;
        }

        let is_final = fragment_id as u16 == self.num_fragments - 1;
        if !is_final && data.len() != self.fragment_size {
            warn!("non-final fragment {} has {} bytes instead of the fragment size {} - discarding the reassembly",
                fragment_id, data.len(), self.fragment_size);
            return FragmentOutcome::Corrupt;
        }
        if is_final && (data.is_empty() || data.len() > self.fragment_size) {
            warn!("final fragment {} has invalid length {} - discarding the reassembly", fragment_id, data.len());
            return FragmentOutcome::Corrupt;
        }

        if self.fragment_received.contains(fragment_id.safe_cast()) {
            return FragmentOutcome::Duplicate;
        }

        let offset = <u8 as SafeCast<usize>>::safe_cast(fragment_id) * self.fragment_size;
        self.payload[offset..offset + data.len()].copy_from_slice(data);
        self.fragment_received.insert(fragment_id.safe_cast());
        self.num_received += 1;
        self.wire_bytes += wire_bytes;
        if is_final {
            self.final_fragment_len = data.len();
        }

        FragmentOutcome::Stored
    }

    pub fn is_complete(&self) -> bool {
        self.num_received == self.num_fragments && self.num_fragments > 0
    }

    /// the reassembled payload; only meaningful once `is_complete`
    pub fn take_payload(&mut self) -> Vec<u8> {
        let total_len = (<u16 as SafeCast<usize>>::safe_cast(self.num_fragments) - 1) * self.fragment_size + self.final_fragment_len;
        let mut payload = std::mem::take(&mut self.payload);
        payload.truncate(total_len);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_fragments_in_order() {
        let mut entry = ReassemblyData::new(millis(5), 3, 4);
        assert_eq!(entry.first_fragment_time(), millis(5));

        assert_eq!(entry.accept(0, 3, b"aaaa", 15), FragmentOutcome::Stored);
        assert!(!entry.is_complete());
        assert_eq!(entry.accept(1, 3, b"bbbb", 15), FragmentOutcome::Stored);
        assert!(!entry.is_complete());
        assert_eq!(entry.accept(2, 3, b"cc", 13), FragmentOutcome::Stored);

        assert!(entry.is_complete());
        assert_eq!(entry.wire_bytes(), 43);
        assert_eq!(entry.take_payload(), b"aaaabbbbcc");
    }

    #[test]
    fn test_fragments_out_of_order() {
        let mut entry = ReassemblyData::new(millis(0), 3, 4);

        assert_eq!(entry.accept(2, 3, b"cc", 13), FragmentOutcome::Stored);
        assert_eq!(entry.accept(0, 3, b"aaaa", 15), FragmentOutcome::Stored);
        assert_eq!(entry.accept(1, 3, b"bbbb", 15), FragmentOutcome::Stored);

        assert!(entry.is_complete());
        assert_eq!(entry.take_payload(), b"aaaabbbbcc");
    }

    #[test]
    fn test_duplicate_fragment_is_ignored() {
        let mut entry = ReassemblyData::new(millis(0), 2, 4);

        assert_eq!(entry.accept(0, 2, b"aaaa", 15), FragmentOutcome::Stored);
        assert_eq!(entry.accept(0, 2, b"xxxx", 15), FragmentOutcome::Duplicate);
        assert!(!entry.is_complete());

        assert_eq!(entry.accept(1, 2, b"b", 12), FragmentOutcome::Stored);
        assert_eq!(entry.take_payload(), b"aaaab");
    }

    #[test]
    fn test_fragment_count_mismatch_is_corrupt() {
        let mut entry = ReassemblyData::new(millis(0), 3, 4);

        assert_eq!(entry.accept(0, 4, b"aaaa", 15), FragmentOutcome::Corrupt);
    }

    #[test]
    fn test_fragment_id_out_of_range_is_corrupt() {
        let mut entry = ReassemblyData::new(millis(0), 3, 4);

        assert_eq!(entry.accept(3, 3, b"aaaa", 15), FragmentOutcome::Corrupt);
    }

    #[test]
    fn test_short_non_final_fragment_is_corrupt() {
        let mut entry = ReassemblyData::new(millis(0), 3, 4);

        assert_eq!(entry.accept(0, 3, b"aa", 13), FragmentOutcome::Corrupt);
    }

    #[test]
    fn test_invalid_final_fragment_is_corrupt() {
        let mut entry = ReassemblyData::new(millis(0), 3, 4);

        assert_eq!(entry.accept(2, 3, b"", 11), FragmentOutcome::Corrupt);
        assert_eq!(entry.accept(2, 3, b"ccccc", 16), FragmentOutcome::Corrupt);
    }

    #[test]
    fn test_full_size_final_fragment() {
        let mut entry = ReassemblyData::new(millis(0), 2, 4);

        assert_eq!(entry.accept(0, 2, b"aaaa", 15), FragmentOutcome::Stored);
        assert_eq!(entry.accept(1, 2, b"bbbb", 15), FragmentOutcome::Stored);

        assert_eq!(entry.take_payload(), b"aaaabbbb");
    }
}
