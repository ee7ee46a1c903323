//! Ordering of 16-bit packet sequence numbers under wraparound.
//!
//! Sequence numbers are logically infinite but physically wrap at 65536, so
//!  `>` on the raw integers is meaningless once the counter has wrapped. The
//!  functions here define a strict total order over the cyclic number space
//!  using half-range semantics: `s1` counts as more recent than `s2` iff the
//!  forward cyclic distance from `s2` to `s1` is at most 32768. They are the
//!  only comparison primitives that may be applied to sequence numbers
//!  anywhere in this crate.

pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple_greater(1, 0, true)]
    #[case::simple_less(0, 1, false)]
    #[case::equal(7, 7, false)]
    #[case::half_range(32768, 0, true)]
    #[case::beyond_half_range(32769, 0, false)]
    #[case::half_range_reverse(0, 32768, false)]
    #[case::wrap(0, 65535, true)]
    #[case::wrap_reverse(65535, 0, false)]
    #[case::wrap_distance(10, 65530, true)]
    #[case::large_values(65535, 65534, true)]
    fn test_sequence_greater_than(#[case] s1: u16, #[case] s2: u16, #[case] expected: bool) {
        assert_eq!(sequence_greater_than(s1, s2), expected);
    }

    #[rstest]
    #[case::simple(0, 1, true)]
    #[case::wrap(65535, 0, true)]
    #[case::equal(3, 3, false)]
    fn test_sequence_less_than(#[case] s1: u16, #[case] s2: u16, #[case] expected: bool) {
        assert_eq!(sequence_less_than(s1, s2), expected);
    }

    /// for distinct a and b, exactly one of `greater_than(a, b)` and
    ///  `greater_than(b, a)` holds; sampled across the full u16 range
    #[test]
    fn test_strict_total_order_sampled() {
        for a in (0..=u16::MAX).step_by(509) {
            assert!(!sequence_greater_than(a, a));
            for b in (0..=u16::MAX).step_by(523) {
                if a != b {
                    assert_ne!(sequence_greater_than(a, b), sequence_greater_than(b, a));
                }
            }
        }
    }
}
