use kern::fat::{self, ChainStep};
use proptest::prelude::*;

/// Builds a table where clusters `2..2+len` form one chain in order,
/// terminated with `END_OF_CHAIN_MARK`. Clusters 0 and 1 stay reserved
/// (zeroed), matching a real FAT16 volume.
fn chain_table(len: u32) -> Vec<u16> {
    let mut table = vec![0u16; 2 + len as usize];
    for i in 0..len {
        let cluster = 2 + i;
        table[cluster as usize] = if i + 1 == len {
            fat::END_OF_CHAIN_MARK
        } else {
            cluster + 1
        };
    }
    table
}

proptest::proptest! {
    /// A well-formed chain of any length always terminates: walking exactly
    /// `len - 1` links lands on the tail cluster, the tail's own entry reads
    /// as `ChainStep::End`, and walking one step further fails rather than
    /// silently wrapping or looping.
    #[test]
    fn chain_of_any_length_terminates_exactly_at_its_tail(len in 1u32..64) {
        let table = chain_table(len);
        let start = 2u32;
        let tail = start + len - 1;

        let reached = fat::walk_chain(&table, start, len - 1).unwrap();
        prop_assert_eq!(reached, tail);
        prop_assert_eq!(fat::chain_step(&table, reached), ChainStep::End);
        prop_assert!(fat::walk_chain(&table, start, len).is_err());
    }

    /// A chain entry that points at a free (zero) cluster instead of a
    /// valid next link or end-of-chain marker is reported as `Broken`, not
    /// followed -- a FAT table should never actually contain one, but
    /// `chain_step` must not loop or panic if it does.
    #[test]
    fn a_chain_pointing_at_a_free_cluster_is_reported_broken(len in 1u32..32) {
        let mut table = chain_table(len);
        let start = 2u32;
        // Snap the tail's link back to a free cluster instead of leaving
        // end-of-chain in place.
        let tail = (start + len - 1) as usize;
        table[tail] = 0;
        prop_assert_eq!(fat::chain_step(&table, tail as u32), ChainStep::Broken);
        prop_assert!(fat::walk_chain(&table, start, len).is_err());
    }
}
