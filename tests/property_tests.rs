// Property-Based Tests for kvblock
// Random sorted entry sets and restart intervals, checked against a BTreeMap.

use kvblock::{Block, BlockBuilder, Options};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use std::collections::BTreeMap;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

// A small alphabet so that neighbouring keys share long prefixes
fn entries_strategy() -> impl Strategy<Value = Entries> {
    btree_map(vec(0u8..4, 0..12), vec(any::<u8>(), 0..24), 0..150)
}

fn build(entries: &Entries, options: &Options) -> Block {
    let mut builder = BlockBuilder::new(options);
    for (key, value) in entries {
        builder.add(key, value).unwrap();
    }
    Block::parse(builder.build().unwrap()).unwrap()
}

proptest! {
    #[test]
    fn test_round_trip_property(entries in entries_strategy(), interval in 1usize..20) {
        let options = Options::default().block_restart_interval(interval);
        let block = build(&entries, &options);

        let mut iter = block.iter(&options);
        let mut decoded = Vec::new();
        iter.seek_to_first();
        while iter.valid() {
            decoded.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next();
        }
        prop_assert!(iter.status().is_ok());

        let expected: Vec<_> = entries.clone().into_iter().collect();
        prop_assert_eq!(&decoded, &expected);

        let mut backward = Vec::new();
        iter.seek_to_last();
        while iter.valid() {
            backward.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.prev();
        }
        backward.reverse();
        prop_assert_eq!(&backward, &expected);
    }

    #[test]
    fn test_seek_property(
        entries in entries_strategy(),
        targets in vec(vec(0u8..5, 0..14), 1..20),
        interval in 1usize..20,
    ) {
        let options = Options::default().block_restart_interval(interval);
        let block = build(&entries, &options);
        let mut iter = block.iter(&options);

        for target in &targets {
            iter.seek(target);
            match entries.range(target.clone()..).next() {
                Some((key, value)) => {
                    prop_assert!(iter.valid());
                    prop_assert_eq!(iter.key(), key.as_slice());
                    prop_assert_eq!(iter.value(), value.as_slice());
                }
                None => prop_assert!(!iter.valid()),
            }
        }
        prop_assert!(iter.status().is_ok());
    }

    #[test]
    fn test_restart_density_property(entries in entries_strategy(), interval in 1usize..20) {
        let options = Options::default().block_restart_interval(interval);
        let block = build(&entries, &options);
        prop_assert_eq!(block.num_restarts(), entries.len().div_ceil(interval).max(1));
    }

    #[test]
    fn test_size_estimate_property(entries in entries_strategy(), interval in 1usize..20) {
        let options = Options::default().block_restart_interval(interval);
        let mut builder = BlockBuilder::new(&options);
        let mut last = builder.current_size_estimate();
        for (key, value) in &entries {
            builder.add(key, value).unwrap();
            let estimate = builder.current_size_estimate();
            prop_assert!(estimate >= last);
            last = estimate;
        }
        let finished = builder.finish().unwrap().len();
        prop_assert_eq!(finished, last);
    }
}
