//! Balanced, order-preserving partitioning of a work list
//!
//! The input is split into at most `lanes` contiguous chunks. With
//! `base = N / k` and `rem = N % k`, the first `k - rem` chunks hold `base`
//! items and the last `rem` chunks hold `base + 1`. An empty input yields a
//! single empty chunk.

use std::ops::Range;

/// Compute the index ranges of each chunk
///
/// `lanes` is clamped to `[1, len]`. When `len == 0` a single empty range
/// is returned.
pub fn chunk_bounds(len: usize, lanes: usize) -> Vec<Range<usize>> {
    let mut k = lanes.min(len);
    if k == 0 {
        k = 1;
    }

    let base = len / k;
    let rem = len % k;
    let first_larger = k - rem;

    let mut bounds = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = if i >= first_larger { base + 1 } else { base };
        bounds.push(start..start + size);
        start += size;
    }

    debug_assert_eq!(start, len);
    bounds
}

/// Borrowing partition: each chunk is a sub-slice of `items`
pub fn partition_slice<T>(items: &[T], lanes: usize) -> Vec<&[T]> {
    chunk_bounds(items.len(), lanes)
        .into_iter()
        .map(|r| &items[r])
        .collect()
}

/// Owning partition: moves each item into its chunk
///
/// Used when chunks are handed to worker threads.
pub fn partition<T>(items: Vec<T>, lanes: usize) -> Vec<Vec<T>> {
    let bounds = chunk_bounds(items.len(), lanes);
    let mut iter = items.into_iter();

    bounds
        .into_iter()
        .map(|r| iter.by_ref().take(r.len()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sizes<T>(chunks: &[Vec<T>]) -> Vec<usize> {
        chunks.iter().map(Vec::len).collect()
    }

    #[test]
    fn test_ten_items_four_lanes() {
        let chunks = partition((0..10).collect::<Vec<_>>(), 4);
        assert_eq!(sizes(&chunks), vec![2, 2, 3, 3]);
        assert_eq!(chunks[0], vec![0, 1]);
        assert_eq!(chunks[3], vec![7, 8, 9]);
    }

    #[test]
    fn test_seven_items_three_lanes() {
        let chunks = partition((0..7).collect::<Vec<_>>(), 3);
        assert_eq!(sizes(&chunks), vec![2, 2, 3]);
    }

    #[test]
    fn test_empty_input_yields_one_empty_chunk() {
        let chunks = partition(Vec::<u32>::new(), 5);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_lane_count_clamped() {
        // more lanes than items
        assert_eq!(sizes(&partition(vec!['a', 'b', 'c'], 8)), vec![1, 1, 1]);
        // zero lanes behaves as one
        assert_eq!(sizes(&partition(vec![1, 2, 3], 0)), vec![3]);
    }

    #[test]
    fn test_slice_partition_matches_owned() {
        let items: Vec<u32> = (0..37).collect();
        let borrowed: Vec<Vec<u32>> = partition_slice(&items, 4)
            .into_iter()
            .map(<[u32]>::to_vec)
            .collect();
        assert_eq!(borrowed, partition(items, 4));
    }

    proptest! {
        #[test]
        fn prop_partition_is_balanced_and_lossless(n in 0usize..300, k in 0usize..40) {
            let items: Vec<usize> = (0..n).collect();
            let chunks = partition(items.clone(), k);

            let flat: Vec<usize> = chunks.iter().flatten().copied().collect();
            prop_assert_eq!(&flat, &items);

            let max_chunks = k.max(1).min(n.max(1));
            prop_assert!(chunks.len() <= max_chunks);

            let lens = sizes(&chunks);
            let min = *lens.iter().min().unwrap();
            let max = *lens.iter().max().unwrap();
            prop_assert!(max - min <= 1);

            // the larger chunks are exactly the trailing `n mod k` ones
            let used = chunks.len();
            let rem = n % used;
            for (i, len) in lens.iter().enumerate() {
                let expected = n / used + usize::from(i >= used - rem);
                prop_assert_eq!(*len, expected);
            }
        }
    }
}
