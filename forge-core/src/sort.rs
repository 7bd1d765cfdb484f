//! An adaptive, in-place(-ish) stable sort driven by a three-way
//! comparator, used by the TLSF allocator's fragmentation diagnostic
//! (`tlsf::TlsfAllocator::fragmentation`) and available to tools that
//! want the same ordering semantics elsewhere in the engine.
//!
//! The algorithm is a bottom-up merge sort with an insertion-sort base
//! case for short runs: insertion sort is stable and fast on the
//! already-mostly-sorted runs that show up in practice (e.g. re-sorting
//! a free list after a handful of allocations), and merging keeps the
//! whole thing stable end to end.

const INSERTION_THRESHOLD: usize = 16;

/// Sorts `items` in place using `cmp`, which must return a negative
/// value if `a < b`, zero if they compare equal, and a positive value if
/// `a > b`. The sort is stable: elements that compare equal keep their
/// relative order.
pub fn sort_stable<T, F>(items: &mut [T], cmp: F)
where
    T: Clone,
    F: Fn(&T, &T) -> i32,
{
    let len = items.len();
    if len < 2 {
        return;
    }

    // Insertion-sort every run of INSERTION_THRESHOLD elements first; this
    // is the adaptive fast path for small or nearly-sorted inputs.
    let mut start = 0;
    while start < len {
        let end = (start + INSERTION_THRESHOLD).min(len);
        insertion_sort(&mut items[start..end], &cmp);
        start = end;
    }

    if len <= INSERTION_THRESHOLD {
        return;
    }

    let mut buffer: Vec<T> = items.to_vec();
    let mut width = INSERTION_THRESHOLD;
    let mut src_is_items = true;

    while width < len {
        {
            let (src, dst): (&[T], &mut [T]) = if src_is_items {
                (items, &mut buffer)
            } else {
                (&buffer, items)
            };
            let mut lo = 0;
            while lo < len {
                let mid = (lo + width).min(len);
                let hi = (lo + 2 * width).min(len);
                merge(&src[lo..mid], &src[mid..hi], &mut dst[lo..hi], &cmp);
                lo += 2 * width;
            }
        }
        src_is_items = !src_is_items;
        width *= 2;
    }

    if !src_is_items {
        items.clone_from_slice(&buffer);
    }
}

fn insertion_sort<T, F>(items: &mut [T], cmp: &F)
where
    T: Clone,
    F: Fn(&T, &T) -> i32,
{
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && cmp(&items[j - 1], &items[j]) > 0 {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn merge<T, F>(left: &[T], right: &[T], out: &mut [T], cmp: &F)
where
    T: Clone,
    F: Fn(&T, &T) -> i32,
{
    let (mut i, mut j, mut k) = (0, 0, 0);
    while i < left.len() && j < right.len() {
        // `<= 0` (not `< 0`) keeps left-side elements first on ties, which is
        // what makes the merge stable.
        if cmp(&left[i], &right[j]) <= 0 {
            out[k] = left[i].clone();
            i += 1;
        } else {
            out[k] = right[j].clone();
            j += 1;
        }
        k += 1;
    }
    while i < left.len() {
        out[k] = left[i].clone();
        i += 1;
        k += 1;
    }
    while j < right.len() {
        out[k] = right[j].clone();
        j += 1;
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp_i32(a: &i32, b: &i32) -> i32 {
        a - b
    }

    #[test]
    fn sorts_small_slice() {
        let mut v = vec![5, 3, 1, 4, 2];
        sort_stable(&mut v, cmp_i32);
        assert_eq!(v, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sorts_large_slice() {
        let mut v: Vec<i32> = (0..1000).rev().collect();
        sort_stable(&mut v, cmp_i32);
        assert_eq!(v, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn stable_on_equal_keys() {
        #[derive(Clone, Debug, PartialEq)]
        struct Entry {
            key: i32,
            seq: i32,
        }
        let mut v = vec![
            Entry { key: 1, seq: 0 },
            Entry { key: 0, seq: 1 },
            Entry { key: 1, seq: 2 },
            Entry { key: 0, seq: 3 },
        ];
        sort_stable(&mut v, |a, b| a.key - b.key);
        assert_eq!(
            v,
            vec![
                Entry { key: 0, seq: 1 },
                Entry { key: 0, seq: 3 },
                Entry { key: 1, seq: 0 },
                Entry { key: 1, seq: 2 },
            ]
        );
    }

    #[test]
    fn handles_empty_and_single() {
        let mut empty: Vec<i32> = vec![];
        sort_stable(&mut empty, cmp_i32);
        assert!(empty.is_empty());

        let mut single = vec![42];
        sort_stable(&mut single, cmp_i32);
        assert_eq!(single, vec![42]);
    }
}
