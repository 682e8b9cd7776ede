#![expect(unsafe_code, reason = "tasks carry raw slice parts across workers")]

//! Parallel quicksort.
//!
//! Each task partitions its piece serially around a median-of-three pivot,
//! then fires both sides as fresh child tasks — no joins on the way down;
//! the completion tree alone tells the root's joiner when the whole slice
//! is sorted. Elements equal to the pivot alternate sides so degenerate
//! inputs still split roughly in half.

use core::cmp::Ordering;
use core::slice;

use ws_task::{Scheduler, TaskContext};

use crate::L1_BUDGET;

// -----------------------------------------------------------------------------
// SortChunk

struct SortChunk<T, F> {
    ptr: *mut T,
    len: usize,
    compare: F,
}

impl<T, F: Copy> Clone for SortChunk<T, F> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, F: Copy> Copy for SortChunk<T, F> {}

// SAFETY: chunks partition one exclusively-borrowed slice into disjoint
// pieces, and `quick_sort` joins the whole task tree before the borrow
// ends.
unsafe impl<T: Send, F: Send> Send for SortChunk<T, F> {}

// -----------------------------------------------------------------------------
// quick_sort

/// Sorts `data` by `compare`, in place, in parallel. Blocks until the
/// slice is fully sorted. The sort is not stable.
///
/// # Panics
///
/// Panics if `compare` (plus the task bookkeeping around it) exceeds the
/// inline parameter area; plain functions and small closures are fine.
pub fn quick_sort<T, F>(scheduler: &Scheduler, data: &mut [T], compare: F)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    if data.len() < 2 {
        return;
    }

    let root_chunk = SortChunk {
        ptr: data.as_mut_ptr(),
        len: data.len(),
        compare,
    };
    let root = match scheduler.spawn(None, sort::<T, F>, root_chunk) {
        Ok(root) => root,
        Err(err) => panic!("quick_sort comparator does not fit a task: {err}"),
    };
    scheduler.join(root);
}

fn sort<T, F>(cx: &TaskContext<'_>, chunk: &SortChunk<T, F>)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    let chunk = *chunk;

    // SAFETY: the chunk covers a live, exclusively-borrowed range that no
    // other task overlaps.
    let piece = unsafe { slice::from_raw_parts_mut(chunk.ptr, chunk.len) };

    if chunk.len * size_of::<T>() <= L1_BUDGET {
        piece.sort_unstable_by(chunk.compare);
        return;
    }

    let pivot = partition(piece, chunk.compare);

    let left = SortChunk { len: pivot, ..chunk };
    let right = SortChunk {
        // SAFETY: `pivot < len`; the pivot element itself is in place.
        ptr: unsafe { chunk.ptr.add(pivot + 1) },
        len: chunk.len - (pivot + 1),
        ..chunk
    };

    // Fire and forget: the completion tree covers both sides.
    for sub in [left, right] {
        if sub.len > 1 {
            if cx.spawn(Some(cx.id()), sort::<T, F>, sub).is_err() {
                sort(cx, &sub);
            }
        }
    }
}

/// In-place partition around a median-of-three pivot. Returns the pivot's
/// final index; everything left of it compares less-or-tied-low, everything
/// right of it greater-or-tied-high.
fn partition<T, F>(piece: &mut [T], compare: F) -> usize
where
    F: Fn(&T, &T) -> Ordering,
{
    let last = piece.len() - 1;
    let mid = piece.len() / 2;

    // Median of three dodges adversarial splits on presorted input.
    if compare(&piece[mid], &piece[0]) == Ordering::Less {
        piece.swap(mid, 0);
    }
    if compare(&piece[last], &piece[0]) == Ordering::Less {
        piece.swap(last, 0);
    }
    if compare(&piece[last], &piece[mid]) == Ordering::Less {
        piece.swap(last, mid);
    }
    piece.swap(mid, last);

    let mut store = 0;
    let mut tie_low = false;
    for at in 0..last {
        let goes_left = match compare(&piece[at], &piece[last]) {
            Ordering::Less => true,
            Ordering::Greater => false,
            // Alternate ties so an all-equal run still splits in half.
            Ordering::Equal => {
                tie_low = !tie_low;
                tie_low
            }
        };
        if goes_left {
            piece.swap(at, store);
            store += 1;
        }
    }
    piece.swap(store, last);
    store
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{partition, quick_sort};
    use core::cmp::Ordering;
    use ws_task::Scheduler;

    fn check<T: Ord + Clone + core::fmt::Debug + Send + 'static>(
        scheduler: &Scheduler,
        mut data: Vec<T>,
    ) {
        let mut expected = data.clone();
        expected.sort();
        quick_sort(scheduler, &mut data, Ord::cmp);
        assert_eq!(data, expected);
    }

    fn pseudo_random(count: usize) -> Vec<u32> {
        let mut state = 0x9e37_79b9u32;
        (0..count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state
            })
            .collect()
    }

    #[test]
    fn boundary_inputs() {
        let scheduler = Scheduler::new(4);
        check(&scheduler, Vec::<u32>::new());
        check(&scheduler, vec![7u32]);
        check(&scheduler, vec![2u32, 1]);
        check(&scheduler, (0..10_000u32).collect());
        check(&scheduler, (0..10_000u32).rev().collect());
        check(&scheduler, vec![42u32; 50_000]);
    }

    #[test]
    fn large_random_input() {
        let scheduler = Scheduler::new(4);
        check(&scheduler, pseudo_random(200_000));
    }

    #[test]
    fn partition_separates_around_the_pivot() {
        let mut data = pseudo_random(1_000);
        let pivot = partition(&mut data, Ord::cmp);
        let pivot_value = data[pivot];
        assert!(data[..pivot].iter().all(|v| *v <= pivot_value));
        assert!(data[pivot + 1..].iter().all(|v| *v >= pivot_value));
    }

    #[test]
    fn partition_splits_ties() {
        let mut data = vec![5u32; 1_000];
        let pivot = partition(&mut data, |a, b| -> Ordering { a.cmp(b) });
        assert!((400..=600).contains(&pivot));
    }
}
