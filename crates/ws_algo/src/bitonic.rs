#![expect(unsafe_code, reason = "tasks carry raw slice parts across workers")]

//! Parallel in-place bitonic sort.
//!
//! The first half is sorted descending and the second ascending, which
//! makes the whole piece a bitonic sequence; the merge network then
//! compare-swaps at shrinking power-of-two distances until the sequence is
//! monotonic. The network shape follows the odd-length generalisation, so
//! input sizes need not be powers of two.

use core::cmp::Ordering;
use core::slice;

use ws_task::{Scheduler, TaskContext};

use crate::L1_BUDGET;

// -----------------------------------------------------------------------------
// BitonicChunk

struct BitonicChunk<T, F> {
    ptr: *mut T,
    len: usize,
    ascending: bool,
    compare: F,
}

impl<T, F: Copy> Clone for BitonicChunk<T, F> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, F: Copy> Copy for BitonicChunk<T, F> {}

// SAFETY: chunks partition one exclusively-borrowed slice into disjoint
// pieces, and `bitonic_sort` joins the whole task tree before the borrow
// ends.
unsafe impl<T: Send, F: Send> Send for BitonicChunk<T, F> {}

impl<T, F> BitonicChunk<T, F>
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    /// Whether `left` should stay before `right` in this direction.
    fn in_order(&self, left: &T, right: &T) -> bool {
        match (self.compare)(left, right) {
            Ordering::Greater => !self.ascending,
            Ordering::Less => self.ascending,
            Ordering::Equal => true,
        }
    }

    /// Serially sorts the whole piece in this chunk's direction.
    ///
    /// # Safety
    ///
    /// The chunk must cover a live, exclusively-borrowed range that no
    /// other task overlaps.
    unsafe fn sort_serial(&self) {
        // SAFETY: forwarded to the caller.
        let piece = unsafe { slice::from_raw_parts_mut(self.ptr, self.len) };
        let compare = self.compare;
        if self.ascending {
            piece.sort_unstable_by(compare);
        } else {
            piece.sort_unstable_by(move |a, b| compare(b, a));
        }
    }
}

// -----------------------------------------------------------------------------
// bitonic_sort

/// Sorts `data` by `compare`, in place, in parallel, using a bitonic
/// sorting network above L1-sized serial leaves. Blocks until the slice is
/// fully sorted. The sort is not stable.
///
/// # Panics
///
/// Panics if `compare` (plus the task bookkeeping around it) exceeds the
/// inline parameter area; plain functions and small closures are fine.
pub fn bitonic_sort<T, F>(scheduler: &Scheduler, data: &mut [T], compare: F)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    if data.len() < 2 {
        return;
    }

    let root_chunk = BitonicChunk {
        ptr: data.as_mut_ptr(),
        len: data.len(),
        ascending: true,
        compare,
    };
    let root = match scheduler.spawn(None, sort::<T, F>, root_chunk) {
        Ok(root) => root,
        Err(err) => panic!("bitonic_sort comparator does not fit a task: {err}"),
    };
    scheduler.join(root);
}

fn sort<T, F>(cx: &TaskContext<'_>, chunk: &BitonicChunk<T, F>)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    let chunk = *chunk;
    let total_bytes = chunk.len * size_of::<T>();

    // Cut at half the piece, rounded up to a whole number of budget-sized
    // blocks and then to a whole element.
    let mut split_bytes = (total_bytes / 2 + (L1_BUDGET - 1)) & !(L1_BUDGET - 1);
    if split_bytes % size_of::<T>() != 0 {
        split_bytes += size_of::<T>() - split_bytes % size_of::<T>();
    }
    let split_bytes = split_bytes.min(total_bytes);

    if split_bytes <= L1_BUDGET {
        // SAFETY: the chunk covers a live, exclusively-borrowed range that
        // no other task overlaps.
        unsafe { chunk.sort_serial() };
        return;
    }

    let split = split_bytes / size_of::<T>();
    let first = BitonicChunk {
        len: split,
        ascending: !chunk.ascending,
        ..chunk
    };
    let second = BitonicChunk {
        // SAFETY: `split <= len`.
        ptr: unsafe { chunk.ptr.add(split) },
        len: chunk.len - split,
        ..chunk
    };

    let first_task = cx.spawn(Some(cx.id()), sort::<T, F>, first).ok();
    if first_task.is_none() {
        sort(cx, &first);
    }

    if second.len > 1 {
        if second.len * size_of::<T>() >= L1_BUDGET {
            match cx.spawn(Some(cx.id()), sort::<T, F>, second) {
                Ok(second_task) => cx.join(second_task),
                Err(_) => sort(cx, &second),
            }
        } else {
            // SAFETY: as above; disjoint from `first`.
            unsafe { second.sort_serial() };
        }
    }

    if let Some(first_task) = first_task {
        cx.join(first_task);
    }

    // Both halves are sorted in opposite directions: the whole piece is
    // bitonic and the merge network finishes the job.
    merge(cx, &chunk);
}

fn merge<T, F>(cx: &TaskContext<'_>, chunk: &BitonicChunk<T, F>)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    let chunk = *chunk;

    // Greatest power of two strictly below the length.
    let distance = if chunk.len.is_power_of_two() {
        chunk.len >> 1
    } else {
        1 << (usize::BITS - 1 - chunk.len.leading_zeros())
    };

    // SAFETY: the chunk covers a live, exclusively-borrowed range that no
    // other task overlaps.
    let piece = unsafe { slice::from_raw_parts_mut(chunk.ptr, chunk.len) };
    for at in 0..chunk.len - distance {
        if !chunk.in_order(&piece[at], &piece[at + distance]) {
            piece.swap(at, at + distance);
        }
    }

    let head = BitonicChunk { len: distance, ..chunk };
    let tail = BitonicChunk {
        // SAFETY: `distance < len`.
        ptr: unsafe { chunk.ptr.add(distance) },
        len: chunk.len - distance,
        ..chunk
    };

    // Recurse into the tail on this stack while the head merges in
    // parallel when it is big enough to be worth a task.
    let mut head_task = None;
    if head.len > 1 {
        if head.len * size_of::<T>() >= L1_BUDGET {
            head_task = cx.spawn(Some(cx.id()), merge::<T, F>, head).ok();
        }
        if head_task.is_none() {
            merge(cx, &head);
        }
    }

    if tail.len > 1 {
        merge(cx, &tail);
    }

    if let Some(head_task) = head_task {
        cx.join(head_task);
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::bitonic_sort;
    use ws_task::Scheduler;

    fn check<T: Ord + Clone + core::fmt::Debug + Send + 'static>(
        scheduler: &Scheduler,
        mut data: Vec<T>,
    ) {
        let mut expected = data.clone();
        expected.sort();
        bitonic_sort(scheduler, &mut data, Ord::cmp);
        assert_eq!(data, expected);
    }

    fn pseudo_random(count: usize) -> Vec<u32> {
        let mut state = 0x0bad_5eedu32;
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
        check(&scheduler, vec![42u32; 10_000]);
    }

    #[test]
    fn power_of_two_and_odd_lengths() {
        let scheduler = Scheduler::new(4);
        check(&scheduler, pseudo_random(1 << 15));
        check(&scheduler, pseudo_random((1 << 15) + 1));
        check(&scheduler, pseudo_random(100_003));
    }

    #[test]
    fn large_random_input() {
        let scheduler = Scheduler::new(4);
        check(&scheduler, pseudo_random(200_000));
    }
}
