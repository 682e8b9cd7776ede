#![expect(unsafe_code, reason = "tasks carry raw slice parts across workers")]

//! Parallel in-place merge sort.
//!
//! Halves are sorted as parallel sub-tasks, then merged in place by the
//! rotate-and-recurse scheme: pick the midpoint of the larger half, binary
//! search its value in the other half, rotate the span between them so the
//! midpoint lands at its final position, and merge the two smaller
//! problems either side of it — in parallel, under the completion tree.

use core::cmp::Ordering;
use core::slice;

use ws_task::{Scheduler, TaskContext};

use crate::L1_BUDGET;

// -----------------------------------------------------------------------------
// Chunks

/// An unsorted piece.
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
// pieces, and `merge_sort` joins the whole task tree before the borrow
// ends.
unsafe impl<T: Send, F: Send> Send for SortChunk<T, F> {}

/// Two adjacent sorted runs, `[0, split)` and `[split, len)`, to merge.
struct MergeChunk<T, F> {
    ptr: *mut T,
    len: usize,
    split: usize,
    compare: F,
}

impl<T, F: Copy> Clone for MergeChunk<T, F> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, F: Copy> Copy for MergeChunk<T, F> {}

// SAFETY: as for `SortChunk`; sub-merges operate on disjoint spans.
unsafe impl<T: Send, F: Send> Send for MergeChunk<T, F> {}

// -----------------------------------------------------------------------------
// merge_sort

/// Sorts `data` by `compare`, in place, in parallel. Blocks until the
/// slice is fully sorted. The sort is not stable.
///
/// # Panics
///
/// Panics if `compare` (plus the task bookkeeping around it) exceeds the
/// inline parameter area; plain functions and small closures are fine.
pub fn merge_sort<T, F>(scheduler: &Scheduler, data: &mut [T], compare: F)
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
        Err(err) => panic!("merge_sort comparator does not fit a task: {err}"),
    };
    scheduler.join(root);
}

fn sort<T, F>(cx: &TaskContext<'_>, chunk: &SortChunk<T, F>)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    let chunk = *chunk;

    if chunk.len * size_of::<T>() <= L1_BUDGET {
        // SAFETY: the chunk covers a live, exclusively-borrowed range that
        // no other task overlaps.
        let piece = unsafe { slice::from_raw_parts_mut(chunk.ptr, chunk.len) };
        piece.sort_unstable_by(chunk.compare);
        return;
    }

    let split = chunk.len / 2;
    let left = SortChunk { len: split, ..chunk };
    let right = SortChunk {
        // SAFETY: `split < len`.
        ptr: unsafe { chunk.ptr.add(split) },
        len: chunk.len - split,
        ..chunk
    };

    // Independent sub-sorts, joined here; the merge below needs both done.
    let sub_tasks = [left, right].map(|sub| match cx.spawn(None, sort::<T, F>, sub) {
        Ok(id) => Some(id),
        Err(_) => {
            sort(cx, &sub);
            None
        }
    });
    for sub_task in sub_tasks.into_iter().flatten() {
        cx.join(sub_task);
    }

    merge(cx, &MergeChunk {
        ptr: chunk.ptr,
        len: chunk.len,
        split,
        compare: chunk.compare,
    });
}

fn merge<T, F>(cx: &TaskContext<'_>, chunk: &MergeChunk<T, F>)
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Copy + Send + 'static,
{
    let chunk = *chunk;
    if chunk.split == 0 || chunk.split >= chunk.len {
        return;
    }

    // SAFETY: the span is live, exclusively borrowed, and disjoint from
    // every other task's span.
    let piece = unsafe { slice::from_raw_parts_mut(chunk.ptr, chunk.len) };
    let compare = chunk.compare;

    // Take the midpoint of the larger run, find where its value belongs in
    // the other run, and rotate the span between so the midpoint element
    // lands at its final position `q3`.
    let (first, rest) = if chunk.split >= chunk.len - chunk.split {
        let q1 = chunk.split / 2;
        let q2 = chunk.split + lower_bound(&piece[chunk.split..], &piece[q1], compare);
        let q3 = q1 + (q2 - chunk.split);

        piece[q1..q2].rotate_left(chunk.split - q1);

        (
            MergeChunk { len: q3, split: q1, ..chunk },
            MergeChunk {
                // SAFETY: `q3 < len`, the pivot's final position.
                ptr: unsafe { chunk.ptr.add(q3 + 1) },
                len: chunk.len - (q3 + 1),
                split: q2 - (q3 + 1),
                ..chunk
            },
        )
    } else {
        let q1 = chunk.split + (chunk.len - chunk.split) / 2;
        let q2 = lower_bound(&piece[..chunk.split], &piece[q1], compare);
        let q3 = q2 + (q1 - chunk.split);

        piece[q2..=q1].rotate_left(chunk.split - q2);

        (
            MergeChunk { len: q3, split: q2, ..chunk },
            MergeChunk {
                // SAFETY: `q3 < len`.
                ptr: unsafe { chunk.ptr.add(q3 + 1) },
                len: chunk.len - (q3 + 1),
                split: q1 - q3,
                ..chunk
            },
        )
    };

    // Both sub-merges run under the current task; whoever joins an
    // ancestor waits for them.
    for sub in [first, rest] {
        if sub.split != 0 && sub.split < sub.len {
            if cx.spawn(Some(cx.id()), merge::<T, F>, sub).is_err() {
                merge(cx, &sub);
            }
        }
    }
}

/// First index in `run` whose value is not less than `target`.
fn lower_bound<T, F>(run: &[T], target: &T, compare: F) -> usize
where
    F: Fn(&T, &T) -> Ordering,
{
    let mut start = 0;
    let mut end = run.len();
    while start < end {
        let mid = start + (end - start) / 2;
        if compare(target, &run[mid]) == Ordering::Greater {
            start = mid + 1;
        } else {
            end = mid;
        }
    }
    start
}

// -----------------------------------------------------------------------------
// Tests
