#![expect(unsafe_code, reason = "tasks carry raw slice parts across workers")]

use core::slice;

use ws_task::{Scheduler, TaskContext};

use crate::L1_BUDGET;

// -----------------------------------------------------------------------------
// ForChunk

/// A contiguous piece of the input, as raw parts so it can ride in a task's
/// inline parameter area.
struct ForChunk<T, P> {
    ptr: *mut T,
    len: usize,
    body: fn(&mut [T], &P),
    param: P,
}

impl<T, P: Copy> Clone for ForChunk<T, P> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, P: Copy> Copy for ForChunk<T, P> {}

// SAFETY: chunks partition one exclusively-borrowed slice into disjoint
// pieces, and `for_each` joins the whole task tree before that borrow ends.
unsafe impl<T: Send, P: Send> Send for ForChunk<T, P> {}

// -----------------------------------------------------------------------------
// for_each

/// Applies `body` to every element of `data`, in parallel, in contiguous
/// chunks. Blocks until every chunk has been processed.
///
/// `body` receives each chunk as a mutable slice plus a copy of `param`'s
/// referent. Chunking is by byte footprint: pieces at or under the L1
/// budget are processed serially.
///
/// # Panics
///
/// Panics if `param` (plus the task bookkeeping around it) exceeds the
/// inline parameter area — keep parameters to a few words and put bulk
/// state behind a reference.
pub fn for_each<T, P>(scheduler: &Scheduler, data: &mut [T], body: fn(&mut [T], &P), param: P)
where
    T: Send + 'static,
    P: Copy + Send + 'static,
{
    if data.is_empty() {
        return;
    }

    let root_chunk = ForChunk {
        ptr: data.as_mut_ptr(),
        len: data.len(),
        body,
        param,
    };
    let root = match scheduler.spawn(None, split::<T, P>, root_chunk) {
        Ok(root) => root,
        Err(err) => panic!("for_each parameter does not fit a task: {err}"),
    };
    scheduler.join(root);
}

/// Halves the chunk until it fits the budget, then runs the body.
fn split<T, P>(cx: &TaskContext<'_>, chunk: &ForChunk<T, P>)
where
    T: Send + 'static,
    P: Copy + Send + 'static,
{
    let chunk = *chunk;

    if chunk.len * size_of::<T>() <= L1_BUDGET || chunk.len == 1 {
        // SAFETY: the chunk covers a live, exclusively-borrowed range that
        // no other task overlaps.
        let piece = unsafe { slice::from_raw_parts_mut(chunk.ptr, chunk.len) };
        (chunk.body)(piece, &chunk.param);
        return;
    }

    let half = chunk.len / 2;
    let left = ForChunk { len: half, ..chunk };
    let right = ForChunk {
        // SAFETY: `half < len`, so the offset stays inside the range.
        ptr: unsafe { chunk.ptr.add(half) },
        len: chunk.len - half,
        ..chunk
    };

    // Children of the current task, so the root join covers them.
    for sub in [left, right] {
        if cx.spawn(Some(cx.id()), split::<T, P>, sub).is_err() {
            split(cx, &sub);
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
