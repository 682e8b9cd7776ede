#![expect(unsafe_code, reason = "type-erased payloads are raw byte images")]

//! Type erasure for task payloads.
//!
//! The scheduler stores a task as an erased entry point plus an opaque byte
//! image of `(function pointer, parameter)`. [`ErasedTask`] is that pair as
//! a first-class value: the proactor builds one at registration time,
//! carries it through its command channel and its timer and watcher tables,
//! and spawns it — possibly much later — without knowing the parameter type.

use core::mem;

use crate::error::SpawnError;
use crate::handle::TaskId;
use crate::scheduler::{TaskContext, TaskFn};
use crate::slot::{PARAM_MAX, RawTaskFn};

// -----------------------------------------------------------------------------
// Payload

/// The byte image a typed spawn writes into a slot's parameter area: the
/// user's function pointer, then its parameter.
#[derive(Clone, Copy)]
pub(crate) struct Payload<P> {
    pub(crate) f: TaskFn<P>,
    pub(crate) param: P,
}

/// The erased entry point for parameter type `P`.
pub(crate) unsafe fn trampoline<P>(cx: &TaskContext<'_>, data: *const u8)
where
    P: Copy + Send + 'static,
{
    // SAFETY: `data` is a parameter area filled with a `Payload<P>` by the
    // matching spawn or `ErasedTask::new`; `P: Copy`, so reading it out is
    // a plain byte copy.
    let payload = unsafe { data.cast::<Payload<P>>().read_unaligned() };
    (payload.f)(cx, &payload.param);
}

// -----------------------------------------------------------------------------
// ErasedTask

/// A task body detached from its parameter type.
///
/// Create one with [`new`](ErasedTask::new); spawn it with
/// [`TaskContext::spawn_erased`]. The value is plain bytes (`Copy`), so it
/// can be stored in tables or serialised across a channel *within one
/// process* via [`invoke_bits`](ErasedTask::invoke_bits) and
/// [`payload`](ErasedTask::payload).
#[derive(Clone, Copy)]
pub struct ErasedTask {
    invoke: RawTaskFn,
    len: u8,
    payload: [u8; PARAM_MAX],
}

impl ErasedTask {
    /// Erases `f` and `param` into a spawnable byte image.
    ///
    /// Fails like a spawn would if the pair does not fit the inline
    /// parameter area.
    pub fn new<P>(f: TaskFn<P>, param: P) -> Result<Self, SpawnError>
    where
        P: Copy + Send + 'static,
    {
        let size = size_of::<Payload<P>>();
        if size > PARAM_MAX {
            return Err(SpawnError::PayloadTooLarge { size });
        }

        let mut payload = [0u8; PARAM_MAX];
        // SAFETY: the size was checked against the buffer; `P: Copy`.
        unsafe {
            payload
                .as_mut_ptr()
                .cast::<Payload<P>>()
                .write_unaligned(Payload { f, param });
        }

        Ok(Self {
            invoke: trampoline::<P>,
            len: size as u8,
            payload,
        })
    }

    /// The entry point as a word, for wire transport inside this process.
    pub fn invoke_bits(&self) -> u64 {
        self.invoke as usize as u64
    }

    /// The payload image, for wire transport inside this process.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    /// Rebuilds an erased task from [`invoke_bits`] and [`payload`] values.
    ///
    /// # Safety
    ///
    /// `invoke_bits` must come from [`invoke_bits`] *in this process*, and
    /// `payload` must be the matching [`payload`] bytes, unmodified.
    ///
    /// # Panics
    ///
    /// Panics if `payload` exceeds [`PARAM_MAX`] bytes.
    ///
    /// [`invoke_bits`]: ErasedTask::invoke_bits
    /// [`payload`]: ErasedTask::payload
    pub unsafe fn from_raw_parts(invoke_bits: u64, payload: &[u8]) -> Self {
        assert!(payload.len() <= PARAM_MAX);

        let mut buf = [0u8; PARAM_MAX];
        buf[..payload.len()].copy_from_slice(payload);

        // SAFETY: per the contract, the bits were produced from a
        // `RawTaskFn` in this process.
        let invoke = unsafe { mem::transmute::<usize, RawTaskFn>(invoke_bits as usize) };

        Self {
            invoke,
            len: payload.len() as u8,
            payload: buf,
        }
    }

    pub(crate) fn invoke(&self) -> RawTaskFn {
        self.invoke
    }
}

impl core::fmt::Debug for ErasedTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErasedTask")
            .field("len", &self.len)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// spawn_erased

impl TaskContext<'_> {
    /// Spawns a previously erased task, as [`spawn`](TaskContext::spawn)
    /// would have spawned the original pair.
    pub fn spawn_erased(
        &self,
        parent: Option<TaskId>,
        task: &ErasedTask,
    ) -> Result<TaskId, SpawnError> {
        self.spawn_erased_inner(parent, task)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::ErasedTask;
    use crate::error::SpawnError;
    use crate::scheduler::{Scheduler, TaskContext};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn oversized_payload_is_rejected() {
        let err = ErasedTask::new(|_, _: &[u8; 120]| {}, [0u8; 120]).unwrap_err();
        assert!(matches!(err, SpawnError::PayloadTooLarge { .. }));
    }

    #[test]
    fn erased_round_trip_spawns() {
        static SUM: AtomicU64 = AtomicU64::new(0);

        fn add(_: &TaskContext<'_>, n: &u64) {
            SUM.fetch_add(*n, Ordering::Relaxed);
        }

        let original = ErasedTask::new(add, 17u64).unwrap();
        // SAFETY: bits and bytes come straight from `original`.
        let rebuilt = unsafe {
            ErasedTask::from_raw_parts(original.invoke_bits(), original.payload())
        };

        let scheduler = Scheduler::new(2);

        // Spawn the rebuilt task from inside a task body.
        #[derive(Clone, Copy)]
        struct Carrier {
            invoke: u64,
            len: usize,
            bytes: [u8; 24],
        }

        let mut bytes = [0u8; 24];
        bytes[..rebuilt.payload().len()].copy_from_slice(rebuilt.payload());
        let carrier = Carrier {
            invoke: rebuilt.invoke_bits(),
            len: rebuilt.payload().len(),
            bytes,
        };

        fn driver_fn(cx: &TaskContext<'_>, carrier: &Carrier) {
            // SAFETY: carried verbatim from `invoke_bits`/`payload`.
            let task = unsafe {
                ErasedTask::from_raw_parts(carrier.invoke, &carrier.bytes[..carrier.len])
            };
            let id = cx.spawn_erased(None, &task).unwrap();
            cx.join(id);
        }

        let id = scheduler.spawn(None, driver_fn, carrier).unwrap();
        scheduler.join(id);
        assert_eq!(SUM.load(Ordering::Relaxed), 17);
    }
}
