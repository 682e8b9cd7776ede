//! The framed command stream between [`Proactor`] handles and the event
//! loop.
//!
//! A frame is `[opcode u8][length u8][payload ...]`, where `length` counts
//! the whole frame and is therefore capped at 255 bytes. Payload fields are
//! fixed-width native-endian byte copies at sequential offsets — the writer
//! and the reader share this one codec, so there is no alignment to agree
//! on. Producers write one whole frame per command; the loop drains the
//! channel into a buffer big enough to always hold at least one whole frame
//! past any partial tail.
//!
//! [`Proactor`]: crate::Proactor

// -----------------------------------------------------------------------------
// Config

/// A frame's length byte counts the whole frame, so this is the hard cap.
pub(crate) const FRAME_MAX: usize = 255;

/// The loop's read buffer. Compaction keeps at most one partial frame
/// (< [`FRAME_MAX`] bytes) at the front, so a read can always complete a
/// frame.
pub(crate) const CONTROL_BUF: usize = 1024;

const _: () = assert!(CONTROL_BUF >= 2 * FRAME_MAX);

// -----------------------------------------------------------------------------
// Opcode

/// Command opcodes, one per proactor operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum Opcode {
    AddTimer = 0,
    CancelTimer = 1,
    UpdateTimer = 2,

    AddRecvWatcher = 3,
    AddRecvTimedWatcher = 4,
    CancelRecvWatcher = 5,

    AddSendWatcher = 6,
    AddSendTimedWatcher = 7,
    CancelSendWatcher = 8,
}

impl Opcode {
    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::AddTimer,
            1 => Self::CancelTimer,
            2 => Self::UpdateTimer,
            3 => Self::AddRecvWatcher,
            4 => Self::AddRecvTimedWatcher,
            5 => Self::CancelRecvWatcher,
            6 => Self::AddSendWatcher,
            7 => Self::AddSendTimedWatcher,
            8 => Self::CancelSendWatcher,
            _ => return None,
        })
    }
}

// -----------------------------------------------------------------------------
// FrameWriter

/// Builds one frame on the stack.
pub(crate) struct FrameWriter {
    buf: [u8; FRAME_MAX],
    len: usize,
}

impl FrameWriter {
    pub(crate) fn new(opcode: Opcode) -> Self {
        let mut buf = [0u8; FRAME_MAX];
        buf[0] = opcode as u8;
        Self { buf, len: 2 }
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_ne_bytes());
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        self.put_bytes(&value.to_ne_bytes());
    }

    pub(crate) fn put_i32(&mut self, value: i32) {
        self.put_bytes(&value.to_ne_bytes());
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        // Every command's worst case fits FRAME_MAX by construction; a slice
        // panic here is a codec bug, not a runtime condition.
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Patches the length byte and returns the finished frame.
    pub(crate) fn finish(&mut self) -> &[u8] {
        self.buf[1] = self.len as u8;
        &self.buf[..self.len]
    }
}

// -----------------------------------------------------------------------------
// FrameReader

/// Walks one frame's payload. Both ends run the same codec, so a short
/// payload is a protocol violation and panics the loop.
pub(crate) struct FrameReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    /// `payload` excludes the opcode and length bytes.
    pub(crate) fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.bytes(1)[0]
    }

    pub(crate) fn u32(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4));
        u32::from_ne_bytes(raw)
    }

    pub(crate) fn u64(&mut self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8));
        u64::from_ne_bytes(raw)
    }

    pub(crate) fn i32(&mut self) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4));
        i32::from_ne_bytes(raw)
    }

    pub(crate) fn bytes(&mut self, len: usize) -> &'a [u8] {
        let taken = &self.payload[self.pos..self.pos + len];
        self.pos += len;
        taken
    }
}

// -----------------------------------------------------------------------------
// Tests
