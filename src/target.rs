//! Output targets and the position-tracking writer.
//!
//! The muxer issues two kinds of operations against its sink: sequential
//! appends and (on targets that allow it) absolute-position patches of
//! previously reserved fields. Three targets cover the delivery modes:
//!
//! - [`BufferTarget`] — in-memory growable buffer, returned at finalize
//! - [`WritableTarget`] — any `Write + Seek` destination (file handle)
//! - [`StreamTarget`] — append-only callback, optionally chunk-batched
//!
//! Append-only targets never receive a backward write; the muxer buffers
//! chunk payloads and emits the fully sized `mdat` at finalize instead.

use std::io::{Seek, SeekFrom, Write};

use crate::error::{MuxError, MuxResult};

/// A byte sink the muxer writes the container to.
pub trait Target {
    /// Append bytes at the current write cursor.
    fn write(&mut self, data: &[u8]) -> MuxResult<()>;

    /// Overwrite bytes at an absolute position. Only called on targets
    /// reporting [`Target::supports_patching`].
    fn write_at(&mut self, position: u64, data: &[u8]) -> MuxResult<()>;

    /// Whether `write_at` to a position before the cursor is honored.
    fn supports_patching(&self) -> bool;

    /// Flush any batched output. Called once at finalize.
    fn finish(&mut self) -> MuxResult<()> {
        Ok(())
    }

    /// Hand out the accumulated bytes, for in-memory targets only.
    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// In-memory growable buffer target.
#[derive(Default)]
pub struct BufferTarget {
    buf: Vec<u8>,
}

impl BufferTarget {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Target for BufferTarget {
    fn write(&mut self, data: &[u8]) -> MuxResult<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn write_at(&mut self, position: u64, data: &[u8]) -> MuxResult<()> {
        let start = position as usize;
        let end = start + data.len();
        if end > self.buf.len() {
            return Err(MuxError::State(format!(
                "Patch at {}..{} past end of buffer ({})",
                start,
                end,
                self.buf.len()
            )));
        }
        self.buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn supports_patching(&self) -> bool {
        true
    }

    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        Some(std::mem::take(&mut self.buf))
    }
}

/// Random-access target wrapping an externally owned `Write + Seek`
/// destination, typically a file handle.
pub struct WritableTarget<W: Write + Seek> {
    inner: W,
}

impl<W: Write + Seek> WritableTarget<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Give the wrapped destination back, e.g. to close the file.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Target for WritableTarget<W> {
    fn write(&mut self, data: &[u8]) -> MuxResult<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    fn write_at(&mut self, position: u64, data: &[u8]) -> MuxResult<()> {
        let cursor = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(position))?;
        self.inner.write_all(data)?;
        self.inner.seek(SeekFrom::Start(cursor))?;
        Ok(())
    }

    fn supports_patching(&self) -> bool {
        true
    }

    fn finish(&mut self) -> MuxResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Callback invoked with `(bytes, absolute_position)` as output becomes
/// final. Positions are strictly monotonic; no region is delivered twice.
pub type StreamCallback = Box<dyn FnMut(&[u8], u64) -> std::io::Result<()>>;

/// Append-only streaming target delivering bytes through a callback.
///
/// In chunked mode, output is batched into `chunk_size` blocks to reduce
/// callback frequency; partial tail blocks are delivered at finalize.
pub struct StreamTarget {
    callback: StreamCallback,
    position: u64,
    chunked: Option<ChunkBuffer>,
}

struct ChunkBuffer {
    chunk_size: usize,
    pending: Vec<u8>,
    /// Absolute position of `pending[0]`.
    pending_start: u64,
}

impl StreamTarget {
    /// Unbatched: every muxer write is one callback invocation.
    pub fn new(callback: StreamCallback) -> Self {
        Self {
            callback,
            position: 0,
            chunked: None,
        }
    }

    /// Chunked delivery: the callback fires once per `chunk_size` bytes.
    pub fn chunked(callback: StreamCallback, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            callback,
            position: 0,
            chunked: Some(ChunkBuffer {
                chunk_size,
                pending: Vec::new(),
                pending_start: 0,
            }),
        }
    }
}

impl Target for StreamTarget {
    fn write(&mut self, data: &[u8]) -> MuxResult<()> {
        match &mut self.chunked {
            None => {
                (self.callback)(data, self.position)?;
                self.position += data.len() as u64;
            }
            Some(buf) => {
                if buf.pending.is_empty() {
                    buf.pending_start = self.position;
                }
                buf.pending.extend_from_slice(data);
                self.position += data.len() as u64;
                while buf.pending.len() >= buf.chunk_size {
                    let rest = buf.pending.split_off(buf.chunk_size);
                    (self.callback)(&buf.pending, buf.pending_start)?;
                    buf.pending_start += buf.pending.len() as u64;
                    buf.pending = rest;
                }
            }
        }
        Ok(())
    }

    fn write_at(&mut self, position: u64, _data: &[u8]) -> MuxResult<()> {
        // The muxer routes around this by buffering mdat for append-only
        // targets; reaching here is a bug in the caller.
        Err(MuxError::State(format!(
            "Stream target cannot patch already-delivered bytes (position {})",
            position
        )))
    }

    fn supports_patching(&self) -> bool {
        false
    }

    fn finish(&mut self) -> MuxResult<()> {
        if let Some(buf) = &mut self.chunked {
            if !buf.pending.is_empty() {
                (self.callback)(&buf.pending, buf.pending_start)?;
                buf.pending_start += buf.pending.len() as u64;
                buf.pending.clear();
            }
        }
        Ok(())
    }
}

/// Handle to a reserved region, redeemable for one absolute-position patch.
#[derive(Copy, Clone, Debug)]
pub struct Reservation {
    position: u64,
    len: usize,
}

/// Position-tracking writer over a [`Target`].
pub struct Writer<T: Target> {
    target: T,
    position: u64,
}

impl<T: Target> Writer<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            position: 0,
        }
    }

    /// Current write cursor == total bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn supports_patching(&self) -> bool {
        self.target.supports_patching()
    }

    pub fn write(&mut self, data: &[u8]) -> MuxResult<()> {
        self.target.write(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Write `len` zero bytes now and return a handle for patching them in
    /// place once their final value is known.
    pub fn reserve(&mut self, len: usize) -> MuxResult<Reservation> {
        let position = self.position;
        self.write(&vec![0u8; len])?;
        Ok(Reservation { position, len })
    }

    /// Fill a previously reserved region. `data` must match the reserved
    /// length exactly.
    pub fn patch(&mut self, reservation: Reservation, data: &[u8]) -> MuxResult<()> {
        debug_assert_eq!(data.len(), reservation.len);
        self.target.write_at(reservation.position, data)
    }

    pub fn finish(&mut self) -> MuxResult<()> {
        self.target.finish()
    }

    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.target.take_buffer()
    }

    /// Give the underlying target back.
    pub fn into_target(self) -> T {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[test]
    fn buffer_target_append_and_patch() {
        let mut writer = Writer::new(BufferTarget::new());
        writer.write(b"abcd").unwrap();
        let res = writer.reserve(4).unwrap();
        writer.write(b"tail").unwrap();
        writer.patch(res, b"SIZE").unwrap();

        assert_eq!(writer.position(), 12);
        let buf = writer.take_buffer().unwrap();
        assert_eq!(&buf, b"abcdSIZEtail");
    }

    #[test]
    fn buffer_target_patch_past_end_fails() {
        let mut target = BufferTarget::new();
        target.write(b"ab").unwrap();
        assert!(target.write_at(1, b"xyz").is_err());
    }

    #[test]
    fn writable_target_patches_in_place() {
        let cursor = Cursor::new(Vec::new());
        let mut writer = Writer::new(WritableTarget::new(cursor));
        let res = writer.reserve(2).unwrap();
        writer.write(b"rest").unwrap();
        writer.patch(res, b"OK").unwrap();
        writer.finish().unwrap();

        let inner = writer.into_target().into_inner().into_inner();
        assert_eq!(&inner, b"OKrest");
    }

    #[test]
    fn stream_target_positions_are_monotonic() {
        let seen: Rc<RefCell<Vec<(Vec<u8>, u64)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut target = StreamTarget::new(Box::new(move |data, pos| {
            sink.borrow_mut().push((data.to_vec(), pos));
            Ok(())
        }));

        target.write(b"one").unwrap();
        target.write(b"two").unwrap();
        target.finish().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (b"one".to_vec(), 0));
        assert_eq!(seen[1], (b"two".to_vec(), 3));
    }

    #[test]
    fn stream_target_rejects_backward_write() {
        let mut target = StreamTarget::new(Box::new(|_, _| Ok(())));
        target.write(b"data").unwrap();
        assert!(!target.supports_patching());
        assert!(target.write_at(0, b"x").is_err());
    }

    #[test]
    fn chunked_stream_batches_output() {
        let seen: Rc<RefCell<Vec<(usize, u64)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut target = StreamTarget::chunked(
            Box::new(move |data, pos| {
                sink.borrow_mut().push((data.len(), pos));
                Ok(())
            }),
            8,
        );

        // 3 + 3 + 3 = 9 bytes: one full 8-byte chunk, 1 byte left pending.
        target.write(b"aaa").unwrap();
        target.write(b"bbb").unwrap();
        target.write(b"ccc").unwrap();
        assert_eq!(seen.borrow().as_slice(), &[(8, 0)]);

        target.finish().unwrap();
        assert_eq!(seen.borrow().as_slice(), &[(8, 0), (1, 8)]);
    }

    #[test]
    fn chunked_stream_reassembles_to_original() {
        let out: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = out.clone();
        let mut target = StreamTarget::chunked(
            Box::new(move |data, pos| {
                let mut out = sink.borrow_mut();
                assert_eq!(pos as usize, out.len());
                out.extend_from_slice(data);
                Ok(())
            }),
            4,
        );

        let payload = b"the quick brown fox";
        for piece in payload.chunks(5) {
            target.write(piece).unwrap();
        }
        target.finish().unwrap();
        assert_eq!(out.borrow().as_slice(), payload);
    }

    #[test]
    fn writer_tracks_total_bytes() {
        let mut writer = Writer::new(BufferTarget::new());
        writer.write(&[0u8; 10]).unwrap();
        writer.reserve(6).unwrap();
        assert_eq!(writer.position(), 16);
    }
}
