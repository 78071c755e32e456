//! Chunked byte cursor with suspendable decode primitives.
//!
//! The cursor materializes one window of bytes at a time and keeps a queue
//! of already-requested-but-not-yet-fetched ranges behind it. Every decode
//! primitive either completes and advances the logical stream position, or
//! returns [`Step::Pending`], retaining exactly the partial progress needed
//! to resume without re-reading already-consumed bytes.

use std::collections::VecDeque;

use crate::ebml::{self, ElementHeader};
use crate::error::{ready, DemuxError, Result, Step};
use crate::source::ByteSource;

/// Default range-fetch window (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// In-flight element-id decode.
#[derive(Debug, Default)]
struct IdProgress {
    first: Option<(u8, u8)>,
    acc: u32,
    taken: u8,
}

/// In-flight vint decode.
#[derive(Debug, Default)]
struct VintProgress {
    first: Option<(u8, u8)>,
    acc: u64,
    taken: u8,
}

/// In-flight fixed-width integer or float decode.
#[derive(Debug, Default)]
struct ScalarProgress {
    active: bool,
    acc: u64,
    taken: u64,
}

/// In-flight string/binary decode; bytes that cross chunk boundaries are
/// copied into this owned scratch buffer rather than aliasing window memory.
#[derive(Debug, Default)]
struct BytesProgress {
    active: bool,
    buf: Vec<u8>,
}

/// In-flight skip.
#[derive(Debug, Default)]
struct SkipProgress {
    active: bool,
    done: u64,
}

/// In-flight element-header peek: the id and size are cached independently
/// so neither is re-decoded when the other suspends.
#[derive(Debug, Default)]
struct PeekProgress {
    offset: Option<u64>,
    id: Option<u32>,
    size: Option<u64>,
}

/// A chunked cursor over an unbounded byte stream.
///
/// The cursor owns the window buffer and the pending-range queue
/// exclusively; callers must not interleave unrelated reads, since partial
/// decode state is retained per operation kind.
pub struct ByteCursor<S> {
    source: Option<S>,
    file_size: u64,
    chunk_size: u64,
    window: Option<Vec<u8>>,
    window_pos: usize,
    offset: u64,
    fetched_to: u64,
    queue: VecDeque<(u64, u64)>,
    id: IdProgress,
    vint: VintProgress,
    last_vint_width: u8,
    scalar: ScalarProgress,
    bytes: BytesProgress,
    skip: SkipProgress,
    peek: PeekProgress,
}

impl<S> Default for ByteCursor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ByteCursor<S> {
    /// Create an unbound cursor.
    pub fn new() -> Self {
        Self {
            source: None,
            file_size: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            window: None,
            window_pos: 0,
            offset: 0,
            fetched_to: 0,
            queue: VecDeque::new(),
            id: IdProgress::default(),
            vint: VintProgress::default(),
            last_vint_width: 0,
            scalar: ScalarProgress::default(),
            bytes: BytesProgress::default(),
            skip: SkipProgress::default(),
            peek: PeekProgress::default(),
        }
    }

    /// Override the range-fetch window size. Mainly useful for exercising
    /// suspension at chunk boundaries.
    pub fn set_chunk_size(&mut self, chunk_size: u64) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Current logical stream position (absolute file offset).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Highest file offset requested from the source so far.
    pub fn fetched_to(&self) -> u64 {
        self.fetched_to
    }

    /// Total file size the cursor was bound with.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// True once a source has been bound.
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Width in octets of the most recently completed vint.
    pub fn last_vint_width(&self) -> u8 {
        self.last_vint_width
    }

    /// Bytes left in the materialized window.
    fn remaining(&self) -> usize {
        match &self.window {
            Some(win) => win.len() - self.window_pos,
            None => 0,
        }
    }

    /// Drop all buffered data and partial decode progress and rewind the
    /// logical position to zero. The source stays bound.
    pub fn rewind(&mut self) {
        self.window = None;
        self.window_pos = 0;
        self.offset = 0;
        self.fetched_to = 0;
        self.queue.clear();
        self.clear_progress();
    }

    /// Drop the source and all state.
    pub fn unbind(&mut self) {
        self.rewind();
        self.source = None;
        self.file_size = 0;
    }

    fn clear_progress(&mut self) {
        self.id = IdProgress::default();
        self.vint = VintProgress::default();
        self.last_vint_width = 0;
        self.scalar = ScalarProgress::default();
        self.bytes = BytesProgress::default();
        self.skip = SkipProgress::default();
        self.peek = PeekProgress::default();
    }
}

impl<S: ByteSource> ByteCursor<S> {
    /// Bind a source, replacing any previous one.
    pub fn bind(&mut self, source: S, file_size: u64) {
        self.rewind();
        self.source = Some(source);
        self.file_size = file_size;
    }

    /// Request the next chunk-sized range from the source.
    ///
    /// If no window is materialized the range is fetched immediately;
    /// otherwise it is queued so a consumer pulling ahead of need never
    /// triggers a redundant fetch. A source that clamps past its real end
    /// may return nothing; an empty fetch is never kept as a window, so
    /// reads see exhaustion rather than an unreadable buffer.
    pub fn receive_input(&mut self) -> Result<()> {
        let source = self.source.as_mut().ok_or(DemuxError::NoSource)?;
        if self.fetched_to >= self.file_size {
            return Ok(());
        }
        let next = (self.fetched_to + self.chunk_size).min(self.file_size);
        if self.window.is_none() {
            let buf = source.fetch_range(self.fetched_to, next)?;
            if !buf.is_empty() {
                self.window = Some(buf);
                self.window_pos = 0;
            }
        } else {
            self.queue.push_back((self.fetched_to, next));
        }
        self.fetched_to = next;
        Ok(())
    }

    /// Replace an exhausted window with the next non-empty queued range,
    /// or drop it when nothing more has been requested yet.
    fn pop_window(&mut self) -> Result<()> {
        if self.remaining() > 0 {
            return Ok(());
        }
        self.window = None;
        self.window_pos = 0;
        while let Some((start, end)) = self.queue.pop_front() {
            let source = self.source.as_mut().ok_or(DemuxError::NoSource)?;
            let buf = source.fetch_range(start, end)?;
            if !buf.is_empty() {
                self.window = Some(buf);
                self.window_pos = 0;
                break;
            }
        }
        Ok(())
    }

    /// Consume one byte, or `None` when the buffered bytes ran out.
    fn take_byte(&mut self) -> Result<Option<u8>> {
        let byte = match &self.window {
            Some(win) => win[self.window_pos],
            None => return Ok(None),
        };
        self.window_pos += 1;
        self.offset += 1;
        self.pop_window()?;
        Ok(Some(byte))
    }

    /// Consume up to `max` bytes from the current window into `out`.
    fn take_span(&mut self, max: usize, out: &mut Vec<u8>) -> Result<usize> {
        let taken;
        match &self.window {
            Some(win) => {
                let avail = win.len() - self.window_pos;
                taken = avail.min(max);
                out.extend_from_slice(&win[self.window_pos..self.window_pos + taken]);
            }
            None => return Ok(0),
        }
        self.window_pos += taken;
        self.offset += taken as u64;
        self.pop_window()?;
        Ok(taken)
    }

    /// Decode an element id. Marker bits are retained verbatim.
    pub fn read_id(&mut self) -> Result<Step<u32>> {
        if self.id.first.is_none() {
            let octet = match self.take_byte()? {
                Some(b) => b,
                None => return Ok(Step::Pending),
            };
            if octet == 0 {
                return Err(DemuxError::InvalidElementId {
                    offset: self.offset - 1,
                });
            }
            let width = ebml::octet_width(octet);
            if width > 4 {
                return Err(DemuxError::InvalidElementId {
                    offset: self.offset - 1,
                });
            }
            self.id.first = Some((octet, width));
            self.id.acc = octet as u32;
            self.id.taken = 1;
        }
        let width = match self.id.first {
            Some((_, w)) => w,
            None => return Ok(Step::Pending),
        };
        while self.id.taken < width {
            let byte = match self.take_byte()? {
                Some(b) => b,
                None => return Ok(Step::Pending),
            };
            self.id.acc = (self.id.acc << 8) | byte as u32;
            self.id.taken += 1;
        }
        let value = self.id.acc;
        self.id = IdProgress::default();
        Ok(Step::Ready(value))
    }

    /// Decode a variable-length integer, masking the marker bits of the
    /// first octet.
    pub fn read_vint(&mut self) -> Result<Step<u64>> {
        if self.vint.first.is_none() {
            let octet = match self.take_byte()? {
                Some(b) => b,
                None => return Ok(Step::Pending),
            };
            if octet == 0 {
                return Err(DemuxError::InvalidElementId {
                    offset: self.offset - 1,
                });
            }
            let width = ebml::octet_width(octet);
            self.vint.first = Some((octet, width));
            self.vint.acc = (octet & ebml::vint_mask(width)) as u64;
            self.vint.taken = 1;
        }
        let width = match self.vint.first {
            Some((_, w)) => w,
            None => return Ok(Step::Pending),
        };
        while self.vint.taken < width {
            let byte = match self.take_byte()? {
                Some(b) => b,
                None => return Ok(Step::Pending),
            };
            self.vint.acc = (self.vint.acc << 8) | byte as u64;
            self.vint.taken += 1;
        }
        let value = self.vint.acc;
        self.last_vint_width = width;
        self.vint = VintProgress::default();
        Ok(Step::Ready(value))
    }

    /// Decode a lace-size vint and convert it into a signed delta by
    /// subtracting the width-dependent bias.
    pub fn read_lacing_size(&mut self) -> Result<Step<i64>> {
        let value = ready!(self.read_vint()?);
        Ok(Step::Ready(
            value as i64 - ebml::lace_bias(self.last_vint_width),
        ))
    }

    fn accumulate_scalar(&mut self, size: u64) -> Result<Step<u64>> {
        if !self.scalar.active {
            self.scalar.active = true;
            self.scalar.acc = 0;
            self.scalar.taken = 0;
        }
        while self.scalar.taken < size {
            let byte = match self.take_byte()? {
                Some(b) => b,
                None => return Ok(Step::Pending),
            };
            self.scalar.acc = (self.scalar.acc << 8) | byte as u64;
            self.scalar.taken += 1;
        }
        let value = self.scalar.acc;
        self.scalar = ScalarProgress::default();
        Ok(Step::Ready(value))
    }

    /// Read a big-endian unsigned integer of `size` bytes.
    pub fn read_uint(&mut self, size: u64) -> Result<Step<u64>> {
        if !(1..=8).contains(&size) {
            return Err(DemuxError::InvalidPrimitiveSize { size });
        }
        self.accumulate_scalar(size)
    }

    /// Read a big-endian signed integer of `size` bytes.
    pub fn read_int(&mut self, size: u64) -> Result<Step<i64>> {
        if !(1..=8).contains(&size) {
            return Err(DemuxError::InvalidPrimitiveSize { size });
        }
        let acc = ready!(self.accumulate_scalar(size)?);
        Ok(Step::Ready(ebml::sign_extend(acc, size)))
    }

    /// Read an IEEE-754 float of exactly 4 or 8 bytes.
    pub fn read_float(&mut self, size: u64) -> Result<Step<f64>> {
        if size != 4 && size != 8 {
            return Err(DemuxError::InvalidFloatSize { size });
        }
        let acc = ready!(self.accumulate_scalar(size)?);
        let value = if size == 4 {
            f32::from_bits(acc as u32) as f64
        } else {
            f64::from_bits(acc)
        };
        Ok(Step::Ready(value))
    }

    /// Read `len` bytes into an owned buffer, spanning as many chunk
    /// boundaries as needed.
    pub fn read_binary(&mut self, len: u64) -> Result<Step<Vec<u8>>> {
        if !self.bytes.active {
            self.bytes.active = true;
            self.bytes.buf.clear();
            self.bytes.buf.reserve(len as usize);
        }
        while (self.bytes.buf.len() as u64) < len {
            let need = (len - self.bytes.buf.len() as u64) as usize;
            let mut buf = std::mem::take(&mut self.bytes.buf);
            let taken = self.take_span(need, &mut buf)?;
            self.bytes.buf = buf;
            if taken == 0 {
                return Ok(Step::Pending);
            }
        }
        let buf = std::mem::take(&mut self.bytes.buf);
        self.bytes = BytesProgress::default();
        Ok(Step::Ready(buf))
    }

    /// Read a fixed-length UTF-8 string, trimming at the first NUL.
    pub fn read_string(&mut self, len: u64) -> Result<Step<String>> {
        let data = ready!(self.read_binary(len)?);
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(Step::Ready(
            String::from_utf8_lossy(&data[..end]).into_owned(),
        ))
    }

    /// Advance the logical position by exactly `n` bytes without
    /// materializing the skipped bytes.
    pub fn skip(&mut self, n: u64) -> Result<Step<()>> {
        if !self.skip.active {
            self.skip.active = true;
            self.skip.done = 0;
        }
        while self.skip.done < n {
            let avail = match &self.window {
                Some(win) => (win.len() - self.window_pos) as u64,
                None => return Ok(Step::Pending),
            };
            let span = avail.min(n - self.skip.done);
            self.window_pos += span as usize;
            self.offset += span;
            self.skip.done += span;
            self.pop_window()?;
        }
        self.skip = SkipProgress::default();
        Ok(Step::Ready(()))
    }

    /// Decode the next element header without consuming its payload.
    ///
    /// The id and size reads are independently suspendable: if the size
    /// runs out of bytes, the already-decoded id is cached and is not
    /// re-decoded on retry.
    pub fn peek_element(&mut self) -> Result<Step<ElementHeader>> {
        if self.peek.offset.is_none() {
            self.peek.offset = Some(self.offset);
        }
        if self.peek.id.is_none() {
            let id = ready!(self.read_id()?);
            self.peek.id = Some(id);
        }
        if self.peek.size.is_none() {
            let size = ready!(self.read_vint()?);
            self.peek.size = Some(size);
        }
        let offset = self.peek.offset.take().unwrap_or(0);
        let id = self.peek.id.take().unwrap_or(0);
        let size = self.peek.size.take().unwrap_or(0);
        Ok(Step::Ready(ElementHeader::new(id, size, offset, self.offset)))
    }
}

/// Peek the next element header into a reusable slot, so a scan loop can
/// look at the same header across multiple suspensions without re-decoding.
pub(crate) fn peek_into<S: ByteSource>(
    slot: &mut Option<ElementHeader>,
    cursor: &mut ByteCursor<S>,
) -> Result<Step<ElementHeader>> {
    if let Some(header) = *slot {
        return Ok(Step::Ready(header));
    }
    let header = ready!(cursor.peek_element()?);
    *slot = Some(header);
    Ok(Step::Ready(header))
}
