/*! The transmit-side state machine.

A [`Transmitter`] pulls packs from its [`Producer`] and renders them into
whatever output window the transport offers through
[`Transmitter::read`]. It emits the pack id ahead of the root level,
then drives the pack's leaf codecs, which push fields through the
primitive surface on [`Tx`].

When the window fills mid-primitive the transmitter stages the rest (a
partially flushed fixed-width value, the remainder of a varint, the
tail of a string) and drains it into the next window before the
suspended leaf is re-entered. Concatenating the windows of successive
calls yields byte for byte what a single unbounded call would have
produced.
 */

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, trace};

use crate::frame::{Context, Mode, Stack};
use crate::pack::{ByteSrc, Producer, SrcHandle};
use crate::Result;

/// Window headroom a plain bit-stream transaction must secure at entry:
/// two reserved bit bytes plus one worst-case varint payload.
pub const BITS_HEADROOM: usize = 20;

/// Headroom for a bit-stream transaction carrying up to three sized
/// varints: three 8-byte payloads plus the reserved bit byte.
pub const VARINT_GROUP_HEADROOM: usize = 25;

/// Persistent transmit-side codec state.
pub struct Transmitter {
    producer: Rc<RefCell<dyn Producer>>,
    id_bytes: usize,
    stack: Stack<SrcHandle>,
    mode: Mode,
    /// Bytes of the staged fixed-width value already flushed.
    fix_byte: usize,
    fix_bytes: usize,
    scratch: [u8; 16],
    /// Unemitted remainder of a suspended 32-bit varint.
    u4: u32,
    /// Unemitted remainder of a suspended 64-bit varint.
    u8v: u64,
    /// Bit accumulator of the open bit-stream transaction.
    bits: u32,
    /// Bits pending in the accumulator, 0..=8.
    bit: u32,
    /// Index of the reserved bit byte. Only meaningful within one call:
    /// suspension rewinds it out of the window (see [`Tx::allocate`]).
    bits_byte: usize,
    /// Staged string remainder, terminator included.
    str_out: Vec<u8>,
    str_pos: usize,
    packs: u64,
}

impl Transmitter {
    /// Create a transmitter pulling packs from `producer`. `id_bytes` is
    /// the fixed pack-id width of the connection, `1..=8`.
    #[must_use]
    pub fn new(producer: Rc<RefCell<dyn Producer>>, id_bytes: usize) -> Self {
        assert!((1..=8).contains(&id_bytes), "id width {id_bytes} out of 1..=8");
        Self {
            producer,
            id_bytes,
            stack: Stack::new(),
            mode: Mode::Ok,
            fix_byte: 0,
            fix_bytes: 0,
            scratch: [0; 16],
            u4: 0,
            u8v: 0,
            bits: 0,
            bit: 0,
            bits_byte: 0,
            str_out: Vec::new(),
            str_pos: 0,
            packs: 0,
        }
    }

    /// Fill `buf` with encoded bytes. Returns the count produced:
    /// `Ok(0)` when the producer has nothing pending, a short count when
    /// a pack completed (one pack per call) or the encoder needs more
    /// space than the window had left.
    ///
    /// An empty `buf` returns `Ok(0)` with no side effects.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (res, pos) = {
            let mut tx = Tx { st: self, buf, pos: 0 };
            let res = tx.drive();
            (res, tx.pos)
        };
        match res {
            Ok(()) => Ok(pos),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Cancel the pack in flight and drop all resume state. Frames and
    /// contexts return to their free lists; no partial data survives.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.mode = Mode::Ok;
        self.fix_byte = 0;
        self.fix_bytes = 0;
        self.u4 = 0;
        self.u8v = 0;
        self.bits = 0;
        self.bit = 0;
        self.str_out.clear();
        self.str_pos = 0;
    }
}

impl ByteSrc for Transmitter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Transmitter::read(self, buf)
    }

    fn close(&mut self) {
        self.reset();
    }

    fn is_open(&self) -> bool {
        !self.stack.is_empty() || self.mode.suspended()
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        info!("transmitter: {} packs emitted", self.packs);
    }
}

/// Encode surface handed to leaf codecs for the duration of one
/// [`Transmitter::read`] call.
///
/// Every `put_*` primitive records `next` as the frame's resume state
/// and returns `false` when the window filled up; the transmitter
/// drains the staged remainder into the next window before the leaf is
/// re-entered at `next`, so on re-entry the value is fully emitted.
pub struct Tx<'a> {
    st: &'a mut Transmitter,
    buf: &'a mut [u8],
    pos: usize,
}

impl Tx<'_> {
    fn drive(&mut self) -> Result<()> {
        loop {
            // Drain whatever the previous window cut off.
            match self.st.mode {
                Mode::Ok => {}
                Mode::Retry => self.st.mode = Mode::Ok,
                Mode::Val | Mode::Len | Mode::BaseLen => {
                    if !self.complete_fixed() {
                        return Ok(());
                    }
                }
                Mode::Varint32 => {
                    if !self.pump_varint32() {
                        return Ok(());
                    }
                }
                Mode::Varint64 => {
                    if !self.pump_varint64() {
                        return Ok(());
                    }
                }
                Mode::Str => {
                    if !self.complete_string() {
                        return Ok(());
                    }
                }
                Mode::Bits => {
                    if !self.complete_bits() {
                        return Ok(());
                    }
                }
            }

            // Idle: ask for the next pack and emit its id.
            if self.st.stack.is_empty() {
                let producer = self.st.producer.clone();
                let Some(leaf) = producer.borrow_mut().sending(self) else {
                    return Ok(());
                };
                let id = leaf.borrow().id();
                debug!("tx: pack id {id} started");
                self.st.stack.push(leaf);
                if !self.put_val(id, self.st.id_bytes, 0) {
                    return Ok(());
                }
            }

            let leaf = self.st.stack.top_leaf();
            match leaf.borrow_mut().get_bytes(self)? {
                Some(child) => {
                    trace!("tx: descend, depth {}", self.st.stack.depth() + 1);
                    self.st.stack.push(child);
                }
                None if self.st.mode.suspended() => return Ok(()),
                None => {
                    if self.st.stack.top_is_root() {
                        let done = self.st.stack.pop().expect("root frame");
                        self.st.packs += 1;
                        debug!("tx: pack complete ({} total)", self.st.packs);
                        let producer = self.st.producer.clone();
                        producer.borrow_mut().sent(self, done);
                        // End of pack: hand the window back to the caller.
                        return Ok(());
                    }
                    trace!("tx: ascend, depth {}", self.st.stack.depth() - 1);
                    self.st.stack.pop();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Fixed-width values
    // ------------------------------------------------------------------

    /// Write `v` as `bytes` big-endian bytes, `1..=8`. On `false` the
    /// unwritten suffix is staged and drains before state `next` runs.
    pub fn put_val(&mut self, v: u64, bytes: usize, next: u32) -> bool {
        debug_assert!((1..=8).contains(&bytes));
        self.set_state(next);
        let rem = self.buf.len() - self.pos;
        if bytes <= rem {
            for i in 0..bytes {
                self.buf[self.pos + i] = (v >> ((bytes - 1 - i) * 8)) as u8;
            }
            self.pos += bytes;
            true
        } else {
            for i in 0..bytes {
                self.st.scratch[i] = (v >> ((bytes - 1 - i) * 8)) as u8;
            }
            self.buf[self.pos..].copy_from_slice(&self.st.scratch[..rem]);
            self.pos = self.buf.len();
            self.st.fix_byte = rem;
            self.st.fix_bytes = bytes;
            self.st.mode = Mode::Val;
            false
        }
    }

    /// Write a 4-byte IEEE-754 float.
    pub fn put_f32(&mut self, v: f32, next: u32) -> bool {
        self.put_val(u64::from(v.to_bits()), 4, next)
    }

    /// Write an 8-byte IEEE-754 float.
    pub fn put_f64(&mut self, v: f64, next: u32) -> bool {
        self.put_val(v.to_bits(), 8, next)
    }

    fn complete_fixed(&mut self) -> bool {
        let need = self.st.fix_bytes - self.st.fix_byte;
        let take = need.min(self.buf.len() - self.pos);
        self.buf[self.pos..self.pos + take]
            .copy_from_slice(&self.st.scratch[self.st.fix_byte..self.st.fix_byte + take]);
        self.st.fix_byte += take;
        self.pos += take;
        if self.st.fix_byte < self.st.fix_bytes {
            return false;
        }
        self.st.mode = Mode::Ok;
        true
    }

    // ------------------------------------------------------------------
    // Varints
    // ------------------------------------------------------------------

    /// Write `v` as a LEB128 varint, 1..=5 bytes.
    pub fn put_varint32(&mut self, v: u32, next: u32) -> bool {
        self.set_state(next);
        self.st.u4 = v;
        self.pump_varint32()
    }

    fn pump_varint32(&mut self) -> bool {
        loop {
            if self.pos >= self.buf.len() {
                self.st.mode = Mode::Varint32;
                return false;
            }
            let v = self.st.u4;
            if v < 0x80 {
                self.buf[self.pos] = v as u8;
                self.pos += 1;
                self.st.mode = Mode::Ok;
                return true;
            }
            self.buf[self.pos] = (v as u8 & 0x7F) | 0x80;
            self.pos += 1;
            self.st.u4 = v >> 7;
        }
    }

    /// Write `v` as a LEB128 varint, 1..=10 bytes. A suspended 64-bit
    /// encode resumes with the 64-bit accumulator, matching the width
    /// it started with.
    pub fn put_varint64(&mut self, v: u64, next: u32) -> bool {
        self.set_state(next);
        self.st.u8v = v;
        self.pump_varint64()
    }

    fn pump_varint64(&mut self) -> bool {
        loop {
            if self.pos >= self.buf.len() {
                self.st.mode = Mode::Varint64;
                return false;
            }
            let v = self.st.u8v;
            if v < 0x80 {
                self.buf[self.pos] = v as u8;
                self.pos += 1;
                self.st.mode = Mode::Ok;
                return true;
            }
            self.buf[self.pos] = (v as u8 & 0x7F) | 0x80;
            self.pos += 1;
            self.st.u8v = v >> 7;
        }
    }

    // ------------------------------------------------------------------
    // Bit stream
    // ------------------------------------------------------------------

    /// Open a bit-stream transaction: verify `need` bytes of headroom
    /// (the transaction's worst case, e.g. [`BITS_HEADROOM`] or
    /// [`VARINT_GROUP_HEADROOM`]) and reserve the first bit byte.
    ///
    /// On `false` nothing is reserved; the leaf is re-entered at `retry`
    /// against the next window and repeats the whole call.
    pub fn init_bits(&mut self, need: usize, retry: u32) -> bool {
        self.set_state(retry);
        if self.buf.len() - self.pos < need {
            self.st.mode = Mode::Retry;
            return false;
        }
        self.st.bits = 0;
        self.st.bit = 0;
        self.st.bits_byte = self.pos;
        self.pos += 1;
        true
    }

    /// Extend an open transaction by another `n`-byte worst case.
    ///
    /// Must be called while the reserved bit byte is the newest output
    /// byte (at transaction entry, right after a flush): on shortfall
    /// the reserved byte is rewound out of the window and everything
    /// after it would be lost. The pending accumulator bits survive; on
    /// the next window the transmitter re-reserves the bit byte and
    /// re-enters the leaf at `retry`, which calls `allocate` again.
    pub fn allocate(&mut self, n: usize, retry: u32) -> bool {
        self.set_state(retry);
        if self.buf.len() - self.pos >= n {
            return true;
        }
        debug_assert_eq!(self.st.bits_byte + 1, self.pos, "payload after reserve");
        self.pos = self.st.bits_byte;
        self.st.mode = Mode::Bits;
        false
    }

    fn complete_bits(&mut self) -> bool {
        if self.pos >= self.buf.len() {
            return false;
        }
        self.st.bits_byte = self.pos;
        self.pos += 1;
        self.st.mode = Mode::Ok;
        true
    }

    /// Pack `n` bits, `1..=8`, into the open transaction. When more
    /// than 8 bits accumulate, the low byte lands in the reserved bit
    /// byte and a fresh one is reserved at the write cursor.
    pub fn put_bits(&mut self, v: u32, n: u32) {
        debug_assert!((1..=8).contains(&n));
        let mask = (1u32 << n) - 1;
        self.st.bits |= (v & mask) << self.st.bit;
        self.st.bit += n;
        if self.st.bit > 8 {
            self.buf[self.st.bits_byte] = self.st.bits as u8;
            self.st.bits >>= 8;
            self.st.bit -= 8;
            self.st.bits_byte = self.pos;
            self.pos += 1;
        }
    }

    /// Close the transaction: flush the residual bits into the reserved
    /// byte, or truncate the reservation if no bits were packed at all.
    pub fn end_bits(&mut self) {
        if self.st.bit > 0 {
            self.buf[self.st.bits_byte] = self.st.bits as u8;
        } else {
            debug_assert_eq!(self.st.bits_byte + 1, self.pos);
            self.pos -= 1;
        }
        self.st.bits = 0;
        self.st.bit = 0;
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Write the UTF-8 bytes of `s` followed by the 0xFF terminator.
    /// On `false` the unwritten tail (terminator included) is staged
    /// and drains before state `next` runs.
    pub fn put_string(&mut self, s: &str, next: u32) -> bool {
        self.set_state(next);
        let bytes = s.as_bytes();
        let rem = self.buf.len() - self.pos;
        if bytes.len() + 1 <= rem {
            self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
            self.pos += bytes.len();
            self.buf[self.pos] = 0xFF;
            self.pos += 1;
            true
        } else {
            let take = rem.min(bytes.len());
            self.buf[self.pos..self.pos + take].copy_from_slice(&bytes[..take]);
            self.pos += take;
            self.st.str_out.clear();
            self.st.str_out.extend_from_slice(&bytes[take..]);
            self.st.str_out.push(0xFF);
            self.st.str_pos = 0;
            self.st.mode = Mode::Str;
            false
        }
    }

    fn complete_string(&mut self) -> bool {
        let need = self.st.str_out.len() - self.st.str_pos;
        let take = need.min(self.buf.len() - self.pos);
        self.buf[self.pos..self.pos + take]
            .copy_from_slice(&self.st.str_out[self.st.str_pos..self.st.str_pos + take]);
        self.pos += take;
        self.st.str_pos += take;
        if self.st.str_pos < self.st.str_out.len() {
            return false;
        }
        self.st.str_out.clear();
        self.st.str_pos = 0;
        self.st.mode = Mode::Ok;
        true
    }

    // ------------------------------------------------------------------
    // Frame access
    // ------------------------------------------------------------------

    /// Resume label of the current frame.
    #[must_use]
    pub fn state(&self) -> u32 {
        self.st.stack.top().state
    }

    /// Set the resume label of the current frame.
    pub fn set_state(&mut self, state: u32) {
        if !self.st.stack.is_empty() {
            self.st.stack.top_mut().state = state;
        }
    }

    /// Outer loop cursor.
    #[must_use]
    pub fn index(&self) -> usize {
        self.st.stack.top().index
    }

    /// Set the outer loop cursor.
    pub fn set_index(&mut self, index: usize) {
        self.st.stack.top_mut().index = index;
    }

    /// Outer loop bound.
    #[must_use]
    pub fn index_max(&self) -> usize {
        self.st.stack.top().index_max
    }

    /// Set the outer loop bound and rewind the cursor.
    pub fn set_index_max(&mut self, max: usize) {
        let f = self.st.stack.top_mut();
        f.index_max = max;
        f.index = 0;
    }

    /// Secondary loop cursor.
    #[must_use]
    pub fn base_index(&self) -> usize {
        self.st.stack.top().base_index
    }

    /// Set the secondary loop cursor.
    pub fn set_base_index(&mut self, index: usize) {
        self.st.stack.top_mut().base_index = index;
    }

    /// Secondary loop bound.
    #[must_use]
    pub fn base_index_max(&self) -> usize {
        self.st.stack.top().base_index_max
    }

    /// Set the secondary loop bound and rewind its cursor.
    pub fn set_base_index_max(&mut self, max: usize) {
        let f = self.st.stack.top_mut();
        f.base_index_max = max;
        f.base_index = 0;
    }

    /// Bitmap of present optional fields of the current record.
    #[must_use]
    pub fn fields_nulls(&self) -> u8 {
        self.st.stack.top().fields_nulls
    }

    /// Store the optional-fields bitmap.
    pub fn set_fields_nulls(&mut self, nulls: u8) {
        self.st.stack.top_mut().fields_nulls = nulls;
    }

    /// Chain a fresh map/set context onto the current frame.
    pub fn open_context(&mut self) {
        self.st.stack.open_context();
    }

    /// Recycle the newest context of the current frame.
    pub fn close_context(&mut self) {
        self.st.stack.close_context();
    }

    /// The newest context of the current frame.
    #[must_use]
    pub fn context(&self) -> &Context<SrcHandle> {
        self.st.stack.context()
    }

    /// Mutable access to the newest context.
    pub fn context_mut(&mut self) -> &mut Context<SrcHandle> {
        self.st.stack.context_mut()
    }
}
