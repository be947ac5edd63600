/*! The receive-side state machine.

A [`Receiver`] turns an incoming byte stream back into packs. The
transport feeds it windows of arbitrary size through
[`Receiver::write`]; the receiver dispatches the leading pack id through
its [`Consumer`], then drives the pack's leaf codecs, which pull fields
off the window through the primitive surface on [`Rx`].

Any primitive may come up short when the window ends. The receiver then
records what is missing (a partially stashed fixed-width value, a
varint accumulator and shift, a partial string) and finishes it from
the next window before the suspended leaf is re-entered at its saved
state. Feeding the same bytes in any partitioning therefore produces
the same packs.
 */

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, trace, warn};

use crate::frame::{Context, Mode, Stack};
use crate::pack::{ByteDst, Consumer, DstHandle};
use crate::{Error, Result};

/// Persistent receive-side codec state: the frame stack plus everything
/// needed to resume a primitive cut off by the end of a window.
pub struct Receiver {
    consumer: Rc<RefCell<dyn Consumer>>,
    id_bytes: usize,
    stack: Stack<DstHandle>,
    mode: Mode,
    /// Bytes already stashed of the pending fixed-width value; doubles
    /// as the septet shift of a suspended varint.
    fix_byte: usize,
    fix_bytes: usize,
    scratch: [u8; 16],
    /// 32-bit varint / bit-stream extraction result.
    u4: u32,
    /// 64-bit varint / fixed-width value.
    u8v: u64,
    /// Cached bit-stream byte.
    bits: u32,
    /// Bits of the cached byte already consumed, 0..=8.
    bit: u32,
    /// Partial string bytes carried across windows.
    str_buf: Vec<u8>,
    string: Option<String>,
    packs: u64,
}

impl Receiver {
    /// Create a receiver delivering packs to `consumer`. `id_bytes` is
    /// the fixed pack-id width of the connection, `1..=8`.
    #[must_use]
    pub fn new(consumer: Rc<RefCell<dyn Consumer>>, id_bytes: usize) -> Self {
        assert!((1..=8).contains(&id_bytes), "id width {id_bytes} out of 1..=8");
        Self {
            consumer,
            id_bytes,
            stack: Stack::new(),
            mode: Mode::Ok,
            fix_byte: 0,
            fix_bytes: 0,
            scratch: [0; 16],
            u4: 0,
            u8v: 0,
            bits: 0,
            bit: 8,
            str_buf: Vec::new(),
            string: None,
            packs: 0,
        }
    }

    /// Feed a window of received bytes. Returns the count consumed,
    /// which on success is the whole window: every suspension point
    /// saves enough state to take the bytes that are already here.
    ///
    /// An empty `buf` returns `Ok(0)` with no side effects.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (res, pos) = {
            let mut rx = Rx { st: self, buf, pos: 0 };
            let res = rx.drive();
            (res, rx.pos)
        };
        match res {
            Ok(()) => Ok(pos),
            Err(e) => {
                // The stream is corrupt; discard the pack in flight so
                // the instance is reusable once the caller resyncs.
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
        self.bit = 8;
        self.str_buf.clear();
        self.string = None;
    }
}

impl ByteDst for Receiver {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Receiver::write(self, buf)
    }

    fn close(&mut self) {
        self.reset();
    }

    fn is_open(&self) -> bool {
        !self.stack.is_empty() || self.mode.suspended()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        info!("receiver: {} packs delivered", self.packs);
    }
}

/// Decode surface handed to leaf codecs for the duration of one
/// [`Receiver::write`] call: the persistent state plus the current
/// input window.
///
/// Every `try_*` primitive records `next` as the frame's resume state.
/// For fixed-width values, varints and strings the receiver itself
/// completes the value from later windows, so `next` is the state
/// *after* the value; for bit-stream and null-bitmap reads `next` is
/// re-entered to retry the same call.
pub struct Rx<'a> {
    st: &'a mut Receiver,
    buf: &'a [u8],
    pos: usize,
}

impl Rx<'_> {
    fn drive(&mut self) -> Result<()> {
        loop {
            // Finish whatever the previous window cut off.
            match self.st.mode {
                Mode::Ok => {}
                Mode::Retry | Mode::Bits => self.st.mode = Mode::Ok,
                Mode::Val | Mode::Len | Mode::BaseLen => {
                    if !self.complete_fixed() {
                        return Ok(());
                    }
                    if self.st.stack.is_empty() {
                        // The suspended read was a pack id.
                        if !self.dispatch_id() {
                            continue;
                        }
                    }
                }
                Mode::Varint32 => {
                    if !self.pump_varint32()? {
                        return Ok(());
                    }
                }
                Mode::Varint64 => {
                    if !self.pump_varint64()? {
                        return Ok(());
                    }
                }
                Mode::Str => {
                    if !self.complete_string()? {
                        return Ok(());
                    }
                }
            }

            // Idle: the next bytes are a pack id.
            if self.st.stack.is_empty() {
                if self.pos >= self.buf.len() {
                    return Ok(());
                }
                if !self.try_get_val(self.st.id_bytes, 0) {
                    return Ok(());
                }
                if !self.dispatch_id() {
                    continue;
                }
            }

            let leaf = self.st.stack.top_leaf();
            match leaf.borrow_mut().put_bytes(self)? {
                Some(child) => {
                    trace!("rx: descend, depth {}", self.st.stack.depth() + 1);
                    self.st.stack.push(child);
                }
                None if self.st.mode.suspended() => return Ok(()),
                None => {
                    if self.st.stack.top_is_root() {
                        let done =
                            self.st.stack.pop().ok_or(Error::UnexpectedPackEnd)?;
                        self.st.packs += 1;
                        debug!("rx: pack complete ({} total)", self.st.packs);
                        let consumer = self.st.consumer.clone();
                        consumer.borrow_mut().received(self, done);
                    } else {
                        trace!("rx: ascend, depth {}", self.st.stack.depth() - 1);
                        self.st.stack.pop();
                    }
                }
            }
        }
    }

    fn dispatch_id(&mut self) -> bool {
        let id = self.st.u8v;
        let consumer = self.st.consumer.clone();
        match consumer.borrow_mut().receiving(self, id) {
            Some(leaf) => {
                debug!("rx: pack id {id} started");
                self.st.stack.push(leaf);
                true
            }
            None => {
                warn!("rx: no decoder for pack id {id}, back to idle");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Fixed-width values
    // ------------------------------------------------------------------

    /// Read a `bytes`-wide big-endian value, `1..=8`. On `true` the
    /// value is available through the `get_*` accessors; on `false` the
    /// window ran out and the read completes before state `next` runs.
    pub fn try_get_val(&mut self, bytes: usize, next: u32) -> bool {
        debug_assert!((1..=8).contains(&bytes));
        self.set_state(next);
        let rem = self.buf.len() - self.pos;
        if bytes <= rem {
            let mut v = 0u64;
            for i in 0..bytes {
                v = v << 8 | u64::from(self.buf[self.pos + i]);
            }
            self.pos += bytes;
            self.st.u8v = v;
            true
        } else {
            self.st.scratch[..rem].copy_from_slice(&self.buf[self.pos..]);
            self.pos = self.buf.len();
            self.st.fix_byte = rem;
            self.st.fix_bytes = bytes;
            self.st.mode = Mode::Val;
            false
        }
    }

    /// Like [`Rx::try_get_val`], but the completed value becomes the
    /// outer loop bound: `index_max` is set and `index` rewinds to 0.
    /// `bytes == 0` means the count is absent and the bound is 0.
    pub fn try_get_len(&mut self, bytes: usize, next: u32) -> bool {
        if bytes == 0 {
            self.set_state(next);
            let f = self.st.stack.top_mut();
            f.index_max = 0;
            f.index = 0;
            return true;
        }
        if self.try_get_val(bytes, next) {
            let v = self.st.u8v as usize;
            let f = self.st.stack.top_mut();
            f.index_max = v;
            f.index = 0;
            true
        } else {
            self.st.mode = Mode::Len;
            false
        }
    }

    /// [`Rx::try_get_len`] for the secondary (`base_*`) cursor.
    pub fn try_get_base_len(&mut self, bytes: usize, next: u32) -> bool {
        if bytes == 0 {
            self.set_state(next);
            let f = self.st.stack.top_mut();
            f.base_index_max = 0;
            f.base_index = 0;
            return true;
        }
        if self.try_get_val(bytes, next) {
            let v = self.st.u8v as usize;
            let f = self.st.stack.top_mut();
            f.base_index_max = v;
            f.base_index = 0;
            true
        } else {
            self.st.mode = Mode::BaseLen;
            false
        }
    }

    fn complete_fixed(&mut self) -> bool {
        let need = self.st.fix_bytes - self.st.fix_byte;
        let take = need.min(self.buf.len() - self.pos);
        self.st.scratch[self.st.fix_byte..self.st.fix_byte + take]
            .copy_from_slice(&self.buf[self.pos..self.pos + take]);
        self.st.fix_byte += take;
        self.pos += take;
        if self.st.fix_byte < self.st.fix_bytes {
            return false;
        }
        let mut v = 0u64;
        for i in 0..self.st.fix_bytes {
            v = v << 8 | u64::from(self.st.scratch[i]);
        }
        match self.st.mode {
            Mode::Len => {
                let f = self.st.stack.top_mut();
                f.index_max = v as usize;
                f.index = 0;
            }
            Mode::BaseLen => {
                let f = self.st.stack.top_mut();
                f.base_index_max = v as usize;
                f.base_index = 0;
            }
            _ => self.st.u8v = v,
        }
        self.st.mode = Mode::Ok;
        true
    }

    /// The completed fixed-width value.
    #[must_use]
    pub fn get_u64(&self) -> u64 {
        self.st.u8v
    }

    /// Low 32 bits of the completed value.
    #[must_use]
    pub fn get_u32(&self) -> u32 {
        self.st.u8v as u32
    }

    /// Low 16 bits of the completed value.
    #[must_use]
    pub fn get_u16(&self) -> u16 {
        self.st.u8v as u16
    }

    /// Low byte of the completed value.
    #[must_use]
    pub fn get_u8(&self) -> u8 {
        self.st.u8v as u8
    }

    /// Completed 4-byte value as IEEE-754 bits.
    #[must_use]
    pub fn get_f32(&self) -> f32 {
        f32::from_bits(self.st.u8v as u32)
    }

    /// Completed 8-byte value as IEEE-754 bits.
    #[must_use]
    pub fn get_f64(&self) -> f64 {
        f64::from_bits(self.st.u8v)
    }

    // ------------------------------------------------------------------
    // Varints
    // ------------------------------------------------------------------

    /// Read a LEB128 varint of up to 5 bytes into the 32-bit
    /// accumulator. Errors when a continuation bit runs past that.
    pub fn try_get_varint32(&mut self, next: u32) -> Result<bool> {
        self.set_state(next);
        self.st.u4 = 0;
        self.st.fix_byte = 0;
        self.pump_varint32()
    }

    fn pump_varint32(&mut self) -> Result<bool> {
        loop {
            if self.pos >= self.buf.len() {
                self.st.mode = Mode::Varint32;
                return Ok(false);
            }
            let b = self.buf[self.pos];
            self.pos += 1;
            self.st.u4 |= u32::from(b & 0x7F) << self.st.fix_byte;
            if b & 0x80 == 0 {
                self.st.mode = Mode::Ok;
                return Ok(true);
            }
            self.st.fix_byte += 7;
            if self.st.fix_byte > 28 {
                return Err(Error::VarintOverflow { max: 5 });
            }
        }
    }

    /// The completed 32-bit varint.
    #[must_use]
    pub fn varint32(&self) -> u32 {
        self.st.u4
    }

    /// Read a LEB128 varint of up to 10 bytes into the 64-bit
    /// accumulator.
    pub fn try_get_varint64(&mut self, next: u32) -> Result<bool> {
        self.set_state(next);
        self.st.u8v = 0;
        self.st.fix_byte = 0;
        self.pump_varint64()
    }

    fn pump_varint64(&mut self) -> Result<bool> {
        loop {
            if self.pos >= self.buf.len() {
                self.st.mode = Mode::Varint64;
                return Ok(false);
            }
            let b = self.buf[self.pos];
            self.pos += 1;
            self.st.u8v |= u64::from(b & 0x7F) << self.st.fix_byte;
            if b & 0x80 == 0 {
                self.st.mode = Mode::Ok;
                return Ok(true);
            }
            self.st.fix_byte += 7;
            if self.st.fix_byte > 63 {
                return Err(Error::VarintOverflow { max: 10 });
            }
        }
    }

    /// The completed 64-bit varint.
    #[must_use]
    pub fn varint64(&self) -> u64 {
        self.st.u8v
    }

    // ------------------------------------------------------------------
    // Bit stream
    // ------------------------------------------------------------------

    /// Start reading a bit-stream transaction: the next
    /// [`Rx::try_get_bits`] pulls a fresh byte.
    pub fn init_bits(&mut self) {
        self.st.bits = 0;
        self.st.bit = 8;
    }

    /// Extract `n` bits, `1..=8`, pulling at most one new byte off the
    /// window. `None` means the window is out of bytes; the leaf is
    /// re-entered at `retry` to try again.
    pub fn try_get_bits(&mut self, n: u32, retry: u32) -> Option<u32> {
        debug_assert!((1..=8).contains(&n));
        self.set_state(retry);
        let mask = (1u32 << n) - 1;
        if self.st.bit + n < 9 {
            let v = (self.st.bits >> self.st.bit) & mask;
            self.st.bit += n;
            Some(v)
        } else if self.pos < self.buf.len() {
            let b = u32::from(self.buf[self.pos]);
            self.pos += 1;
            let v = ((self.st.bits >> self.st.bit) | (b << (8 - self.st.bit))) & mask;
            self.st.bits = b;
            self.st.bit = self.st.bit + n - 8;
            Some(v)
        } else {
            self.st.mode = Mode::Retry;
            None
        }
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Read a 0xFF-terminated UTF-8 string. On `true` the string is
    /// available through [`Rx::take_string`]; partial bytes are carried
    /// across windows until the terminator arrives.
    pub fn try_get_string(&mut self, next: u32) -> Result<bool> {
        self.set_state(next);
        self.complete_string()
    }

    fn complete_string(&mut self) -> Result<bool> {
        match self.buf[self.pos..].iter().position(|&b| b == 0xFF) {
            Some(k) => {
                let chunk = &self.buf[self.pos..self.pos + k];
                let s = if self.st.str_buf.is_empty() {
                    std::str::from_utf8(chunk)?.to_owned()
                } else {
                    self.st.str_buf.extend_from_slice(chunk);
                    let whole = std::mem::take(&mut self.st.str_buf);
                    String::from_utf8(whole)
                        .map_err(|e| Error::Utf8(e.utf8_error()))?
                };
                self.pos += k + 1;
                self.st.string = Some(s);
                self.st.mode = Mode::Ok;
                Ok(true)
            }
            None => {
                self.st.str_buf.extend_from_slice(&self.buf[self.pos..]);
                self.pos = self.buf.len();
                self.st.mode = Mode::Str;
                Ok(false)
            }
        }
    }

    /// Move the completed string out.
    #[must_use]
    pub fn take_string(&mut self) -> String {
        self.st.string.take().unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Null bitmaps
    // ------------------------------------------------------------------

    /// Advance `index` to the next present element of a nullable array,
    /// reading bitmap bytes as needed. A zero bitmap byte fast-forwards
    /// `index` by 8.
    ///
    /// Returns `Some(true)` with `index` at a present element,
    /// `Some(false)` when `index` reached `index_max`, or `None` when
    /// the window ran out mid-scan.
    pub fn try_get_nulls(&mut self, retry: u32) -> Option<bool> {
        self.set_state(retry);
        loop {
            let (index, index_max, window) = {
                let f = self.st.stack.top();
                (f.index, f.index_max, f.items_nulls)
            };
            if index >= index_max {
                return Some(false);
            }
            let off = (index & 7) as u32;
            if off != 0 {
                let rest = window >> off;
                if rest != 0 {
                    self.st.stack.top_mut().index =
                        index + rest.trailing_zeros() as usize;
                    return Some(true);
                }
                self.st.stack.top_mut().index = (index & !7) + 8;
                continue;
            }
            if self.pos >= self.buf.len() {
                self.st.mode = Mode::Retry;
                return None;
            }
            let b = self.buf[self.pos];
            self.pos += 1;
            let f = self.st.stack.top_mut();
            f.items_nulls = b;
            if b == 0 {
                f.index = index + 8;
            } else {
                f.index = index + b.trailing_zeros() as usize;
                return Some(true);
            }
        }
    }

    /// [`Rx::try_get_nulls`] over the secondary (`base_*`) cursor.
    pub fn try_get_base_nulls(&mut self, retry: u32) -> Option<bool> {
        self.set_state(retry);
        loop {
            let (index, index_max, window) = {
                let f = self.st.stack.top();
                (f.base_index, f.base_index_max, f.base_nulls)
            };
            if index >= index_max {
                return Some(false);
            }
            let off = (index & 7) as u32;
            if off != 0 {
                let rest = window >> off;
                if rest != 0 {
                    self.st.stack.top_mut().base_index =
                        index + rest.trailing_zeros() as usize;
                    return Some(true);
                }
                self.st.stack.top_mut().base_index = (index & !7) + 8;
                continue;
            }
            if self.pos >= self.buf.len() {
                self.st.mode = Mode::Retry;
                return None;
            }
            let b = self.buf[self.pos];
            self.pos += 1;
            let f = self.st.stack.top_mut();
            f.base_nulls = b;
            if b == 0 {
                f.base_index = index + 8;
            } else {
                f.base_index = index + b.trailing_zeros() as usize;
                return Some(true);
            }
        }
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
    pub fn context(&self) -> &Context<DstHandle> {
        self.st.stack.context()
    }

    /// Mutable access to the newest context.
    pub fn context_mut(&mut self) -> &mut Context<DstHandle> {
        self.st.stack.context_mut()
    }
}
