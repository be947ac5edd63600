/*! Activation frames for the codec state machines.

Every nesting level of a pack being encoded or decoded gets one frame:
the leaf codec's opaque resume `state`, the loop cursors, the null-bitmap
windows and an optional chain of [`Context`] scratch slots for map/set
framing. Frames and contexts live in arenas owned by the codec and are
recycled through intrusive free lists, so steady-state operation touches
the allocator only while the stack is still growing to its high-water
mark.
 */

/// Arena link meaning "no entry".
pub(crate) const NONE: u32 = u32::MAX;

/// A value parked in a [`Context`] while the surrounding map/set entry is
/// still being assembled. `H` is the codec's leaf handle type, so a key
/// or value that is itself a pack can be parked too.
#[derive(Clone, Debug, Default)]
pub enum Datum<H> {
    /// Nothing parked.
    #[default]
    Empty,
    /// An unsigned integer (or anything the schema packs into one).
    U64(u64),
    /// A signed integer.
    I64(i64),
    /// A float.
    F64(f64),
    /// A string.
    Str(String),
    /// A nested pack.
    Pack(H),
}

/// Scratch slot for map/set framing: the `info` byte plus the key/value
/// of the entry currently in flight.
#[derive(Debug)]
pub struct Context<H> {
    /// The framing info byte (see [`crate::info`]).
    pub info: u8,
    /// Key of the entry in flight.
    pub key: Datum<H>,
    /// Value of the entry in flight.
    pub value: Datum<H>,
    prev: u32,
}

impl<H> Context<H> {
    fn new() -> Self {
        Self {
            info: 0,
            key: Datum::Empty,
            value: Datum::Empty,
            prev: NONE,
        }
    }

    fn reset(&mut self) {
        self.info = 0;
        self.key = Datum::Empty;
        self.value = Datum::Empty;
        self.prev = NONE;
    }
}

pub(crate) struct Frame<H> {
    pub state: u32,
    pub leaf: Option<H>,
    pub index: usize,
    pub index_max: usize,
    pub base_index: usize,
    pub base_index_max: usize,
    pub fields_nulls: u8,
    pub items_nulls: u8,
    pub base_nulls: u8,
    /// Head of this frame's context chain.
    pub context: u32,
    /// Parent frame while active, next free frame while recycled.
    pub prev: u32,
}

impl<H> Frame<H> {
    fn new() -> Self {
        Self {
            state: 0,
            leaf: None,
            index: 0,
            index_max: 0,
            base_index: 0,
            base_index_max: 0,
            fields_nulls: 0,
            items_nulls: 0,
            base_nulls: 0,
            context: NONE,
            prev: NONE,
        }
    }

    fn reset(&mut self) {
        self.state = 0;
        self.leaf = None;
        self.index = 0;
        self.index_max = 0;
        self.base_index = 0;
        self.base_index_max = 0;
        self.fields_nulls = 0;
        self.items_nulls = 0;
        self.base_nulls = 0;
        self.context = NONE;
        self.prev = NONE;
    }
}

/// Per-direction frame stack backed by recycling arenas.
pub(crate) struct Stack<H> {
    frames: Vec<Frame<H>>,
    free: u32,
    top: u32,
    contexts: Vec<Context<H>>,
    ctx_free: u32,
}

impl<H: Clone> Stack<H> {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            free: NONE,
            top: NONE,
            contexts: Vec::new(),
            ctx_free: NONE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top == NONE
    }

    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut at = self.top;
        while at != NONE {
            n += 1;
            at = self.frames[at as usize].prev;
        }
        n
    }

    /// Activate a fresh frame for `leaf` on top of the stack.
    pub fn push(&mut self, leaf: H) {
        let idx = match self.free {
            NONE => {
                self.frames.push(Frame::new());
                (self.frames.len() - 1) as u32
            }
            idx => {
                self.free = self.frames[idx as usize].prev;
                self.frames[idx as usize].reset();
                idx
            }
        };
        let frame = &mut self.frames[idx as usize];
        frame.leaf = Some(leaf);
        frame.prev = self.top;
        self.top = idx;
    }

    /// Deactivate the top frame, recycling it and its context chain.
    /// Returns the frame's leaf handle.
    pub fn pop(&mut self) -> Option<H> {
        if self.top == NONE {
            return None;
        }
        let idx = self.top;
        while self.frames[idx as usize].context != NONE {
            self.close_context();
        }
        let frame = &mut self.frames[idx as usize];
        let leaf = frame.leaf.take();
        self.top = frame.prev;
        let frame = &mut self.frames[idx as usize];
        frame.prev = self.free;
        self.free = idx;
        leaf
    }

    /// Drop every active frame. Used for cancellation.
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    pub fn top(&self) -> &Frame<H> {
        &self.frames[self.top as usize]
    }

    pub fn top_mut(&mut self) -> &mut Frame<H> {
        &mut self.frames[self.top as usize]
    }

    /// True when the top frame is the pack root.
    pub fn top_is_root(&self) -> bool {
        self.frames[self.top as usize].prev == NONE
    }

    /// Clone of the top frame's leaf handle.
    pub fn top_leaf(&self) -> H {
        self.top().leaf.clone().expect("active frame without leaf")
    }

    /// Chain a fresh context onto the top frame.
    pub fn open_context(&mut self) {
        let idx = match self.ctx_free {
            NONE => {
                self.contexts.push(Context::new());
                (self.contexts.len() - 1) as u32
            }
            idx => {
                self.ctx_free = self.contexts[idx as usize].prev;
                self.contexts[idx as usize].reset();
                idx
            }
        };
        let top = self.top;
        self.contexts[idx as usize].prev = self.frames[top as usize].context;
        self.frames[top as usize].context = idx;
    }

    /// Recycle the top frame's newest context.
    pub fn close_context(&mut self) {
        let top = self.top;
        let idx = self.frames[top as usize].context;
        debug_assert_ne!(idx, NONE, "close_context without an open context");
        let ctx = &mut self.contexts[idx as usize];
        self.frames[top as usize].context = ctx.prev;
        // Reset now so parked handles/strings are released immediately.
        ctx.reset();
        ctx.prev = self.ctx_free;
        self.ctx_free = idx;
    }

    pub fn context(&self) -> &Context<H> {
        let idx = self.top().context;
        debug_assert_ne!(idx, NONE, "no open context on the top frame");
        &self.contexts[idx as usize]
    }

    pub fn context_mut(&mut self) -> &mut Context<H> {
        let idx = self.top().context;
        debug_assert_ne!(idx, NONE, "no open context on the top frame");
        &mut self.contexts[idx as usize]
    }
}

/// Which primitive is suspended mid-execution, i.e. how the next window
/// must be consumed or filled before the leaf is re-entered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Mode {
    /// Nothing pending; the leaf runs normally.
    Ok,
    /// Nothing to complete, just re-enter the leaf at its saved state.
    Retry,
    /// Fixed-width value partially transferred through the scratch area.
    Val,
    /// Like `Val`, but the completed value routes to `index_max`.
    Len,
    /// Like `Val`, but the completed value routes to `base_index_max`.
    BaseLen,
    /// String partially transferred.
    Str,
    /// Transmit side: bit-stream transaction rewound awaiting space; the
    /// reserved bits byte must be re-established in the next window.
    Bits,
    /// 32-bit LEB128 suspended; accumulator and shift are saved.
    Varint32,
    /// 64-bit LEB128 suspended.
    Varint64,
}

impl Mode {
    pub fn suspended(self) -> bool {
        self != Mode::Ok
    }
}
