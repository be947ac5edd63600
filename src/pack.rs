/*! Callback contracts between the codec, the application and its packs.

A pack is encoded/decoded by schema-specific *leaf codecs*: one
[`BytesSrc`]/[`BytesDst`] implementation per nesting level, typically
produced by a code generator. The codec never interprets a pack itself;
it drives the leaves and gives them the primitive surface
([`crate::Rx`]/[`crate::Tx`]) to pull bytes from or push bytes into.

[`Producer`] and [`Consumer`] sit one level up: they decide *which* packs
flow, and take delivery of completed ones.
 */

use std::cell::RefCell;
use std::rc::Rc;

use crate::receiver::Rx;
use crate::transmitter::Tx;
use crate::Result;

/// Shared handle to a decode-side leaf codec.
///
/// Handles are single-threaded by design: a codec instance is one
/// cooperative actor, and concurrent use means one instance per thread.
pub type DstHandle = Rc<RefCell<dyn BytesDst>>;

/// Shared handle to an encode-side leaf codec.
pub type SrcHandle = Rc<RefCell<dyn BytesSrc>>;

/// Decode side of one nesting level of a pack.
pub trait BytesDst {
    /// Consume bytes for this level from the receiver.
    ///
    /// Returns `Ok(Some(child))` to descend into a nested record:
    /// the receiver pushes a frame and drives the child until it
    /// completes, then re-enters this leaf at its saved state. Returns
    /// `Ok(None)` when this level is complete, or to suspend after a
    /// `try_*` primitive came up short; the receiver tells the two
    /// apart by its resume mode.
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>>;
}

/// Encode side of one nesting level of a pack.
pub trait BytesSrc {
    /// Pack id, emitted by the transmitter ahead of the root level.
    /// Ignored for nested levels.
    fn id(&self) -> u64;

    /// Produce bytes for this level into the transmitter.
    ///
    /// The return contract mirrors [`BytesDst::put_bytes`]: a child
    /// handle to descend, or `None` for "complete or suspended".
    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>>;
}

/// Supplies the transmit side with packs to emit.
pub trait Producer {
    /// The next pack to emit, or `None` when nothing is pending.
    fn sending(&mut self, tx: &mut Tx<'_>) -> Option<SrcHandle>;

    /// Acknowledge that `pack` has been fully emitted.
    fn sent(&mut self, tx: &mut Tx<'_>, pack: SrcHandle);

    /// Register a waker the producer invokes when new packs become
    /// available, so an idle transport can resume pumping. The waker may
    /// fire on whichever thread hands the producer its data.
    fn subscribe(&mut self, waker: Box<dyn FnMut() + Send>) {
        let _ = waker;
    }
}

/// Takes delivery on the receive side.
pub trait Consumer {
    /// Allocate a decoder for a pack of type `id`, or `None` when the id
    /// is unknown (the receiver logs and returns to idle).
    fn receiving(&mut self, rx: &mut Rx<'_>, id: u64) -> Option<DstHandle>;

    /// Deliver a completed pack.
    fn received(&mut self, rx: &mut Rx<'_>, pack: DstHandle);
}

/// Transport-facing pull surface, implemented by
/// [`crate::Transmitter`]. Transports treat it as a plain byte source.
pub trait ByteSrc {
    /// Fill `buf` with encoded bytes. `Ok(0)` means nothing pending; a
    /// zero-length `buf` returns `Ok(0)` without side effects.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Abort the pack in flight and release all resources.
    fn close(&mut self);

    /// True while a pack is partially emitted.
    fn is_open(&self) -> bool;
}

/// Transport-facing push surface, implemented by [`crate::Receiver`].
pub trait ByteDst {
    /// Feed received bytes. Returns the count consumed; a zero-length
    /// `buf` returns `Ok(0)` without side effects.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Abort the pack in flight and release all resources.
    fn close(&mut self);

    /// True while a pack is partially decoded.
    fn is_open(&self) -> bool;
}
