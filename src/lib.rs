#![warn(missing_docs)]
/*! Resumable streaming codec for the AdHoc binary wire format.

This crate implements the runtime half of the AdHoc protocol: a pair of
coroutine-free state machines that serialize hierarchically nested packets
into a byte stream and reconstruct them at the receiver, plus the
bit-packed list primitives the generated packet code stores narrow fields
in.

Neither side ever owns the transport buffer. The caller hands the
[`Receiver`] an input window of whatever size the transport produced, and
hands the [`Transmitter`] an output window of whatever size the transport
can take; both consume as much as fits and suspend mid-primitive when the
window runs out. All resume state (activation frames, partial fixed-width
values, varint accumulators, bit cursors, partial strings) lives inside
the codec, so the next call picks up exactly where the last one stopped
and the produced bytes are identical to a single infinite-buffer run.

# Architecture overview

```text
   [ Transport byte pipe ]
            ↓ write(&[u8])
       [ Receiver ]  ── frame stack, resume state
            ↓ put_bytes(&mut Rx)
   [ Leaf codecs: BytesDst ]
            ↓ received()
        [ Consumer ]
```

and symmetrically on the transmit side with [`Transmitter`], `BytesSrc`
leaves and a `Producer` supplying packs to emit.

A *pack* is one top-level record, framed by a leading id of `id_bytes`
bytes. Each nesting level of a pack (a record, an array, a map) is one
*frame* on the codec's activation stack; the schema-specific leaf codec
attached to the frame drives the primitives ([`Rx`]/[`Tx`]) and stores an
opaque `state` label on the frame so it can be re-entered after a
suspension.

# Example

Feeding a receiver from chunks of arbitrary size:

```no_run
use adhoc_wire::Receiver;
# use std::{cell::RefCell, rc::Rc};
# use adhoc_wire::{Consumer, DstHandle, Rx};
# struct Sink;
# impl Consumer for Sink {
#     fn receiving(&mut self, _rx: &mut Rx<'_>, _id: u64) -> Option<DstHandle> { None }
#     fn received(&mut self, _rx: &mut Rx<'_>, _pack: DstHandle) {}
# }
let mut rx = Receiver::new(Rc::new(RefCell::new(Sink)), 1);
for chunk in [&[0x01u8, 0x05][..], &[0x48, 0x65, 0x6C, 0x6C, 0x6F, 0xFF][..]] {
    rx.write(chunk)?;
}
# Ok::<(), adhoc_wire::Error>(())
```

[`Rx`]: receiver::Rx
[`Tx`]: transmitter::Tx
 */

pub mod bits_list;
pub mod bits_null_list;
pub mod frame;
pub mod info;
pub mod pack;
pub mod receiver;
pub mod transmitter;
pub mod varint;

pub use bits_list::BitsList;
pub use bits_null_list::{BitsNullList, BoolNullList};
pub use frame::Datum;
pub use info::{MapInfo, SetInfo};
pub use pack::{ByteDst, ByteSrc, BytesDst, BytesSrc, Consumer, DstHandle, Producer, SrcHandle};
pub use receiver::{Receiver, Rx};
pub use transmitter::{Transmitter, Tx};

/// Codec error.
///
/// Only unrecoverable stream conditions surface here. An exhausted window
/// is not an error: primitives report it through their return value and
/// the codec suspends. When `write`/`read` does return an error, the
/// in-flight pack has already been discarded and the instance is back in
/// the idle state; it is up to the caller to re-synchronize or drop the
/// byte stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A string field failed UTF-8 validation. The stream is corrupt.
    #[error("invalid utf-8 in string field: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A varint carried a continuation bit past its maximum width.
    #[error("varint longer than {max} bytes")]
    VarintOverflow {
        /// Maximum encoded length for the decoded width.
        max: usize,
    },

    /// A leaf codec signalled completion in a state the frame stack
    /// cannot honor, e.g. end of pack with no pack in flight.
    #[error("unexpected end of pack")]
    UnexpectedPackEnd,
}

/// Result type commonly returned from functions in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
