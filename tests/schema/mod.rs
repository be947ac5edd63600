//! Hand-written demo schema used by the integration tests: one leaf
//! codec pair per pack type, a queue-backed producer and a catching
//! consumer, plus encode/decode drivers that run the codecs against
//! windows of arbitrary size.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use adhoc_wire::info::{opt_bool_bits, opt_bool_from_bits, MapInfo, SetInfo};
use adhoc_wire::transmitter::BITS_HEADROOM;
use adhoc_wire::varint::{len16, len32, unzigzag, zigzag};
use adhoc_wire::{
    BytesDst, BytesSrc, Consumer, Datum, DstHandle, Producer, Receiver, Result, Rx, SrcHandle,
    Transmitter, Tx,
};

// ----------------------------------------------------------------------
// Model
// ----------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Telemetry {
    pub a: u32,
    pub b: u64,
    pub c: i64,
    pub flag: bool,
    pub opt: Option<bool>,
    pub d: u16,
    pub e: u32,
    pub f: f64,
    pub text: String,
    pub arr: Vec<Option<u16>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pack {
    Msg {
        n: u8,
        text: String,
    },
    Telemetry(Telemetry),
    Nested {
        name: String,
        origin: Point,
        points: Vec<Point>,
    },
    Dict {
        /// `None`: no null key. `Some(None)`: null key with absent
        /// value. `Some(Some(v))`: null key mapping to `v`.
        null_key: Option<Option<u32>>,
        pairs: Vec<(u16, u32)>,
        null_value_keys: Vec<u16>,
    },
    Tags {
        has_null: bool,
        items: Vec<u16>,
    },
}

pub const MSG_ID: u64 = 1;
pub const TELEMETRY_ID: u64 = 2;
pub const NESTED_ID: u64 = 3;
pub const DICT_ID: u64 = 4;
pub const TAGS_ID: u64 = 5;

// ----------------------------------------------------------------------
// Msg: [n:1][text][0xFF]
// ----------------------------------------------------------------------

pub struct MsgSrc {
    n: u8,
    text: String,
}

impl BytesSrc for MsgSrc {
    fn id(&self) -> u64 {
        MSG_ID
    }

    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>> {
        loop {
            match tx.state() {
                0 => {
                    if !tx.put_val(self.n.into(), 1, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    if !tx.put_string(&self.text, 2) {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct MsgDst {
    pub n: u8,
    pub text: String,
}

impl BytesDst for MsgDst {
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>> {
        loop {
            match rx.state() {
                0 => {
                    if !rx.try_get_val(1, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    self.n = rx.get_u8();
                    if !rx.try_get_string(2)? {
                        return Ok(None);
                    }
                }
                2 => {
                    self.text = rx.take_string();
                    return Ok(None);
                }
                _ => return Ok(None),
            }
        }
    }
}

// ----------------------------------------------------------------------
// Telemetry: fixed ints, varints, zig-zag, a bit-stream transaction
// carrying bools and sized varints, a float, a string and a nullable
// array with interleaved presence bitmaps.
//
// Wire: [a:4][b varint][zigzag(c) varint]
//       [bits{flag:1, opt:2, nd-1:1}+d:nd+{ne-1:2}+e:ne]
//       [f:8][text][len:2][per 8 items: bitmap:1 + present values:2]
// ----------------------------------------------------------------------

pub struct TelemetrySrc {
    t: Telemetry,
}

impl BytesSrc for TelemetrySrc {
    fn id(&self) -> u64 {
        TELEMETRY_ID
    }

    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>> {
        let t = &self.t;
        loop {
            match tx.state() {
                0 => {
                    if !tx.put_val(t.a.into(), 4, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    if !tx.put_varint64(t.b, 2) {
                        return Ok(None);
                    }
                }
                2 => {
                    if !tx.put_varint64(zigzag(t.c), 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    // One transaction: the headroom check at entry
                    // guarantees none of the inner puts can suspend.
                    if !tx.init_bits(BITS_HEADROOM, 3) {
                        return Ok(None);
                    }
                    tx.put_bits(t.flag.into(), 1);
                    tx.put_bits(opt_bool_bits(t.opt), 2);
                    let nd = len16(t.d);
                    tx.put_bits(nd as u32 - 1, 1);
                    let ok = tx.put_val(t.d.into(), nd, 3);
                    debug_assert!(ok);
                    let ne = len32(t.e);
                    tx.put_bits(ne as u32 - 1, 2);
                    let ok = tx.put_val(t.e.into(), ne, 3);
                    debug_assert!(ok);
                    tx.end_bits();
                    tx.set_state(4);
                }
                4 => {
                    if !tx.put_f64(t.f, 5) {
                        return Ok(None);
                    }
                }
                5 => {
                    if !tx.put_string(&t.text, 6) {
                        return Ok(None);
                    }
                }
                6 => {
                    if !tx.put_val(t.arr.len() as u64, 2, 7) {
                        return Ok(None);
                    }
                }
                7 => {
                    // Group gate: emit the bitmap of the next 8 items.
                    let i = tx.index();
                    if i >= t.arr.len() {
                        tx.set_state(10);
                        continue;
                    }
                    let mut bitmap = 0u8;
                    for (k, item) in t.arr[i..t.arr.len().min(i + 8)].iter().enumerate() {
                        if item.is_some() {
                            bitmap |= 1 << k;
                        }
                    }
                    if !tx.put_val(bitmap.into(), 1, 8) {
                        return Ok(None);
                    }
                }
                8 => loop {
                    let i = tx.index();
                    let last_of_group = (i + 1) % 8 == 0 || i + 1 == t.arr.len();
                    let next = if last_of_group { 7 } else { 8 };
                    tx.set_index(i + 1);
                    if let Some(v) = t.arr[i] {
                        if !tx.put_val(v.into(), 2, next) {
                            return Ok(None);
                        }
                    } else {
                        tx.set_state(next);
                    }
                    if last_of_group {
                        break;
                    }
                },
                _ => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct TelemetryDst {
    pub a: u32,
    pub b: u64,
    pub c: i64,
    pub flag: bool,
    pub opt: Option<bool>,
    pub d: u16,
    pub e: u32,
    pub f: f64,
    pub text: String,
    pub arr: Vec<Option<u16>>,
}

impl BytesDst for TelemetryDst {
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>> {
        loop {
            match rx.state() {
                0 => {
                    if !rx.try_get_val(4, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    self.a = rx.get_u32();
                    if !rx.try_get_varint64(2)? {
                        return Ok(None);
                    }
                }
                2 => {
                    self.b = rx.varint64();
                    if !rx.try_get_varint64(3)? {
                        return Ok(None);
                    }
                }
                3 => {
                    self.c = unzigzag(rx.varint64());
                    rx.init_bits();
                    rx.set_state(4);
                }
                4 => {
                    let Some(v) = rx.try_get_bits(1, 4) else {
                        return Ok(None);
                    };
                    self.flag = v != 0;
                    rx.set_state(5);
                }
                5 => {
                    let Some(v) = rx.try_get_bits(2, 5) else {
                        return Ok(None);
                    };
                    self.opt = opt_bool_from_bits(v);
                    rx.set_state(6);
                }
                6 => {
                    let Some(v) = rx.try_get_bits(1, 6) else {
                        return Ok(None);
                    };
                    if !rx.try_get_val(v as usize + 1, 7) {
                        return Ok(None);
                    }
                }
                7 => {
                    self.d = rx.get_u16();
                    let Some(v) = rx.try_get_bits(2, 7) else {
                        return Ok(None);
                    };
                    if !rx.try_get_val(v as usize + 1, 8) {
                        return Ok(None);
                    }
                }
                8 => {
                    self.e = rx.get_u32();
                    if !rx.try_get_val(8, 9) {
                        return Ok(None);
                    }
                }
                9 => {
                    self.f = rx.get_f64();
                    if !rx.try_get_string(10)? {
                        return Ok(None);
                    }
                }
                10 => {
                    self.text = rx.take_string();
                    if !rx.try_get_len(2, 11) {
                        return Ok(None);
                    }
                }
                11 => {
                    if self.arr.len() != rx.index_max() {
                        self.arr = vec![None; rx.index_max()];
                    }
                    match rx.try_get_nulls(11) {
                        None => return Ok(None),
                        Some(false) => rx.set_state(13),
                        Some(true) => {
                            if !rx.try_get_val(2, 12) {
                                return Ok(None);
                            }
                        }
                    }
                }
                12 => {
                    let i = rx.index();
                    self.arr[i] = Some(rx.get_u16());
                    rx.set_index(i + 1);
                    rx.set_state(11);
                }
                _ => return Ok(None),
            }
        }
    }
}

// ----------------------------------------------------------------------
// Nested: a string, one mandatory child record and a counted list of
// child records, each decoded in its own frame.
//
// Wire: [name][0xFF][origin: Point][count:1][points: Point * count]
// Point: [x:4][y varint]
// ----------------------------------------------------------------------

pub struct PointSrc {
    p: Point,
}

impl BytesSrc for PointSrc {
    fn id(&self) -> u64 {
        0 // children never emit an id
    }

    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>> {
        loop {
            match tx.state() {
                0 => {
                    if !tx.put_val(self.p.x.into(), 4, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    if !tx.put_varint32(self.p.y, 2) {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct PointDst {
    pub x: u32,
    pub y: u32,
}

impl BytesDst for PointDst {
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>> {
        loop {
            match rx.state() {
                0 => {
                    if !rx.try_get_val(4, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    self.x = rx.get_u32();
                    if !rx.try_get_varint32(2)? {
                        return Ok(None);
                    }
                }
                2 => {
                    self.y = rx.varint32();
                    return Ok(None);
                }
                _ => return Ok(None),
            }
        }
    }
}

pub struct NestedSrc {
    name: String,
    origin: Rc<RefCell<PointSrc>>,
    points: Vec<Rc<RefCell<PointSrc>>>,
}

impl BytesSrc for NestedSrc {
    fn id(&self) -> u64 {
        NESTED_ID
    }

    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>> {
        loop {
            match tx.state() {
                0 => {
                    if !tx.put_string(&self.name, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    tx.set_state(2);
                    return Ok(Some(self.origin.clone()));
                }
                2 => {
                    if !tx.put_val(self.points.len() as u64, 1, 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    let i = tx.index();
                    if i >= self.points.len() {
                        tx.set_state(4);
                        continue;
                    }
                    tx.set_index(i + 1);
                    return Ok(Some(self.points[i].clone()));
                }
                _ => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct NestedDst {
    pub name: String,
    pub origin: Rc<RefCell<PointDst>>,
    pub points: Vec<Rc<RefCell<PointDst>>>,
}

impl BytesDst for NestedDst {
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>> {
        loop {
            match rx.state() {
                0 => {
                    if !rx.try_get_string(1)? {
                        return Ok(None);
                    }
                }
                1 => {
                    self.name = rx.take_string();
                    rx.set_state(2);
                    return Ok(Some(self.origin.clone()));
                }
                2 => {
                    if !rx.try_get_len(1, 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    let i = rx.index();
                    if i >= rx.index_max() {
                        return Ok(None);
                    }
                    let child = Rc::new(RefCell::new(PointDst::default()));
                    self.points.push(child.clone());
                    rx.set_index(i + 1);
                    return Ok(Some(child));
                }
                _ => return Ok(None),
            }
        }
    }
}

// ----------------------------------------------------------------------
// Dict: map framing with an info byte, two length prefixes, an
// optional null-key value, the present pairs and the absent-value keys
// walked with the secondary cursor.
//
// Wire: [info][pairs count: info.items_bytes]
//       [absent-value count: info.null_values_bytes]
//       [null-key value:4, if flagged][key:2 value:4 * pairs]
//       [key:2 * absent-value keys]
// ----------------------------------------------------------------------

pub struct DictSrc {
    null_key: Option<Option<u32>>,
    pairs: Vec<(u16, u32)>,
    null_value_keys: Vec<u16>,
}

impl DictSrc {
    fn info(&self) -> MapInfo {
        let items_bytes = if self.pairs.is_empty() {
            0
        } else {
            len32(self.pairs.len() as u32)
        };
        let nv_bytes = if self.null_value_keys.is_empty() {
            0
        } else {
            len32(self.null_value_keys.len() as u32)
        };
        MapInfo::new(
            self.null_key.is_some(),
            matches!(self.null_key, Some(Some(_))),
            nv_bytes,
            items_bytes,
        )
    }
}

impl BytesSrc for DictSrc {
    fn id(&self) -> u64 {
        DICT_ID
    }

    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>> {
        loop {
            match tx.state() {
                0 => {
                    if !tx.put_val(self.info().byte().into(), 1, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    let bytes = self.info().items_bytes();
                    if bytes == 0 {
                        tx.set_state(2);
                    } else if !tx.put_val(self.pairs.len() as u64, bytes, 2) {
                        return Ok(None);
                    }
                }
                2 => {
                    let bytes = self.info().null_values_bytes();
                    if bytes == 0 {
                        tx.set_state(3);
                    } else if !tx.put_val(self.null_value_keys.len() as u64, bytes, 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    if let Some(Some(v)) = self.null_key {
                        if !tx.put_val(v.into(), 4, 4) {
                            return Ok(None);
                        }
                    } else {
                        tx.set_state(4);
                    }
                }
                4 => {
                    let i = tx.index();
                    if i >= self.pairs.len() {
                        tx.set_state(7);
                        continue;
                    }
                    if !tx.put_val(self.pairs[i].0.into(), 2, 5) {
                        return Ok(None);
                    }
                }
                5 => {
                    let i = tx.index();
                    if !tx.put_val(self.pairs[i].1.into(), 4, 6) {
                        return Ok(None);
                    }
                }
                6 => {
                    tx.set_index(tx.index() + 1);
                    tx.set_state(4);
                }
                7 => {
                    let j = tx.base_index();
                    if j >= self.null_value_keys.len() {
                        tx.set_state(9);
                        continue;
                    }
                    if !tx.put_val(self.null_value_keys[j].into(), 2, 8) {
                        return Ok(None);
                    }
                }
                8 => {
                    tx.set_base_index(tx.base_index() + 1);
                    tx.set_state(7);
                }
                _ => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct DictDst {
    pub null_key: Option<Option<u32>>,
    pub pairs: Vec<(u16, u32)>,
    pub null_value_keys: Vec<u16>,
}

impl BytesDst for DictDst {
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>> {
        loop {
            match rx.state() {
                0 => {
                    if !rx.try_get_val(1, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    // Park the info byte in a context for the rest of
                    // the framing flow.
                    let info_byte = rx.get_u8();
                    rx.open_context();
                    rx.context_mut().info = info_byte;
                    let info = MapInfo::from_byte(info_byte);
                    if !rx.try_get_len(info.items_bytes(), 2) {
                        return Ok(None);
                    }
                }
                2 => {
                    let info = MapInfo::from_byte(rx.context().info);
                    if !rx.try_get_base_len(info.null_values_bytes(), 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    let info = MapInfo::from_byte(rx.context().info);
                    if info.null_key_has_value() {
                        if !rx.try_get_val(4, 4) {
                            return Ok(None);
                        }
                    } else {
                        self.null_key = if info.has_null_key() { Some(None) } else { None };
                        rx.set_state(5);
                    }
                }
                4 => {
                    self.null_key = Some(Some(rx.get_u32()));
                    rx.set_state(5);
                }
                5 => {
                    if rx.index() >= rx.index_max() {
                        rx.set_state(8);
                        continue;
                    }
                    if !rx.try_get_val(2, 6) {
                        return Ok(None);
                    }
                }
                6 => {
                    let key = rx.get_u64();
                    rx.context_mut().key = Datum::U64(key);
                    if !rx.try_get_val(4, 7) {
                        return Ok(None);
                    }
                }
                7 => {
                    let key = match &rx.context().key {
                        Datum::U64(k) => *k,
                        _ => unreachable!("key parked at state 6"),
                    };
                    let value = rx.get_u32();
                    self.pairs.push((key as u16, value));
                    rx.set_index(rx.index() + 1);
                    rx.set_state(5);
                }
                8 => {
                    if rx.base_index() >= rx.base_index_max() {
                        rx.set_state(10);
                        continue;
                    }
                    if !rx.try_get_val(2, 9) {
                        return Ok(None);
                    }
                }
                9 => {
                    self.null_value_keys.push(rx.get_u16());
                    rx.set_base_index(rx.base_index() + 1);
                    rx.set_state(8);
                }
                10 => {
                    rx.close_context();
                    return Ok(None);
                }
                _ => return Ok(None),
            }
        }
    }
}

// ----------------------------------------------------------------------
// Tags: set framing.
//
// Wire: [info][count: info.items_bytes][item:2 * count]
// ----------------------------------------------------------------------

pub struct TagsSrc {
    has_null: bool,
    items: Vec<u16>,
}

impl TagsSrc {
    fn info(&self) -> SetInfo {
        let items_bytes = if self.items.is_empty() {
            0
        } else {
            len32(self.items.len() as u32)
        };
        SetInfo::new(self.has_null, items_bytes)
    }
}

impl BytesSrc for TagsSrc {
    fn id(&self) -> u64 {
        TAGS_ID
    }

    fn get_bytes(&mut self, tx: &mut Tx<'_>) -> Result<Option<SrcHandle>> {
        loop {
            match tx.state() {
                0 => {
                    if !tx.put_val(self.info().byte().into(), 1, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    let bytes = self.info().items_bytes();
                    if bytes == 0 {
                        tx.set_state(2);
                    } else if !tx.put_val(self.items.len() as u64, bytes, 2) {
                        return Ok(None);
                    }
                }
                2 => {
                    let i = tx.index();
                    if i >= self.items.len() {
                        tx.set_state(4);
                        continue;
                    }
                    if !tx.put_val(self.items[i].into(), 2, 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    tx.set_index(tx.index() + 1);
                    tx.set_state(2);
                }
                _ => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct TagsDst {
    pub has_null: bool,
    pub items: Vec<u16>,
}

impl BytesDst for TagsDst {
    fn put_bytes(&mut self, rx: &mut Rx<'_>) -> Result<Option<DstHandle>> {
        loop {
            match rx.state() {
                0 => {
                    if !rx.try_get_val(1, 1) {
                        return Ok(None);
                    }
                }
                1 => {
                    let info = SetInfo::from_byte(rx.get_u8());
                    self.has_null = info.has_null_key();
                    if !rx.try_get_len(info.items_bytes(), 2) {
                        return Ok(None);
                    }
                }
                2 => {
                    if rx.index() >= rx.index_max() {
                        return Ok(None);
                    }
                    if !rx.try_get_val(2, 3) {
                        return Ok(None);
                    }
                }
                3 => {
                    self.items.push(rx.get_u16());
                    rx.set_index(rx.index() + 1);
                    rx.set_state(2);
                }
                _ => return Ok(None),
            }
        }
    }
}

// ----------------------------------------------------------------------
// Producer / Consumer harness
// ----------------------------------------------------------------------

pub fn src_of(pack: &Pack) -> SrcHandle {
    match pack.clone() {
        Pack::Msg { n, text } => Rc::new(RefCell::new(MsgSrc { n, text })),
        Pack::Telemetry(t) => Rc::new(RefCell::new(TelemetrySrc { t })),
        Pack::Nested {
            name,
            origin,
            points,
        } => Rc::new(RefCell::new(NestedSrc {
            name,
            origin: Rc::new(RefCell::new(PointSrc { p: origin })),
            points: points
                .into_iter()
                .map(|p| Rc::new(RefCell::new(PointSrc { p })))
                .collect(),
        })),
        Pack::Dict {
            null_key,
            pairs,
            null_value_keys,
        } => Rc::new(RefCell::new(DictSrc {
            null_key,
            pairs,
            null_value_keys,
        })),
        Pack::Tags { has_null, items } => Rc::new(RefCell::new(TagsSrc { has_null, items })),
    }
}

#[derive(Default)]
pub struct QueueProducer {
    pub pending: VecDeque<SrcHandle>,
    pub sent: usize,
}

impl Producer for QueueProducer {
    fn sending(&mut self, _tx: &mut Tx<'_>) -> Option<SrcHandle> {
        self.pending.pop_front()
    }

    fn sent(&mut self, _tx: &mut Tx<'_>, _pack: SrcHandle) {
        self.sent += 1;
    }
}

pub enum Got {
    Msg(Rc<RefCell<MsgDst>>),
    Telemetry(Rc<RefCell<TelemetryDst>>),
    Nested(Rc<RefCell<NestedDst>>),
    Dict(Rc<RefCell<DictDst>>),
    Tags(Rc<RefCell<TagsDst>>),
}

#[derive(Default)]
pub struct Catcher {
    live: Option<Got>,
    pub done: Vec<Got>,
    pub deliveries: usize,
}

impl Consumer for Catcher {
    fn receiving(&mut self, _rx: &mut Rx<'_>, id: u64) -> Option<DstHandle> {
        let (got, handle): (Got, DstHandle) = match id {
            MSG_ID => {
                let p = Rc::new(RefCell::new(MsgDst::default()));
                let h: DstHandle = p.clone();
                (Got::Msg(p), h)
            }
            TELEMETRY_ID => {
                let p = Rc::new(RefCell::new(TelemetryDst::default()));
                let h: DstHandle = p.clone();
                (Got::Telemetry(p), h)
            }
            NESTED_ID => {
                let p = Rc::new(RefCell::new(NestedDst::default()));
                let h: DstHandle = p.clone();
                (Got::Nested(p), h)
            }
            DICT_ID => {
                let p = Rc::new(RefCell::new(DictDst::default()));
                let h: DstHandle = p.clone();
                (Got::Dict(p), h)
            }
            TAGS_ID => {
                let p = Rc::new(RefCell::new(TagsDst::default()));
                let h: DstHandle = p.clone();
                (Got::Tags(p), h)
            }
            _ => return None,
        };
        self.live = Some(got);
        Some(handle)
    }

    fn received(&mut self, _rx: &mut Rx<'_>, _pack: DstHandle) {
        self.deliveries += 1;
        self.done
            .push(self.live.take().expect("received without receiving"));
    }
}

pub fn got_to_pack(got: &Got) -> Pack {
    fn point(p: &Rc<RefCell<PointDst>>) -> Point {
        let p = p.borrow();
        Point { x: p.x, y: p.y }
    }
    match got {
        Got::Msg(p) => {
            let p = p.borrow();
            Pack::Msg {
                n: p.n,
                text: p.text.clone(),
            }
        }
        Got::Telemetry(p) => {
            let p = p.borrow();
            Pack::Telemetry(Telemetry {
                a: p.a,
                b: p.b,
                c: p.c,
                flag: p.flag,
                opt: p.opt,
                d: p.d,
                e: p.e,
                f: p.f,
                text: p.text.clone(),
                arr: p.arr.clone(),
            })
        }
        Got::Nested(p) => {
            let p = p.borrow();
            Pack::Nested {
                name: p.name.clone(),
                origin: point(&p.origin),
                points: p.points.iter().map(point).collect(),
            }
        }
        Got::Dict(p) => {
            let p = p.borrow();
            Pack::Dict {
                null_key: p.null_key,
                pairs: p.pairs.clone(),
                null_value_keys: p.null_value_keys.clone(),
            }
        }
        Got::Tags(p) => {
            let p = p.borrow();
            Pack::Tags {
                has_null: p.has_null,
                items: p.items.clone(),
            }
        }
    }
}

// ----------------------------------------------------------------------
// Drivers
// ----------------------------------------------------------------------

/// Encode `packs` into one byte stream, pulling output windows of
/// `window` bytes at a time.
pub fn encode(packs: &[Pack], window: usize) -> Vec<u8> {
    let producer = Rc::new(RefCell::new(QueueProducer {
        pending: packs.iter().map(src_of).collect(),
        sent: 0,
    }));
    let mut tx = Transmitter::new(producer.clone(), 1);
    let mut out = Vec::new();
    loop {
        let mut buf = vec![0u8; window];
        let n = tx.read(&mut buf).expect("encode");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(
        producer.borrow().sent,
        packs.len(),
        "encoder stalled with a {window}-byte window"
    );
    out
}

/// Decode `bytes`, feeding input chunks whose sizes follow the `sizes`
/// pattern (cycled; the whole slice at once when empty).
pub fn decode(bytes: &[u8], sizes: &[usize]) -> Vec<Pack> {
    decode_counting(bytes, sizes).0
}

pub fn decode_counting(bytes: &[u8], sizes: &[usize]) -> (Vec<Pack>, usize) {
    let consumer = Rc::new(RefCell::new(Catcher::default()));
    let mut rx = Receiver::new(consumer.clone(), 1);
    let mut fed = 0;
    let mut pattern = sizes.iter().copied().cycle();
    while fed < bytes.len() {
        let want = if sizes.is_empty() {
            bytes.len()
        } else {
            pattern.next().unwrap().max(1)
        };
        let step = want.min(bytes.len() - fed);
        let n = rx.write(&bytes[fed..fed + step]).expect("decode");
        assert_eq!(n, step, "receiver left bytes unconsumed");
        fed += step;
    }
    let catcher = consumer.borrow();
    (
        catcher.done.iter().map(got_to_pack).collect(),
        catcher.deliveries,
    )
}

/// A pack of every type, with values that exercise the width buckets.
pub fn sample_packs() -> Vec<Pack> {
    vec![
        Pack::Msg {
            n: 5,
            text: "Hello".into(),
        },
        Pack::Telemetry(Telemetry {
            a: 0xDEAD_BEEF,
            b: 16384,
            c: -300,
            flag: true,
            opt: Some(false),
            d: 0x1234,
            e: 0xAB_CDEF,
            f: -2.5,
            text: "héllo wörld".into(),
            arr: vec![
                Some(7),
                None,
                None,
                Some(0xFFFF),
                None,
                None,
                None,
                None,
                // second group, all absent
                None,
                None,
                None,
                None,
                None,
                None,
                None,
                None,
                // third, partial
                Some(1),
                None,
                Some(2),
            ],
        }),
        Pack::Nested {
            name: "route".into(),
            origin: Point { x: 1, y: 2 },
            points: vec![
                Point { x: 10, y: 300 },
                Point {
                    x: 0xFFFF_FFFF,
                    y: 0,
                },
                Point { x: 0, y: 127 },
            ],
        },
        Pack::Dict {
            null_key: Some(Some(42)),
            pairs: vec![(1, 100), (2, 0xFFFF_FFFF), (300, 3)],
            null_value_keys: vec![7, 8],
        },
        Pack::Tags {
            has_null: true,
            items: vec![0x0107, 0x0209, 0xFFFF],
        },
    ]
}
