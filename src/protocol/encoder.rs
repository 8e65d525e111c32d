//! Record encoder: structured records to delimited ASCII fields
//!
//! Pure functions, no I/O. Byte layout follows what the download firmware
//! parses, including its quirks: `map`, `padding_pos`, `zero_point` and
//! `scale` fields carry one space before their terminator, and a non-empty
//! `end_pos` field is a single run of values closed by one `!`.
//!
//! # Coordinator record
//!
//! ```text
//! <phases>!  <count>!*  <map…> !*  <len> <padding…> !*  <end_pos>  <zp…> !  <scale…> !
//! end_pos := "0!" | "<n> " ("<tuple…> ")* "!"
//! ```
//!
//! # Worker block
//!
//! ```text
//! <len> <data…>!  <bias>!  <which_kernel>!  <count>!  [<x> <y> <z>]!
//! C <o_pg> <i_pg> <s0> <s1> <k0> <k1> <i0> <i1> <i2> <o0> <o1> <o2>!  |  L <b_in> <c_in> <b_out> <c_out>!
//! <zp0> <zp1> <zp2> <m> <s_out>!
//! ```

use super::Terminator;
use super::constants::VALUE_SEPARATOR;
use super::records::{KernelInfo, MappingRecord, Scalar, WeightRecord};
use std::fmt::Display;
use std::io::Write;

/// Append-only field writer over a byte buffer
struct FieldWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FieldWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Write one value
    fn value(&mut self, value: impl Display) -> &mut Self {
        // Writing into a Vec<u8> cannot fail
        let _ = write!(self.buf, "{}", value);
        self
    }

    /// Write values separated by single spaces
    fn values<'v>(&mut self, values: impl IntoIterator<Item = &'v Scalar>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.space();
            }
            self.value(value);
        }
        self
    }

    fn space(&mut self) -> &mut Self {
        self.buf.push(VALUE_SEPARATOR);
        self
    }

    fn tag(&mut self, tag: u8) -> &mut Self {
        self.buf.push(tag);
        self
    }

    fn end(&mut self, terminator: Terminator) -> &mut Self {
        self.buf.push(terminator.byte());
        self
    }
}

/// Append the fields of one mapping record
///
/// The batch terminator is not included; see [`encode_mapping_batch`].
pub fn encode_mapping(record: &MappingRecord, out: &mut Vec<u8>) {
    let mut w = FieldWriter::new(out);

    w.value(record.phases()).end(Terminator::Field);

    for count in &record.count {
        w.value(count).end(Terminator::Field);
    }

    for targets in &record.map {
        w.values(targets).space().end(Terminator::Field);
    }

    for padding in &record.padding_pos {
        w.value(padding.len())
            .space()
            .values(padding)
            .space()
            .end(Terminator::Field);
    }

    if record.end_pos.is_empty() {
        w.value(0).end(Terminator::Field);
    } else {
        w.value(record.end_pos.len()).space();
        for position in &record.end_pos {
            w.values(position).space();
        }
        w.end(Terminator::Field);
    }

    w.values(&record.zero_point).space().end(Terminator::Field);
    w.values(&record.scale).space().end(Terminator::Field);
}

/// Encode one mapping record followed by its batch terminator
pub fn encode_mapping_batch(record: &MappingRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(mapping_size_hint(record));
    encode_mapping(record, &mut out);
    out.push(Terminator::Batch.byte());
    out
}

/// Append the fields of one weight block
pub fn encode_weight(record: &WeightRecord, out: &mut Vec<u8>) {
    let mut w = FieldWriter::new(out);

    w.value(record.data.len())
        .space()
        .values(&record.data)
        .end(Terminator::Field);
    w.value(&record.bias).end(Terminator::Field);
    w.value(&record.which_kernel).end(Terminator::Field);
    w.value(&record.count).end(Terminator::Field);

    if let Some(start) = &record.start_pos_in {
        w.values(start);
    }
    w.end(Terminator::Field);

    w.tag(record.info.tag()).space();
    match &record.info {
        KernelInfo::Convolution(conv) => {
            w.value(&conv.out_per_group)
                .space()
                .value(&conv.in_per_group)
                .space()
                .values(&conv.stride)
                .space()
                .values(&conv.kernel)
                .space()
                .values(&conv.in_shape)
                .space()
                .values(&conv.out_shape);
        }
        KernelInfo::Linear(linear) => {
            w.value(&linear.batch_in)
                .space()
                .value(&linear.channels_in)
                .space()
                .value(&linear.batch_out)
                .space()
                .value(&linear.channels_out);
        }
    }
    w.end(Terminator::Field);

    w.values(&record.zero_points)
        .space()
        .value(&record.m)
        .space()
        .value(&record.s_out)
        .end(Terminator::Field);
}

/// Encode one weight block as a standalone packet
pub fn encode_weight_block(record: &WeightRecord) -> Vec<u8> {
    // Roughly five bytes per quantized value plus the fixed fields
    let mut out = Vec::with_capacity(record.data.len() * 5 + 96);
    encode_weight(record, &mut out);
    out
}

fn mapping_size_hint(record: &MappingRecord) -> usize {
    let values: usize = record.count.len()
        + record.map.iter().map(Vec::len).sum::<usize>()
        + record.padding_pos.iter().map(Vec::len).sum::<usize>()
        + record.end_pos.iter().map(Vec::len).sum::<usize>()
        + record.zero_point.len()
        + record.scale.len();
    values * 6 + 16
}
