//! Wire layout and device round trip over generated records

use proptest::array::{uniform2, uniform3};
use proptest::collection::vec;
use proptest::prelude::*;
use setu::devices::{DecodedMapping, DecodedWeight, DeviceSimulator};
use setu::protocol::{
    Convolution, KernelInfo, Linear, MappingRecord, Scalar, Terminator, WeightRecord,
    encode_mapping, encode_mapping_batch, encode_weight_block,
};
use setu::transport::Transport;

fn scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        any::<i64>().prop_map(Scalar::from),
        // Device bitmasks wider than 64 bits
        any::<u128>().prop_map(|v| v.to_string().parse::<Scalar>().unwrap()),
        (-1.0e9_f64..1.0e9).prop_map(|v| Scalar::from_f64(v).unwrap()),
    ]
}

fn end_positions() -> impl Strategy<Value = Vec<Vec<Scalar>>> {
    prop_oneof![
        Just(Vec::new()),
        (1_usize..4, 1_usize..4).prop_flat_map(|(n, arity)| vec(vec(scalar(), arity), n)),
    ]
}

fn mapping_record() -> impl Strategy<Value = MappingRecord> {
    (0_usize..4)
        .prop_flat_map(|phases| {
            (
                vec(scalar(), phases),
                vec(vec(scalar(), 0..4), phases),
                vec(vec(scalar(), 0..4), phases),
                end_positions(),
                vec(scalar(), 0..3),
                vec(scalar(), 0..3),
            )
        })
        .prop_map(
            |(count, map, padding_pos, end_pos, zero_point, scale)| MappingRecord {
                count,
                map,
                padding_pos,
                end_pos,
                zero_point,
                scale,
            },
        )
}

fn kernel_info() -> impl Strategy<Value = KernelInfo> {
    prop_oneof![
        (
            scalar(),
            scalar(),
            uniform2(scalar()),
            uniform2(scalar()),
            uniform3(scalar()),
            uniform3(scalar()),
        )
            .prop_map(
                |(out_per_group, in_per_group, stride, kernel, in_shape, out_shape)| {
                    KernelInfo::Convolution(Convolution {
                        out_per_group,
                        in_per_group,
                        stride,
                        kernel,
                        in_shape,
                        out_shape,
                    })
                }
            ),
        (scalar(), scalar(), scalar(), scalar()).prop_map(
            |(batch_in, channels_in, batch_out, channels_out)| {
                KernelInfo::Linear(Linear {
                    batch_in,
                    channels_in,
                    batch_out,
                    channels_out,
                })
            }
        ),
    ]
}

fn weight_record() -> impl Strategy<Value = WeightRecord> {
    (
        vec(scalar(), 0..6),
        scalar(),
        scalar(),
        scalar(),
        proptest::option::of(uniform3(scalar())),
        kernel_info(),
        uniform3(scalar()),
        scalar(),
        scalar(),
    )
        .prop_map(
            |(data, bias, which_kernel, count, start_pos_in, info, zero_points, m, s_out)| {
                WeightRecord {
                    data,
                    bias,
                    which_kernel,
                    count,
                    start_pos_in,
                    info,
                    zero_points,
                    m,
                    s_out,
                }
            },
        )
}

fn joined(values: &[Scalar]) -> String {
    values
        .iter()
        .map(Scalar::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

proptest! {
    /// `end_pos` is `0` when empty, otherwise one run of values closed by a single terminator.
    #[test]
    fn prop_end_pos_field_layout(record in mapping_record()) {
        let mut out = Vec::new();
        encode_mapping(&record, &mut out);
        let text = String::from_utf8(out).unwrap();
        let fields: Vec<&str> = text.split('!').collect();

        // phase count, then count, map and padding_pos entries per phase
        let end = 1 + 3 * record.phases();
        if record.end_pos.is_empty() {
            prop_assert_eq!(fields[end], "0");
        } else {
            let tuples: String = record
                .end_pos
                .iter()
                .map(|t| format!("{} ", joined(t)))
                .collect();
            prop_assert_eq!(fields[end], format!("{} {}", record.end_pos.len(), tuples));
        }
        prop_assert_eq!(fields[end + 1], format!("{} ", joined(&record.zero_point)));
        prop_assert_eq!(fields[end + 2], format!("{} ", joined(&record.scale)));
        prop_assert_eq!(fields.len(), end + 4);
    }

    /// An absent start position is an empty field; a present one is three values.
    #[test]
    fn prop_start_position_field(record in weight_record()) {
        let text = String::from_utf8(encode_weight_block(&record)).unwrap();
        let fields: Vec<&str> = text.split('!').collect();

        prop_assert_eq!(fields.len(), 8);
        match &record.start_pos_in {
            None => {
                prop_assert_eq!(fields[4], "");
            }
            Some(start) => {
                prop_assert_eq!(fields[4], joined(start));
            }
        }
        prop_assert!(fields[5].starts_with(record.info.tag() as char));
    }

    /// Every generated mapping passes input validation and decodes back on the device.
    #[test]
    fn prop_mapping_round_trip(records in vec(mapping_record(), 0..4)) {
        for record in &records {
            let json = serde_json::to_string(record).unwrap();
            let parsed: MappingRecord = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(&parsed, record);
        }

        let mut sim = DeviceSimulator::silent();
        sim.write(b"c").unwrap();
        for record in &records {
            sim.write(&encode_mapping_batch(record)).unwrap();
        }
        sim.write(&Terminator::Stream.packet()).unwrap();

        prop_assert!(sim.errors().is_empty(), "device errors: {:?}", sim.errors());
        let expected: Vec<DecodedMapping> = records.iter().map(DecodedMapping::from).collect();
        prop_assert_eq!(sim.mappings(), expected);
        prop_assert_eq!(sim.completed_streams(), 1);
    }

    /// Weight blocks grouped in layer-lines decode back line by line.
    #[test]
    fn prop_weight_round_trip(lines in vec(vec(weight_record(), 1..4), 0..3)) {
        let mut sim = DeviceSimulator::silent();
        sim.write(b"s").unwrap();
        for line in &lines {
            for record in line {
                sim.write(&encode_weight_block(record)).unwrap();
            }
            sim.write(&Terminator::Line.packet()).unwrap();
        }
        sim.write(&Terminator::Stream.packet()).unwrap();

        prop_assert!(sim.errors().is_empty(), "device errors: {:?}", sim.errors());
        let expected: Vec<Vec<DecodedWeight>> = lines
            .iter()
            .map(|line| line.iter().map(DecodedWeight::from).collect())
            .collect();
        prop_assert_eq!(sim.weight_lines(), expected);
        prop_assert_eq!(sim.completed_streams(), 1);
    }
}
