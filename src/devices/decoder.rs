//! Device-side stream decoders
//!
//! Incremental parsers that consume one `!`-terminated field at a time, the
//! way the download firmware walks the stream. Values are kept as the tokens
//! that were received; comparing them with [`DecodedMapping::from`] /
//! [`DecodedWeight::from`] of the source record checks a full round trip.

use crate::error::{Error, Result};
use crate::protocol::constants::{TAG_CONVOLUTION, TAG_LINEAR};
use crate::protocol::{KernelInfo, MappingRecord, Scalar, WeightRecord};

/// Outcome of pushing one field into a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum Progress<T> {
    /// Field consumed, record still incomplete
    Pending,
    /// A full record was decoded
    Record(T),
    /// Worker layer-line terminator
    LineEnd,
    /// End of transmission
    StreamEnd,
}

/// Mapping record as reconstructed by the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMapping {
    pub count: Vec<String>,
    pub map: Vec<Vec<String>>,
    pub padding_pos: Vec<Vec<String>>,
    pub end_pos: Vec<Vec<String>>,
    pub zero_point: Vec<String>,
    pub scale: Vec<String>,
}

impl From<&MappingRecord> for DecodedMapping {
    fn from(record: &MappingRecord) -> Self {
        Self {
            count: texts(&record.count),
            map: record.map.iter().map(|m| texts(m)).collect(),
            padding_pos: record.padding_pos.iter().map(|p| texts(p)).collect(),
            end_pos: record.end_pos.iter().map(|e| texts(e)).collect(),
            zero_point: texts(&record.zero_point),
            scale: texts(&record.scale),
        }
    }
}

/// Kernel geometry as reconstructed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInfo {
    /// `b'C'` or `b'L'`
    pub tag: u8,
    pub values: Vec<String>,
}

/// Weight block as reconstructed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedWeight {
    pub data: Vec<String>,
    pub bias: String,
    pub which_kernel: String,
    pub count: String,
    pub start_pos_in: Option<Vec<String>>,
    pub info: DecodedInfo,
    pub zero_points: Vec<String>,
    pub m: String,
    pub s_out: String,
}

impl From<&WeightRecord> for DecodedWeight {
    fn from(record: &WeightRecord) -> Self {
        let values: Vec<String> = match &record.info {
            KernelInfo::Convolution(c) => [&c.out_per_group, &c.in_per_group]
                .into_iter()
                .chain(&c.stride)
                .chain(&c.kernel)
                .chain(&c.in_shape)
                .chain(&c.out_shape)
                .map(Scalar::to_string)
                .collect(),
            KernelInfo::Linear(l) => [&l.batch_in, &l.channels_in, &l.batch_out, &l.channels_out]
                .into_iter()
                .map(Scalar::to_string)
                .collect(),
        };
        Self {
            data: texts(&record.data),
            bias: record.bias.to_string(),
            which_kernel: record.which_kernel.to_string(),
            count: record.count.to_string(),
            start_pos_in: record.start_pos_in.as_ref().map(|s| texts(s)),
            info: DecodedInfo {
                tag: record.info.tag(),
                values,
            },
            zero_points: texts(&record.zero_points),
            m: record.m.to_string(),
            s_out: record.s_out.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MappingStage {
    Phases,
    Counts,
    Maps,
    Paddings,
    EndPos,
    ZeroPoint,
    Scale,
    BatchEnd,
}

/// Coordinator stream decoder
#[derive(Debug)]
pub struct MappingDecoder {
    stage: MappingStage,
    phases: usize,
    current: DecodedMapping,
}

impl MappingDecoder {
    pub fn new() -> Self {
        Self {
            stage: MappingStage::Phases,
            phases: 0,
            current: DecodedMapping::default(),
        }
    }

    /// Consume one field (terminator already stripped)
    pub fn push_field(&mut self, field: &str) -> Result<Progress<DecodedMapping>> {
        let tokens = tokens(field);

        match self.stage {
            MappingStage::Phases => {
                if tokens.is_empty() {
                    return Ok(Progress::StreamEnd);
                }
                self.phases = single(&tokens, "phase count")?.parse().map_err(|_| {
                    Error::InvalidPacket(format!("phase count is not a number: {:?}", field))
                })?;
                self.current = DecodedMapping::default();
                self.stage = MappingStage::Counts;
            }
            MappingStage::Counts => {
                let count = single(&tokens, "phase size")?;
                self.current.count.push(count.to_string());
            }
            MappingStage::Maps => {
                self.current.map.push(tokens);
            }
            MappingStage::Paddings => {
                let values = counted(tokens, "padding")?;
                self.current.padding_pos.push(values);
            }
            MappingStage::EndPos => {
                self.current.end_pos = end_positions(tokens)?;
                self.stage = MappingStage::ZeroPoint;
            }
            MappingStage::ZeroPoint => {
                self.current.zero_point = tokens;
                self.stage = MappingStage::Scale;
            }
            MappingStage::Scale => {
                self.current.scale = tokens;
                self.stage = MappingStage::BatchEnd;
            }
            MappingStage::BatchEnd => {
                if !tokens.is_empty() {
                    return Err(Error::InvalidPacket(format!(
                        "expected batch end, got {:?}",
                        field
                    )));
                }
                self.stage = MappingStage::Phases;
                return Ok(Progress::Record(std::mem::take(&mut self.current)));
            }
        }

        self.skip_filled_stages();
        Ok(Progress::Pending)
    }

    /// Move past per-phase sections that already hold `phases` entries
    fn skip_filled_stages(&mut self) {
        loop {
            self.stage = match self.stage {
                MappingStage::Counts if self.current.count.len() == self.phases => {
                    MappingStage::Maps
                }
                MappingStage::Maps if self.current.map.len() == self.phases => {
                    MappingStage::Paddings
                }
                MappingStage::Paddings if self.current.padding_pos.len() == self.phases => {
                    MappingStage::EndPos
                }
                _ => break,
            };
        }
    }
}

impl Default for MappingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeightStage {
    Data,
    Bias,
    WhichKernel,
    Count,
    StartPos,
    Info,
    Quantization,
}

/// Worker stream decoder
#[derive(Debug)]
pub struct WeightDecoder {
    stage: WeightStage,
    line_open: bool,
    data: Vec<String>,
    scalars: Vec<String>,
    start_pos_in: Option<Vec<String>>,
    info: Option<DecodedInfo>,
}

impl WeightDecoder {
    pub fn new() -> Self {
        Self {
            stage: WeightStage::Data,
            line_open: false,
            data: Vec::new(),
            scalars: Vec::new(),
            start_pos_in: None,
            info: None,
        }
    }

    /// Consume one field (terminator already stripped)
    ///
    /// An empty field where a block could start closes the current line; a
    /// second one (or one before any block of a line) ends the stream.
    pub fn push_field(&mut self, field: &str) -> Result<Progress<DecodedWeight>> {
        let tokens = tokens(field);

        match self.stage {
            WeightStage::Data => {
                if tokens.is_empty() {
                    return if std::mem::take(&mut self.line_open) {
                        Ok(Progress::LineEnd)
                    } else {
                        Ok(Progress::StreamEnd)
                    };
                }
                self.line_open = true;
                self.data = counted(tokens, "data")?;
                self.scalars.clear();
                self.stage = WeightStage::Bias;
            }
            WeightStage::Bias | WeightStage::WhichKernel | WeightStage::Count => {
                let value = single(&tokens, "weight scalar")?;
                self.scalars.push(value.to_string());
                self.stage = match self.stage {
                    WeightStage::Bias => WeightStage::WhichKernel,
                    WeightStage::WhichKernel => WeightStage::Count,
                    _ => WeightStage::StartPos,
                };
            }
            WeightStage::StartPos => {
                self.start_pos_in = match tokens.len() {
                    0 => None,
                    3 => Some(tokens),
                    n => {
                        return Err(Error::InvalidPacket(format!(
                            "start position has {} values",
                            n
                        )));
                    }
                };
                self.stage = WeightStage::Info;
            }
            WeightStage::Info => {
                self.info = Some(kernel_info(tokens)?);
                self.stage = WeightStage::Quantization;
            }
            WeightStage::Quantization => {
                let [zp0, zp1, zp2, m, s_out] = <[String; 5]>::try_from(tokens).map_err(|t| {
                    Error::InvalidPacket(format!("quantization field has {} values", t.len()))
                })?;
                let info = self
                    .info
                    .take()
                    .ok_or_else(|| Error::InvalidPacket("missing kernel info".to_string()))?;
                let [bias, which_kernel, count] =
                    <[String; 3]>::try_from(std::mem::take(&mut self.scalars)).map_err(|_| {
                        Error::InvalidPacket("missing block scalars".to_string())
                    })?;
                self.stage = WeightStage::Data;
                return Ok(Progress::Record(DecodedWeight {
                    data: std::mem::take(&mut self.data),
                    bias,
                    which_kernel,
                    count,
                    start_pos_in: self.start_pos_in.take(),
                    info,
                    zero_points: vec![zp0, zp1, zp2],
                    m,
                    s_out,
                }));
            }
        }

        Ok(Progress::Pending)
    }
}

impl Default for WeightDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn texts(values: &[Scalar]) -> Vec<String> {
    values.iter().map(Scalar::to_string).collect()
}

fn tokens(field: &str) -> Vec<String> {
    field.split_whitespace().map(str::to_string).collect()
}

fn single<'a>(tokens: &'a [String], what: &str) -> Result<&'a str> {
    match tokens {
        [value] => Ok(value.as_str()),
        _ => Err(Error::InvalidPacket(format!(
            "{} field has {} values",
            what,
            tokens.len()
        ))),
    }
}

fn parse_len(token: &str, what: &str) -> Result<usize> {
    token
        .parse()
        .map_err(|_| Error::InvalidPacket(format!("{} length is not a number: {:?}", what, token)))
}

/// `<n> v1 … vn`
fn counted(mut tokens: Vec<String>, what: &str) -> Result<Vec<String>> {
    if tokens.is_empty() {
        return Err(Error::InvalidPacket(format!("{} field is empty", what)));
    }
    let values = tokens.split_off(1);
    let expected = parse_len(&tokens[0], what)?;
    if values.len() != expected {
        return Err(Error::InvalidPacket(format!(
            "{} announces {} values, got {}",
            what,
            expected,
            values.len()
        )));
    }
    Ok(values)
}

/// `0` or `<n> t1… tn…`, tuples of equal arity
fn end_positions(tokens: Vec<String>) -> Result<Vec<Vec<String>>> {
    let values = counted_prefix(tokens)?;
    let (n, values) = values;
    if n == 0 {
        if !values.is_empty() {
            return Err(Error::InvalidPacket(
                "end position count 0 followed by values".to_string(),
            ));
        }
        return Ok(Vec::new());
    }
    if values.is_empty() || values.len() % n != 0 {
        return Err(Error::InvalidPacket(format!(
            "{} end positions cannot split {} values",
            n,
            values.len()
        )));
    }
    let arity = values.len() / n;
    Ok(values.chunks(arity).map(<[String]>::to_vec).collect())
}

fn counted_prefix(mut tokens: Vec<String>) -> Result<(usize, Vec<String>)> {
    if tokens.is_empty() {
        return Err(Error::InvalidPacket("end position field is empty".to_string()));
    }
    let values = tokens.split_off(1);
    Ok((parse_len(&tokens[0], "end position")?, values))
}

fn kernel_info(tokens: Vec<String>) -> Result<DecodedInfo> {
    let Some((tag, values)) = tokens.split_first() else {
        return Err(Error::InvalidPacket("kernel info field is empty".to_string()));
    };
    let (tag, expected) = match tag.as_bytes() {
        [TAG_CONVOLUTION] => (TAG_CONVOLUTION, 12),
        [TAG_LINEAR] => (TAG_LINEAR, 4),
        _ => {
            return Err(Error::InvalidPacket(format!("unknown kernel tag {:?}", tag)));
        }
    };
    if values.len() != expected {
        return Err(Error::InvalidPacket(format!(
            "kernel info {} expects {} values, got {}",
            tag as char,
            expected,
            values.len()
        )));
    }
    Ok(DecodedInfo {
        tag,
        values: values.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed<T>(
        stream: &str,
        mut push: impl FnMut(&str) -> Result<Progress<T>>,
    ) -> Vec<Progress<T>> {
        let mut fields: Vec<&str> = stream.split('!').collect();
        // Text after the final terminator is not a complete field
        fields.pop();
        fields
            .into_iter()
            .map(|f| push(f).unwrap())
            .filter(|p| !matches!(p, Progress::Pending))
            .collect()
    }

    #[test]
    fn test_mapping_decoder_reads_one_batch() {
        let mut decoder = MappingDecoder::new();
        let events = feed("2!4!2!1 2 !3 !2 0 3 !1 1 !0!128 !0.5 0.25 !!!", |f| {
            decoder.push_field(f)
        });
        assert_eq!(events.len(), 2);
        let Progress::Record(record) = &events[0] else {
            panic!("expected record, got {:?}", events[0]);
        };
        assert_eq!(record.count, vec!["4", "2"]);
        assert_eq!(record.map, vec![vec!["1", "2"], vec!["3"]]);
        assert_eq!(record.padding_pos, vec![vec!["0", "3"], vec!["1"]]);
        assert!(record.end_pos.is_empty());
        assert_eq!(record.scale, vec!["0.5", "0.25"]);
        assert_eq!(events[1], Progress::StreamEnd);
    }

    #[test]
    fn test_mapping_decoder_splits_end_positions() {
        let mut decoder = MappingDecoder::new();
        let events = feed("1!1!7 !0  !3 1 2 3 4 5 6 !0 !1.0 !!", |f| decoder.push_field(f));
        let Progress::Record(record) = &events[0] else {
            panic!("expected record");
        };
        assert_eq!(
            record.end_pos,
            vec![vec!["1", "2"], vec!["3", "4"], vec!["5", "6"]]
        );
        assert_eq!(record.padding_pos, vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_mapping_decoder_rejects_missing_batch_end() {
        let mut decoder = MappingDecoder::new();
        for field in ["1", "1", "7 ", "0  ", "0", "0 ", "1 "] {
            decoder.push_field(field).unwrap();
        }
        assert!(decoder.push_field("1").is_err());
    }

    #[test]
    fn test_weight_decoder_lines_and_stream_end() {
        let mut decoder = WeightDecoder::new();
        let block = "2 5 -6!-40!2!10!!L 1 512 1 10!3 4 5 0.75 9!";
        let stream = format!("{block}{block}!{block}!!");
        let events = feed(&stream, |f| decoder.push_field(f));
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                Progress::Record(_) => "block",
                Progress::LineEnd => "line",
                Progress::StreamEnd => "eof",
                Progress::Pending => "pending",
            })
            .collect();
        assert_eq!(kinds, vec!["block", "block", "line", "block", "line", "eof"]);

        let Progress::Record(weight) = &events[0] else {
            panic!("expected block");
        };
        assert_eq!(weight.data, vec!["5", "-6"]);
        assert_eq!(weight.start_pos_in, None);
        assert_eq!(weight.info.tag, b'L');
        assert_eq!(weight.m, "0.75");
    }

    #[test]
    fn test_weight_decoder_rejects_bad_data_length() {
        let mut decoder = WeightDecoder::new();
        assert!(decoder.push_field("3 1 2").is_err());
    }

    #[test]
    fn test_weight_decoder_rejects_unknown_tag() {
        let mut decoder = WeightDecoder::new();
        for field in ["1 1", "0", "0", "0", ""] {
            decoder.push_field(field).unwrap();
        }
        assert!(decoder.push_field("P 1 2").is_err());
    }
}
