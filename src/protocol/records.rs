//! Upload records as produced by the model partitioner
//!
//! Records arrive as JSON lines. Numbers are kept in their source textual
//! form (`serde_json` is built with `arbitrary_precision`), so what goes on
//! the wire is exactly what the partitioner wrote, including 128-bit device
//! bitmasks in `map`.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// One numeric value, printed verbatim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Scalar(serde_json::Number);

impl Scalar {
    /// Finite float value; `None` for NaN or infinities
    pub fn from_f64(value: f64) -> Option<Self> {
        serde_json::Number::from_f64(value).map(Scalar)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Scalar {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Scalar)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar(value.into())
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar(value.into())
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar(value.into())
    }
}

/// Mapping table for one MCU within one coordinator layer-line
///
/// Deserialization rejects shapes the device cannot walk back: `map` and
/// `padding_pos` need one entry per phase, and `end_pos` tuples must be
/// non-empty and share one arity since the wire carries no tuple
/// boundaries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "MappingFields")]
pub struct MappingRecord {
    /// Number of values produced in each phase
    pub count: Vec<Scalar>,
    /// Destination MCU set for each phase
    pub map: Vec<Vec<Scalar>>,
    /// Positions where zero-point padding is injected, per phase
    pub padding_pos: Vec<Vec<Scalar>>,
    /// Trailing positions of the layer; may be empty
    pub end_pos: Vec<Vec<Scalar>>,
    /// Quantization zero point
    pub zero_point: Vec<Scalar>,
    /// Quantization scale
    pub scale: Vec<Scalar>,
}

impl MappingRecord {
    /// Number of phases announced in the first field
    pub fn phases(&self) -> usize {
        self.count.len()
    }
}

#[derive(Deserialize)]
struct MappingFields {
    count: Vec<Scalar>,
    map: Vec<Vec<Scalar>>,
    padding_pos: Vec<Vec<Scalar>>,
    #[serde(default, deserialize_with = "empty_if_null")]
    end_pos: Vec<Vec<Scalar>>,
    zero_point: Vec<Scalar>,
    scale: Vec<Scalar>,
}

impl TryFrom<MappingFields> for MappingRecord {
    type Error = String;

    fn try_from(fields: MappingFields) -> Result<Self, Self::Error> {
        let phases = fields.count.len();
        if fields.map.len() != phases || fields.padding_pos.len() != phases {
            return Err(format!(
                "{} phases but {} map and {} padding_pos entries",
                phases,
                fields.map.len(),
                fields.padding_pos.len()
            ));
        }
        if let Some(first) = fields.end_pos.first() {
            let arity = first.len();
            if arity == 0 {
                return Err("end_pos tuples must not be empty".to_string());
            }
            if let Some(other) = fields.end_pos.iter().find(|p| p.len() != arity) {
                return Err(format!(
                    "end_pos tuples must share one arity, found {} and {}",
                    arity,
                    other.len()
                ));
            }
        }

        Ok(Self {
            count: fields.count,
            map: fields.map,
            padding_pos: fields.padding_pos,
            end_pos: fields.end_pos,
            zero_point: fields.zero_point,
            scale: fields.scale,
        })
    }
}

/// Geometry of a convolution kernel block
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Convolution {
    /// Output channels per group
    #[serde(rename = "o_pg")]
    pub out_per_group: Scalar,
    /// Input channels per group
    #[serde(rename = "i_pg")]
    pub in_per_group: Scalar,
    #[serde(rename = "s")]
    pub stride: [Scalar; 2],
    #[serde(rename = "k")]
    pub kernel: [Scalar; 2],
    #[serde(rename = "i")]
    pub in_shape: [Scalar; 3],
    #[serde(rename = "o")]
    pub out_shape: [Scalar; 3],
}

/// Geometry of a fully connected block
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Linear {
    #[serde(rename = "b_in")]
    pub batch_in: Scalar,
    #[serde(rename = "c_in")]
    pub channels_in: Scalar,
    #[serde(rename = "b_out")]
    pub batch_out: Scalar,
    #[serde(rename = "c_out")]
    pub channels_out: Scalar,
}

/// Layer kind of a weight block
///
/// JSON form is externally tagged: `{"Convolution": {...}}` or
/// `{"Linear": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum KernelInfo {
    Convolution(Convolution),
    Linear(Linear),
}

impl KernelInfo {
    /// Discriminant byte sent ahead of the geometry values
    pub const fn tag(&self) -> u8 {
        match self {
            KernelInfo::Convolution(_) => super::constants::TAG_CONVOLUTION,
            KernelInfo::Linear(_) => super::constants::TAG_LINEAR,
        }
    }
}

/// One kernel/weight block of a worker layer-line
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WeightRecord {
    /// Flattened quantized tensor
    pub data: Vec<Scalar>,
    pub bias: Scalar,
    pub which_kernel: Scalar,
    pub count: Scalar,
    /// Input start position; `null`, missing or `[]` all mean absent
    #[serde(default, deserialize_with = "start_position")]
    pub start_pos_in: Option<[Scalar; 3]>,
    pub info: KernelInfo,
    pub zero_points: [Scalar; 3],
    /// Requantization multiplier
    pub m: Scalar,
    /// Output shift
    pub s_out: Scalar,
}

/// One line of the coordinator file: a mapping per MCU
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CoordinatorLine {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub mapping: Vec<MappingRecord>,
}

/// One line of a worker file: the weight blocks of one layer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WorkerLine {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub weights: Vec<WeightRecord>,
}

fn empty_if_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn start_position<'de, D>(deserializer: D) -> Result<Option<[Scalar; 3]>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Vec<Scalar>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(values) if values.is_empty() => Ok(None),
        Some(values) => <[Scalar; 3]>::try_from(values)
            .map(Some)
            .map_err(|values| D::Error::invalid_length(values.len(), &"0 or 3 coordinates")),
    }
}
