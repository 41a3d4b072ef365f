//! Core value types flowing between the codec stages.
//!
//! Decoded scalars, raw records, canonical events and the diagnostic counters
//! collected while a buffer is processed.

use serde::{Deserialize, Serialize};

/// A single decoded scalar field.
///
/// The variant is fixed by the schema's primitive type, so re-encoding a
/// scalar reproduces its original bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Scalar {
    /// Widens the scalar to an integer. Floats are truncated toward zero.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::I8(v) => v as i64,
            Self::I16(v) => v as i64,
            Self::I32(v) => v as i64,
            Self::U8(v) => v as i64,
            Self::U16(v) => v as i64,
            Self::U32(v) => v as i64,
            Self::F32(v) => v as i64,
            Self::F64(v) => v as i64,
            Self::Bool(v) => v as i64,
        }
    }

    /// Widens the scalar to a float.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::I8(v) => v as f64,
            Self::I16(v) => v as f64,
            Self::I32(v) => v as f64,
            Self::U8(v) => v as f64,
            Self::U16(v) => v as f64,
            Self::U32(v) => v as f64,
            Self::F32(v) => v as f64,
            Self::F64(v) => v,
            Self::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Returns true for the floating point variants.
    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32(_) | Self::F64(_))
    }
}

/// One fixed-size record decoded against a schema.
///
/// Values are stored in schema field order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    values: Vec<Scalar>,
}

impl RawRecord {
    /// Creates a record from values in schema field order.
    pub fn new(values: Vec<Scalar>) -> Self {
        Self { values }
    }

    /// Returns the value at a field index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Scalar> {
        self.values.get(index).copied()
    }

    /// Returns all values in schema order.
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }
}

/// A decoded event with its reconstructed absolute timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Absolute timestamp in ticks
    pub timestamp: i64,
    /// Raw channel identifier (neuron id or flattened pixel index)
    pub channel_id: i64,
    /// Value accumulated by `SumAmplitude`, in the record's stored units
    pub amplitude: f64,
    /// Network layer, for formats that record one
    pub layer_id: Option<i64>,
    /// Pixel position as (row, col), for camera formats
    pub spatial_coords: Option<(u16, u16)>,
    /// Brightness change direction, for camera formats
    pub polarity: Option<bool>,
}

impl Event {
    /// Creates a neuron event with no spatial information.
    #[inline]
    pub fn new(timestamp: i64, channel_id: i64, amplitude: f64) -> Self {
        Self {
            timestamp,
            channel_id,
            amplitude,
            layer_id: None,
            spatial_coords: None,
            polarity: None,
        }
    }

    /// Sets the layer id.
    #[inline]
    pub fn with_layer(mut self, layer_id: i64) -> Self {
        self.layer_id = Some(layer_id);
        self
    }
}

/// The spike logger's 8-byte session header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// Simulator time at which learning was switched off
    pub learning_off_time: f64,
}

/// Counters for anomalies that are tolerated rather than raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub records_decoded: u64,
    pub trailing_bytes_discarded: u64,
    pub overflow_sentinels: u64,
    pub non_polarity_segments: u64,
    pub invalid_events: u64,
    pub channel_out_of_range: u64,
    pub layer_filtered: u64,
}

impl Diagnostics {
    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &Diagnostics) {
        self.records_decoded += other.records_decoded;
        self.trailing_bytes_discarded += other.trailing_bytes_discarded;
        self.overflow_sentinels += other.overflow_sentinels;
        self.non_polarity_segments += other.non_polarity_segments;
        self.invalid_events += other.invalid_events;
        self.channel_out_of_range += other.channel_out_of_range;
        self.layer_filtered += other.layer_filtered;
    }

    /// Total number of items skipped without raising an error.
    pub fn skipped(&self) -> u64 {
        self.overflow_sentinels
            + self.non_polarity_segments
            + self.invalid_events
            + self.channel_out_of_range
            + self.layer_filtered
    }
}
