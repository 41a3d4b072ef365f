//! Declarative record layouts for every supported binary format.
//!
//! A schema lists each field's primitive type, byte order, fixed-point scale
//! and semantic role. The decoder only needs the record width and the field
//! list; later stages locate fields by role rather than by name.

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// N-MNIST row value that marks a hardware timestamp overflow.
pub const NMNIST_OVERFLOW_SENTINEL: i64 = 240;

/// Ticks added to every record at or after an N-MNIST overflow sentinel.
pub const NMNIST_OVERFLOW_INCREMENT: i64 = 1 << 13;

/// Fixed-point divisor used by the simulator's delta-encoded loggers.
pub const SIMULATOR_FIXED_POINT: u32 = 100;

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatId {
    /// Compact spike log with delta-encoded timestamps (14-byte records)
    EfficientSpike,
    /// Spike log with absolute f64 timestamps (23-byte records)
    FullSpike,
    /// Membrane potential log with delta-encoded timestamps (8-byte records)
    Potential,
    /// N-MNIST `.bin` dataset files (5-byte records)
    Nmnist,
    /// Polarity events inside an AEDAT 3.1 container (8-byte records)
    AedatPolarity,
}

impl FormatId {
    /// All recognized formats.
    pub const ALL: [FormatId; 5] = [
        Self::EfficientSpike,
        Self::FullSpike,
        Self::Potential,
        Self::Nmnist,
        Self::AedatPolarity,
    ];

    /// Canonical string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EfficientSpike => "efficient-spike",
            Self::FullSpike => "full-spike",
            Self::Potential => "potential",
            Self::Nmnist => "nmnist",
            Self::AedatPolarity => "aedat-polarity",
        }
    }

    /// Returns the record schema for this format.
    pub fn schema(&self) -> RecordSchema {
        match self {
            Self::EfficientSpike => RecordSchema::new(*self, EFFICIENT_SPIKE_FIELDS, 8),
            Self::FullSpike => RecordSchema::new(*self, FULL_SPIKE_FIELDS, 8),
            Self::Potential => RecordSchema::new(*self, POTENTIAL_FIELDS, 0),
            Self::Nmnist => RecordSchema::new(*self, NMNIST_FIELDS, 0).with_overflow(OverflowRule {
                sentinel: NMNIST_OVERFLOW_SENTINEL,
                increment: NMNIST_OVERFLOW_INCREMENT,
            }),
            Self::AedatPolarity => RecordSchema::new(*self, AEDAT_POLARITY_FIELDS, 0),
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "efficient-spike" | "spike" => Ok(Self::EfficientSpike),
            "full-spike" => Ok(Self::FullSpike),
            "potential" => Ok(Self::Potential),
            "nmnist" | "n-mnist" => Ok(Self::Nmnist),
            "aedat-polarity" | "aedat" => Ok(Self::AedatPolarity),
            _ => Err(CodecError::UnknownFormat(s.to_string())),
        }
    }
}

/// Looks up the schema for a format identifier string.
pub fn schema_for(format_id: &str) -> Result<RecordSchema> {
    Ok(FormatId::from_str(format_id)?.schema())
}

/// Primitive field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    F32,
    F64,
    Bool,
}

impl Primitive {
    /// Width of the primitive in bytes.
    #[inline]
    pub const fn width(&self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// What a field means to the later pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Absolute timestamp
    Timestamp,
    /// Difference from the previous record's timestamp
    Delta,
    /// Upper timestamp bits packed with the polarity bit (N-MNIST)
    TimestampHigh,
    ChannelId,
    Amplitude,
    LayerId,
    SpatialX,
    SpatialY,
    /// Validity, polarity and address bits packed into one word (AEDAT)
    PackedAddress,
    /// Decoded and round-tripped, but not carried into events
    Auxiliary,
}

/// One field of a record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub primitive: Primitive,
    pub endian: Endian,
    /// Stored value divided by this gives the physical value
    pub scale: u32,
    pub role: Role,
}

impl FieldSpec {
    const fn le(name: &'static str, primitive: Primitive, scale: u32, role: Role) -> Self {
        Self {
            name,
            primitive,
            endian: Endian::Little,
            scale,
            role,
        }
    }

    const fn be(name: &'static str, primitive: Primitive, scale: u32, role: Role) -> Self {
        Self {
            name,
            primitive,
            endian: Endian::Big,
            scale,
            role,
        }
    }
}

/// Hardware counter overflow signalled by a sentinel row value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowRule {
    pub sentinel: i64,
    pub increment: i64,
}

/// Immutable description of one binary record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    format: FormatId,
    fields: &'static [FieldSpec],
    record_width: usize,
    default_header_offset: usize,
    overflow: Option<OverflowRule>,
}

impl RecordSchema {
    fn new(format: FormatId, fields: &'static [FieldSpec], default_header_offset: usize) -> Self {
        let record_width = fields.iter().map(|f| f.primitive.width()).sum();
        Self {
            format,
            fields,
            record_width,
            default_header_offset,
            overflow: None,
        }
    }

    fn with_overflow(mut self, rule: OverflowRule) -> Self {
        self.overflow = Some(rule);
        self
    }

    pub fn format(&self) -> FormatId {
        self.format
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    /// Size of one record in bytes.
    pub fn record_width(&self) -> usize {
        self.record_width
    }

    /// Number of header bytes the format's writer emits before the first record.
    pub fn default_header_offset(&self) -> usize {
        self.default_header_offset
    }

    pub fn overflow(&self) -> Option<OverflowRule> {
        self.overflow
    }

    /// Index of the first field with the given role.
    pub fn field_index(&self, role: Role) -> Option<usize> {
        self.fields.iter().position(|f| f.role == role)
    }

    /// The first field with the given role.
    pub fn field(&self, role: Role) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.role == role)
    }

    /// Divisor converting stored amplitudes to physical units (1 if none).
    pub fn amplitude_scale(&self) -> u32 {
        self.field(Role::Amplitude).map_or(1, |f| f.scale)
    }
}

const EFFICIENT_SPIKE_FIELDS: &[FieldSpec] = &[
    FieldSpec::le("timestamp_delta", Primitive::I32, SIMULATOR_FIXED_POINT, Role::Delta),
    FieldSpec::le("delay", Primitive::I16, SIMULATOR_FIXED_POINT, Role::Auxiliary),
    FieldSpec::le("weight", Primitive::I8, SIMULATOR_FIXED_POINT, Role::Auxiliary),
    FieldSpec::le("potential", Primitive::I16, SIMULATOR_FIXED_POINT, Role::Amplitude),
    FieldSpec::le("presynaptic_id", Primitive::I16, 1, Role::Auxiliary),
    FieldSpec::le("postsynaptic_id", Primitive::I16, 1, Role::ChannelId),
    FieldSpec::le("layer_id", Primitive::I8, 1, Role::LayerId),
];

const FULL_SPIKE_FIELDS: &[FieldSpec] = &[
    FieldSpec::le("timestamp", Primitive::F64, 1, Role::Timestamp),
    FieldSpec::le("delay", Primitive::F32, 1, Role::Auxiliary),
    FieldSpec::le("weight", Primitive::F32, 1, Role::Auxiliary),
    FieldSpec::le("potential", Primitive::I16, SIMULATOR_FIXED_POINT, Role::Amplitude),
    FieldSpec::le("presynaptic_id", Primitive::I16, 1, Role::Auxiliary),
    FieldSpec::le("postsynaptic_id", Primitive::I16, 1, Role::ChannelId),
    FieldSpec::le("layer_id", Primitive::I8, 1, Role::LayerId),
];

const POTENTIAL_FIELDS: &[FieldSpec] = &[
    FieldSpec::le("timestamp_delta", Primitive::I32, SIMULATOR_FIXED_POINT, Role::Delta),
    FieldSpec::le("potential", Primitive::I16, SIMULATOR_FIXED_POINT, Role::Amplitude),
    FieldSpec::le("neuron_id", Primitive::I16, 1, Role::ChannelId),
];

const NMNIST_FIELDS: &[FieldSpec] = &[
    FieldSpec::le("x", Primitive::U8, 1, Role::SpatialX),
    FieldSpec::le("y", Primitive::U8, 1, Role::SpatialY),
    FieldSpec::le("polarity_timestamp_high", Primitive::U8, 1, Role::TimestampHigh),
    FieldSpec::be("timestamp_low", Primitive::U16, 1, Role::Timestamp),
];

const AEDAT_POLARITY_FIELDS: &[FieldSpec] = &[
    FieldSpec::le("data", Primitive::U32, 1, Role::PackedAddress),
    FieldSpec::le("timestamp", Primitive::U32, 1, Role::Timestamp),
];
