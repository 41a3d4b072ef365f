//! Decode → reconstruct → resample over one input buffer.
//!
//! Each run owns its own reconstruction state and shares nothing with other
//! runs, so independent buffers may be processed on separate threads.

use crate::aedat;
use crate::decoder;
use crate::error::{CodecError, Result};
use crate::events::{EventBuilder, PixelGrid};
use crate::resample::{
    AccumulationPolicy, BinnedMatrix, ChannelIndexMap, ResampleOptions, Resampler, TimeAxis,
};
use crate::schema::FormatId;
use crate::timestamp::{self, Reconstructor};
use crate::types::{Diagnostics, Event, SessionHeader};
use serde::{Deserialize, Serialize};

fn default_bin_width() -> u64 {
    1
}

/// Per-call configuration surface of the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub format: FormatId,
    /// Bytes to skip before the first record, `None` for the format default
    #[serde(default)]
    pub header_offset: Option<usize>,
    #[serde(default)]
    pub channel_offset: i64,
    /// `None` infers the count from the decoded events
    #[serde(default)]
    pub channel_count: Option<usize>,
    #[serde(default = "default_bin_width")]
    pub bin_width: u64,
    /// Read-time divisor applied to ticks before binning
    #[serde(default)]
    pub downsample_divisor: Option<u64>,
    #[serde(default)]
    pub policy: AccumulationPolicy,
    #[serde(default)]
    pub strict_channel_range: bool,
    #[serde(default)]
    pub time_axis: TimeAxis,
    /// Keep only events of this layer
    #[serde(default)]
    pub layer: Option<i64>,
    /// Pixel grid for camera formats, `None` for the format default
    #[serde(default)]
    pub grid: Option<PixelGrid>,
    /// Mirror camera rows to top-left origin
    #[serde(default)]
    pub vertical_flip: bool,
}

impl PipelineConfig {
    /// Configuration with defaults for everything but the format.
    pub fn new(format: FormatId) -> Self {
        Self {
            format,
            header_offset: None,
            channel_offset: 0,
            channel_count: None,
            bin_width: default_bin_width(),
            downsample_divisor: None,
            policy: AccumulationPolicy::default(),
            strict_channel_range: false,
            time_axis: TimeAxis::default(),
            layer: None,
            grid: None,
            vertical_flip: false,
        }
    }

    /// Rejects zero divisors before any decoding starts.
    pub fn validate(&self) -> Result<()> {
        if self.bin_width == 0 {
            return Err(CodecError::DivisorZero("bin_width"));
        }
        if self.downsample_divisor == Some(0) {
            return Err(CodecError::DivisorZero("downsample_divisor"));
        }
        Ok(())
    }

    /// Header offset in effect for this configuration.
    pub fn effective_header_offset(&self) -> usize {
        self.header_offset
            .unwrap_or_else(|| self.format.schema().default_header_offset())
    }

    /// Pixel grid in effect for this configuration.
    pub fn effective_grid(&self) -> PixelGrid {
        self.grid.unwrap_or(match self.format {
            FormatId::AedatPolarity => PixelGrid::DVS_GESTURE,
            _ => PixelGrid::NMNIST,
        })
    }

    pub fn resample_options(&self) -> ResampleOptions {
        ResampleOptions {
            bin_width: self.bin_width,
            channel_count: self.channel_count,
            channel_offset: self.channel_offset,
            policy: self.policy,
            strict_channel_range: self.strict_channel_range,
            time_axis: self.time_axis,
        }
    }
}

/// Events decoded from one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStream {
    pub events: Vec<Event>,
    pub header: Option<SessionHeader>,
    pub diagnostics: Diagnostics,
}

/// Final artifact of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub matrix: BinnedMatrix,
    pub channels: ChannelIndexMap,
    pub header: Option<SessionHeader>,
    pub diagnostics: Diagnostics,
}

/// Decodes a buffer into events with reconstructed, optionally downsampled ticks.
pub fn decode_events(buffer: &[u8], config: &PipelineConfig) -> Result<DecodedStream> {
    config.validate()?;
    let grid = config.effective_grid();

    let (events, header, mut diagnostics) = match config.format {
        FormatId::AedatPolarity => {
            let (events, diagnostics) = aedat::read_aedat(buffer, grid)?;
            (events, None, diagnostics)
        }
        format => {
            let schema = format.schema();
            let header_offset = config.effective_header_offset();
            let records = decoder::decode(buffer, &schema, header_offset)?;

            let mut diagnostics = Diagnostics {
                trailing_bytes_discarded: records.trailing_bytes() as u64,
                ..Default::default()
            };
            let mut events = Vec::with_capacity(records.len());
            let mut reconstructor = Reconstructor::for_schema(&schema)?;
            let builder = EventBuilder::new(&schema, grid);

            for record in records {
                diagnostics.records_decoded += 1;
                match reconstructor.push(&record)? {
                    None => diagnostics.overflow_sentinels += 1,
                    Some(ticks) => match builder.build(&record, ticks) {
                        Some(event) => events.push(event),
                        None => diagnostics.invalid_events += 1,
                    },
                }
            }

            let header = if header_offset >= 8 {
                decoder::session_header(buffer, format)
            } else {
                None
            };
            (events, header, diagnostics)
        }
    };

    let mut events: Vec<Event> = match config.layer {
        Some(layer) => {
            let before = events.len();
            let kept: Vec<Event> = events
                .into_iter()
                .filter(|e| e.layer_id == Some(layer))
                .collect();
            diagnostics.layer_filtered += (before - kept.len()) as u64;
            kept
        }
        None => events,
    };

    if config.vertical_flip {
        for event in &mut events {
            *event = grid.flip_vertical(*event);
        }
    }

    if let Some(divisor) = config.downsample_divisor {
        events = timestamp::downsample(events, divisor)?;
    }

    tracing::debug!(
        format = %config.format,
        bytes = buffer.len(),
        events = events.len(),
        skipped = diagnostics.skipped(),
        "decoded events"
    );

    Ok(DecodedStream {
        events,
        header,
        diagnostics,
    })
}

/// Runs the full pipeline over one buffer.
pub fn run(buffer: &[u8], config: &PipelineConfig) -> Result<PipelineOutput> {
    let stream = decode_events(buffer, config)?;
    let mut resampler = Resampler::new(config.resample_options())?;
    let matrix = resampler.resample(&stream.events)?;

    let mut diagnostics = stream.diagnostics;
    diagnostics.merge(resampler.diagnostics());

    Ok(PipelineOutput {
        channels: *matrix.channels(),
        matrix,
        header: stream.header,
        diagnostics,
    })
}
