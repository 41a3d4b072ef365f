//! Event-log codec for spiking-network simulator and event-camera recordings.
//!
//! This crate decodes the fixed-width binary record formats written by the
//! simulator (spike and potential logs) and by event cameras (N-MNIST, AEDAT
//! polarity), reconstructs their delta- and overflow-encoded timestamps into a
//! monotonic tick clock, and resamples the events into dense time-binned
//! matrices.
//!
//! # Example
//!
//! ```no_run
//! use spikelog_core::{run, AccumulationPolicy, FormatId, PipelineConfig};
//!
//! let buffer = std::fs::read("potential.log").unwrap();
//! let mut config = PipelineConfig::new(FormatId::Potential);
//! config.channel_offset = 128;
//! config.policy = AccumulationPolicy::SumAmplitude;
//!
//! let output = run(&buffer, &config).unwrap();
//! println!("{} bins x {} channels", output.matrix.num_bins(), output.matrix.num_channels());
//! ```
//!
//! # Features
//!
//! - Declarative record schemas for five formats, little- and big-endian
//! - Delta, overflow-counter and absolute timestamp reconstruction
//! - Two-pass AEDAT 3.x segment reader
//! - Count, logical-or and summed-amplitude binning into `ndarray` matrices
//! - CSV and binary matrix writers

pub mod aedat;
pub mod decoder;
pub mod error;
pub mod events;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod resample;
pub mod schema;
pub mod timestamp;
pub mod types;

// Re-export commonly used types
pub use aedat::{read_aedat, AedatReader};
pub use decoder::{decode, decode_all, encode, RecordIter};
pub use error::CodecError;
pub use events::{EventBuilder, PixelGrid};
pub use output::{MatrixFormat, OutputError};
pub use pipeline::{decode_events, run, DecodedStream, PipelineConfig, PipelineOutput};
pub use resample::{
    resample, AccumulationPolicy, BinnedMatrix, ChannelIndexMap, ResampleOptions, Resampler,
    TimeAxis,
};
pub use schema::{schema_for, FormatId, RecordSchema};
pub use timestamp::{reconstruct, Reconstructor, TimestampMode};
pub use types::{Diagnostics, Event, RawRecord, Scalar, SessionHeader};
