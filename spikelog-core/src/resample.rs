//! Time-binning resampler.
//!
//! Maps reconstructed events onto a dense `[bin, channel]` matrix. Bin index
//! is `timestamp.div_euclid(bin_width)`; column is `channel_id - channel_offset`.
//! Accumulation is commutative, so the matrix does not depend on event order.

use crate::error::{CodecError, Result};
use crate::types::{Diagnostics, Event};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How events landing in the same cell are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccumulationPolicy {
    /// Number of events
    #[default]
    Count,
    /// 1 if any event, else 0
    LogicalOr,
    /// Sum of event amplitudes
    SumAmplitude,
}

impl AccumulationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::LogicalOr => "logical-or",
            Self::SumAmplitude => "sum-amplitude",
        }
    }
}

impl fmt::Display for AccumulationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccumulationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "count" => Ok(Self::Count),
            "logical-or" | "or" | "binary" => Ok(Self::LogicalOr),
            "sum-amplitude" | "sum" | "amplitude" => Ok(Self::SumAmplitude),
            other => Err(format!(
                "Unknown policy: {}. Use count, logical-or or sum-amplitude",
                other
            )),
        }
    }
}

/// Which rows the time axis contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeAxis {
    /// Every bin from the first to the last observed, inclusive
    #[default]
    Dense,
    /// Only bins holding at least one event, in range or not
    Observed,
}

/// Resampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleOptions {
    pub bin_width: u64,
    /// `None` infers `max(channel_id - channel_offset) + 1` from the events
    pub channel_count: Option<usize>,
    pub channel_offset: i64,
    pub policy: AccumulationPolicy,
    /// Raise `ChannelOutOfRange` instead of skipping
    pub strict_channel_range: bool,
    pub time_axis: TimeAxis,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self {
            bin_width: 1,
            channel_count: None,
            channel_offset: 0,
            policy: AccumulationPolicy::default(),
            strict_channel_range: false,
            time_axis: TimeAxis::default(),
        }
    }
}

/// Mapping between raw channel ids and matrix columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIndexMap {
    offset: i64,
    count: usize,
}

impl ChannelIndexMap {
    /// A map with a caller-supplied column count.
    pub fn new(offset: i64, count: usize) -> Self {
        Self { offset, count }
    }

    /// Infers the column count from the highest channel id at or above `offset`.
    pub fn infer(events: &[Event], offset: i64) -> Self {
        let count = events
            .iter()
            .filter(|e| e.channel_id >= offset)
            .map(|e| (e.channel_id - offset) as usize + 1)
            .max()
            .unwrap_or(0);
        Self { offset, count }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Column of a raw channel id, if it falls inside the map.
    #[inline]
    pub fn column(&self, channel_id: i64) -> Option<usize> {
        let index = channel_id - self.offset;
        (index >= 0 && (index as usize) < self.count).then_some(index as usize)
    }

    /// Raw channel id of a column.
    pub fn channel_id(&self, column: usize) -> Option<i64> {
        (column < self.count).then(|| self.offset + column as i64)
    }
}

/// Dense time-binned matrix, rows are bins and columns are channels.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedMatrix {
    data: Array2<f64>,
    bins: Vec<i64>,
    bin_width: u64,
    policy: AccumulationPolicy,
    channels: ChannelIndexMap,
}

impl BinnedMatrix {
    /// `(num_bins, num_channels)`.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn num_bins(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_channels(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_data(self) -> Array2<f64> {
        self.data
    }

    /// Bin index of every row.
    pub fn bins(&self) -> &[i64] {
        &self.bins
    }

    /// Bin index of the first row, 0 for an empty matrix.
    pub fn first_bin(&self) -> i64 {
        self.bins.first().copied().unwrap_or(0)
    }

    pub fn bin_width(&self) -> u64 {
        self.bin_width
    }

    pub fn policy(&self) -> AccumulationPolicy {
        self.policy
    }

    pub fn channels(&self) -> &ChannelIndexMap {
        &self.channels
    }

    /// Cell value, `None` when out of bounds.
    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        self.data.get((row, column)).copied()
    }

    /// Row holding a bin index.
    pub fn row_of_bin(&self, bin: i64) -> Option<usize> {
        self.bins.binary_search(&bin).ok()
    }
}

/// Resampler with diagnostic counters.
#[derive(Debug, Clone)]
pub struct Resampler {
    options: ResampleOptions,
    diagnostics: Diagnostics,
}

impl Resampler {
    pub fn new(options: ResampleOptions) -> Result<Self> {
        if options.bin_width == 0 {
            return Err(CodecError::DivisorZero("bin_width"));
        }
        Ok(Self {
            options,
            diagnostics: Diagnostics::default(),
        })
    }

    pub fn options(&self) -> &ResampleOptions {
        &self.options
    }

    /// Counters accumulated over every call to [`resample`](Self::resample).
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Bins a sequence of events.
    pub fn resample(&mut self, events: &[Event]) -> Result<BinnedMatrix> {
        let options = &self.options;
        let channels = match options.channel_count {
            Some(count) => ChannelIndexMap::new(options.channel_offset, count),
            None => ChannelIndexMap::infer(events, options.channel_offset),
        };
        let bin_width = options.bin_width as i64;

        // Validate every event before building anything
        let mut cells = Vec::with_capacity(events.len());
        let mut skipped = 0u64;
        for event in events {
            let bin = event.timestamp.div_euclid(bin_width);
            match channels.column(event.channel_id) {
                Some(column) => cells.push((bin, column, event.amplitude)),
                None if options.strict_channel_range => {
                    return Err(CodecError::ChannelOutOfRange {
                        channel_id: event.channel_id,
                        index: event.channel_id - channels.offset(),
                        channel_count: channels.len(),
                    });
                }
                None => skipped += 1,
            }
        }

        let bins: Vec<i64> = match options.time_axis {
            TimeAxis::Dense => {
                let min = events.iter().map(|e| e.timestamp.div_euclid(bin_width)).min();
                let max = events.iter().map(|e| e.timestamp.div_euclid(bin_width)).max();
                match (min, max) {
                    (Some(min), Some(max)) => (min..=max).collect(),
                    _ => Vec::new(),
                }
            }
            TimeAxis::Observed => {
                let mut observed: Vec<i64> = events
                    .iter()
                    .map(|e| e.timestamp.div_euclid(bin_width))
                    .collect();
                observed.sort_unstable();
                observed.dedup();
                observed
            }
        };

        let mut data = Array2::<f64>::zeros((bins.len(), channels.len()));
        for (bin, column, amplitude) in cells {
            let Ok(row) = bins.binary_search(&bin) else {
                continue;
            };
            let cell = &mut data[[row, column]];
            match options.policy {
                AccumulationPolicy::Count => *cell += 1.0,
                AccumulationPolicy::LogicalOr => *cell = 1.0,
                AccumulationPolicy::SumAmplitude => *cell += amplitude,
            }
        }

        self.diagnostics.channel_out_of_range += skipped;
        tracing::debug!(
            events = events.len(),
            bins = bins.len(),
            channels = channels.len(),
            skipped,
            policy = %options.policy,
            "resampled events"
        );

        Ok(BinnedMatrix {
            data,
            bins,
            bin_width: options.bin_width,
            policy: options.policy,
            channels,
        })
    }
}

/// Bins a sequence of events with the given options.
pub fn resample(events: &[Event], options: &ResampleOptions) -> Result<BinnedMatrix> {
    Resampler::new(*options)?.resample(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(bin_width: u64, count: usize, offset: i64, policy: AccumulationPolicy) -> ResampleOptions {
        ResampleOptions {
            bin_width,
            channel_count: Some(count),
            channel_offset: offset,
            policy,
            ..Default::default()
        }
    }

    #[test]
    fn test_count_policy() {
        let events = vec![
            Event::new(0, 10, 5.0),
            Event::new(1, 10, 5.0),
            Event::new(1, 11, 5.0),
        ];
        let matrix = resample(&events, &options(1, 2, 10, AccumulationPolicy::Count)).unwrap();
        assert_eq!(matrix.shape(), (2, 2));
        assert_eq!(matrix.data().row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(matrix.data().row(1).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_logical_or_is_idempotent() {
        let events = vec![Event::new(4, 0, 3.0), Event::new(4, 0, 3.0)];
        let matrix = resample(&events, &options(1, 1, 0, AccumulationPolicy::LogicalOr)).unwrap();
        assert_eq!(matrix.get(0, 0), Some(1.0));
    }

    #[test]
    fn test_sum_amplitude() {
        let events = vec![Event::new(3, 1, 20.0), Event::new(3, 1, -5.0)];
        let matrix =
            resample(&events, &options(1, 2, 0, AccumulationPolicy::SumAmplitude)).unwrap();
        assert_eq!(matrix.get(0, 1), Some(15.0));
        assert_eq!(matrix.get(0, 0), Some(0.0));
    }

    #[test]
    fn test_dense_axis_fills_gaps() {
        let events = vec![Event::new(10, 0, 1.0), Event::new(40, 0, 1.0)];
        let matrix = resample(&events, &options(10, 1, 0, AccumulationPolicy::Count)).unwrap();
        assert_eq!(matrix.bins(), &[1, 2, 3, 4]);
        assert_eq!(matrix.data().column(0).to_vec(), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(matrix.row_of_bin(4), Some(3));
    }

    #[test]
    fn test_observed_axis_skips_gaps() {
        let events = vec![Event::new(10, 0, 1.0), Event::new(40, 0, 1.0)];
        let mut opts = options(10, 1, 0, AccumulationPolicy::Count);
        opts.time_axis = TimeAxis::Observed;
        let matrix = resample(&events, &opts).unwrap();
        assert_eq!(matrix.bins(), &[1, 4]);
        assert_eq!(matrix.shape(), (2, 1));
    }

    #[test]
    fn test_observed_axis_keeps_bins_of_skipped_events() {
        let events = vec![
            Event::new(0, 784, 1.0),
            Event::new(1, 0, 1.0),
            Event::new(2, 784, 1.0),
        ];
        let mut opts = options(1, 1, 784, AccumulationPolicy::Count);
        opts.time_axis = TimeAxis::Observed;
        let observed = resample(&events, &opts).unwrap();
        opts.time_axis = TimeAxis::Dense;
        let dense = resample(&events, &opts).unwrap();

        assert_eq!(observed.bins(), &[0, 1, 2]);
        assert_eq!(observed.bins(), dense.bins());
        assert_eq!(observed.data().column(0).to_vec(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_out_of_range_skipped_and_counted() {
        let events = vec![Event::new(0, 5, 1.0), Event::new(0, 784, 1.0), Event::new(0, 900, 1.0)];
        let mut resampler =
            Resampler::new(options(1, 2, 784, AccumulationPolicy::Count)).unwrap();
        let matrix = resampler.resample(&events).unwrap();
        assert_eq!(matrix.get(0, 0), Some(1.0));
        assert_eq!(resampler.diagnostics().channel_out_of_range, 2);
    }

    #[test]
    fn test_strict_channel_range() {
        let events = vec![Event::new(0, 784, 1.0), Event::new(0, 5, 1.0)];
        let mut opts = options(1, 2, 784, AccumulationPolicy::Count);
        opts.strict_channel_range = true;
        assert_eq!(
            resample(&events, &opts).unwrap_err(),
            CodecError::ChannelOutOfRange {
                channel_id: 5,
                index: -779,
                channel_count: 2
            }
        );
    }

    #[test]
    fn test_inferred_channel_count() {
        let events = vec![Event::new(0, 130, 1.0), Event::new(1, 128, 1.0), Event::new(1, 3, 1.0)];
        let opts = ResampleOptions {
            channel_offset: 128,
            ..Default::default()
        };
        let matrix = resample(&events, &opts).unwrap();
        assert_eq!(matrix.num_channels(), 3);
        assert_eq!(matrix.channels().channel_id(2), Some(130));
        assert_eq!(matrix.channels().column(3), None);
    }

    #[test]
    fn test_zero_bin_width() {
        assert_eq!(
            Resampler::new(options(0, 1, 0, AccumulationPolicy::Count)).unwrap_err(),
            CodecError::DivisorZero("bin_width")
        );
    }

    #[test]
    fn test_empty_events() {
        let matrix = resample(&[], &options(5, 3, 0, AccumulationPolicy::Count)).unwrap();
        assert_eq!(matrix.shape(), (0, 3));
        assert_eq!(matrix.first_bin(), 0);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "count".parse::<AccumulationPolicy>(),
            Ok(AccumulationPolicy::Count)
        );
        assert_eq!(
            "logical_or".parse::<AccumulationPolicy>(),
            Ok(AccumulationPolicy::LogicalOr)
        );
        assert_eq!(
            "sum".parse::<AccumulationPolicy>(),
            Ok(AccumulationPolicy::SumAmplitude)
        );
        assert!("max".parse::<AccumulationPolicy>().is_err());
    }
}
