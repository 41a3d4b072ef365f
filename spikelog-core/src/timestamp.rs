//! Timestamp reconstruction.
//!
//! Turns per-record timestamp fields into a non-decreasing absolute tick
//! sequence. Three modes are selected from the schema:
//!
//! - **Delta**: the field stores the difference from the previous record in
//!   fixed point. Raw deltas are summed and the running sum is divided by the
//!   scale, so `[100, 50, 0, 200]` at scale 100 yields `[1, 1, 1, 3]`.
//! - **Overflow**: a 23-bit counter plus sentinel records (row 240 for
//!   N-MNIST) that each add `2^13` ticks to every later record. Sentinels are
//!   consumed and produce no tick.
//! - **Absolute**: the field already stores ticks.
//!
//! Ticks are emitted at native resolution. [`downsample`] applies the
//! separate read-time divisor; the resampler's bin width is independent of it.

use crate::error::{CodecError, Result};
use crate::parser;
use crate::schema::{OverflowRule, RecordSchema, Role};
use crate::types::{Event, RawRecord};

/// How a schema encodes its timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    Delta { scale: u32 },
    Overflow { rule: OverflowRule },
    Absolute { scale: u32 },
}

impl TimestampMode {
    /// Selects the mode from the schema's role tags.
    pub fn for_schema(schema: &RecordSchema) -> Result<Self> {
        let mode = if let Some(rule) = schema.overflow() {
            Self::Overflow { rule }
        } else if let Some(field) = schema.field(Role::Delta) {
            Self::Delta { scale: field.scale }
        } else if let Some(field) = schema.field(Role::Timestamp) {
            Self::Absolute { scale: field.scale }
        } else {
            return Err(CodecError::HeaderMismatch(format!(
                "schema {} has no timestamp field",
                schema.format()
            )));
        };

        match mode {
            Self::Delta { scale: 0 } | Self::Absolute { scale: 0 } => {
                Err(CodecError::DivisorZero("timestamp scale"))
            }
            _ => Ok(mode),
        }
    }
}

/// Running reconstruction state for one decode session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampState {
    /// Sum of raw deltas, before division
    pub cumulative_timestamp: i64,
    pub overflow_count: u64,
    pub divisor: u32,
    last: Option<i64>,
    index: usize,
}

impl TimestampState {
    /// Last emitted tick, if any.
    pub fn last(&self) -> Option<i64> {
        self.last
    }
}

/// Stateful reconstructor fed one record at a time.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    mode: TimestampMode,
    state: TimestampState,
    timestamp: Option<usize>,
    timestamp_high: Option<usize>,
    sentinel_field: Option<usize>,
}

impl Reconstructor {
    /// Creates a reconstructor for a schema.
    pub fn for_schema(schema: &RecordSchema) -> Result<Self> {
        let mode = TimestampMode::for_schema(schema)?;
        let mut reconstructor = Self::new(mode)?;
        reconstructor.timestamp = match mode {
            TimestampMode::Delta { .. } => schema.field_index(Role::Delta),
            _ => schema.field_index(Role::Timestamp),
        };
        reconstructor.timestamp_high = schema.field_index(Role::TimestampHigh);
        reconstructor.sentinel_field = schema.field_index(Role::SpatialY);
        Ok(reconstructor)
    }

    /// Creates a reconstructor that is not bound to schema fields.
    ///
    /// Only [`accept`](Self::accept) is meaningful on such an instance.
    pub fn new(mode: TimestampMode) -> Result<Self> {
        let (divisor, last) = match mode {
            TimestampMode::Delta { scale } => (scale, Some(0)),
            TimestampMode::Absolute { scale } => (scale, None),
            TimestampMode::Overflow { .. } => (1, None),
        };
        if divisor == 0 {
            return Err(CodecError::DivisorZero("timestamp scale"));
        }
        Ok(Self {
            mode,
            state: TimestampState {
                divisor,
                last,
                ..Default::default()
            },
            timestamp: None,
            timestamp_high: None,
            sentinel_field: None,
        })
    }

    pub fn mode(&self) -> TimestampMode {
        self.mode
    }

    pub fn state(&self) -> &TimestampState {
        &self.state
    }

    /// Reconstructs the tick of the next record.
    ///
    /// Returns `Ok(None)` for overflow sentinels, which carry no event.
    pub fn push(&mut self, record: &RawRecord) -> Result<Option<i64>> {
        let raw = self
            .timestamp
            .and_then(|index| record.get(index))
            .ok_or_else(|| CodecError::HeaderMismatch("record has no timestamp field".into()))?;

        let ticks = match self.mode {
            TimestampMode::Delta { .. } => {
                self.state.cumulative_timestamp += raw.as_i64();
                self.state
                    .cumulative_timestamp
                    .div_euclid(self.state.divisor as i64)
            }
            TimestampMode::Absolute { .. } => {
                let divisor = self.state.divisor as i64;
                if raw.is_float() {
                    (raw.as_f64() / divisor as f64).floor() as i64
                } else {
                    raw.as_i64().div_euclid(divisor)
                }
            }
            TimestampMode::Overflow { rule } => {
                let row = self
                    .sentinel_field
                    .and_then(|index| record.get(index))
                    .map(|v| v.as_i64());
                if row == Some(rule.sentinel) {
                    self.state.overflow_count += 1;
                    self.state.index += 1;
                    return Ok(None);
                }
                let base = match self.timestamp_high.and_then(|index| record.get(index)) {
                    Some(high) => parser::nmnist_timestamp(high.as_i64() as u8, raw.as_i64() as u16),
                    None => raw.as_i64(),
                };
                base + self.state.overflow_count as i64 * rule.increment
            }
        };

        self.accept(ticks).map(Some)
    }

    /// Accepts a tick computed outside the reconstructor, enforcing monotonicity.
    ///
    /// Used by container readers that widen timestamps with their own
    /// segment-level counters.
    pub fn accept(&mut self, ticks: i64) -> Result<i64> {
        let index = self.state.index;
        self.state.index += 1;
        if let Some(previous) = self.state.last {
            if ticks < previous {
                return Err(CodecError::NonMonotonicTimestamp {
                    index,
                    previous,
                    current: ticks,
                });
            }
        }
        self.state.last = Some(ticks);
        Ok(ticks)
    }
}

/// Reconstructs the ticks of every non-sentinel record.
pub fn reconstruct<I>(records: I, schema: &RecordSchema) -> Result<Vec<i64>>
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut reconstructor = Reconstructor::for_schema(schema)?;
    let mut ticks = Vec::new();
    for record in records {
        if let Some(t) = reconstructor.push(&record)? {
            ticks.push(t);
        }
    }
    Ok(ticks)
}

/// Divides every event timestamp by the read-time downsampling divisor.
pub fn downsample(mut events: Vec<Event>, divisor: u64) -> Result<Vec<Event>> {
    if divisor == 0 {
        return Err(CodecError::DivisorZero("downsample_divisor"));
    }
    let divisor = divisor as i64;
    for event in &mut events {
        event.timestamp = event.timestamp.div_euclid(divisor);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FormatId;
    use crate::types::Scalar;

    fn potential(delta: i32, channel: i16) -> RawRecord {
        RawRecord::new(vec![Scalar::I32(delta), Scalar::I16(0), Scalar::I16(channel)])
    }

    fn nmnist(x: u8, y: u8, ts: u32) -> RawRecord {
        RawRecord::new(vec![
            Scalar::U8(x),
            Scalar::U8(y),
            Scalar::U8(((ts >> 16) & 0x7F) as u8),
            Scalar::U16((ts & 0xFFFF) as u16),
        ])
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(
            TimestampMode::for_schema(&FormatId::Potential.schema()).unwrap(),
            TimestampMode::Delta { scale: 100 }
        );
        assert_eq!(
            TimestampMode::for_schema(&FormatId::FullSpike.schema()).unwrap(),
            TimestampMode::Absolute { scale: 1 }
        );
        assert!(matches!(
            TimestampMode::for_schema(&FormatId::Nmnist.schema()).unwrap(),
            TimestampMode::Overflow { .. }
        ));
    }

    #[test]
    fn test_delta_reconstruction() {
        // Running sum of raw deltas [100, 150, 150, 350], divided by 100
        let schema = FormatId::Potential.schema();
        let records = [100, 50, 0, 200].into_iter().map(|d| potential(d, 0));
        assert_eq!(reconstruct(records, &schema).unwrap(), vec![1, 1, 1, 3]);
    }

    #[test]
    fn test_delta_state_tracking() {
        let schema = FormatId::Potential.schema();
        let mut reconstructor = Reconstructor::for_schema(&schema).unwrap();
        reconstructor.push(&potential(250, 0)).unwrap();
        reconstructor.push(&potential(75, 0)).unwrap();
        assert_eq!(reconstructor.state().cumulative_timestamp, 325);
        assert_eq!(reconstructor.state().divisor, 100);
        assert_eq!(reconstructor.state().last(), Some(3));
    }

    #[test]
    fn test_negative_delta_is_non_monotonic() {
        let schema = FormatId::Potential.schema();
        let records = vec![potential(300, 0), potential(-200, 0)];
        assert_eq!(
            reconstruct(records, &schema).unwrap_err(),
            CodecError::NonMonotonicTimestamp {
                index: 1,
                previous: 3,
                current: 1
            }
        );
    }

    #[test]
    fn test_overflow_sentinel() {
        let schema = FormatId::Nmnist.schema();
        let plain = reconstruct(vec![nmnist(1, 5, 100), nmnist(2, 6, 150)], &schema).unwrap();
        let overflowed = reconstruct(
            vec![nmnist(1, 5, 100), nmnist(0, 240, 0), nmnist(2, 6, 150)],
            &schema,
        )
        .unwrap();

        assert_eq!(plain, vec![100, 150]);
        assert_eq!(overflowed, vec![100, 150 + 8192]);
    }

    #[test]
    fn test_overflow_is_cumulative() {
        let schema = FormatId::Nmnist.schema();
        let mut reconstructor = Reconstructor::for_schema(&schema).unwrap();
        assert_eq!(reconstructor.push(&nmnist(0, 240, 0)).unwrap(), None);
        assert_eq!(reconstructor.push(&nmnist(0, 240, 0)).unwrap(), None);
        assert_eq!(
            reconstructor.push(&nmnist(3, 3, 0x01_0001)).unwrap(),
            Some(0x01_0001 + 2 * 8192)
        );
        assert_eq!(reconstructor.state().overflow_count, 2);
    }

    #[test]
    fn test_absolute_float_timestamps() {
        let schema = FormatId::FullSpike.schema();
        let record = |t: f64| {
            RawRecord::new(vec![
                Scalar::F64(t),
                Scalar::F32(0.0),
                Scalar::F32(0.0),
                Scalar::I16(0),
                Scalar::I16(0),
                Scalar::I16(0),
                Scalar::I8(0),
            ])
        };
        let ticks = reconstruct(vec![record(0.4), record(12.9), record(13.0)], &schema).unwrap();
        assert_eq!(ticks, vec![0, 12, 13]);

        let err = reconstruct(vec![record(5.0), record(4.0)], &schema).unwrap_err();
        assert!(matches!(err, CodecError::NonMonotonicTimestamp { .. }));
    }

    #[test]
    fn test_zero_scale_rejected() {
        assert_eq!(
            Reconstructor::new(TimestampMode::Delta { scale: 0 }).unwrap_err(),
            CodecError::DivisorZero("timestamp scale")
        );
    }

    #[test]
    fn test_accept_external_ticks() {
        let mut reconstructor = Reconstructor::new(TimestampMode::Absolute { scale: 1 }).unwrap();
        assert_eq!(reconstructor.accept(10).unwrap(), 10);
        assert_eq!(reconstructor.accept(10).unwrap(), 10);
        assert!(reconstructor.accept(9).is_err());
    }

    #[test]
    fn test_downsample_divisor() {
        let events = vec![Event::new(0, 0, 1.0), Event::new(7, 0, 1.0), Event::new(10, 0, 1.0)];
        let ticks: Vec<i64> = downsample(events.clone(), 5)
            .unwrap()
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(ticks, vec![0, 1, 2]);
        assert_eq!(
            downsample(events, 0).unwrap_err(),
            CodecError::DivisorZero("downsample_divisor")
        );
    }
}
