//! Turning decoded records into canonical events.
//!
//! Field positions are resolved from schema roles once per session; pixel
//! formats are flattened onto a [`PixelGrid`].

use crate::parser;
use crate::schema::{RecordSchema, Role};
use crate::types::{Event, RawRecord};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sensor geometry used to flatten pixel coordinates into channel ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelGrid {
    pub width: u16,
    pub height: u16,
}

impl PixelGrid {
    /// N-MNIST saccade recordings.
    pub const NMNIST: PixelGrid = PixelGrid::new(34, 34);
    /// DVS128 gesture recordings.
    pub const DVS_GESTURE: PixelGrid = PixelGrid::new(128, 128);
    /// N-CARS recordings.
    pub const NCARS: PixelGrid = PixelGrid::new(64, 56);
    /// DAVIS346 sensor.
    pub const DAVIS346: PixelGrid = PixelGrid::new(346, 260);

    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Number of pixels, i.e. the channel count of a full frame.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, row: u16, col: u16) -> bool {
        row < self.height && col < self.width
    }

    /// Row-major channel id of a pixel.
    #[inline]
    pub fn channel(&self, row: u16, col: u16) -> i64 {
        row as i64 * self.width as i64 + col as i64
    }

    /// Mirrors an event to top-left origin: `row = height - 1 - row`.
    ///
    /// Events without spatial coordinates are returned unchanged.
    pub fn flip_vertical(&self, mut event: Event) -> Event {
        if let Some((row, col)) = event.spatial_coords {
            let flipped = self.height.saturating_sub(1).saturating_sub(row);
            event.spatial_coords = Some((flipped, col));
            event.channel_id = self.channel(flipped, col);
        }
        event
    }
}

impl FromStr for PixelGrid {
    type Err = String;

    /// Parses a preset name or `WIDTHxHEIGHT`, e.g. `ncars` or `346x260`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "nmnist" | "n-mnist" => return Ok(Self::NMNIST),
            "dvs-gesture" | "dvs128" => return Ok(Self::DVS_GESTURE),
            "ncars" | "n-cars" => return Ok(Self::NCARS),
            "davis346" => return Ok(Self::DAVIS346),
            _ => {}
        }

        let invalid = || format!("Invalid grid: {}. Use WIDTHxHEIGHT or a preset name", s);
        let (width, height) = normalized.split_once('x').ok_or_else(invalid)?;
        let width: u16 = width.trim().parse().map_err(|_| invalid())?;
        let height: u16 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::new(width, height))
    }
}

/// Builds events from records of one schema.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    channel: Option<usize>,
    amplitude: Option<usize>,
    layer: Option<usize>,
    x: Option<usize>,
    y: Option<usize>,
    timestamp_high: Option<usize>,
    packed: Option<usize>,
    grid: PixelGrid,
}

impl EventBuilder {
    /// Resolves field positions for a schema. `grid` is only consulted for
    /// pixel formats.
    pub fn new(schema: &RecordSchema, grid: PixelGrid) -> Self {
        Self {
            channel: schema.field_index(Role::ChannelId),
            amplitude: schema.field_index(Role::Amplitude),
            layer: schema.field_index(Role::LayerId),
            x: schema.field_index(Role::SpatialX),
            y: schema.field_index(Role::SpatialY),
            timestamp_high: schema.field_index(Role::TimestampHigh),
            packed: schema.field_index(Role::PackedAddress),
            grid,
        }
    }

    /// Builds the event for a record at an already reconstructed timestamp.
    ///
    /// Returns `None` for AEDAT events whose validity bit is clear and for
    /// pixels outside the grid.
    pub fn build(&self, record: &RawRecord, timestamp: i64) -> Option<Event> {
        if let Some(index) = self.packed {
            let data = record.get(index)?.as_i64() as u32;
            if !parser::aedat_is_valid(data) {
                return None;
            }
            return self.pixel_event(
                timestamp,
                parser::aedat_get_y(data),
                parser::aedat_get_x(data),
                parser::aedat_get_polarity(data),
            );
        }

        if let (Some(x), Some(y)) = (self.x, self.y) {
            let col = record.get(x)?.as_i64() as u16;
            let row = record.get(y)?.as_i64() as u16;
            let polarity = match self.timestamp_high {
                Some(index) => parser::nmnist_get_polarity(record.get(index)?.as_i64() as u8),
                None => false,
            };
            return self.pixel_event(timestamp, row, col, polarity);
        }

        let channel_id = record.get(self.channel?)?.as_i64();
        let amplitude = match self.amplitude {
            Some(index) => record.get(index)?.as_f64(),
            None => 1.0,
        };
        let mut event = Event::new(timestamp, channel_id, amplitude);
        if let Some(index) = self.layer {
            event = event.with_layer(record.get(index)?.as_i64());
        }
        Some(event)
    }

    fn pixel_event(&self, timestamp: i64, row: u16, col: u16, polarity: bool) -> Option<Event> {
        if !self.grid.contains(row, col) {
            return None;
        }
        Some(Event {
            timestamp,
            channel_id: self.grid.channel(row, col),
            amplitude: 1.0,
            layer_id: None,
            spatial_coords: Some((row, col)),
            polarity: Some(polarity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FormatId;
    use crate::types::Scalar;

    #[test]
    fn test_grid_parsing() {
        assert_eq!("ncars".parse::<PixelGrid>(), Ok(PixelGrid::NCARS));
        assert_eq!("DVS_Gesture".parse::<PixelGrid>(), Ok(PixelGrid::DVS_GESTURE));
        assert_eq!("346x260".parse::<PixelGrid>(), Ok(PixelGrid::DAVIS346));
        assert_eq!("640 x 480".parse::<PixelGrid>(), Ok(PixelGrid::new(640, 480)));
        assert!("0x10".parse::<PixelGrid>().is_err());
        assert!("128".parse::<PixelGrid>().is_err());
        assert!("axb".parse::<PixelGrid>().is_err());
    }

    #[test]
    fn test_spike_event() {
        let schema = FormatId::EfficientSpike.schema();
        let builder = EventBuilder::new(&schema, PixelGrid::NMNIST);
        let record = RawRecord::new(vec![
            Scalar::I32(100),
            Scalar::I16(5),
            Scalar::I8(12),
            Scalar::I16(-250),
            Scalar::I16(3),
            Scalar::I16(790),
            Scalar::I8(1),
        ]);
        let event = builder.build(&record, 7).unwrap();
        assert_eq!(event.timestamp, 7);
        assert_eq!(event.channel_id, 790);
        assert_eq!(event.amplitude, -250.0);
        assert_eq!(event.layer_id, Some(1));
        assert_eq!(event.spatial_coords, None);
    }

    #[test]
    fn test_nmnist_event() {
        let schema = FormatId::Nmnist.schema();
        let builder = EventBuilder::new(&schema, PixelGrid::NMNIST);
        let record = RawRecord::new(vec![
            Scalar::U8(5),
            Scalar::U8(2),
            Scalar::U8(0x80),
            Scalar::U16(10),
        ]);
        let event = builder.build(&record, 10).unwrap();
        assert_eq!(event.spatial_coords, Some((2, 5)));
        assert_eq!(event.channel_id, 2 * 34 + 5);
        assert_eq!(event.polarity, Some(true));
        assert_eq!(event.amplitude, 1.0);
    }

    #[test]
    fn test_pixel_outside_grid_skipped() {
        let schema = FormatId::Nmnist.schema();
        let builder = EventBuilder::new(&schema, PixelGrid::NMNIST);
        let record = RawRecord::new(vec![
            Scalar::U8(40),
            Scalar::U8(2),
            Scalar::U8(0),
            Scalar::U16(10),
        ]);
        assert!(builder.build(&record, 10).is_none());
    }

    #[test]
    fn test_aedat_invalid_event_skipped() {
        let schema = FormatId::AedatPolarity.schema();
        let builder = EventBuilder::new(&schema, PixelGrid::DVS_GESTURE);
        let valid = RawRecord::new(vec![Scalar::U32((7 << 17) | (9 << 2) | 0b11), Scalar::U32(5)]);
        let invalid = RawRecord::new(vec![Scalar::U32((7 << 17) | (9 << 2)), Scalar::U32(5)]);

        let event = builder.build(&valid, 5).unwrap();
        assert_eq!(event.spatial_coords, Some((9, 7)));
        assert_eq!(event.channel_id, 9 * 128 + 7);
        assert!(builder.build(&invalid, 5).is_none());
    }

    #[test]
    fn test_flip_vertical() {
        let grid = PixelGrid::DVS_GESTURE;
        let event = Event {
            timestamp: 0,
            channel_id: grid.channel(0, 3),
            amplitude: 1.0,
            layer_id: None,
            spatial_coords: Some((0, 3)),
            polarity: Some(false),
        };
        let flipped = grid.flip_vertical(event);
        assert_eq!(flipped.spatial_coords, Some((127, 3)));
        assert_eq!(flipped.channel_id, 127 * 128 + 3);

        let neuron = Event::new(1, 800, 2.0);
        assert_eq!(grid.flip_vertical(neuron), neuron);
    }
}
