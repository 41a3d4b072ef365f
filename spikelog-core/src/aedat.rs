//! AEDAT 3.1 container reader for DVS polarity events.
//!
//! The container is a text header (`#!AER-DAT3.1` followed by `#` comment
//! lines) and then a sequence of segments, each a 28-byte common header and
//! `event_count * event_size` bytes of events. Reading takes two passes over
//! the segments: the first only totals the polarity events so the output can
//! be allocated once, the second rewinds to the first segment and decodes.
//!
//! Segments of other event types are consumed to keep the cursor aligned but
//! contribute no events.

use crate::decoder;
use crate::error::{CodecError, Result};
use crate::events::{EventBuilder, PixelGrid};
use crate::parser;
use crate::schema::{FormatId, RecordSchema, Role};
use crate::timestamp::{Reconstructor, TimestampMode};
use crate::types::{Diagnostics, Event};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{BufRead, Cursor};

/// Version line every supported container starts with.
pub const AEDAT_MAGIC: &[u8] = b"#!AER-DAT3.1";

/// Size of the common segment header in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 28;

/// Event type id of polarity events.
pub const POLARITY_EVENT_TYPE: u16 = 1;

const POLARITY_EVENT_SIZE: u32 = 8;
const POLARITY_TS_OFFSET: u32 = 4;

/// Common header preceding every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub event_type: u16,
    pub event_source: u16,
    pub event_size: u32,
    pub ts_offset: u32,
    pub ts_overflow: u32,
    pub capacity: u32,
    pub event_count: u32,
    pub valid_count: u32,
}

impl SegmentHeader {
    pub fn is_polarity(&self) -> bool {
        self.event_type == POLARITY_EVENT_TYPE
    }

    /// Length of the segment body in bytes.
    pub fn body_len(&self) -> u64 {
        self.event_count as u64 * self.event_size as u64
    }

    fn parse(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            event_type: cursor.read_u16::<LittleEndian>()?,
            event_source: cursor.read_u16::<LittleEndian>()?,
            event_size: cursor.read_u32::<LittleEndian>()?,
            ts_offset: cursor.read_u32::<LittleEndian>()?,
            ts_overflow: cursor.read_u32::<LittleEndian>()?,
            capacity: cursor.read_u32::<LittleEndian>()?,
            event_count: cursor.read_u32::<LittleEndian>()?,
            valid_count: cursor.read_u32::<LittleEndian>()?,
        })
    }

    fn validate(&self) -> Result<()> {
        if !self.is_polarity() {
            return Ok(());
        }
        if self.event_size != POLARITY_EVENT_SIZE || self.ts_offset != POLARITY_TS_OFFSET {
            return Err(CodecError::HeaderMismatch(format!(
                "polarity segment declares event_size={} ts_offset={}",
                self.event_size, self.ts_offset
            )));
        }
        if self.valid_count > self.event_count {
            return Err(CodecError::HeaderMismatch(format!(
                "valid_count {} exceeds event_count {}",
                self.valid_count, self.event_count
            )));
        }
        Ok(())
    }
}

/// Reader states, in container order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    ReadMagicHeader,
    ReadCommentLines,
    ReadSegmentHeader,
    ReadSegmentBody(SegmentHeader),
    Done,
}

/// Walks segments starting at a fixed offset.
struct SegmentWalker<'a> {
    cursor: Cursor<&'a [u8]>,
    state: ReaderState,
}

impl<'a> SegmentWalker<'a> {
    fn new(data: &'a [u8], start: usize) -> Self {
        let mut cursor = Cursor::new(data);
        cursor.set_position(start as u64);
        Self {
            cursor,
            state: ReaderState::ReadSegmentHeader,
        }
    }

    fn remaining(&self) -> usize {
        let data = *self.cursor.get_ref();
        data.len().saturating_sub(self.cursor.position() as usize)
    }

    /// Advances to the next segment, returning its header and body.
    fn next_segment(&mut self) -> Result<Option<(SegmentHeader, &'a [u8])>> {
        loop {
            match self.state {
                ReaderState::ReadSegmentHeader => {
                    let remaining = self.remaining();
                    if remaining == 0 {
                        self.state = ReaderState::Done;
                        continue;
                    }
                    if remaining < SEGMENT_HEADER_SIZE {
                        return Err(CodecError::HeaderMismatch(format!(
                            "{} trailing bytes cannot hold a segment header",
                            remaining
                        )));
                    }
                    let header = SegmentHeader::parse(&mut self.cursor).map_err(|e| {
                        CodecError::HeaderMismatch(format!("segment header: {}", e))
                    })?;
                    header.validate()?;
                    self.state = ReaderState::ReadSegmentBody(header);
                }
                ReaderState::ReadSegmentBody(header) => {
                    let body_len = header.body_len();
                    if body_len > self.remaining() as u64 {
                        return Err(CodecError::HeaderMismatch(format!(
                            "segment body of {} bytes exceeds the {} remaining",
                            body_len,
                            self.remaining()
                        )));
                    }
                    let start = self.cursor.position() as usize;
                    let end = start + body_len as usize;
                    let data = *self.cursor.get_ref();
                    self.cursor.set_position(end as u64);
                    self.state = ReaderState::ReadSegmentHeader;
                    tracing::trace!(
                        event_type = header.event_type,
                        events = header.event_count,
                        "walked segment"
                    );
                    return Ok(Some((header, &data[start..end])));
                }
                ReaderState::Done
                | ReaderState::ReadMagicHeader
                | ReaderState::ReadCommentLines => return Ok(None),
            }
        }
    }
}

/// Two-pass reader over an in-memory AEDAT 3.1 container.
#[derive(Debug)]
pub struct AedatReader<'a> {
    data: &'a [u8],
    body_start: usize,
    schema: RecordSchema,
    diagnostics: Diagnostics,
}

impl<'a> AedatReader<'a> {
    /// Parses the text header and positions the reader at the first segment.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let mut state = ReaderState::ReadMagicHeader;
        let mut line = Vec::new();

        loop {
            match state {
                ReaderState::ReadMagicHeader => {
                    read_line(&mut cursor, &mut line);
                    let version = trim_line_ending(&line);
                    if version != AEDAT_MAGIC {
                        return Err(CodecError::UnsupportedContainerVersion(
                            String::from_utf8_lossy(version).into_owned(),
                        ));
                    }
                    state = ReaderState::ReadCommentLines;
                }
                ReaderState::ReadCommentLines => {
                    let peeked = cursor.fill_buf().map_or(&[][..], |b| b);
                    if peeked.first() == Some(&b'#') {
                        read_line(&mut cursor, &mut line);
                    } else {
                        state = ReaderState::ReadSegmentHeader;
                    }
                }
                _ => break,
            }
        }

        Ok(Self {
            data,
            body_start: cursor.position() as usize,
            schema: FormatId::AedatPolarity.schema(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Offset of the first segment header.
    pub fn body_start(&self) -> usize {
        self.body_start
    }

    /// Counters collected by the last call to [`read_events`](Self::read_events).
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// First pass: totals the valid polarity events declared by segment headers.
    pub fn count_polarity_events(&self) -> Result<usize> {
        let mut walker = SegmentWalker::new(self.data, self.body_start);
        let mut total = 0usize;
        while let Some((header, _)) = walker.next_segment()? {
            if header.is_polarity() {
                total += header.valid_count as usize;
            }
        }
        Ok(total)
    }

    /// Second pass: decodes every valid polarity event.
    pub fn read_events(&mut self, grid: PixelGrid) -> Result<Vec<Event>> {
        let expected = self.count_polarity_events()?;
        let mut events = Vec::with_capacity(expected);
        let mut diagnostics = Diagnostics::default();

        let builder = EventBuilder::new(&self.schema, grid);
        let ts_field = self.schema.field_index(Role::Timestamp);
        let mut clock = Reconstructor::new(TimestampMode::Absolute { scale: 1 })?;

        let mut walker = SegmentWalker::new(self.data, self.body_start);
        while let Some((header, body)) = walker.next_segment()? {
            if !header.is_polarity() {
                tracing::warn!(
                    event_type = header.event_type,
                    events = header.event_count,
                    "Not polarity events, segment skipped"
                );
                diagnostics.non_polarity_segments += 1;
                continue;
            }

            let mut valid_in_segment = 0u32;
            for record in decoder::decode(body, &self.schema, 0)? {
                diagnostics.records_decoded += 1;
                let raw_ts = ts_field.and_then(|i| record.get(i)).map_or(0, |v| v.as_i64());
                let ticks = parser::aedat_timestamp(header.ts_overflow, raw_ts as u32);
                match builder.build(&record, ticks) {
                    Some(event) => {
                        clock.accept(ticks)?;
                        valid_in_segment += 1;
                        events.push(event);
                    }
                    None => diagnostics.invalid_events += 1,
                }
            }

            if valid_in_segment != header.valid_count {
                tracing::warn!(
                    declared = header.valid_count,
                    decoded = valid_in_segment,
                    "segment valid_count disagrees with event validity bits"
                );
            }
        }

        tracing::debug!(
            events = events.len(),
            expected,
            skipped = diagnostics.skipped(),
            "read AEDAT container"
        );
        self.diagnostics = diagnostics;
        Ok(events)
    }
}

/// Reads all polarity events of an AEDAT 3.1 container.
pub fn read_aedat(data: &[u8], grid: PixelGrid) -> Result<(Vec<Event>, Diagnostics)> {
    let mut reader = AedatReader::new(data)?;
    let events = reader.read_events(grid)?;
    Ok((events, *reader.diagnostics()))
}

fn read_line(cursor: &mut Cursor<&[u8]>, line: &mut Vec<u8>) {
    line.clear();
    // Reading from an in-memory cursor cannot fail
    let _ = cursor.read_until(b'\n', line);
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(event_type: u16, events: &[(u32, u32)], valid_count: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&event_type.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&(events.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(events.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&valid_count.to_le_bytes());
        for &(data, ts) in events {
            bytes.extend_from_slice(&data.to_le_bytes());
            bytes.extend_from_slice(&ts.to_le_bytes());
        }
        bytes
    }

    fn polarity(x: u32, y: u32, on: bool, valid: bool) -> u32 {
        (x << 17) | (y << 2) | ((on as u32) << 1) | valid as u32
    }

    fn container(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = b"#!AER-DAT3.1\r\n#Format: RAW\r\n#!END-HEADER\r\n".to_vec();
        for s in segments {
            bytes.extend_from_slice(s);
        }
        bytes
    }

    #[test]
    fn test_header_parsing() {
        let data = container(&[]);
        let reader = AedatReader::new(&data).unwrap();
        assert_eq!(reader.body_start(), data.len());
        assert_eq!(reader.count_polarity_events().unwrap(), 0);
    }

    #[test]
    fn test_unsupported_version() {
        let data = b"#!AER-DAT2.0\r\n".to_vec();
        assert_eq!(
            AedatReader::new(&data).unwrap_err(),
            CodecError::UnsupportedContainerVersion("#!AER-DAT2.0".to_string())
        );
    }

    #[test]
    fn test_two_pass_counts_agree() {
        let data = container(&[
            segment(
                1,
                &[(polarity(1, 2, true, true), 10), (polarity(3, 4, false, true), 12)],
                2,
            ),
            segment(1, &[(polarity(5, 6, true, true), 15)], 1),
        ]);
        let mut reader = AedatReader::new(&data).unwrap();
        let expected = reader.count_polarity_events().unwrap();
        let events = reader.read_events(PixelGrid::DVS_GESTURE).unwrap();

        assert_eq!(expected, 3);
        assert_eq!(events.len(), expected);
        assert_eq!(events[1].spatial_coords, Some((4, 3)));
        assert_eq!(events[1].polarity, Some(false));
        assert_eq!(events[2].timestamp, 15);
    }

    #[test]
    fn test_non_polarity_segment_skipped() {
        let data = container(&[
            segment(2, &[(0xDEAD_BEEF, 1), (0x1234_5678, 2)], 2),
            segment(1, &[(polarity(1, 1, true, true), 3)], 1),
        ]);
        let (events, diagnostics) = read_aedat(&data, PixelGrid::DVS_GESTURE).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(diagnostics.non_polarity_segments, 1);
    }

    #[test]
    fn test_invalid_events_dropped() {
        let data = container(&[segment(
            1,
            &[(polarity(1, 1, true, false), 3), (polarity(2, 2, true, true), 4)],
            1,
        )]);
        let (events, diagnostics) = read_aedat(&data, PixelGrid::DVS_GESTURE).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(diagnostics.invalid_events, 1);
    }

    #[test]
    fn test_truncated_segment_is_header_mismatch() {
        let mut data = container(&[segment(1, &[(polarity(1, 1, true, true), 3)], 1)]);
        data.truncate(data.len() - 3);
        let mut reader = AedatReader::new(&data).unwrap();
        assert!(matches!(
            reader.read_events(PixelGrid::DVS_GESTURE),
            Err(CodecError::HeaderMismatch(_))
        ));
    }

    #[test]
    fn test_polarity_event_size_checked() {
        let mut bad = segment(1, &[(polarity(1, 1, true, true), 3)], 1);
        bad[4..8].copy_from_slice(&16u32.to_le_bytes());
        let data = container(&[bad]);
        let reader = AedatReader::new(&data).unwrap();
        assert!(matches!(
            reader.count_polarity_events(),
            Err(CodecError::HeaderMismatch(_))
        ));
    }
}
