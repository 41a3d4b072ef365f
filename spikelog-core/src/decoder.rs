//! Schema-driven byte decoder.
//!
//! Slices a buffer into fixed-width records after an optional header and
//! unpacks each field according to its primitive type and byte order. A
//! trailing partial record is an interrupted write and is dropped silently.

use crate::error::{CodecError, Result};
use crate::schema::{Endian, FieldSpec, FormatId, Primitive, RecordSchema};
use crate::types::{RawRecord, Scalar, SessionHeader};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Lazy iterator over the records of a buffer.
///
/// Clone it before consuming to walk the same records again.
#[derive(Debug, Clone)]
pub struct RecordIter<'a> {
    body: &'a [u8],
    schema: &'a RecordSchema,
    position: usize,
}

impl<'a> RecordIter<'a> {
    /// Number of bytes after the last complete record.
    pub fn trailing_bytes(&self) -> usize {
        self.body.len() % self.schema.record_width()
    }

    /// Total number of complete records in the buffer.
    pub fn record_count(&self) -> usize {
        self.body.len() / self.schema.record_width()
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        let width = self.schema.record_width();
        let end = self.position + width;
        if end > self.body.len() {
            return None;
        }
        let record = decode_record(&self.body[self.position..end], self.schema);
        self.position = end;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.body.len() - self.position) / self.schema.record_width();
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for RecordIter<'a> {}

/// Decodes the records of a buffer lazily.
///
/// Fails only when the buffer cannot hold the header.
pub fn decode<'a>(
    buffer: &'a [u8],
    schema: &'a RecordSchema,
    header_offset: usize,
) -> Result<RecordIter<'a>> {
    if buffer.len() < header_offset {
        return Err(CodecError::TruncatedHeader {
            len: buffer.len(),
            header_offset,
        });
    }
    Ok(RecordIter {
        body: &buffer[header_offset..],
        schema,
        position: 0,
    })
}

/// Decodes every complete record of a buffer into memory.
pub fn decode_all(
    buffer: &[u8],
    schema: &RecordSchema,
    header_offset: usize,
) -> Result<Vec<RawRecord>> {
    let records: Vec<RawRecord> = decode(buffer, schema, header_offset)?.collect();
    tracing::debug!(
        format = %schema.format(),
        records = records.len(),
        trailing = (buffer.len() - header_offset) % schema.record_width(),
        "decoded buffer"
    );
    Ok(records)
}

/// Encodes records back into their binary layout, without any header.
pub fn encode(records: &[RawRecord], schema: &RecordSchema) -> Vec<u8> {
    let width = schema.record_width();
    let mut out = vec![0u8; records.len() * width];
    for (record, chunk) in records.iter().zip(out.chunks_exact_mut(width)) {
        let mut offset = 0;
        for (index, field) in schema.fields().iter().enumerate() {
            let size = field.primitive.width();
            if let Some(value) = record.get(index) {
                write_scalar(&mut chunk[offset..offset + size], field, value);
            }
            offset += size;
        }
    }
    out
}

/// Reads the spike logger's session header, if the format carries one.
pub fn session_header(buffer: &[u8], format: FormatId) -> Option<SessionHeader> {
    match format {
        FormatId::EfficientSpike | FormatId::FullSpike if buffer.len() >= 8 => {
            Some(SessionHeader {
                learning_off_time: LittleEndian::read_f64(&buffer[..8]),
            })
        }
        _ => None,
    }
}

/// Decodes one record-sized slice.
#[inline]
pub fn decode_record(bytes: &[u8], schema: &RecordSchema) -> RawRecord {
    let mut values = Vec::with_capacity(schema.fields().len());
    let mut offset = 0;
    for field in schema.fields() {
        let size = field.primitive.width();
        values.push(read_scalar(&bytes[offset..offset + size], field));
        offset += size;
    }
    RawRecord::new(values)
}

#[inline]
fn read_scalar(bytes: &[u8], field: &FieldSpec) -> Scalar {
    match field.endian {
        Endian::Little => read_with::<LittleEndian>(bytes, field.primitive),
        Endian::Big => read_with::<BigEndian>(bytes, field.primitive),
    }
}

#[inline]
fn read_with<B: ByteOrder>(bytes: &[u8], primitive: Primitive) -> Scalar {
    match primitive {
        Primitive::I8 => Scalar::I8(bytes[0] as i8),
        Primitive::U8 => Scalar::U8(bytes[0]),
        Primitive::Bool => Scalar::Bool(bytes[0] != 0),
        Primitive::I16 => Scalar::I16(B::read_i16(bytes)),
        Primitive::U16 => Scalar::U16(B::read_u16(bytes)),
        Primitive::I32 => Scalar::I32(B::read_i32(bytes)),
        Primitive::U32 => Scalar::U32(B::read_u32(bytes)),
        Primitive::F32 => Scalar::F32(B::read_f32(bytes)),
        Primitive::F64 => Scalar::F64(B::read_f64(bytes)),
    }
}

fn write_scalar(bytes: &mut [u8], field: &FieldSpec, value: Scalar) {
    match field.endian {
        Endian::Little => write_with::<LittleEndian>(bytes, field.primitive, value),
        Endian::Big => write_with::<BigEndian>(bytes, field.primitive, value),
    }
}

fn write_with<B: ByteOrder>(bytes: &mut [u8], primitive: Primitive, value: Scalar) {
    match (primitive, value) {
        (Primitive::F32, Scalar::F32(v)) => B::write_f32(bytes, v),
        (Primitive::F64, Scalar::F64(v)) => B::write_f64(bytes, v),
        (Primitive::F32, other) => B::write_f32(bytes, other.as_f64() as f32),
        (Primitive::F64, other) => B::write_f64(bytes, other.as_f64()),
        (Primitive::I8, v) => bytes[0] = v.as_i64() as i8 as u8,
        (Primitive::U8, v) => bytes[0] = v.as_i64() as u8,
        (Primitive::Bool, v) => bytes[0] = (v.as_i64() != 0) as u8,
        (Primitive::I16, v) => B::write_i16(bytes, v.as_i64() as i16),
        (Primitive::U16, v) => B::write_u16(bytes, v.as_i64() as u16),
        (Primitive::I32, v) => B::write_i32(bytes, v.as_i64() as i32),
        (Primitive::U32, v) => B::write_u32(bytes, v.as_i64() as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn potential_record(delta: i32, potential: i16, neuron: i16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&delta.to_le_bytes());
        bytes.extend_from_slice(&potential.to_le_bytes());
        bytes.extend_from_slice(&neuron.to_le_bytes());
        bytes
    }

    #[test]
    fn test_decode_potential_records() {
        let schema = FormatId::Potential.schema();
        let mut buffer = potential_record(100, 50, 128);
        buffer.extend(potential_record(-7, -30, 129));

        let records = decode_all(&buffer, &schema, 0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].values(),
            &[Scalar::I32(-7), Scalar::I16(-30), Scalar::I16(129)]
        );
    }

    #[test]
    fn test_trailing_partial_record_dropped() {
        let schema = FormatId::Potential.schema();
        let mut buffer = potential_record(100, 50, 128);
        buffer.extend_from_slice(&[1, 2, 3]);

        let iter = decode(&buffer, &schema, 0).unwrap();
        assert_eq!(iter.trailing_bytes(), 3);
        assert_eq!(iter.record_count(), 1);
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn test_header_skipped() {
        let schema = FormatId::Potential.schema();
        let mut buffer = vec![0xAA; 8];
        buffer.extend(potential_record(200, 1, 2));

        let records = decode_all(&buffer, &schema, 8).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(0), Some(Scalar::I32(200)));
    }

    #[test]
    fn test_truncated_header() {
        let schema = FormatId::EfficientSpike.schema();
        let err = decode(&[0u8; 5], &schema, 8).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedHeader {
                len: 5,
                header_offset: 8
            }
        );
        // A buffer holding exactly the header has no records
        assert_eq!(decode(&[0u8; 8], &schema, 8).unwrap().count(), 0);
    }

    #[test]
    fn test_iterator_restartable() {
        let schema = FormatId::Potential.schema();
        let mut buffer = potential_record(1, 2, 3);
        buffer.extend(potential_record(4, 5, 6));

        let iter = decode(&buffer, &schema, 0).unwrap();
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_nmnist_big_endian_field() {
        let schema = FormatId::Nmnist.schema();
        let buffer = [7u8, 9, 0x81, 0x01, 0x02];
        let records = decode_all(&buffer, &schema, 0).unwrap();
        assert_eq!(
            records[0].values(),
            &[
                Scalar::U8(7),
                Scalar::U8(9),
                Scalar::U8(0x81),
                Scalar::U16(0x0102)
            ]
        );
    }

    #[test]
    fn test_full_spike_round_trip() {
        let schema = FormatId::FullSpike.schema();
        let mut buffer = Vec::new();
        for i in 0..3i16 {
            buffer.extend_from_slice(&(1.25f64 * i as f64).to_le_bytes());
            buffer.extend_from_slice(&0.5f32.to_le_bytes());
            buffer.extend_from_slice(&(-0.75f32).to_le_bytes());
            buffer.extend_from_slice(&(i * 10).to_le_bytes());
            buffer.extend_from_slice(&(i + 1).to_le_bytes());
            buffer.extend_from_slice(&(800 + i).to_le_bytes());
            buffer.push(1);
        }
        let records = decode_all(&buffer, &schema, 0).unwrap();
        assert_eq!(encode(&records, &schema), buffer);
    }

    #[test]
    fn test_session_header() {
        let mut buffer = 42.5f64.to_le_bytes().to_vec();
        buffer.extend(potential_record(1, 2, 3));
        assert_eq!(
            session_header(&buffer, FormatId::EfficientSpike),
            Some(SessionHeader {
                learning_off_time: 42.5
            })
        );
        assert_eq!(session_header(&buffer, FormatId::Potential), None);
    }
}
