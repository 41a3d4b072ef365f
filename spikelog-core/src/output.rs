//! Output format writers for binned matrices.
//!
//! Supports CSV for inspection and a compact little-endian binary layout for
//! programmatic loading.

use crate::resample::BinnedMatrix;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Magic bytes opening every binary matrix file.
pub const BINARY_MAGIC: &[u8; 8] = b"SPKMAT\0\0";

/// Binary layout version.
pub const BINARY_VERSION: u32 = 1;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixFormat {
    #[default]
    Csv,
    Binary,
}

impl std::str::FromStr for MatrixFormat {
    type Err = OutputError;

    /// Parses a format name or file extension like "csv" or "bin".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "bin" | "binary" => Ok(Self::Binary),
            other => Err(OutputError::InvalidFormat(format!(
                "Unsupported output format: .{}. Use .csv or .bin",
                other
            ))),
        }
    }
}

impl MatrixFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Binary => "bin",
        }
    }

    /// Picks the format from a path's extension, defaulting to CSV.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, OutputError> {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.parse(),
            None => Ok(Self::Csv),
        }
    }
}

/// CSV output writer for binned matrices.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes metadata lines and the column header.
    pub fn write_header(&mut self, matrix: &BinnedMatrix) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "%bins:{},{},{}",
            matrix.first_bin(),
            matrix.num_bins(),
            matrix.bin_width()
        )?;
        let channels = matrix.channels();
        writeln!(
            self.writer,
            "%channels:{},{}",
            channels.offset(),
            channels.len()
        )?;
        write!(self.writer, "bin")?;
        for column in 0..channels.len() {
            if let Some(id) = channels.channel_id(column) {
                write!(self.writer, ",{}", id)?;
            }
        }
        writeln!(self.writer)?;
        Ok(())
    }

    /// Writes one line per bin.
    pub fn write_rows(&mut self, matrix: &BinnedMatrix) -> Result<(), OutputError> {
        for (bin, row) in matrix.bins().iter().zip(matrix.data().rows()) {
            write!(self.writer, "{}", bin)?;
            for value in row {
                write!(self.writer, ",{}", value)?;
            }
            writeln!(self.writer)?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Binary output format for binned matrices.
///
/// Layout, all little-endian:
/// - magic "SPKMAT\0\0" (8 bytes)
/// - version: u32
/// - rows: u64, cols: u64
/// - first_bin: i64, bin_width: u64, channel_offset: i64
/// - bin index per row: i64 × rows
/// - cells: f64 × rows × cols, row-major
pub struct BinaryWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> BinaryWriter<W> {
    /// Creates a new binary writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the fixed header and the row labels.
    pub fn write_header(&mut self, matrix: &BinnedMatrix) -> Result<(), OutputError> {
        self.writer.write_all(BINARY_MAGIC)?;
        self.writer.write_u32::<LittleEndian>(BINARY_VERSION)?;
        self.writer.write_u64::<LittleEndian>(matrix.num_bins() as u64)?;
        self.writer
            .write_u64::<LittleEndian>(matrix.num_channels() as u64)?;
        self.writer.write_i64::<LittleEndian>(matrix.first_bin())?;
        self.writer.write_u64::<LittleEndian>(matrix.bin_width())?;
        self.writer
            .write_i64::<LittleEndian>(matrix.channels().offset())?;
        for &bin in matrix.bins() {
            self.writer.write_i64::<LittleEndian>(bin)?;
        }
        Ok(())
    }

    /// Writes every cell in row-major order.
    pub fn write_cells(&mut self, matrix: &BinnedMatrix) -> Result<(), OutputError> {
        for &value in matrix.data().iter() {
            self.writer.write_f64::<LittleEndian>(value)?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes a matrix to a CSV file.
pub fn write_csv<P: AsRef<Path>>(path: P, matrix: &BinnedMatrix) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = CsvWriter::new(file);
    writer.write_header(matrix)?;
    writer.write_rows(matrix)?;
    writer.flush()?;
    Ok(())
}

/// Writes a matrix to a binary file.
pub fn write_binary<P: AsRef<Path>>(path: P, matrix: &BinnedMatrix) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = BinaryWriter::new(file);
    writer.write_header(matrix)?;
    writer.write_cells(matrix)?;
    writer.flush()?;
    Ok(())
}

/// Writes a matrix in the format implied by the path's extension.
pub fn write_matrix<P: AsRef<Path>>(path: P, matrix: &BinnedMatrix) -> Result<(), OutputError> {
    match MatrixFormat::from_path(&path)? {
        MatrixFormat::Csv => write_csv(path, matrix),
        MatrixFormat::Binary => write_binary(path, matrix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::{resample, AccumulationPolicy, ResampleOptions};
    use crate::types::Event;
    use std::str::FromStr;

    fn sample_matrix() -> BinnedMatrix {
        let events = vec![
            Event::new(2, 10, 5.0),
            Event::new(2, 11, 3.0),
            Event::new(4, 10, 1.5),
        ];
        let options = ResampleOptions {
            bin_width: 2,
            channel_count: Some(2),
            channel_offset: 10,
            policy: AccumulationPolicy::SumAmplitude,
            ..Default::default()
        };
        resample(&events, &options).unwrap()
    }

    #[test]
    fn test_matrix_format_parsing() {
        assert_eq!(MatrixFormat::from_str("csv").unwrap(), MatrixFormat::Csv);
        assert_eq!(MatrixFormat::from_str(".BIN").unwrap(), MatrixFormat::Binary);
        assert!(MatrixFormat::from_str("npy").is_err());
        assert_eq!(
            MatrixFormat::from_path("out/matrix.bin").unwrap(),
            MatrixFormat::Binary
        );
        assert_eq!(MatrixFormat::from_path("matrix").unwrap(), MatrixFormat::Csv);
    }

    #[test]
    fn test_csv_writer() {
        let matrix = sample_matrix();
        let mut output = Vec::new();
        {
            let mut writer = CsvWriter::new(&mut output);
            writer.write_header(&matrix).unwrap();
            writer.write_rows(&matrix).unwrap();
            writer.flush().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output_str.lines().collect();
        assert_eq!(lines[0], "%bins:1,2,2");
        assert_eq!(lines[1], "%channels:10,2");
        assert_eq!(lines[2], "bin,10,11");
        assert_eq!(lines[3], "1,5,3");
        assert_eq!(lines[4], "2,1.5,0");
    }

    #[test]
    fn test_binary_writer_layout() {
        let matrix = sample_matrix();
        let mut output = Vec::new();
        {
            let mut writer = BinaryWriter::new(&mut output);
            writer.write_header(&matrix).unwrap();
            writer.write_cells(&matrix).unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(&output[0..8], BINARY_MAGIC);
        let rows = u64::from_le_bytes(output[12..20].try_into().unwrap());
        let cols = u64::from_le_bytes(output[20..28].try_into().unwrap());
        assert_eq!((rows, cols), (2, 2));
        let first_bin = i64::from_le_bytes(output[28..36].try_into().unwrap());
        assert_eq!(first_bin, 1);
        // header 52 bytes + 2 row labels + 4 cells
        assert_eq!(output.len(), 52 + 2 * 8 + 4 * 8);
        let first_cell = f64::from_le_bytes(output[68..76].try_into().unwrap());
        assert_eq!(first_cell, 5.0);
    }
}
