//! Python bindings for the spike-log codec with numpy output.
//!
//! Decoded events are exposed as columnar numpy arrays and binned matrices as
//! 2-D float arrays.

use numpy::{IntoPyArray, PyArray1, PyArray2};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use spikelog_core::{
    decode_events, run, AccumulationPolicy, CodecError, Diagnostics, DecodedStream, FormatId,
    PipelineConfig, PixelGrid, TimeAxis,
};

fn codec_err(err: CodecError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn read_file(path: &str) -> PyResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| PyIOError::new_err(format!("Failed to read {}: {}", path, e)))
}

fn diagnostics_dict<'py>(py: Python<'py>, diagnostics: &Diagnostics) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    dict.set_item("records_decoded", diagnostics.records_decoded)?;
    dict.set_item("trailing_bytes_discarded", diagnostics.trailing_bytes_discarded)?;
    dict.set_item("overflow_sentinels", diagnostics.overflow_sentinels)?;
    dict.set_item("non_polarity_segments", diagnostics.non_polarity_segments)?;
    dict.set_item("invalid_events", diagnostics.invalid_events)?;
    dict.set_item("channel_out_of_range", diagnostics.channel_out_of_range)?;
    dict.set_item("layer_filtered", diagnostics.layer_filtered)?;
    Ok(dict)
}

/// Decode-side keyword arguments shared by every entry point.
struct DecodeArgs<'a> {
    format: &'a str,
    header_offset: Option<usize>,
    downsample: Option<u64>,
    layer: Option<i64>,
    flip: bool,
    grid: Option<(u16, u16)>,
}

impl DecodeArgs<'_> {
    fn config(&self) -> PyResult<PipelineConfig> {
        let format: FormatId = self.format.parse().map_err(codec_err)?;
        let mut config = PipelineConfig::new(format);
        config.header_offset = self.header_offset;
        config.downsample_divisor = self.downsample;
        config.layer = self.layer;
        config.vertical_flip = self.flip;
        config.grid = match self.grid {
            Some((0, _)) | Some((_, 0)) => {
                return Err(PyValueError::new_err("grid dimensions must be non-zero"))
            }
            Some((width, height)) => Some(PixelGrid::new(width, height)),
            None => None,
        };
        Ok(config)
    }
}

/// Container for decoded events in columnar layout.
///
/// Pixel columns are zero for simulator formats; `layer_id` is -1 when the
/// format carries no layer.
#[pyclass]
pub struct Events {
    timestamp: Vec<i64>,
    channel_id: Vec<i64>,
    amplitude: Vec<f64>,
    layer_id: Vec<i64>,
    x: Vec<u16>,
    y: Vec<u16>,
    polarity: Vec<u8>,
    learning_off_time: Option<f64>,
    diagnostics: Diagnostics,
}

#[pymethods]
impl Events {
    fn __len__(&self) -> usize {
        self.timestamp.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "Events(count={}, skipped={})",
            self.timestamp.len(),
            self.diagnostics.skipped()
        )
    }

    /// Reconstructed timestamps in ticks.
    #[getter]
    fn timestamp<'py>(&self, py: Python<'py>) -> &'py PyArray1<i64> {
        self.timestamp.clone().into_pyarray(py)
    }

    /// Alias for timestamp.
    #[getter]
    fn t<'py>(&self, py: Python<'py>) -> &'py PyArray1<i64> {
        self.timestamp.clone().into_pyarray(py)
    }

    #[getter]
    fn channel_id<'py>(&self, py: Python<'py>) -> &'py PyArray1<i64> {
        self.channel_id.clone().into_pyarray(py)
    }

    /// Amplitudes in stored units.
    #[getter]
    fn amplitude<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.amplitude.clone().into_pyarray(py)
    }

    #[getter]
    fn layer_id<'py>(&self, py: Python<'py>) -> &'py PyArray1<i64> {
        self.layer_id.clone().into_pyarray(py)
    }

    #[getter]
    fn x<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.x.clone().into_pyarray(py)
    }

    #[getter]
    fn y<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.y.clone().into_pyarray(py)
    }

    /// Values: 0 = OFF, 1 = ON
    #[getter]
    fn polarity<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.polarity.clone().into_pyarray(py)
    }

    /// Learning-off time from the spike logger header, if present.
    #[getter]
    fn learning_off_time(&self) -> Option<f64> {
        self.learning_off_time
    }

    /// Counters for records skipped without raising.
    #[getter]
    fn diagnostics<'py>(&self, py: Python<'py>) -> PyResult<&'py PyDict> {
        diagnostics_dict(py, &self.diagnostics)
    }

    /// Returns all arrays as a dictionary.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        dict.set_item("timestamp", self.timestamp.clone().into_pyarray(py))?;
        dict.set_item("channel_id", self.channel_id.clone().into_pyarray(py))?;
        dict.set_item("amplitude", self.amplitude.clone().into_pyarray(py))?;
        dict.set_item("layer_id", self.layer_id.clone().into_pyarray(py))?;
        dict.set_item("x", self.x.clone().into_pyarray(py))?;
        dict.set_item("y", self.y.clone().into_pyarray(py))?;
        dict.set_item("polarity", self.polarity.clone().into_pyarray(py))?;
        Ok(dict.into())
    }
}

impl Events {
    fn from_stream(stream: DecodedStream) -> Self {
        let len = stream.events.len();
        let mut timestamp = Vec::with_capacity(len);
        let mut channel_id = Vec::with_capacity(len);
        let mut amplitude = Vec::with_capacity(len);
        let mut layer_id = Vec::with_capacity(len);
        let mut x = Vec::with_capacity(len);
        let mut y = Vec::with_capacity(len);
        let mut polarity = Vec::with_capacity(len);

        for event in stream.events {
            let (row, col) = event.spatial_coords.unwrap_or((0, 0));
            timestamp.push(event.timestamp);
            channel_id.push(event.channel_id);
            amplitude.push(event.amplitude);
            layer_id.push(event.layer_id.unwrap_or(-1));
            x.push(col);
            y.push(row);
            polarity.push(event.polarity.unwrap_or(false) as u8);
        }

        Self {
            timestamp,
            channel_id,
            amplitude,
            layer_id,
            x,
            y,
            polarity,
            learning_off_time: stream.header.map(|h| h.learning_off_time),
            diagnostics: stream.diagnostics,
        }
    }
}

/// Decodes raw bytes of the given format.
///
/// Args:
///     data: Recording bytes
///     format: efficient-spike, full-spike, potential, nmnist or aedat-polarity
///     header_offset: Bytes to skip before the first record (format default if None)
///     downsample: Divisor applied to timestamps after reconstruction
///     layer: Keep only events of this layer
///     flip: Mirror camera rows to a top-left origin
///     grid: Sensor (width, height) for camera formats (format default if None)
///
/// Returns:
///     Events: Columnar decoded events
#[pyfunction]
#[pyo3(signature = (data, format, header_offset=None, downsample=None, layer=None, flip=false, grid=None))]
#[allow(clippy::too_many_arguments)]
fn decode_bytes(
    py: Python<'_>,
    data: &[u8],
    format: &str,
    header_offset: Option<usize>,
    downsample: Option<u64>,
    layer: Option<i64>,
    flip: bool,
    grid: Option<(u16, u16)>,
) -> PyResult<Py<Events>> {
    let config = DecodeArgs {
        format,
        header_offset,
        downsample,
        layer,
        flip,
        grid,
    }
    .config()?;
    let stream = decode_events(data, &config).map_err(codec_err)?;
    Py::new(py, Events::from_stream(stream))
}

/// Decodes a recording file.
///
/// Example:
///     >>> import spikelog
///     >>> events = spikelog.decode_file("spikes.log", "efficient-spike")
///     >>> print(f"Decoded {len(events)} events")
#[pyfunction]
#[pyo3(signature = (path, format, header_offset=None, downsample=None, layer=None, flip=false, grid=None))]
#[allow(clippy::too_many_arguments)]
fn decode_file(
    py: Python<'_>,
    path: &str,
    format: &str,
    header_offset: Option<usize>,
    downsample: Option<u64>,
    layer: Option<i64>,
    flip: bool,
    grid: Option<(u16, u16)>,
) -> PyResult<Py<Events>> {
    let data = read_file(path)?;
    decode_bytes(py, &data, format, header_offset, downsample, layer, flip, grid)
}

/// Decodes and time-bins raw bytes.
///
/// Args:
///     data: Recording bytes
///     format: Record format name
///     bin_width: Ticks per output row
///     channel_offset: Channel id mapped to column 0
///     channel_count: Number of columns (inferred if None)
///     policy: count, logical-or or sum-amplitude
///     strict: Raise on channels outside the range instead of skipping
///     observed: Emit rows only for bins that contain events
///
/// Returns:
///     tuple: (matrix, bins) where matrix is float64 [bins, channels] and
///     bins holds the bin index of every row
#[pyfunction]
#[pyo3(signature = (
    data, format, bin_width=1, channel_offset=0, channel_count=None, policy="count",
    strict=false, observed=false, header_offset=None, downsample=None, layer=None, flip=false,
    grid=None
))]
#[allow(clippy::too_many_arguments)]
fn resample_bytes<'py>(
    py: Python<'py>,
    data: &[u8],
    format: &str,
    bin_width: u64,
    channel_offset: i64,
    channel_count: Option<usize>,
    policy: &str,
    strict: bool,
    observed: bool,
    header_offset: Option<usize>,
    downsample: Option<u64>,
    layer: Option<i64>,
    flip: bool,
    grid: Option<(u16, u16)>,
) -> PyResult<(&'py PyArray2<f64>, &'py PyArray1<i64>)> {
    let mut config = DecodeArgs {
        format,
        header_offset,
        downsample,
        layer,
        flip,
        grid,
    }
    .config()?;
    config.bin_width = bin_width;
    config.channel_offset = channel_offset;
    config.channel_count = channel_count;
    config.policy = policy
        .parse::<AccumulationPolicy>()
        .map_err(PyValueError::new_err)?;
    config.strict_channel_range = strict;
    if observed {
        config.time_axis = TimeAxis::Observed;
    }

    let output = run(data, &config).map_err(codec_err)?;
    let bins = output.matrix.bins().to_vec();
    Ok((output.matrix.into_data().into_pyarray(py), bins.into_pyarray(py)))
}

/// Decodes and time-bins a recording file. See `resample_bytes` for arguments.
#[pyfunction]
#[pyo3(signature = (
    path, format, bin_width=1, channel_offset=0, channel_count=None, policy="count",
    strict=false, observed=false, header_offset=None, downsample=None, layer=None, flip=false,
    grid=None
))]
#[allow(clippy::too_many_arguments)]
fn resample_file<'py>(
    py: Python<'py>,
    path: &str,
    format: &str,
    bin_width: u64,
    channel_offset: i64,
    channel_count: Option<usize>,
    policy: &str,
    strict: bool,
    observed: bool,
    header_offset: Option<usize>,
    downsample: Option<u64>,
    layer: Option<i64>,
    flip: bool,
    grid: Option<(u16, u16)>,
) -> PyResult<(&'py PyArray2<f64>, &'py PyArray1<i64>)> {
    let data = read_file(path)?;
    resample_bytes(
        py,
        &data,
        format,
        bin_width,
        channel_offset,
        channel_count,
        policy,
        strict,
        observed,
        header_offset,
        downsample,
        layer,
        flip,
        grid,
    )
}

/// Names of the supported record formats.
#[pyfunction]
fn formats() -> Vec<&'static str> {
    FormatId::ALL.iter().map(|f| f.as_str()).collect()
}

/// Spike-log codec module for Python.
#[pymodule]
fn spikelog(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_function(wrap_pyfunction!(resample_bytes, m)?)?;
    m.add_function(wrap_pyfunction!(resample_file, m)?)?;
    m.add_function(wrap_pyfunction!(formats, m)?)?;
    m.add_class::<Events>()?;
    Ok(())
}
