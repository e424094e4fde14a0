//! ENVI header + raw binary cube files.
//!
//! Header: an `ENVI` magic line followed by `key = value` lines; values in
//! braces may span several lines. Raw file: samples of one `data type`, in
//! `bsq`, `bil` or `bip` interleave, in the byte order the header names.
//!
//! Structural keys (`samples`, `lines`, `bands`, `header offset`,
//! `data type`, `interleave`, `byte order`, `file type`) are consumed by the
//! reader; all other fields become [`Metadata`]. The writer always emits
//! float64, `bsq`, little-endian.

use super::{HyperspectralCube, Metadata};
use crate::error::{AppResult, SnapError};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use ndarray::Array3;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const MAGIC: &str = "ENVI";
const STRUCTURAL_KEYS: [&str; 8] = [
    "samples",
    "lines",
    "bands",
    "header offset",
    "data type",
    "interleave",
    "byte order",
    "file type",
];
const RAW_EXTENSIONS: [&str; 3] = ["dat", "raw", "img"];

/// Sample encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 1: unsigned 8-bit
    U8,
    /// 2: signed 16-bit
    I16,
    /// 3: signed 32-bit
    I32,
    /// 4: float32
    F32,
    /// 5: float64
    F64,
    /// 12: unsigned 16-bit
    U16,
}

impl DataType {
    /// Decode an ENVI `data type` code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::U8),
            2 => Some(Self::I16),
            3 => Some(Self::I32),
            4 => Some(Self::F32),
            5 => Some(Self::F64),
            12 => Some(Self::U16),
            _ => None,
        }
    }

    /// ENVI `data type` code.
    pub fn code(self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 => 3,
            Self::F32 => 4,
            Self::F64 => 5,
            Self::U16 => 12,
        }
    }

    /// Bytes per sample.
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Sample ordering in the raw file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleave {
    /// Band sequential: `[band][line][sample]`
    Bsq,
    /// Band interleaved by line: `[line][band][sample]`
    Bil,
    /// Band interleaved by pixel: `[line][sample][band]`
    Bip,
}

impl std::str::FromStr for Interleave {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bsq" => Ok(Self::Bsq),
            "bil" => Ok(Self::Bil),
            "bip" => Ok(Self::Bip),
            other => Err(format!("unknown interleave '{other}'")),
        }
    }
}

/// Parsed ENVI header.
#[derive(Debug, Clone, PartialEq)]
pub struct EnviHeader {
    /// Columns
    pub samples: usize,
    /// Rows
    pub lines: usize,
    /// Spectral bands
    pub bands: usize,
    /// Bytes to skip at the start of the raw file
    pub header_offset: usize,
    /// Sample encoding
    pub data_type: DataType,
    /// Sample ordering
    pub interleave: Interleave,
    /// `true` for `byte order = 1`
    pub big_endian: bool,
    /// Every non-structural field
    pub metadata: Metadata,
}

impl EnviHeader {
    fn sample_count(&self) -> Option<usize> {
        self.samples
            .checked_mul(self.lines)?
            .checked_mul(self.bands)
    }

    /// Sample count and the end of the payload in the raw file, or `None`
    /// when the header dimensions do not fit in memory.
    fn extent(&self) -> Option<(usize, usize)> {
        let count = self.sample_count()?;
        let end = count
            .checked_mul(self.data_type.size())?
            .checked_add(self.header_offset)?;
        Some((count, end))
    }
}

/// Parse header text. Errors are plain messages; callers attach the path.
pub fn parse_header(text: &str) -> Result<EnviHeader, String> {
    let mut lines = text.lines();
    match lines.next() {
        Some(first) if first.trim() == MAGIC => {}
        _ => return Err(format!("missing '{MAGIC}' magic line")),
    }

    let mut fields = Metadata::new();
    let mut pending: Option<(String, String)> = None;
    for line in lines {
        if let Some((key, mut value)) = pending.take() {
            value.push('\n');
            value.push_str(line);
            if line.contains('}') {
                fields.insert(key, value);
            } else {
                pending = Some((key, value));
            }
            continue;
        }

        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("malformed header line '{line}'"));
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if value.starts_with('{') && !value.contains('}') {
            pending = Some((key, value));
        } else {
            fields.insert(key, value);
        }
    }
    if let Some((key, _)) = pending {
        return Err(format!("unterminated value for '{key}'"));
    }

    let number = |key: &str| -> Result<usize, String> {
        fields
            .get(key)
            .ok_or_else(|| format!("missing '{key}'"))?
            .parse::<usize>()
            .map_err(|e| format!("invalid '{key}': {e}"))
    };
    let samples = number("samples")?;
    let lines = number("lines")?;
    let bands = number("bands")?;
    let header_offset = fields
        .get("header offset")
        .map(|v| v.parse::<usize>())
        .transpose()
        .map_err(|e| format!("invalid 'header offset': {e}"))?
        .unwrap_or(0);
    let code = number("data type")?;
    let data_type = u32::try_from(code)
        .ok()
        .and_then(DataType::from_code)
        .ok_or_else(|| format!("unsupported data type {code}"))?;
    let interleave = fields
        .get("interleave")
        .map(|v| v.parse::<Interleave>())
        .transpose()?
        .unwrap_or(Interleave::Bsq);
    let big_endian = match fields.get("byte order").map(String::as_str) {
        None | Some("0") => false,
        Some("1") => true,
        Some(other) => return Err(format!("invalid byte order '{other}'")),
    };

    for key in STRUCTURAL_KEYS {
        fields.remove(key);
    }

    Ok(EnviHeader {
        samples,
        lines,
        bands,
        header_offset,
        data_type,
        interleave,
        big_endian,
        metadata: fields,
    })
}

/// Read and parse a header file.
pub fn read_header(path: &Path) -> AppResult<EnviHeader> {
    let text = std::fs::read_to_string(path)?;
    parse_header(&text).map_err(|message| SnapError::cube_format(path, message))
}

/// Raw file paired with `header`: same stem with a known data extension, or
/// no extension at all.
pub fn raw_path_for(header: &Path) -> Option<PathBuf> {
    RAW_EXTENSIONS
        .iter()
        .map(|ext| header.with_extension(ext))
        .chain(std::iter::once(header.with_extension("")))
        .find(|candidate| candidate.is_file())
}

/// Read a cube from its header and raw file.
pub fn read_cube(header_path: &Path, raw_path: &Path) -> AppResult<HyperspectralCube> {
    let header = read_header(header_path)?;
    let bytes = std::fs::read(raw_path)?;

    let (count, needed) = header
        .extent()
        .ok_or_else(|| SnapError::cube_format(raw_path, "header dimensions overflow"))?;
    if bytes.len() < needed {
        return Err(SnapError::cube_format(
            raw_path,
            format!("expected at least {needed} bytes, found {}", bytes.len()),
        ));
    }
    let payload = &bytes[header.header_offset..needed];

    let samples = if header.big_endian {
        decode::<BigEndian>(payload, header.data_type, count)
    } else {
        decode::<LittleEndian>(payload, header.data_type, count)
    };

    let (l, s, b) = (header.lines, header.samples, header.bands);
    let shape_err = |e: ndarray::ShapeError| SnapError::cube_format(raw_path, e.to_string());
    let data = match header.interleave {
        Interleave::Bsq => Array3::from_shape_vec((b, l, s), samples)
            .map_err(shape_err)?
            .permuted_axes([1, 2, 0]),
        Interleave::Bil => Array3::from_shape_vec((l, b, s), samples)
            .map_err(shape_err)?
            .permuted_axes([0, 2, 1]),
        Interleave::Bip => Array3::from_shape_vec((l, s, b), samples).map_err(shape_err)?,
    };

    Ok(HyperspectralCube::new(
        data.as_standard_layout().into_owned(),
        header.metadata,
    ))
}

fn decode<B: ByteOrder>(payload: &[u8], data_type: DataType, count: usize) -> Vec<f64> {
    match data_type {
        DataType::U8 => payload.iter().map(|&v| f64::from(v)).collect(),
        DataType::I16 => {
            let mut buf = vec![0i16; count];
            B::read_i16_into(payload, &mut buf);
            buf.into_iter().map(f64::from).collect()
        }
        DataType::U16 => {
            let mut buf = vec![0u16; count];
            B::read_u16_into(payload, &mut buf);
            buf.into_iter().map(f64::from).collect()
        }
        DataType::I32 => {
            let mut buf = vec![0i32; count];
            B::read_i32_into(payload, &mut buf);
            buf.into_iter().map(f64::from).collect()
        }
        DataType::F32 => {
            let mut buf = vec![0f32; count];
            B::read_f32_into(payload, &mut buf);
            buf.into_iter().map(f64::from).collect()
        }
        DataType::F64 => {
            let mut buf = vec![0f64; count];
            B::read_f64_into(payload, &mut buf);
            buf
        }
    }
}

/// Render the header for `cube` as float64, `bsq`, little-endian.
pub fn format_header(cube: &HyperspectralCube) -> String {
    let (rows, cols, bands) = cube.shape();
    let mut out = String::from(MAGIC);
    out.push('\n');
    if !cube.metadata().contains_key("description") {
        out.push_str("description = {lasesnap combined cube}\n");
    }
    out.push_str(&format!("samples = {cols}\n"));
    out.push_str(&format!("lines = {rows}\n"));
    out.push_str(&format!("bands = {bands}\n"));
    out.push_str("header offset = 0\n");
    out.push_str("file type = ENVI Standard\n");
    out.push_str(&format!("data type = {}\n", DataType::F64.code()));
    out.push_str("interleave = bsq\n");
    out.push_str("byte order = 0\n");
    for (key, value) in cube.metadata() {
        out.push_str(&format!("{key} = {value}\n"));
    }
    out
}

/// Write `cube` as a header/raw pair.
pub fn write_cube(header_path: &Path, raw_path: &Path, cube: &HyperspectralCube) -> AppResult<()> {
    std::fs::write(header_path, format_header(cube))?;

    let mut writer = BufWriter::new(File::create(raw_path)?);
    // bsq: band-major, then row, then column
    for value in cube.data().view().permuted_axes([2, 0, 1]).iter() {
        writer.write_f64::<LittleEndian>(*value)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const HEADER: &str = "ENVI
description = {
  Specim IQ capture}
samples = 2
lines = 2
bands = 2
header offset = 0
file type = ENVI Standard
data type = 12
interleave = bil
byte order = 0
wavelength = { 397.32, 400.20 }
";

    #[test]
    fn parses_structure_and_keeps_metadata() {
        let header = parse_header(HEADER).unwrap();
        assert_eq!((header.lines, header.samples, header.bands), (2, 2, 2));
        assert_eq!(header.data_type, DataType::U16);
        assert_eq!(header.interleave, Interleave::Bil);
        assert!(!header.big_endian);
        assert_eq!(header.metadata["wavelength"], "{ 397.32, 400.20 }");
        assert!(header.metadata["description"].contains("Specim IQ capture"));
        assert!(!header.metadata.contains_key("samples"));
    }

    #[test]
    fn rejects_missing_magic_and_unknown_type() {
        assert!(parse_header("samples = 1\n").is_err());
        let bad = HEADER.replace("data type = 12", "data type = 6");
        assert!(parse_header(&bad).unwrap_err().contains("unsupported data type"));
    }

    #[test]
    fn reads_bil_u16() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("cube.hdr");
        let raw = dir.path().join("cube.raw");
        std::fs::write(&hdr, HEADER).unwrap();

        // bil: line 0 band 0, line 0 band 1, line 1 band 0, line 1 band 1
        let values: [u16; 8] = [1, 2, 10, 20, 3, 4, 30, 40];
        let mut bytes = vec![0u8; 16];
        LittleEndian::write_u16_into(&values, &mut bytes);
        std::fs::write(&raw, bytes).unwrap();

        assert_eq!(raw_path_for(&hdr), Some(raw.clone()));
        let cube = read_cube(&hdr, &raw).unwrap();
        assert_eq!(cube.shape(), (2, 2, 2));
        assert_eq!(
            cube.data().index_axis(ndarray::Axis(2), 0),
            array![[1.0, 2.0], [3.0, 4.0]]
        );
        assert_eq!(
            cube.data().index_axis(ndarray::Axis(2), 1),
            array![[10.0, 20.0], [30.0, 40.0]]
        );
    }

    #[test]
    fn big_endian_bip_f32() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("be.hdr");
        let raw = dir.path().join("be.img");
        std::fs::write(
            &hdr,
            "ENVI\nsamples = 1\nlines = 1\nbands = 3\ndata type = 4\ninterleave = bip\nbyte order = 1\n",
        )
        .unwrap();
        let mut bytes = vec![0u8; 12];
        BigEndian::write_f32_into(&[0.5, 1.5, 2.5], &mut bytes);
        std::fs::write(&raw, bytes).unwrap();

        let cube = read_cube(&hdr, &raw).unwrap();
        assert_eq!(cube.data()[[0, 0, 2]], 2.5);
    }

    #[test]
    fn short_raw_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("short.hdr");
        let raw = dir.path().join("short.dat");
        std::fs::write(&hdr, HEADER).unwrap();
        std::fs::write(&raw, [0u8; 3]).unwrap();
        assert!(matches!(
            read_cube(&hdr, &raw),
            Err(SnapError::CubeFormat { .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("huge.hdr");
        let raw = dir.path().join("huge.dat");
        std::fs::write(
            &hdr,
            "ENVI\nsamples = 4294967296\nlines = 4294967296\nbands = 2\ndata type = 12\n",
        )
        .unwrap();
        std::fs::write(&raw, [0u8; 16]).unwrap();
        match read_cube(&hdr, &raw) {
            Err(SnapError::CubeFormat { message, .. }) => assert!(message.contains("overflow")),
            other => panic!("expected CubeFormat, got {other:?}"),
        }

        let offset = format!(
            "ENVI\nsamples = 1\nlines = 1\nbands = 1\nheader offset = {}\ndata type = 1\n",
            usize::MAX
        );
        std::fs::write(&hdr, offset).unwrap();
        assert!(matches!(
            read_cube(&hdr, &raw),
            Err(SnapError::CubeFormat { .. })
        ));
    }

    #[test]
    fn written_cube_reads_back_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("union.hdr");
        let raw = dir.path().join("union.dat");

        let mut cube = HyperspectralCube::new(
            Array3::from_shape_fn((2, 3, 4), |(r, c, b)| (r * 100 + c * 10 + b) as f64),
            Metadata::new(),
        );
        cube.metadata_mut()
            .insert("wavelength units".into(), "Nanometers".into());
        write_cube(&hdr, &raw, &cube).unwrap();

        let text = std::fs::read_to_string(&hdr).unwrap();
        assert!(text.starts_with("ENVI\n"));
        assert!(text.contains("data type = 5"));
        assert_eq!(std::fs::metadata(&raw).unwrap().len(), 2 * 3 * 4 * 8);

        let back = read_cube(&hdr, &raw).unwrap();
        assert_eq!(back.data(), cube.data());
        assert_eq!(back.metadata()["wavelength units"], "Nanometers");
    }
}
