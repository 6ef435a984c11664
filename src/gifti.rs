//! Functions for reading GIFTI files (`.gii`), the XML-based format for data on brain surface meshes.
//!
//! A GIFTI file contains a list of data arrays, e.g. per-vertex scalars like cortical thickness, or the
//! vertex coordinates and faces of a mesh. Each array may be stored as ASCII text, base64 encoded binary,
//! or zlib-compressed base64 encoded binary. See <https://www.nitrc.org/projects/gifti/>.

use base64::Engine;
use byteordered::{ByteOrdered, Endianness};
use flate2::read::ZlibDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use crate::dense_mapping::Structure;
use crate::error::{GrayordinatesError, Result};
use crate::util::read_file_bytes;

/// Metadata key naming the anatomical structure a GIFTI file or data array belongs to.
pub const META_ANATOMICAL_STRUCTURE: &str = "AnatomicalStructurePrimary";

/// Element types of GIFTI data arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftiDataType {
    UInt8,
    Int8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    Float32,
    Float64,
}

impl GiftiDataType {
    pub fn from_name(name: &str) -> Result<GiftiDataType> {
        match name {
            "NIFTI_TYPE_UINT8" => Ok(GiftiDataType::UInt8),
            "NIFTI_TYPE_INT8" => Ok(GiftiDataType::Int8),
            "NIFTI_TYPE_INT16" => Ok(GiftiDataType::Int16),
            "NIFTI_TYPE_UINT16" => Ok(GiftiDataType::UInt16),
            "NIFTI_TYPE_INT32" => Ok(GiftiDataType::Int32),
            "NIFTI_TYPE_UINT32" => Ok(GiftiDataType::UInt32),
            "NIFTI_TYPE_INT64" => Ok(GiftiDataType::Int64),
            "NIFTI_TYPE_FLOAT32" => Ok(GiftiDataType::Float32),
            "NIFTI_TYPE_FLOAT64" => Ok(GiftiDataType::Float64),
            other => Err(GrayordinatesError::InvalidGifti(format!("unsupported DataType '{}'", other))),
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            GiftiDataType::UInt8 | GiftiDataType::Int8 => 1,
            GiftiDataType::Int16 | GiftiDataType::UInt16 => 2,
            GiftiDataType::Int32 | GiftiDataType::UInt32 | GiftiDataType::Float32 => 4,
            GiftiDataType::Int64 | GiftiDataType::Float64 => 8,
        }
    }
}

/// How the `Data` element of a data array is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftiEncoding {
    Ascii,
    Base64Binary,
    GZipBase64Binary,
}

impl GiftiEncoding {
    pub fn from_name(name: &str) -> Result<GiftiEncoding> {
        match name {
            "ASCII" => Ok(GiftiEncoding::Ascii),
            "Base64Binary" => Ok(GiftiEncoding::Base64Binary),
            "GZipBase64Binary" => Ok(GiftiEncoding::GZipBase64Binary),
            "ExternalFileBinary" => Err(GrayordinatesError::InvalidGifti(String::from("external data files are not supported"))),
            other => Err(GrayordinatesError::InvalidGifti(format!("unsupported Encoding '{}'", other))),
        }
    }
}


/// A single GIFTI data array. The values are stored as `f64` in the order they appear in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct GiftiDataArray {
    pub intent: String,
    pub data_type: GiftiDataType,
    pub encoding: GiftiEncoding,
    pub endianness: Endianness,
    pub column_major: bool,
    pub dims: Vec<usize>,
    pub metadata: BTreeMap<String, String>,
    pub data: Vec<f64>,
}

impl GiftiDataArray {
    /// The number of elements given by the array dimensions.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}


/// Models a GIFTI file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GiftiImage {
    pub version: String,
    pub metadata: BTreeMap<String, String>,
    pub data_arrays: Vec<GiftiDataArray>,
}

impl GiftiImage {

    /// Read a GIFTI file. Gzip-compressed files are decompressed transparently.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<GiftiImage> {
        GiftiImage::from_bytes(&read_file_bytes(path)?)
    }

    /// Parse a GIFTI document from its raw (uncompressed) bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<GiftiImage> {
        let text = std::str::from_utf8(bytes).map_err(|_| GrayordinatesError::InvalidGifti(String::from("file is not valid UTF-8")))?;
        text.parse()
    }

    /// The cortical hemisphere this file belongs to, from the `AnatomicalStructurePrimary` metadata
    /// of the file or, if missing there, of its first data array.
    pub fn hemisphere(&self) -> Option<Structure> {
        let value = self.metadata.get(META_ANATOMICAL_STRUCTURE)
            .or_else(|| self.data_arrays.first().and_then(|a| a.metadata.get(META_ANATOMICAL_STRUCTURE)))?;
        match value.as_str() {
            "CortexLeft" => Some(Structure::CortexLeft),
            "CortexRight" => Some(Structure::CortexRight),
            _ => None,
        }
    }
}

impl FromStr for GiftiImage {
    type Err = GrayordinatesError;

    /// Parse a GIFTI document.
    fn from_str(text: &str) -> Result<GiftiImage> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut image = GiftiImage::default();
        let mut seen_root = false;

        let mut current_element = String::new();
        let mut pending: Option<PendingArray> = None;
        let mut md_name = String::new();
        let mut md_value = String::new();
        let mut data_text = String::new();

        loop {
            match reader.read_event()? {
                Event::Start(ref e) => {
                    let name = element_name(e);
                    match name.as_str() {
                        "GIFTI" => {
                            seen_root = true;
                            image.version = attribute(e, "Version")?.unwrap_or_default();
                        }
                        "DataArray" => pending = Some(PendingArray::from_element(e)?),
                        "MD" => {
                            md_name.clear();
                            md_value.clear();
                        }
                        "Data" => data_text.clear(),
                        _ => {}
                    }
                    current_element = name;
                }
                Event::Empty(ref e) => match element_name(e).as_str() {
                    "DataArray" => return Err(GrayordinatesError::InvalidGifti(String::from("DataArray without Data element"))),
                    "Data" => data_text.clear(),
                    _ => {}
                },
                Event::Text(ref e) => {
                    let text = e.unescape()?;
                    collect_text(&current_element, &text, &mut md_name, &mut md_value, &mut data_text);
                }
                Event::CData(ref e) => {
                    let text = String::from_utf8_lossy(e);
                    collect_text(&current_element, &text, &mut md_name, &mut md_value, &mut data_text);
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    match name.as_str() {
                        "MD" => {
                            let target = match pending.as_mut() {
                                Some(array) => &mut array.metadata,
                                None => &mut image.metadata,
                            };
                            target.insert(md_name.clone(), md_value.clone());
                        }
                        "DataArray" => {
                            if let Some(array) = pending.take() {
                                image.data_arrays.push(array.decode(&data_text)?);
                            }
                        }
                        _ => {}
                    }
                    current_element.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(GrayordinatesError::InvalidGifti(String::from("no GIFTI root element")));
        }
        Ok(image)
    }
}

impl fmt::Display for GiftiImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GIFTI file version '{}' with {} data arrays.", self.version, self.data_arrays.len())
    }
}


/// Read a GIFTI file.
///
/// # Examples
///
/// ```no_run
/// let gii = grayordinates::read_gifti("/path/to/lh.thickness.func.gii").unwrap();
/// println!("First array has {} values.", gii.data_arrays[0].data.len());
/// ```
pub fn read_gifti<P: AsRef<Path>>(path: P) -> Result<GiftiImage> {
    GiftiImage::from_file(path)
}


/// Header attributes of a `DataArray` whose `Data` has not been seen yet.
struct PendingArray {
    intent: String,
    data_type: GiftiDataType,
    encoding: GiftiEncoding,
    endianness: Endianness,
    column_major: bool,
    dims: Vec<usize>,
    metadata: BTreeMap<String, String>,
}

impl PendingArray {
    fn from_element(e: &BytesStart) -> Result<PendingArray> {
        let required = |key: &str| -> Result<String> {
            attribute(e, key)?.ok_or_else(|| GrayordinatesError::InvalidGifti(format!("DataArray lacks attribute '{}'", key)))
        };

        let dimensionality: usize = parse_number(&required("Dimensionality")?)?;
        let mut dims = Vec::with_capacity(dimensionality);
        for dim_idx in 0..dimensionality {
            dims.push(parse_number(&required(format!("Dim{}", dim_idx).as_str())?)?);
        }

        let endianness = match attribute(e, "Endian")?.as_deref() {
            None | Some("LittleEndian") => Endianness::Little,
            Some("BigEndian") => Endianness::Big,
            Some(other) => return Err(GrayordinatesError::InvalidGifti(format!("unsupported Endian '{}'", other))),
        };

        Ok(PendingArray {
            intent: attribute(e, "Intent")?.unwrap_or_else(|| String::from("NIFTI_INTENT_NONE")),
            data_type: GiftiDataType::from_name(&required("DataType")?)?,
            encoding: GiftiEncoding::from_name(&required("Encoding")?)?,
            endianness,
            column_major: attribute(e, "ArrayIndexingOrder")?.as_deref() == Some("ColumnMajorOrder"),
            dims,
            metadata: BTreeMap::new(),
        })
    }

    fn decode(self, data_text: &str) -> Result<GiftiDataArray> {
        let expected = checked_product(&self.dims)
            .ok_or_else(|| GrayordinatesError::InvalidGifti(format!("dimensions {:?} are too large", self.dims)))?;
        let data = match self.encoding {
            GiftiEncoding::Ascii => data_text
                .split_whitespace()
                .map(|v| v.parse::<f64>().map_err(|_| GrayordinatesError::InvalidGifti(format!("invalid ASCII value '{}'", v))))
                .collect::<Result<Vec<f64>>>()?,
            GiftiEncoding::Base64Binary => {
                let bytes = decode_base64(data_text)?;
                binary_values(&bytes, self.data_type, self.endianness, expected)?
            }
            GiftiEncoding::GZipBase64Binary => {
                let compressed = decode_base64(data_text)?;
                // One byte more than needed is enough for binary_values to detect oversized streams.
                let limit = expected.saturating_mul(self.data_type.size()).saturating_add(1);
                let mut bytes: Vec<u8> = Vec::new();
                ZlibDecoder::new(&compressed[..]).take(limit as u64).read_to_end(&mut bytes)
                    .map_err(|e| GrayordinatesError::InvalidGifti(format!("zlib decompression failed: {}", e)))?;
                binary_values(&bytes, self.data_type, self.endianness, expected)?
            }
        };

        if data.len() != expected {
            return Err(GrayordinatesError::InvalidGifti(format!("DataArray has {} values, dimensions require {}", data.len(), expected)));
        }

        Ok(GiftiDataArray {
            intent: self.intent,
            data_type: self.data_type,
            encoding: self.encoding,
            endianness: self.endianness,
            column_major: self.column_major,
            dims: self.dims,
            metadata: self.metadata,
            data,
        })
    }
}


pub(crate) fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

pub(crate) fn attribute(e: &BytesStart, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.trim().to_string()));
        }
    }
    Ok(None)
}

fn collect_text(current_element: &str, text: &str, md_name: &mut String, md_value: &mut String, data_text: &mut String) {
    match current_element {
        "Name" => md_name.push_str(text),
        "Value" => md_value.push_str(text),
        "Data" => data_text.push_str(text),
        _ => {}
    }
}

/// The product of the dimensions, `None` on overflow.
fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

fn parse_number(value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| GrayordinatesError::InvalidGifti(format!("invalid number '{}'", value)))
}

fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

/// Interpret raw bytes as `count` values of the given type.
fn binary_values(bytes: &[u8], data_type: GiftiDataType, endianness: Endianness, count: usize) -> Result<Vec<f64>> {
    if count.checked_mul(data_type.size()) != Some(bytes.len()) {
        return Err(GrayordinatesError::InvalidGifti(format!(
            "binary data has {} bytes, expected {} values of {} bytes",
            bytes.len(),
            count,
            data_type.size()
        )));
    }

    let mut input = ByteOrdered::runtime(bytes, endianness);
    let mut values: Vec<f64> = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match data_type {
            GiftiDataType::UInt8 => input.read_u8()? as f64,
            GiftiDataType::Int8 => input.read_i8()? as f64,
            GiftiDataType::Int16 => input.read_i16()? as f64,
            GiftiDataType::UInt16 => input.read_u16()? as f64,
            GiftiDataType::Int32 => input.read_i32()? as f64,
            GiftiDataType::UInt32 => input.read_u32()? as f64,
            GiftiDataType::Int64 => input.read_i64()? as f64,
            GiftiDataType::Float32 => input.read_f32()? as f64,
            GiftiDataType::Float64 => input.read_f64()?,
        };
        values.push(value);
    }
    Ok(values)
}
