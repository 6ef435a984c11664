//! Functions for reading CIFTI-2 files, which store data on grayordinates in the NIfTI-2 container format.
//!
//! CIFTI-2 files (e.g., `.dscalar.nii`, `.dlabel.nii`, `.dtseries.nii`) consist of a 540 byte NIfTI-2 header,
//! a header extension holding the CIFTI XML that describes the brain models, and the data matrix.
//! The data matrix occupies NIfTI dims 5 and 6, dims 1 to 4 have length 1.

use byteordered::{ByteOrdered, Endianness};
use ndarray::{Array1, ArrayD, Axis, IxDyn, ShapeBuilder};

use std::convert::TryFrom;
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{GrayordinatesError, Result};
use crate::util::{read_file_bytes, read_fixed_length_string};

pub const NIFTI2_HEADER_SIZE: usize = 540;
pub const NIFTI2_MAGIC: [u8; 4] = *b"n+2\0";

/// Extension code of the CIFTI XML extension.
pub const NIFTI_ECODE_CIFTI: i32 = 32;

/// NIfTI intent codes 3000 to 3099 are reserved for CIFTI.
pub const NIFTI_INTENT_CIFTI_FIRST: i32 = 3000;
pub const NIFTI_INTENT_CIFTI_LAST: i32 = 3099;

/// Models the header of a NIfTI-2 file. Only the fields needed to read the data are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Nifti2Header {
    pub endianness: Endianness,
    pub datatype: i16,
    pub bitpix: i16,
    pub dim: [i64; 8],
    pub pixdim: [f64; 8],
    pub vox_offset: i64,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub descrip: String,
    pub intent_code: i32,
    pub intent_name: String,
}

impl Default for Nifti2Header {
    fn default() -> Nifti2Header {
        Nifti2Header {
            endianness: Endianness::Little,
            datatype: 16,
            bitpix: 32,
            dim: [0; 8],
            pixdim: [0.; 8],
            vox_offset: NIFTI2_HEADER_SIZE as i64 + 4,
            scl_slope: 1.,
            scl_inter: 0.,
            descrip: String::from(""),
            intent_code: 0,
            intent_name: String::from(""),
        }
    }
}

impl Nifti2Header {

    /// Read a NIfTI-2 header from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Nifti2Header> {
        let bytes = read_file_bytes(path)?;
        Nifti2Header::from_reader(&mut &bytes[..])
    }

    /// Determine the byte order of a NIfTI-2 header from its first 4 bytes, which must encode 540.
    pub fn detect_endianness(first: &[u8]) -> Option<Endianness> {
        if first.len() < 4 {
            return None;
        }
        let raw = [first[0], first[1], first[2], first[3]];
        if i32::from_le_bytes(raw) == NIFTI2_HEADER_SIZE as i32 {
            Some(Endianness::Little)
        } else if i32::from_be_bytes(raw) == NIFTI2_HEADER_SIZE as i32 {
            Some(Endianness::Big)
        } else {
            None
        }
    }

    /// Read a NIfTI-2 header from the given byte stream, which must be at the start of the header.
    /// Exactly 540 bytes are consumed.
    pub fn from_reader<S>(input: &mut S) -> Result<Nifti2Header>
    where
        S: Read,
    {
        let mut raw = [0u8; NIFTI2_HEADER_SIZE];
        input.read_exact(&mut raw)?;

        let endianness = Nifti2Header::detect_endianness(&raw)
            .ok_or_else(|| GrayordinatesError::InvalidNifti2(String::from("sizeof_hdr is not 540")))?;
        if raw[4..8] != NIFTI2_MAGIC {
            return Err(GrayordinatesError::InvalidNifti2(String::from("wrong magic")));
        }

        let mut hdr = Nifti2Header::default();
        hdr.endianness = endianness;

        let mut input = ByteOrdered::runtime(&raw[12..240], endianness);
        hdr.datatype = input.read_i16()?;
        hdr.bitpix = input.read_i16()?;
        for idx in 0..8 { hdr.dim[idx] = input.read_i64()?; }
        let _intent_p: [f64; 3] = [input.read_f64()?, input.read_f64()?, input.read_f64()?];
        for idx in 0..8 { hdr.pixdim[idx] = input.read_f64()?; }
        hdr.vox_offset = input.read_i64()?;
        hdr.scl_slope = input.read_f64()?;
        hdr.scl_inter = input.read_f64()?;

        hdr.descrip = read_fixed_length_string(&mut &raw[240..320], 80)?;

        let mut input = ByteOrdered::runtime(&raw[504..524], endianness);
        hdr.intent_code = input.read_i32()?;
        hdr.intent_name = read_fixed_length_string(&mut &raw[508..524], 16)?;

        if hdr.dim[0] < 1 || hdr.dim[0] > 7 {
            return Err(GrayordinatesError::InvalidNifti2(format!("invalid number of dimensions {}", hdr.dim[0])));
        }
        if hdr.dim[1..=hdr.dim[0] as usize].iter().any(|&d| d < 0) {
            return Err(GrayordinatesError::InvalidNifti2(String::from("negative dimension length")));
        }
        if hdr.vox_offset < NIFTI2_HEADER_SIZE as i64 {
            return Err(GrayordinatesError::InvalidNifti2(format!("invalid vox_offset {}", hdr.vox_offset)));
        }
        Ok(hdr)
    }

    /// The lengths of the used dimensions, `dim[1..=dim[0]]`.
    pub fn shape(&self) -> Vec<usize> {
        self.dim[1..=self.dim[0].max(0).min(7) as usize].iter().map(|&d| d.max(0) as usize).collect()
    }

    /// The number of values in the data part. Fails if it does not fit into `usize`.
    pub fn num_values(&self) -> Result<usize> {
        let shape = self.shape();
        shape.iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| GrayordinatesError::InvalidNifti2(format!("dimensions {:?} are too large", shape)))
    }

    /// Whether the intent code marks this as a CIFTI file.
    pub fn is_cifti(&self) -> bool {
        self.intent_code >= NIFTI_INTENT_CIFTI_FIRST && self.intent_code <= NIFTI_INTENT_CIFTI_LAST
    }
}


/// Models a CIFTI-2 file: the NIfTI-2 header, the CIFTI XML extension, and the data.
#[derive(Debug, Clone, PartialEq)]
pub struct Cifti2Image {
    pub header: Nifti2Header,
    /// The CIFTI XML from the header extension with code 32, if present.
    pub cifti_xml: Option<String>,
    /// The data in NIfTI axis order, i.e., the first axis varies fastest on disk. Scaling is applied.
    pub data: ArrayD<f64>,
}

impl Cifti2Image {

    /// Read a CIFTI-2 (or plain NIfTI-2) file. Gzip-compressed files are decompressed transparently.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Cifti2Image> {
        Cifti2Image::from_bytes(&read_file_bytes(path)?)
    }

    /// Parse a CIFTI-2 file from its raw (uncompressed) bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Cifti2Image> {
        let mut input: &[u8] = bytes;
        let header = Nifti2Header::from_reader(&mut input)?;
        let cifti_xml = read_cifti_extension(bytes, &header)?;

        let offset = usize::try_from(header.vox_offset)
            .map_err(|_| GrayordinatesError::InvalidNifti2(format!("invalid vox_offset {}", header.vox_offset)))?;
        let num_values = header.num_values()?;
        let data_end = header.datatype_size()?
            .checked_mul(num_values)
            .and_then(|data_size| data_size.checked_add(offset))
            .ok_or_else(|| GrayordinatesError::InvalidNifti2(format!("data of {} values does not fit into memory", num_values)))?;
        if bytes.len() < data_end {
            return Err(GrayordinatesError::InvalidNifti2(format!(
                "file is truncated: data ends at byte {}, file has {} bytes",
                data_end,
                bytes.len()
            )));
        }

        let mut input = ByteOrdered::runtime(&bytes[offset..data_end], header.endianness);
        let slope = if header.scl_slope == 0. || !header.scl_slope.is_finite() { 1. } else { header.scl_slope };
        let inter = if header.scl_inter.is_finite() { header.scl_inter } else { 0. };

        let mut values: Vec<f64> = Vec::with_capacity(num_values);
        for _ in 0..num_values {
            let value = match header.datatype {
                2 => input.read_u8()? as f64,
                4 => input.read_i16()? as f64,
                8 => input.read_i32()? as f64,
                16 => input.read_f32()? as f64,
                64 => input.read_f64()?,
                256 => input.read_i8()? as f64,
                512 => input.read_u16()? as f64,
                768 => input.read_u32()? as f64,
                1024 => input.read_i64()? as f64,
                1280 => input.read_u64()? as f64,
                other => return Err(GrayordinatesError::InvalidNifti2(format!("unsupported datatype {}", other))),
            };
            values.push(value * slope + inter);
        }

        let data = ArrayD::from_shape_vec(IxDyn(&header.shape()).f(), values)
            .map_err(|e| GrayordinatesError::InvalidNifti2(format!("data does not match dimensions: {}", e)))?;

        Ok(Cifti2Image { header, cifti_xml, data })
    }

    pub fn is_cifti(&self) -> bool {
        self.header.is_cifti()
    }

    /// The data with all axes of length 1 removed.
    pub fn squeezed(&self) -> ArrayD<f64> {
        squeeze(self.data.clone())
    }

    /// The data as a one-dimensional array in on-disk order, after squeezing.
    pub fn to_array1(&self) -> Array1<f64> {
        flatten_disk_order(&self.squeezed())
    }
}

impl fmt::Display for Cifti2Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NIfTI-2 file with intent {} and data shape {:?}.", self.header.intent_code, self.data.shape())
    }
}

impl Nifti2Header {
    /// Size in bytes of one value of the header's datatype.
    pub fn datatype_size(&self) -> Result<usize> {
        match self.datatype {
            2 | 256 => Ok(1),
            4 | 512 => Ok(2),
            8 | 16 | 768 => Ok(4),
            64 | 1024 | 1280 => Ok(8),
            other => Err(GrayordinatesError::InvalidNifti2(format!("unsupported datatype {}", other))),
        }
    }
}


/// Read a CIFTI-2 file.
///
/// # Examples
///
/// ```no_run
/// let cifti = grayordinates::read_cifti("/path/to/parcels.dlabel.nii").unwrap();
/// println!("Data shape: {:?}", cifti.squeezed().shape());
/// ```
pub fn read_cifti<P: AsRef<Path>>(path: P) -> Result<Cifti2Image> {
    Cifti2Image::from_file(path)
}


/// Remove all axes of length 1. A 0-dimensional result is returned as a one-element 1D array.
pub fn squeeze(mut data: ArrayD<f64>) -> ArrayD<f64> {
    for axis in (0..data.ndim()).rev() {
        if data.shape()[axis] == 1 && data.ndim() > 1 {
            data = data.index_axis_move(Axis(axis), 0);
        }
    }
    data
}

/// Flatten an array whose first axis varies fastest, keeping that order.
pub fn flatten_disk_order(data: &ArrayD<f64>) -> Array1<f64> {
    data.t().iter().cloned().collect()
}


/// Read the NIfTI header extensions following the header and return the content of the CIFTI one.
fn read_cifti_extension(bytes: &[u8], header: &Nifti2Header) -> Result<Option<String>> {
    let end = (header.vox_offset as usize).min(bytes.len());
    let mut pos = NIFTI2_HEADER_SIZE;
    if end < pos + 4 || bytes[pos] == 0 {
        return Ok(None);
    }
    pos += 4;

    while pos + 8 <= end {
        let mut input = ByteOrdered::runtime(&bytes[pos..pos + 8], header.endianness);
        let esize = input.read_i32()?;
        let ecode = input.read_i32()?;
        if esize < 8 || pos + esize as usize > end {
            return Err(GrayordinatesError::InvalidNifti2(format!("invalid extension size {}", esize)));
        }
        if ecode == NIFTI_ECODE_CIFTI {
            let content = &bytes[pos + 8..pos + esize as usize];
            let text = String::from_utf8_lossy(content).trim_end_matches('\0').to_string();
            return Ok(Some(text));
        }
        pos += esize as usize;
    }
    Ok(None)
}
