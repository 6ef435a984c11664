//! Loading per-location brain data from GIFTI or CIFTI-2 files into a flat array.
//!
//! The format is determined from the file content, not from the file name or from which reader fails.

use ndarray::Array1;

use std::fmt;
use std::path::Path;

use crate::cifti::{Cifti2Image, Nifti2Header, NIFTI2_MAGIC};
use crate::error::{GrayordinatesError, Result};
use crate::gifti::GiftiImage;
use crate::util::read_file_bytes;

/// How many leading bytes are searched for the GIFTI root element.
const GIFTI_SNIFF_LEN: usize = 4096;

/// The file formats supported by [`load_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// GIFTI XML, typically `.gii`.
    Gifti,
    /// CIFTI-2 or other NIfTI-2 data, typically `.nii`.
    Cifti2,
    Unknown,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FileFormat::Gifti => "GIFTI",
            FileFormat::Cifti2 => "CIFTI-2",
            FileFormat::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Determine the file format from the (uncompressed) leading bytes of a file.
pub fn sniff_format(bytes: &[u8]) -> FileFormat {
    if bytes.len() >= 8 && Nifti2Header::detect_endianness(bytes).is_some() && bytes[4..8] == NIFTI2_MAGIC {
        return FileFormat::Cifti2;
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(GIFTI_SNIFF_LEN)]);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with('<') && head.contains("<GIFTI") {
        return FileFormat::Gifti;
    }
    FileFormat::Unknown
}

/// Determine the file format of the given file. Gzip-compressed files are decompressed first.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<FileFormat> {
    Ok(sniff_format(&read_file_bytes(path)?))
}


/// Load the data contained in a GIFTI or CIFTI-2 file as a one-dimensional array.
///
/// For GIFTI files, the first data array is returned, flattened in the order of the file.
/// For CIFTI-2 files, all axes of length 1 are removed and the data is flattened in on-disk order.
///
/// Fails with [`GrayordinatesError::UnsupportedFormat`] if the file is neither GIFTI nor NIfTI-2, or if
/// it is a GIFTI file without data arrays. A broken file of a known format fails with the error of its reader.
///
/// # Examples
///
/// ```no_run
/// let thickness = grayordinates::load_data("/path/to/lh.thickness.func.gii").unwrap();
/// println!("Loaded {} values.", thickness.len());
/// ```
pub fn load_data<P: AsRef<Path>>(path: P) -> Result<Array1<f64>> {
    let path = path.as_ref();
    let bytes = read_file_bytes(path)?;
    let format = sniff_format(&bytes);
    log::debug!("Loading {} as {}", path.display(), format);

    match format {
        FileFormat::Gifti => {
            let gii = GiftiImage::from_bytes(&bytes)?;
            if gii.data_arrays.len() > 1 {
                log::warn!("{} has {} data arrays, using the first one", path.display(), gii.data_arrays.len());
            }
            match gii.data_arrays.into_iter().next() {
                Some(array) => Ok(Array1::from(array.data)),
                None => Err(GrayordinatesError::UnsupportedFormat(path.to_path_buf())),
            }
        }
        FileFormat::Cifti2 => {
            let cifti = Cifti2Image::from_bytes(&bytes)?;
            if !cifti.is_cifti() {
                log::debug!("{} is NIfTI-2 without CIFTI intent ({})", path.display(), cifti.header.intent_code);
            }
            Ok(cifti.to_array1())
        }
        FileFormat::Unknown => Err(GrayordinatesError::UnsupportedFormat(path.to_path_buf())),
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gifti_documents_are_sniffed() {
        let doc = b"\xef\xbb\xbf<?xml version=\"1.0\"?>\n<!DOCTYPE GIFTI SYSTEM \"gifti.dtd\">\n<GIFTI Version=\"1.0\">";
        assert_eq!(FileFormat::Gifti, sniff_format(doc));
        assert_eq!(FileFormat::Unknown, sniff_format(b"<?xml version=\"1.0\"?><svg/>"));
    }

    #[test]
    fn nifti2_headers_are_sniffed_in_both_byte_orders() {
        let mut le = 540i32.to_le_bytes().to_vec();
        le.extend_from_slice(b"n+2\0\r\n\x1a\n");
        assert_eq!(FileFormat::Cifti2, sniff_format(&le));

        let mut be = 540i32.to_be_bytes().to_vec();
        be.extend_from_slice(b"n+2\0\r\n\x1a\n");
        assert_eq!(FileFormat::Cifti2, sniff_format(&be));
    }

    #[test]
    fn nifti1_and_random_bytes_are_unknown() {
        let mut nifti1 = vec![0u8; 348];
        nifti1[0..4].copy_from_slice(&348i32.to_le_bytes());
        nifti1[344..348].copy_from_slice(b"n+1\0");
        assert_eq!(FileFormat::Unknown, sniff_format(&nifti1));
        assert_eq!(FileFormat::Unknown, sniff_format(&[0u8; 16]));
        assert_eq!(FileFormat::Unknown, sniff_format(&[]));
    }
}
