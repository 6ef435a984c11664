//! Utility functions used in all other grayordinates modules.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::bufread::GzDecoder;

use crate::error::Result;

use byteordered::byteorder::ReadBytesExt;

/// Check whether the bytes start with the gzip magic number.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Read the whole file into memory, transparently decompressing it if it is gzipped.
///
/// Compression is detected from the content, the ".gz" file extension is not required.
pub fn read_file_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let mut raw: Vec<u8> = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut raw)?;
    if is_gzip(&raw) {
        let mut decoded: Vec<u8> = Vec::new();
        GzDecoder::new(&raw[..]).read_to_end(&mut decoded)?;
        Ok(decoded)
    } else {
        Ok(raw)
    }
}

/// Read a fixed length zero-terminated byte string of the given length from the input. Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S>(input: &mut S, len: usize) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::with_capacity(len);
    for _ in 0..len {
        let cur_char = input.read_u8()? as char;
        if cur_char != '\0' {
            info_line.push(cur_char);
        }
    }
    Ok(info_line)
}
