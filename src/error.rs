use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;
use std::time::Duration;

use crate::dense_mapping::Structure;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum GrayordinatesError {
        /// Neither the GIFTI nor the CIFTI-2 reader recognizes the file.
        UnsupportedFormat(path: PathBuf) {
            display("This file cannot be loaded: {}", path.display())
        }

        /// The file looks like GIFTI but its content is broken or uses an unsupported feature.
        InvalidGifti(msg: String) {
            display("Invalid GIFTI file: {}", msg)
        }

        /// The file looks like NIfTI-2 / CIFTI-2 but its content is broken or uses an unsupported feature.
        InvalidNifti2(msg: String) {
            display("Invalid NIfTI-2 file: {}", msg)
        }

        /// The CIFTI XML of a file does not describe its index maps in a supported way.
        InvalidCiftiXml(msg: String) {
            display("Invalid CIFTI XML: {}", msg)
        }

        Xml(err: quick_xml::Error) {
            from()
            source(err)
            display("XML error: {}", err)
        }

        Base64(err: base64::DecodeError) {
            from()
            source(err)
            display("Base64 error: {}", err)
        }

        /// The geometry export command could not be started at all.
        ExternalToolMissing(program: PathBuf) {
            display("External command not found: {}", program.display())
        }

        /// Exporting the dense mapping failed for one structure.
        Export(structure: Structure, cause: ExportFailure) {
            display("Dense mapping export failed for {}: {}", structure, cause)
            source(cause)
        }

        /// The export command succeeded for all structures, but none of them had any rows.
        NoStructures(image: PathBuf) {
            display("No structures found in image {}", image.display())
        }

        /// No image was given and no default image is configured.
        NoImage {
            display("No image given and no default image configured")
        }

        /// Two structure tables claim the same dense index.
        OverlappingIndices(first: Structure, second: Structure, index: usize) {
            display("Dense index {} is assigned to both {} and {}", index, first, second)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }
    }
}

quick_error! {
    /// Reason why the export step for a single structure failed.
    #[derive(Debug)]
    pub enum ExportFailure {
        /// The command exited with a non-success status. `None` if it was killed by a signal.
        ExternalToolFailed(code: Option<i32>) {
            display("external command failed with status {}", code.map(|c| c.to_string()).unwrap_or_else(|| String::from("<signal>")))
        }

        Timeout(after: Duration) {
            display("external command timed out after {:?}", after)
        }

        /// The command succeeded but wrote no rows.
        EmptyOutput {
            display("external command produced no output")
        }

        MalformedRow(line_no: usize, line: String) {
            display("malformed row at line {}: '{}'", line_no, line)
        }

        Io(err: IOError) {
            from()
            source(err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, GrayordinatesError>;
