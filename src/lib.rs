//! Loading of CIFTI-2 and GIFTI brain data, and export of the mapping between CIFTI dense indices
//! (grayordinates) and cortical surface vertices or subcortical voxels.
//!
//! The mapping export relies on Connectome Workbench's `wb_command` being installed.

pub mod cifti;
pub mod config;
pub mod dense_mapping;
pub mod error;
pub mod gifti;
pub mod loader;
pub mod parcels;
pub mod runner;
pub mod util;

pub use cifti::{read_cifti, Cifti2Image, Nifti2Header};
pub use config::{AbsentStructurePolicy, ExportConfig};
pub use dense_mapping::{export_dense_mapping, DenseMapping, DenseMappingExporter, Structure, SurfaceVertexMap, VolumeVoxelMap, Voxel};
pub use error::{ExportFailure, GrayordinatesError, Result};
pub use gifti::{read_gifti, GiftiDataArray, GiftiImage};
pub use loader::{detect_format, load_data, sniff_format, FileFormat};
pub use parcels::{parse_parcels, read_parcels, Parcel};
pub use runner::{CommandRunner, Invocation, ProcessRunner, RunOutcome};
