//! The mapping between CIFTI dense indices (grayordinates) and brain geometry.
//!
//! For the two cortical hemispheres, each dense index corresponds to a vertex of the hemisphere's surface mesh.
//! For the subcortex, each dense index corresponds to a voxel of the volume. The mapping is computed by
//! Connectome Workbench (`wb_command -cifti-export-dense-mapping`), which writes one whitespace-separated
//! text table per structure. See <https://www.humanconnectome.org/software/workbench-command/-cifti-export-dense-mapping>.

use rayon::prelude::*;
use tempfile::{Builder, NamedTempFile};

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{AbsentStructurePolicy, ExportConfig};
use crate::error::{ExportFailure, GrayordinatesError, Result};
use crate::runner::{CommandRunner, Invocation, ProcessRunner, RunOutcome};

/// One of the three disjoint anatomical partitions of the dense index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Structure {
    CortexLeft,
    CortexRight,
    Subcortex,
}

impl Structure {
    pub const ALL: [Structure; 3] = [Structure::CortexLeft, Structure::CortexRight, Structure::Subcortex];

    /// Stable lower-case key, e.g. `cortex_left`.
    pub fn key(self) -> &'static str {
        match self {
            Structure::CortexLeft => "cortex_left",
            Structure::CortexRight => "cortex_right",
            Structure::Subcortex => "subcortex",
        }
    }

    /// The Workbench surface structure name, `None` for the subcortex.
    pub fn surface_name(self) -> Option<&'static str> {
        match self {
            Structure::CortexLeft => Some("CORTEX_LEFT"),
            Structure::CortexRight => Some("CORTEX_RIGHT"),
            Structure::Subcortex => None,
        }
    }

    /// Number of columns per row in the exported table, including the dense index column.
    fn num_columns(self) -> usize {
        match self {
            Structure::Subcortex => 5,
            _ => 2,
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}


/// Maps dense indices to vertex indices of one hemisphere's surface mesh.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SurfaceVertexMap {
    pub vertices: BTreeMap<usize, usize>,
}

impl SurfaceVertexMap {
    pub fn get(&self, index: usize) -> Option<usize> {
        self.vertices.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.vertices.keys().copied()
    }

    /// Compute the medial wall mask for a hemisphere mesh with `num_vertices` vertices.
    ///
    /// The medial wall consists of all vertices that no dense index maps to, so the returned vector
    /// is `true` for those. Vertex ids outside the mesh are ignored.
    pub fn medial_wall_mask(&self, num_vertices: usize) -> Vec<bool> {
        let mut mask = vec![true; num_vertices];
        for &vertex in self.vertices.values() {
            if vertex < num_vertices {
                mask[vertex] = false;
            }
        }
        mask
    }

    /// Parse the text table written by `wb_command` for a hemisphere: `<dense index> <vertex>` per row.
    pub fn parse(structure: Structure, text: &str) -> std::result::Result<SurfaceVertexMap, ExportFailure> {
        let mut vertices = BTreeMap::new();
        for row in parse_rows(structure, text) {
            let (index, values) = row?;
            vertices.insert(index, values.ints[0] as usize);
        }
        Ok(SurfaceVertexMap { vertices })
    }
}


/// A voxel of the subcortical volume, with the label of the structure it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voxel {
    /// Structure label as printed by the export tool, e.g. `CIFTI_STRUCTURE_THALAMUS_LEFT` or a numeric code.
    pub structure: String,
    pub i: i64,
    pub j: i64,
    pub k: i64,
}

/// Maps dense indices to subcortical voxels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeVoxelMap {
    pub voxels: BTreeMap<usize, Voxel>,
}

impl VolumeVoxelMap {
    pub fn get(&self, index: usize) -> Option<&Voxel> {
        self.voxels.get(&index)
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.voxels.keys().copied()
    }

    /// The distinct structure labels, in sorted order.
    pub fn structure_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.voxels.values().map(|v| v.structure.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// Parse the text table written by `wb_command` for the volume: `<dense index> <structure> <i> <j> <k>` per row.
    pub fn parse(text: &str) -> std::result::Result<VolumeVoxelMap, ExportFailure> {
        let mut voxels = BTreeMap::new();
        for row in parse_rows(Structure::Subcortex, text) {
            let (index, values) = row?;
            voxels.insert(index, Voxel {
                structure: values.label,
                i: values.ints[0],
                j: values.ints[1],
                k: values.ints[2],
            });
        }
        Ok(VolumeVoxelMap { voxels })
    }
}


/// The columns after the dense index of one row. For the subcortex, the first of them is the structure label.
struct RowValues {
    label: String,
    ints: Vec<i64>,
}

/// Iterate over the non-blank rows of an exported table, checking column count, index validity and uniqueness.
fn parse_rows<'a>(structure: Structure, text: &'a str) -> impl Iterator<Item = std::result::Result<(usize, RowValues), ExportFailure>> + 'a {
    let mut seen = std::collections::HashSet::new();
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(move |(line_idx, line)| {
            let malformed = || ExportFailure::MalformedRow(line_idx + 1, line.to_string());
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != structure.num_columns() {
                return Err(malformed());
            }
            let index: usize = fields[0].parse().map_err(|_| malformed())?;
            if !seen.insert(index) {
                return Err(malformed());
            }
            let (label, numeric) = match structure {
                Structure::Subcortex => (fields[1].to_string(), &fields[2..]),
                _ => (String::new(), &fields[1..]),
            };
            let mut ints = Vec::with_capacity(numeric.len());
            for field in numeric {
                ints.push(field.parse::<i64>().map_err(|_| malformed())?);
            }
            if structure != Structure::Subcortex && ints[0] < 0 {
                return Err(malformed());
            }
            Ok((index, RowValues { label, ints }))
        })
}


/// The dense index to geometry mapping for all three structures.
///
/// A structure is `None` if the image has no data for it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DenseMapping {
    pub cortex_left: Option<SurfaceVertexMap>,
    pub cortex_right: Option<SurfaceVertexMap>,
    pub subcortex: Option<VolumeVoxelMap>,
}

impl DenseMapping {
    /// The structures with data in this mapping.
    pub fn structures_present(&self) -> Vec<Structure> {
        Structure::ALL.iter().copied().filter(|s| self.count(*s).is_some()).collect()
    }

    /// The total number of dense indices over all structures.
    pub fn len(&self) -> usize {
        Structure::ALL.iter().filter_map(|s| self.count(*s)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The hemisphere map for a cortical structure, `None` for the subcortex or if absent.
    pub fn surface(&self, structure: Structure) -> Option<&SurfaceVertexMap> {
        match structure {
            Structure::CortexLeft => self.cortex_left.as_ref(),
            Structure::CortexRight => self.cortex_right.as_ref(),
            Structure::Subcortex => None,
        }
    }

    /// Which structure the given dense index belongs to, if any.
    pub fn structure_of(&self, index: usize) -> Option<Structure> {
        if self.cortex_left.as_ref().map_or(false, |m| m.vertices.contains_key(&index)) {
            Some(Structure::CortexLeft)
        } else if self.cortex_right.as_ref().map_or(false, |m| m.vertices.contains_key(&index)) {
            Some(Structure::CortexRight)
        } else if self.subcortex.as_ref().map_or(false, |m| m.voxels.contains_key(&index)) {
            Some(Structure::Subcortex)
        } else {
            None
        }
    }

    /// Number of dense indices of a structure, `None` if it is absent.
    fn count(&self, structure: Structure) -> Option<usize> {
        match structure {
            Structure::CortexLeft => self.cortex_left.as_ref().map(|m| m.len()),
            Structure::CortexRight => self.cortex_right.as_ref().map(|m| m.len()),
            Structure::Subcortex => self.subcortex.as_ref().map(|m| m.len()),
        }
    }

    /// The dense indices of a structure, empty if it is absent.
    fn indices(&self, structure: Structure) -> Box<dyn Iterator<Item = usize> + '_> {
        match structure {
            Structure::CortexLeft => Box::new(self.cortex_left.iter().flat_map(|m| m.indices())),
            Structure::CortexRight => Box::new(self.cortex_right.iter().flat_map(|m| m.indices())),
            Structure::Subcortex => Box::new(self.subcortex.iter().flat_map(|m| m.indices())),
        }
    }

    /// Check that no dense index is claimed by more than one structure.
    pub fn check_disjoint(&self) -> Result<()> {
        let mut owner: BTreeMap<usize, Structure> = BTreeMap::new();
        for &structure in Structure::ALL.iter() {
            for index in self.indices(structure) {
                if let Some(first) = owner.insert(index, structure) {
                    return Err(GrayordinatesError::OverlappingIndices(first, structure, index));
                }
            }
        }
        Ok(())
    }
}


/// Parsed export output for one structure.
enum StructureTable {
    Surface(SurfaceVertexMap),
    Volume(VolumeVoxelMap),
}

/// Computes [`DenseMapping`]s by running `wb_command -cifti-export-dense-mapping` once per structure.
pub struct DenseMappingExporter<R: CommandRunner> {
    runner: R,
    config: ExportConfig,
}

impl DenseMappingExporter<ProcessRunner> {
    /// An exporter that runs the real `wb_command` configured in `config`.
    pub fn with_process_runner(config: ExportConfig) -> DenseMappingExporter<ProcessRunner> {
        DenseMappingExporter::new(ProcessRunner, config)
    }
}

impl<R: CommandRunner> DenseMappingExporter<R> {
    pub fn new(runner: R, config: ExportConfig) -> DenseMappingExporter<R> {
        DenseMappingExporter { runner, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// The command line that exports the table for `structure` of `image` into `output`.
    pub fn invocation(&self, structure: Structure, image: &Path, output: &Path) -> Invocation {
        let base = Invocation::new(&self.config.wb_command)
            .arg("-cifti-export-dense-mapping")
            .arg(image)
            .arg("COLUMN");
        match structure.surface_name() {
            Some(surface) => base.arg("-surface").arg(surface).arg(output),
            None => base.arg("-volume-all").arg(output).arg("-structure"),
        }
    }

    /// Compute the dense mapping of `image`, or of the configured default image if `image` is `None`.
    ///
    /// Fails if the command cannot be run, fails or times out for any structure, or writes malformed rows.
    /// No partial mapping is returned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use grayordinates::{DenseMappingExporter, ExportConfig};
    /// use std::path::Path;
    /// let exporter = DenseMappingExporter::with_process_runner(ExportConfig::default());
    /// let mapping = exporter.export(Some(Path::new("/path/to/parcels.dlabel.nii"))).unwrap();
    /// println!("Left cortex has {} grayordinates.", mapping.cortex_left.map_or(0, |m| m.len()));
    /// ```
    pub fn export(&self, image: Option<&Path>) -> Result<DenseMapping> {
        let image: PathBuf = match image {
            Some(image) => image.to_path_buf(),
            None => self.config.default_image.clone().ok_or(GrayordinatesError::NoImage)?,
        };
        log::debug!("Exporting dense mapping of {}", image.display());

        let tables: Vec<Result<Option<StructureTable>>> = if self.config.parallel {
            Structure::ALL[..].par_iter().map(|s| self.export_structure(*s, &image)).collect()
        } else {
            Structure::ALL.iter().map(|s| self.export_structure(*s, &image)).collect()
        };

        let mut mapping = DenseMapping::default();
        for (structure, table) in Structure::ALL.iter().zip(tables) {
            match (*structure, table?) {
                (Structure::CortexLeft, Some(StructureTable::Surface(map))) => mapping.cortex_left = Some(map),
                (Structure::CortexRight, Some(StructureTable::Surface(map))) => mapping.cortex_right = Some(map),
                (Structure::Subcortex, Some(StructureTable::Volume(map))) => mapping.subcortex = Some(map),
                _ => {}
            }
        }

        let present = mapping.structures_present();
        if present.is_empty() {
            return Err(GrayordinatesError::NoStructures(image));
        }
        mapping.check_disjoint()?;

        log::info!("Exported dense mapping of {}: {} grayordinates in {:?}", image.display(), mapping.len(), present);
        Ok(mapping)
    }

    /// Run the export for one structure into a private scratch file and parse the result.
    fn export_structure(&self, structure: Structure, image: &Path) -> Result<Option<StructureTable>> {
        let fail = |cause: ExportFailure| GrayordinatesError::Export(structure, cause);

        let scratch: NamedTempFile = Builder::new()
            .prefix(&format!("grayordinates-{}-", structure.key()))
            .suffix(".txt")
            .tempfile_in(self.config.scratch_dir())
            .map_err(|e| fail(ExportFailure::Io(e)))?;
        let invocation = self.invocation(structure, image, scratch.path());
        log::debug!("Running {}", invocation);

        match self.runner.run(&invocation, self.config.timeout) {
            Ok(RunOutcome::Success) => {}
            Ok(RunOutcome::Failed(code)) => return Err(fail(ExportFailure::ExternalToolFailed(code))),
            Ok(RunOutcome::TimedOut) => {
                return Err(fail(ExportFailure::Timeout(self.config.timeout.unwrap_or_default())))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(GrayordinatesError::ExternalToolMissing(self.config.wb_command.clone()))
            }
            Err(e) => return Err(fail(ExportFailure::Io(e))),
        }

        // The tool may replace the scratch file, so it is re-read by path. A missing file counts as empty.
        let text = match fs::read_to_string(scratch.path()) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(fail(ExportFailure::Io(e))),
        };

        if text.trim().is_empty() {
            return match self.config.absent_policy {
                AbsentStructurePolicy::Allow => {
                    log::warn!("No {} data in {}", structure, image.display());
                    Ok(None)
                }
                AbsentStructurePolicy::Reject => Err(fail(ExportFailure::EmptyOutput)),
            };
        }

        let table = match structure {
            Structure::Subcortex => StructureTable::Volume(VolumeVoxelMap::parse(&text).map_err(fail)?),
            _ => StructureTable::Surface(SurfaceVertexMap::parse(structure, &text).map_err(fail)?),
        };
        Ok(Some(table))
    }
}


/// Compute the dense mapping of `image` with the real `wb_command`, see [`DenseMappingExporter::export`].
pub fn export_dense_mapping(config: &ExportConfig, image: Option<&Path>) -> Result<DenseMapping> {
    DenseMappingExporter::with_process_runner(config.clone()).export(image)
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hemisphere_tables_are_parsed() {
        let map = SurfaceVertexMap::parse(Structure::CortexLeft, "0 17\n1 42\n").unwrap();
        assert_eq!(2, map.len());
        assert_eq!(Some(17), map.get(0));
        assert_eq!(Some(42), map.get(1));
        assert_eq!(None, map.get(2));
    }

    #[test]
    fn subcortex_rows_keep_label_and_signed_coordinates() {
        let map = VolumeVoxelMap::parse("0 3 -10 5 20\n").unwrap();
        let voxel = map.get(0).unwrap();
        assert_eq!("3", voxel.structure);
        assert_eq!((-10, 5, 20), (voxel.i, voxel.j, voxel.k));
    }

    #[test]
    fn blank_lines_and_extra_whitespace_are_tolerated() {
        let text = "\n59412  CIFTI_STRUCTURE_ACCUMBENS_LEFT 59 69 27\r\n\n59413\tCIFTI_STRUCTURE_ACCUMBENS_LEFT 60 69 27\n";
        let map = VolumeVoxelMap::parse(text).unwrap();
        assert_eq!(2, map.len());
        assert_eq!(vec!["CIFTI_STRUCTURE_ACCUMBENS_LEFT"], map.structure_labels());
        assert_eq!(60, map.get(59413).unwrap().i);
    }

    #[test]
    fn rows_with_wrong_column_count_are_rejected_with_line_context() {
        match SurfaceVertexMap::parse(Structure::CortexRight, "0 1\n1 2 3\n") {
            Err(ExportFailure::MalformedRow(line_no, line)) => {
                assert_eq!(2, line_no);
                assert_eq!("1 2 3", line);
            }
            other => panic!("expected MalformedRow, got {:?}", other),
        }
        assert!(VolumeVoxelMap::parse("0 3 1 2\n").is_err());
    }

    #[test]
    fn negative_or_duplicate_indices_are_rejected() {
        assert!(SurfaceVertexMap::parse(Structure::CortexLeft, "-1 5\n").is_err());
        assert!(SurfaceVertexMap::parse(Structure::CortexLeft, "1 -5\n").is_err());
        assert!(SurfaceVertexMap::parse(Structure::CortexLeft, "1 5\n1 6\n").is_err());
        assert!(SurfaceVertexMap::parse(Structure::CortexLeft, "x 5\n").is_err());
        assert!(VolumeVoxelMap::parse("0 3 1.5 2 3\n").is_err());
    }

    #[test]
    fn medial_wall_is_the_set_of_unmapped_vertices() {
        let map = SurfaceVertexMap::parse(Structure::CortexLeft, "0 0\n1 2\n2 9\n").unwrap();
        assert_eq!(vec![false, true, false, true], map.medial_wall_mask(4));
    }

    #[test]
    fn overlapping_structures_are_detected() {
        let mapping = DenseMapping {
            cortex_left: Some(SurfaceVertexMap::parse(Structure::CortexLeft, "0 0\n1 1\n").unwrap()),
            cortex_right: Some(SurfaceVertexMap::parse(Structure::CortexRight, "1 0\n").unwrap()),
            subcortex: None,
        };
        match mapping.check_disjoint() {
            Err(GrayordinatesError::OverlappingIndices(first, second, index)) => {
                assert_eq!(Structure::CortexLeft, first);
                assert_eq!(Structure::CortexRight, second);
                assert_eq!(1, index);
            }
            other => panic!("expected OverlappingIndices, got {:?}", other),
        }
    }

    #[test]
    fn mapping_summaries_cover_present_structures_only() {
        let mapping = DenseMapping {
            cortex_left: Some(SurfaceVertexMap::parse(Structure::CortexLeft, "0 0\n1 1\n").unwrap()),
            cortex_right: None,
            subcortex: Some(VolumeVoxelMap::parse("2 3 1 1 1\n").unwrap()),
        };
        assert!(mapping.check_disjoint().is_ok());
        assert_eq!(vec![Structure::CortexLeft, Structure::Subcortex], mapping.structures_present());
        assert_eq!(3, mapping.len());
        assert_eq!(Some(Structure::Subcortex), mapping.structure_of(2));
        assert_eq!(None, mapping.structure_of(3));
        assert!(mapping.surface(Structure::CortexRight).is_none());
        assert_eq!(2, mapping.surface(Structure::CortexLeft).unwrap().len());
    }

    #[test]
    fn a_present_structure_without_rows_still_counts_as_present() {
        let mapping = DenseMapping {
            cortex_left: Some(SurfaceVertexMap::default()),
            cortex_right: None,
            subcortex: Some(VolumeVoxelMap::parse("91281 CIFTI_STRUCTURE_THALAMUS_RIGHT 1 2 3\n").unwrap()),
        };
        assert_eq!(vec![Structure::CortexLeft, Structure::Subcortex], mapping.structures_present());
        assert_eq!(1, mapping.len());
        assert!(!mapping.is_empty());
        assert!(mapping.check_disjoint().is_ok());
        assert!(DenseMapping::default().is_empty());
        assert!(DenseMapping::default().structures_present().is_empty());
    }

    #[test]
    fn invocations_follow_the_workbench_command_line() {
        let exporter = DenseMappingExporter::with_process_runner(ExportConfig::default());
        let left = exporter.invocation(Structure::CortexLeft, Path::new("in.dlabel.nii"), Path::new("/tmp/l.txt"));
        assert_eq!(
            "wb_command '-cifti-export-dense-mapping' 'in.dlabel.nii' 'COLUMN' '-surface' 'CORTEX_LEFT' '/tmp/l.txt'",
            left.to_string()
        );
        let sub = exporter.invocation(Structure::Subcortex, Path::new("in.dlabel.nii"), Path::new("/tmp/v.txt"));
        assert_eq!(
            "wb_command '-cifti-export-dense-mapping' 'in.dlabel.nii' 'COLUMN' '-volume-all' '/tmp/v.txt' '-structure'",
            sub.to_string()
        );
    }
}
