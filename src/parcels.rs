//! Parcel definitions from the CIFTI XML of parcellated files (`.pscalar.nii`, `.ptseries.nii`).
//!
//! A parcels index map lists `Parcel` elements, each with the surface vertices (`Vertices`) and
//! subcortical voxels (`VoxelIndicesIJK`) it is made of. The position of a parcel in the list is its
//! index along the parcels dimension of the data matrix.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use std::path::Path;

use crate::cifti::Cifti2Image;
use crate::dense_mapping::Structure;
use crate::error::{GrayordinatesError, Result};
use crate::gifti::{attribute, element_name};

/// One parcel and the brain locations it covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Parcel {
    pub name: String,
    pub cortex_left: Vec<usize>,
    pub cortex_right: Vec<usize>,
    /// Voxel indices `[i, j, k]` in the volume space of the index map.
    pub voxels: Vec<[i64; 3]>,
}

impl Parcel {
    /// The surface vertices of the parcel on the given hemisphere. Empty for the subcortex.
    pub fn vertices(&self, structure: Structure) -> &[usize] {
        match structure {
            Structure::CortexLeft => &self.cortex_left,
            Structure::CortexRight => &self.cortex_right,
            Structure::Subcortex => &[],
        }
    }
}

/// Where the text of the current element goes.
enum TextTarget {
    None,
    Vertices(Structure),
    Voxels,
}

/// Parse all `Parcel` elements of a CIFTI XML document, in document order.
///
/// Fails with [`GrayordinatesError::InvalidCiftiXml`] for vertices on a structure other than the two
/// cortical hemispheres, and for malformed index lists.
pub fn parse_parcels(xml: &str) -> Result<Vec<Parcel>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut parcels: Vec<Parcel> = Vec::new();
    let mut current: Option<Parcel> = None;
    let mut target = TextTarget::None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => match element_name(e).as_str() {
                "Parcel" => current = Some(Parcel { name: parcel_name(e)?, ..Parcel::default() }),
                "Vertices" if current.is_some() => {
                    let structure = attribute(e, "BrainStructure")?.unwrap_or_default();
                    target = TextTarget::Vertices(surface_structure(&structure)?);
                    text.clear();
                }
                "VoxelIndicesIJK" if current.is_some() => {
                    target = TextTarget::Voxels;
                    text.clear();
                }
                _ => {}
            },
            Event::Empty(ref e) => {
                if element_name(e) == "Parcel" {
                    parcels.push(Parcel { name: parcel_name(e)?, ..Parcel::default() });
                }
            }
            Event::Text(ref e) => {
                if !matches!(target, TextTarget::None) {
                    text.push(' ');
                    text.push_str(&e.unescape()?);
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "Parcel" {
                    if let Some(parcel) = current.take() {
                        parcels.push(parcel);
                    }
                    continue;
                }
                let parcel = match current.as_mut() {
                    Some(parcel) => parcel,
                    None => continue,
                };
                match name.as_str() {
                    "Vertices" => {
                        if let TextTarget::Vertices(structure) = target {
                            let vertices = parse_indices::<usize>(&text, "Vertices")?;
                            match structure {
                                Structure::CortexLeft => parcel.cortex_left.extend(vertices),
                                _ => parcel.cortex_right.extend(vertices),
                            }
                        }
                        target = TextTarget::None;
                    }
                    "VoxelIndicesIJK" => {
                        let ijk = parse_indices::<i64>(&text, "VoxelIndicesIJK")?;
                        if ijk.len() % 3 != 0 {
                            return Err(GrayordinatesError::InvalidCiftiXml(format!(
                                "parcel '{}' has {} voxel indices, not a multiple of 3",
                                parcel.name,
                                ijk.len()
                            )));
                        }
                        parcel.voxels.extend(ijk.chunks(3).map(|c| [c[0], c[1], c[2]]));
                        target = TextTarget::None;
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parcels)
}

fn parcel_name(e: &BytesStart) -> Result<String> {
    attribute(e, "Name")?.ok_or_else(|| GrayordinatesError::InvalidCiftiXml(String::from("Parcel without Name")))
}

fn surface_structure(name: &str) -> Result<Structure> {
    match name {
        "CIFTI_STRUCTURE_CORTEX_LEFT" => Ok(Structure::CortexLeft),
        "CIFTI_STRUCTURE_CORTEX_RIGHT" => Ok(Structure::CortexRight),
        other => Err(GrayordinatesError::InvalidCiftiXml(format!("unrecognized surface structure '{}'", other))),
    }
}

fn parse_indices<T: std::str::FromStr>(text: &str, element: &str) -> Result<Vec<T>> {
    text.split_whitespace()
        .map(|v| v.parse::<T>().map_err(|_| GrayordinatesError::InvalidCiftiXml(format!("invalid index '{}' in {}", v, element))))
        .collect()
}

impl Cifti2Image {
    /// The parcels defined in the CIFTI XML of this file. Empty for dense files, an error if there is no CIFTI XML.
    pub fn parcels(&self) -> Result<Vec<Parcel>> {
        match &self.cifti_xml {
            Some(xml) => parse_parcels(xml),
            None => Err(GrayordinatesError::InvalidCiftiXml(String::from("file has no CIFTI XML extension"))),
        }
    }
}

/// Read the parcel definitions of a parcellated CIFTI-2 file.
///
/// # Examples
///
/// ```no_run
/// let parcels = grayordinates::read_parcels("/path/to/atlas.pscalar.nii").unwrap();
/// for (index, parcel) in parcels.iter().enumerate() {
///     println!("Parcel {} '{}' has {} left cortex vertices.", index, parcel.name, parcel.cortex_left.len());
/// }
/// ```
pub fn read_parcels<P: AsRef<Path>>(path: P) -> Result<Vec<Parcel>> {
    Cifti2Image::from_file(path)?.parcels()
}


#[cfg(test)]
mod test {
    use super::*;

    const PARCELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CIFTI Version="2">
  <Matrix>
    <MatrixIndicesMap AppliesToMatrixDimension="0" IndicesMapToDataType="CIFTI_INDEX_TYPE_SCALARS">
      <NamedMap><MapName>thickness</MapName></NamedMap>
    </MatrixIndicesMap>
    <MatrixIndicesMap AppliesToMatrixDimension="1" IndicesMapToDataType="CIFTI_INDEX_TYPE_PARCELS">
      <Surface BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT" SurfaceNumberOfVertices="32492"/>
      <Surface BrainStructure="CIFTI_STRUCTURE_CORTEX_RIGHT" SurfaceNumberOfVertices="32492"/>
      <Volume VolumeDimensions="91,109,91"/>
      <Parcel Name="L_V1_ROI">
        <Vertices BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT">0 1 2 17</Vertices>
      </Parcel>
      <Parcel Name="R_V1_ROI">
        <Vertices BrainStructure="CIFTI_STRUCTURE_CORTEX_RIGHT">5
          6</Vertices>
      </Parcel>
      <Parcel Name="THALAMUS_LEFT">
        <VoxelIndicesIJK>59 69 27
          60 69 27</VoxelIndicesIJK>
      </Parcel>
      <Parcel Name="EMPTY"/>
    </MatrixIndicesMap>
  </Matrix>
</CIFTI>"#;

    #[test]
    fn parcels_are_read_in_document_order() {
        let parcels = parse_parcels(PARCELS_XML).unwrap();
        let names: Vec<&str> = parcels.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(vec!["L_V1_ROI", "R_V1_ROI", "THALAMUS_LEFT", "EMPTY"], names);

        assert_eq!(vec![0, 1, 2, 17], parcels[0].cortex_left);
        assert!(parcels[0].cortex_right.is_empty());
        assert_eq!(&[5, 6], parcels[1].vertices(Structure::CortexRight));
        assert_eq!(vec![[59, 69, 27], [60, 69, 27]], parcels[2].voxels);
        assert_eq!(Parcel { name: String::from("EMPTY"), ..Parcel::default() }, parcels[3]);
    }

    #[test]
    fn dense_files_have_no_parcels() {
        let xml = r#"<CIFTI Version="2"><Matrix><MatrixIndicesMap AppliesToMatrixDimension="1" IndicesMapToDataType="CIFTI_INDEX_TYPE_BRAIN_MODELS">
            <BrainModel IndexOffset="0" IndexCount="2" ModelType="CIFTI_MODEL_TYPE_VOXELS" BrainStructure="CIFTI_STRUCTURE_THALAMUS_LEFT">
              <VoxelIndicesIJK>1 2 3 4 5 6</VoxelIndicesIJK>
            </BrainModel></MatrixIndicesMap></Matrix></CIFTI>"#;
        assert!(parse_parcels(xml).unwrap().is_empty());
    }

    #[test]
    fn unknown_surface_structures_are_rejected() {
        let xml = r#"<CIFTI><Parcel Name="x"><Vertices BrainStructure="CIFTI_STRUCTURE_CEREBELLUM">1</Vertices></Parcel></CIFTI>"#;
        match parse_parcels(xml) {
            Err(GrayordinatesError::InvalidCiftiXml(msg)) => assert!(msg.contains("CIFTI_STRUCTURE_CEREBELLUM")),
            other => panic!("expected InvalidCiftiXml, got {:?}", other),
        }
    }

    #[test]
    fn malformed_index_lists_are_rejected() {
        assert!(parse_parcels(r#"<CIFTI><Parcel Name="x"><VoxelIndicesIJK>1 2</VoxelIndicesIJK></Parcel></CIFTI>"#).is_err());
        assert!(parse_parcels(r#"<CIFTI><Parcel Name="x"><Vertices BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT">1 -2</Vertices></Parcel></CIFTI>"#).is_err());
        assert!(parse_parcels(r#"<CIFTI><Parcel><VoxelIndicesIJK>1 2 3</VoxelIndicesIJK></Parcel></CIFTI>"#).is_err());
    }
}
