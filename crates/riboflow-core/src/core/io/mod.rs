pub mod cif;
pub mod fasta;
pub mod pdb;

use nalgebra::Point3;
use std::path::Path;
use thiserror::Error;

/// Backbone atom names used for structural comparison of RNA models.
/// The C3'/P trace is shared by every backend's output and is the standard
/// coarse representation for RNA RMSD.
pub static BACKBONE_ATOMS: phf::Set<&'static str> = phf::phf_set! {
    "C3'",
    "P",
};

#[derive(Debug, Error)]
pub enum StructureIoError {
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in '{path}' at line {line}: {message}")]
    Malformed {
        path: String,
        line: usize,
        message: String,
    },

    #[error("no backbone atoms (C3'/P) found in '{path}'")]
    NoBackboneAtoms { path: String },
}

/// Reads the backbone trace (C3' and P atoms, first model only) from a
/// structure file, dispatching on the file extension: `.cif` is parsed as
/// mmCIF, everything else as PDB.
pub fn read_backbone_coords(path: &Path) -> Result<Vec<Point3<f64>>, StructureIoError> {
    let is_cif = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("cif"))
        .unwrap_or(false);

    let coords = if is_cif {
        cif::read_backbone(path)?
    } else {
        pdb::read_backbone(path)?
    };

    if coords.is_empty() {
        return Err(StructureIoError::NoBackboneAtoms {
            path: path.display().to_string(),
        });
    }
    Ok(coords)
}
