use super::{BACKBONE_ATOMS, StructureIoError};
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Extracts backbone atom coordinates from a PDB file.
///
/// Only `ATOM`/`HETATM` records whose atom name is in [`BACKBONE_ATOMS`]
/// contribute; parsing stops at the first `ENDMDL` so multi-model files
/// (NMR-style or multi-seed dumps) yield the first model only.
///
/// Columns follow the fixed-width PDB format: atom name in columns 13-16,
/// coordinates in columns 31-54.
pub fn read_backbone(path: &Path) -> Result<Vec<Point3<f64>>, StructureIoError> {
    let file = File::open(path).map_err(|source| StructureIoError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut coords = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| StructureIoError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if line.starts_with("ENDMDL") {
            break;
        }
        if !(line.starts_with("ATOM") || line.starts_with("HETATM")) {
            continue;
        }
        if line.len() < 54 {
            return Err(StructureIoError::Malformed {
                path: path.display().to_string(),
                line: index + 1,
                message: "coordinate record shorter than 54 columns".into(),
            });
        }

        let name = line[12..16].trim();
        if !BACKBONE_ATOMS.contains(name) {
            continue;
        }

        let parse = |range: std::ops::Range<usize>, field: &str| {
            line[range]
                .trim()
                .parse::<f64>()
                .map_err(|_| StructureIoError::Malformed {
                    path: path.display().to_string(),
                    line: index + 1,
                    message: format!("invalid {field} coordinate"),
                })
        };
        let x = parse(30..38, "x")?;
        let y = parse(38..46, "y")?;
        let z = parse(46..54, "z")?;
        coords.push(Point3::new(x, y, z));
    }

    Ok(coords)
}
