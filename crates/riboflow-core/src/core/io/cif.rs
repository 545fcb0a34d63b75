use super::{BACKBONE_ATOMS, StructureIoError};
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Extracts backbone atom coordinates from an mmCIF file.
///
/// Only the `_atom_site` loop is interpreted. Atom names are matched against
/// [`BACKBONE_ATOMS`] after stripping mmCIF quoting (`"C3'"`), and rows are
/// restricted to the first model when `pdbx_PDB_model_num` is present.
pub fn read_backbone(path: &Path) -> Result<Vec<Point3<f64>>, StructureIoError> {
    let file = File::open(path).map_err(|source| StructureIoError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut headers: Vec<String> = Vec::new();
    let mut in_atom_site = false;
    let mut coords = Vec::new();
    let mut first_model: Option<String> = None;

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| StructureIoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let trimmed = line.trim();

        if trimmed.starts_with("_atom_site.") {
            in_atom_site = true;
            headers.push(trimmed["_atom_site.".len()..].to_string());
            continue;
        }
        if !in_atom_site {
            continue;
        }
        // The atom_site loop ends at the next category, loop keyword, or
        // data block boundary.
        if trimmed.starts_with('_')
            || trimmed.starts_with("loop_")
            || trimmed.starts_with("data_")
            || trimmed == "#"
        {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != headers.len() {
            return Err(StructureIoError::Malformed {
                path: path.display().to_string(),
                line: index + 1,
                message: format!(
                    "atom_site row has {} fields, header declares {}",
                    fields.len(),
                    headers.len()
                ),
            });
        }

        let column = |name: &str| headers.iter().position(|h| h == name);
        let atom_id = column("label_atom_id")
            .or_else(|| column("auth_atom_id"))
            .map(|i| fields[i].trim_matches('"').trim_matches('\''));
        let Some(name) = atom_id else {
            return Err(StructureIoError::Malformed {
                path: path.display().to_string(),
                line: index + 1,
                message: "atom_site loop lacks an atom id column".into(),
            });
        };

        if let Some(model_col) = column("pdbx_PDB_model_num") {
            let model = fields[model_col].to_string();
            match &first_model {
                None => first_model = Some(model),
                Some(first) if *first != model => break,
                Some(_) => {}
            }
        }

        if !BACKBONE_ATOMS.contains(name) {
            continue;
        }

        let parse = |col: &str| {
            column(col)
                .and_then(|i| fields[i].parse::<f64>().ok())
                .ok_or_else(|| StructureIoError::Malformed {
                    path: path.display().to_string(),
                    line: index + 1,
                    message: format!("missing or invalid {col}"),
                })
        };
        coords.push(Point3::new(
            parse("Cartn_x")?,
            parse("Cartn_y")?,
            parse("Cartn_z")?,
        ));
    }

    Ok(coords)
}
