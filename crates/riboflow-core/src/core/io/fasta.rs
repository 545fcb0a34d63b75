use super::StructureIoError;
use std::path::Path;

/// One record of a FASTA file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// Header line without the leading `>`.
    pub header: String,
    /// Concatenated sequence, uppercased.
    pub sequence: String,
}

impl FastaRecord {
    /// The record identifier: the first whitespace-separated token of the
    /// header.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }

    /// GC content as a percentage of sequence length.
    pub fn gc_percent(&self) -> f64 {
        if self.sequence.is_empty() {
            return 0.0;
        }
        let gc = self
            .sequence
            .chars()
            .filter(|c| matches!(c, 'G' | 'C'))
            .count();
        gc as f64 / self.sequence.len() as f64 * 100.0
    }
}

/// Reads all records from a FASTA file.
pub fn read_fasta(path: &Path) -> Result<Vec<FastaRecord>, StructureIoError> {
    let text = std::fs::read_to_string(path).map_err(|source| StructureIoError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut records = Vec::new();
    let mut header: Option<String> = None;
    let mut sequence = String::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('>') {
            if let Some(prev) = header.take() {
                records.push(FastaRecord {
                    header: prev,
                    sequence: std::mem::take(&mut sequence),
                });
            }
            header = Some(rest.trim().to_string());
        } else if header.is_some() {
            sequence.push_str(&line.to_ascii_uppercase());
        }
    }
    if let Some(prev) = header {
        records.push(FastaRecord {
            header: prev,
            sequence,
        });
    }

    Ok(records)
}
