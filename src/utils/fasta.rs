use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use noodles::fasta;

/// An assembled contig with its sequence, uppercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigSequence {
    pub name: String,
    pub sequence: Vec<u8>,
}

impl ContigSequence {
    pub fn new(name: impl Into<String>, sequence: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.as_ref().to_ascii_uppercase(),
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Read all contigs of at least `min_length` bases from a FASTA file.
pub fn read_contigs(path: &Path, min_length: usize) -> Result<Vec<ContigSequence>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open assemblies {}", path.display()))?;
    let mut reader = fasta::io::Reader::new(BufReader::new(file));

    let mut contigs = Vec::new();
    let mut dropped = 0usize;
    for result in reader.records() {
        let record = result.with_context(|| format!("Failed to parse FASTA {}", path.display()))?;
        let sequence = record.sequence().as_ref();
        if sequence.len() < min_length {
            dropped += 1;
            continue;
        }
        let name = String::from_utf8_lossy(record.name()).to_string();
        contigs.push(ContigSequence::new(name, sequence));
    }
    info!(
        "Loaded {} contigs from {} ({} shorter than {} bp dropped)",
        contigs.len(),
        path.display(),
        dropped,
        min_length
    );
    Ok(contigs)
}
