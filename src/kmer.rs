//! Fixed-length k-mer count tables.
//!
//! Tables come from `jellyfish dump -c -t` (`KMER<TAB>COUNT` per line) or are
//! counted directly from a contig sequence. Insertion order is kept so joins
//! are reproducible.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Result;
use log::warn;

use crate::error::ExtractError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KmerCountTable {
    k: usize,
    entries: Vec<(String, u32)>,
    index: HashMap<String, usize>,
}

impl KmerCountTable {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Record `count` for `kmer`; a k-mer already present keeps its first count.
    pub fn insert(&mut self, kmer: &str, count: u32) -> bool {
        if self.index.contains_key(kmer) {
            return false;
        }
        self.index.insert(kmer.to_string(), self.entries.len());
        self.entries.push((kmer.to_string(), count));
        true
    }

    pub fn get(&self, kmer: &str) -> Option<u32> {
        self.index.get(kmer).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, kmer: &str) -> bool {
        self.index.contains_key(kmer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (k-mer, count) in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), *c))
    }

    /// Count forward-strand k-mers of `sequence`, skipping any containing a non-ACGT base.
    pub fn from_sequence(sequence: &[u8], k: usize) -> Self {
        let mut counts: HashMap<&[u8], u32> = HashMap::new();
        let mut order: Vec<&[u8]> = Vec::new();
        if k > 0 && sequence.len() >= k {
            for window in sequence.windows(k) {
                if !window.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')) {
                    continue;
                }
                let c = counts.entry(window).or_insert(0);
                if *c == 0 {
                    order.push(window);
                }
                *c += 1;
            }
        }

        let mut table = Self::new(k);
        for kmer in order {
            // windows hold only ACGT bytes
            let text = String::from_utf8_lossy(kmer);
            table.insert(&text, counts[kmer]);
        }
        table
    }

    /// Parse a `KMER<TAB>COUNT` dump; malformed lines are skipped and counted.
    pub fn parse_dump<R: BufRead>(reader: R, k: usize) -> Result<(Self, u64)> {
        let mut table = Self::new(k);
        let mut malformed = 0u64;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            match parse_dump_line(line, k) {
                Some((kmer, count)) => {
                    table.insert(kmer, count);
                }
                None => malformed += 1,
            }
        }
        Ok((table, malformed))
    }

    /// Load a dump file. A missing file is [`ExtractError::MissingInput`].
    pub fn from_path(path: &Path, k: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractError::MissingInput(format!("k-mer table {}", path.display()))
            } else {
                ExtractError::io(e, path)
            }
        })?;
        let (table, malformed) = Self::parse_dump(BufReader::new(file), k)?;
        if malformed > 0 {
            warn!("{}: {} malformed k-mer lines skipped", path.display(), malformed);
        }
        Ok(table)
    }
}

fn parse_dump_line(line: &str, k: usize) -> Option<(&str, u32)> {
    let mut fields = line.split(|c: char| c == '\t' || c == ' ');
    let kmer = fields.next()?;
    let count = fields.next()?.parse().ok()?;
    (kmer.len() == k).then_some((kmer, count))
}
