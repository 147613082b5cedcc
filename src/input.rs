//! Alignment input: BAM records via noodles, plus an in-memory source.
//!
//! Every consumer acquires its own record stream from an [`AlignmentSource`]
//! and releases it when the stream is dropped, so feature families can scan
//! the same alignments independently (and concurrently).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use noodles::bam;
use noodles::bgzf;
use noodles::sam;

use crate::bam::{aligned_blocks, parse_cigar, reference_span, Cigar, ClipStats};

pub use crate::bam::CigarKind;

pub const FLAG_PAIRED: u16 = 0x1;
pub const FLAG_PROPER_PAIR: u16 = 0x2;
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_MATE_REVERSE: u16 = 0x20;
pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

// ==================== Header ====================

/// A reference sequence from the alignment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    pub id: usize,
    pub name: String,
    pub length: usize,
}

/// Reference names and lengths extracted from a SAM header.
#[derive(Debug, Clone, Default)]
pub struct AlignmentHeader {
    pub refs: Vec<String>,
    pub lengths: Vec<usize>,
}

impl AlignmentHeader {
    pub fn new(contigs: &[(&str, usize)]) -> Self {
        Self {
            refs: contigs.iter().map(|(n, _)| n.to_string()).collect(),
            lengths: contigs.iter().map(|&(_, l)| l).collect(),
        }
    }

    fn from_sam_header(header: &sam::Header) -> Self {
        let mut refs = Vec::new();
        let mut lengths = Vec::new();
        for (name, map) in header.reference_sequences().iter() {
            refs.push(String::from_utf8_lossy(name).to_string());
            lengths.push(map.length().get());
        }
        Self { refs, lengths }
    }

    pub fn contig(&self, id: usize) -> Option<Contig> {
        let name = self.refs.get(id)?;
        Some(Contig {
            id,
            name: name.clone(),
            length: self.lengths[id],
        })
    }

    pub fn contigs(&self) -> impl Iterator<Item = Contig> + '_ {
        (0..self.refs.len()).filter_map(|id| self.contig(id))
    }

    /// Contig name -> length, the reference length table.
    pub fn length_of(&self, name: &str) -> Option<usize> {
        self.refs
            .iter()
            .position(|r| r == name)
            .map(|id| self.lengths[id])
    }
}

// ==================== Record ====================

/// One read alignment, reduced to the fields the feature families use.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub ref_id: i32,
    pub pos: i32, // 0-based
    pub flag: u16,
    pub cigar: Cigar,
    pub next_ref_id: i32,
    pub next_pos: i32, // 0-based
    pub tlen: i32,
}

impl Default for AlignmentRecord {
    fn default() -> Self {
        AlignmentRecord {
            ref_id: -1,
            pos: -1,
            flag: 0,
            cigar: Vec::new(),
            next_ref_id: -1,
            next_pos: -1,
            tlen: 0,
        }
    }
}

impl AlignmentRecord {
    /// A mapped, unpaired alignment at 0-based `pos` with a textual CIGAR.
    pub fn mapped(ref_id: i32, pos: i32, cigar: &str) -> crate::error::Result<Self> {
        Ok(Self {
            ref_id,
            pos,
            cigar: parse_cigar(cigar)?,
            ..Default::default()
        })
    }

    /// Mark the record as paired with its mate at `next_ref_id:next_pos`.
    pub fn with_mate(mut self, next_ref_id: i32, next_pos: i32, tlen: i32) -> Self {
        self.flag |= FLAG_PAIRED;
        self.next_ref_id = next_ref_id;
        self.next_pos = next_pos;
        self.tlen = tlen;
        self
    }

    pub fn with_flags(mut self, flag: u16) -> Self {
        self.flag |= flag;
        self
    }

    pub fn flags(&self) -> u16 {
        self.flag
    }

    pub fn is_paired(&self) -> bool {
        self.flag & FLAG_PAIRED != 0
    }

    pub fn is_proper_pair(&self) -> bool {
        self.flag & FLAG_PROPER_PAIR != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.flag & FLAG_UNMAPPED != 0 || self.ref_id < 0 || self.pos < 0
    }

    pub fn is_reverse(&self) -> bool {
        self.flag & FLAG_REVERSE != 0
    }

    pub fn is_mate_reverse(&self) -> bool {
        self.flag & FLAG_MATE_REVERSE != 0
    }

    pub fn is_supplementary(&self) -> bool {
        self.flag & FLAG_SUPPLEMENTARY != 0
    }

    /// Mate aligned to the same reference as this read.
    pub fn mate_on_same_reference(&self) -> bool {
        self.next_ref_id == self.ref_id
    }

    /// 0-based alignment start, or None if unmapped.
    pub fn reference_start(&self) -> Option<usize> {
        if self.is_unmapped() {
            None
        } else {
            Some(self.pos as usize)
        }
    }

    /// 0-based exclusive alignment end.
    pub fn reference_end(&self) -> Option<usize> {
        self.reference_start()
            .map(|start| start + reference_span(&self.cigar))
    }

    /// 0-based mate start, or None if not placed.
    pub fn mate_start(&self) -> Option<usize> {
        (self.next_pos >= 0).then_some(self.next_pos as usize)
    }

    /// Absolute observed template length.
    pub fn fragment_size(&self) -> u32 {
        self.tlen.unsigned_abs()
    }

    pub fn clip_stats(&self) -> ClipStats {
        ClipStats::from_cigar(&self.cigar)
    }

    pub fn cigar_ops(&self) -> &[(CigarKind, usize)] {
        &self.cigar
    }

    /// Gapless aligned blocks on the reference (empty when unmapped).
    pub fn blocks(&self) -> Vec<(usize, usize)> {
        match self.reference_start() {
            Some(start) => aligned_blocks(start, &self.cigar),
            None => Vec::new(),
        }
    }
}

/// Decode a noodles BAM record into our AlignmentRecord.
fn decode_bam_record(rec: &bam::Record) -> Result<AlignmentRecord> {
    let ref_id = match rec.reference_sequence_id() {
        Some(id) => id? as i32,
        None => -1,
    };

    let pos = match rec.alignment_start() {
        Some(p) => (p?.get() as i32) - 1, // convert 1-based to 0-based
        None => -1,
    };

    let mut cigar = Vec::new();
    for op_result in rec.cigar().iter() {
        let op = op_result?;
        cigar.push((op.kind(), op.len()));
    }

    let next_ref_id = match rec.mate_reference_sequence_id() {
        Some(Ok(id)) => id as i32,
        _ => -1,
    };
    let next_pos = match rec.mate_alignment_start() {
        Some(Ok(p)) => (p.get() as i32) - 1,
        _ => -1,
    };

    Ok(AlignmentRecord {
        ref_id,
        pos,
        flag: rec.flags().bits(),
        cigar,
        next_ref_id,
        next_pos,
        tlen: rec.template_length(),
    })
}

// ==================== Readers ====================

/// A forward-only BAM reader.
pub struct AlignmentInput {
    reader: bam::io::Reader<bgzf::io::Reader<BufReader<File>>>,
    pub header: AlignmentHeader,
    buf: bam::Record,
}

impl AlignmentInput {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open BAM {}", path.display()))?;
        let mut reader = bam::io::Reader::new(BufReader::new(file));
        let sam_header = reader
            .read_header()
            .with_context(|| format!("Failed to read BAM header of {}", path.display()))?;
        Ok(Self {
            reader,
            header: AlignmentHeader::from_sam_header(&sam_header),
            buf: bam::Record::default(),
        })
    }

    /// Read the next alignment record.
    pub fn read_record(&mut self) -> Result<Option<AlignmentRecord>> {
        match self.reader.read_record(&mut self.buf)? {
            0 => Ok(None),
            _ => Ok(Some(decode_bam_record(&self.buf)?)),
        }
    }
}

impl Iterator for AlignmentInput {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

// ==================== Sources ====================

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<AlignmentRecord>> + 'a>;

/// Factory for coordinate-sorted alignment record streams.
pub trait AlignmentSource: Sync {
    fn header(&self) -> &AlignmentHeader;

    /// Open a fresh pass over all records, sorted by reference then start.
    fn records(&self) -> Result<RecordIter<'_>>;
}

/// A BAM file, reopened for every pass.
pub struct BamSource {
    path: PathBuf,
    header: AlignmentHeader,
}

impl BamSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let header = AlignmentInput::open(&path)?.header;
        Ok(Self { path, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlignmentSource for BamSource {
    fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    fn records(&self) -> Result<RecordIter<'_>> {
        Ok(Box::new(AlignmentInput::open(&self.path)?))
    }
}

/// Records held in memory; must already be coordinate sorted.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    header: AlignmentHeader,
    records: Vec<AlignmentRecord>,
}

impl MemorySource {
    pub fn new(header: AlignmentHeader, records: Vec<AlignmentRecord>) -> Self {
        Self { header, records }
    }

    /// Sort records by (reference, start), unmapped last.
    pub fn sorted(header: AlignmentHeader, mut records: Vec<AlignmentRecord>) -> Self {
        records.sort_by_key(|r| {
            if r.is_unmapped() {
                (i64::MAX, i64::MAX)
            } else {
                (r.ref_id as i64, r.pos as i64)
            }
        });
        Self { header, records }
    }
}

impl AlignmentSource for MemorySource {
    fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    fn records(&self) -> Result<RecordIter<'_>> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flags() {
        let rec = AlignmentRecord::mapped(0, 500, "100M")
            .unwrap()
            .with_mate(0, 700, 300)
            .with_flags(FLAG_PROPER_PAIR | FLAG_MATE_REVERSE);
        assert!(rec.is_paired());
        assert!(rec.is_proper_pair());
        assert!(!rec.is_reverse());
        assert!(rec.is_mate_reverse());
        assert!(!rec.is_supplementary());
        assert!(rec.mate_on_same_reference());
        assert_eq!(rec.reference_start(), Some(500));
        assert_eq!(rec.reference_end(), Some(600));
        assert_eq!(rec.mate_start(), Some(700));
    }

    #[test]
    fn test_fragment_size_is_absolute() {
        let rec = AlignmentRecord::mapped(0, 700, "100M").unwrap().with_mate(0, 500, -300);
        assert_eq!(rec.fragment_size(), 300);
    }

    #[test]
    fn test_unmapped_record() {
        let rec = AlignmentRecord::default().with_flags(FLAG_UNMAPPED);
        assert!(rec.is_unmapped());
        assert_eq!(rec.reference_start(), None);
        assert!(rec.blocks().is_empty());
    }

    #[test]
    fn test_header_lookup() {
        let header = AlignmentHeader::new(&[("k141_1", 12000), ("k141_2", 800)]);
        assert_eq!(header.length_of("k141_2"), Some(800));
        assert_eq!(header.length_of("missing"), None);
        let contigs: Vec<_> = header.contigs().collect();
        assert_eq!(contigs[1].name, "k141_2");
        assert_eq!(contigs[1].id, 1);
    }

    #[test]
    fn test_memory_source_sorted() {
        let header = AlignmentHeader::new(&[("a", 1000), ("b", 1000)]);
        let records = vec![
            AlignmentRecord::mapped(1, 10, "10M").unwrap(),
            AlignmentRecord::default().with_flags(FLAG_UNMAPPED),
            AlignmentRecord::mapped(0, 50, "10M").unwrap(),
            AlignmentRecord::mapped(0, 5, "10M").unwrap(),
        ];
        let source = MemorySource::sorted(header, records);
        let starts: Vec<i32> = source.records().unwrap().map(|r| r.unwrap().pos).collect();
        assert_eq!(starts, vec![5, 50, 10, -1]);
    }
}
