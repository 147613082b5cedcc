//! CIGAR utilities: text parsing, clip statistics and aligned blocks.

use crate::error::{ExtractError, Result};

pub use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

/// Decoded CIGAR: `(kind, length)` pairs in read order.
pub type Cigar = Vec<(CigarKind, usize)>;

/// Parse a SAM CIGAR string (e.g. `30H70M`) into operations.
///
/// `*` is the empty CIGAR of an unmapped read.
pub fn parse_cigar(cigar: &str) -> Result<Cigar> {
    if cigar == "*" {
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();
    let mut num_start = 0;

    for (i, c) in cigar.char_indices() {
        if c.is_ascii_digit() {
            continue;
        }
        let len: usize = cigar[num_start..i].parse().map_err(|_| {
            ExtractError::MalformedRecord(format!("invalid CIGAR length in '{}'", cigar))
        })?;
        let kind = match c {
            'M' => CigarKind::Match,
            'I' => CigarKind::Insertion,
            'D' => CigarKind::Deletion,
            'N' => CigarKind::Skip,
            'S' => CigarKind::SoftClip,
            'H' => CigarKind::HardClip,
            'P' => CigarKind::Pad,
            '=' => CigarKind::SequenceMatch,
            'X' => CigarKind::SequenceMismatch,
            _ => {
                return Err(ExtractError::MalformedRecord(format!(
                    "unknown CIGAR operation '{}' in '{}'",
                    c, cigar
                )));
            }
        };
        ops.push((kind, len));
        num_start = i + 1;
    }

    if num_start != cigar.len() {
        return Err(ExtractError::MalformedRecord(format!(
            "CIGAR '{}' ends without an operation",
            cigar
        )));
    }

    Ok(ops)
}

/// Length of the reference consumed by the alignment (M/D/N/=/X).
pub fn reference_span(cigar: &[(CigarKind, usize)]) -> usize {
    cigar
        .iter()
        .filter(|(kind, _)| consumes_reference(*kind))
        .map(|&(_, len)| len)
        .sum()
}

fn consumes_reference(kind: CigarKind) -> bool {
    matches!(
        kind,
        CigarKind::Match
            | CigarKind::Deletion
            | CigarKind::Skip
            | CigarKind::SequenceMatch
            | CigarKind::SequenceMismatch
    )
}

fn is_aligned(kind: CigarKind) -> bool {
    matches!(
        kind,
        CigarKind::Match | CigarKind::SequenceMatch | CigarKind::SequenceMismatch
    )
}

/// Total soft- and hard-clipped bases of one alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipStats {
    pub soft: usize,
    pub hard: usize,
}

impl ClipStats {
    pub fn from_cigar(cigar: &[(CigarKind, usize)]) -> Self {
        let mut stats = Self::default();
        for &(kind, len) in cigar {
            match kind {
                CigarKind::SoftClip => stats.soft += len,
                CigarKind::HardClip => stats.hard += len,
                _ => {}
            }
        }
        stats
    }
}

/// True when the first CIGAR operation is `kind`.
pub fn starts_with(cigar: &[(CigarKind, usize)], kind: CigarKind) -> bool {
    cigar.first().is_some_and(|&(k, _)| k == kind)
}

/// True when the last CIGAR operation is `kind`.
pub fn ends_with(cigar: &[(CigarKind, usize)], kind: CigarKind) -> bool {
    cigar.last().is_some_and(|&(k, _)| k == kind)
}

/// Gapless aligned blocks as half-open 0-based reference intervals.
///
/// Every non-empty M/=/X operation is its own block; deletions and skips
/// advance the reference without opening a block, insertions and clips are
/// ignored.
pub fn aligned_blocks(start: usize, cigar: &[(CigarKind, usize)]) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut pos = start;
    for &(kind, len) in cigar {
        if is_aligned(kind) {
            if len > 0 {
                blocks.push((pos, pos + len));
            }
            pos += len;
        } else if consumes_reference(kind) {
            pos += len;
        }
    }
    blocks
}
