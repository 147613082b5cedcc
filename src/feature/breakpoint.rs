//! Read breakpoint evidence: per-base split/clip credits over read depth.

use std::path::Path;

use anyhow::Result;

use crate::bam::{ends_with, starts_with, CigarKind};
use crate::error::ExtractError;
use crate::feature::ContigAccumulator;
use crate::input::{AlignmentRecord, Contig};
use crate::output::table::{fmt_float, read_table, TableRow};
use crate::utils::stats::ratio;
use crate::window::{Bucketed, WindowPlan};

// ==================== Rows ====================

/// A base with at least one breakpoint credit. `position` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointBase {
    pub contig: String,
    pub position: usize,
    pub breakcount: u32,
    pub readcount: u32,
}

impl BreakpointBase {
    pub fn ratio(&self) -> f64 {
        ratio(self.breakcount as f64, self.readcount as f64)
    }
}

impl TableRow for BreakpointBase {
    const COLUMNS: &'static [&'static str] =
        &["contig", "position", "read_breakpoint_count", "read_count"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.contig.clone(),
            self.position.to_string(),
            self.breakcount.to_string(),
            self.readcount.to_string(),
        ]
    }
}

/// Output row: the strongest per-base breakpoint ratio in a window.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointWindow {
    pub contig: String,
    pub start_pos: usize,
    pub read_breakpoint_ratio: f64,
}

impl TableRow for BreakpointWindow {
    const COLUMNS: &'static [&'static str] = &["contig", "start_pos", "read_breakpoint_ratio"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.contig.clone(),
            self.start_pos.to_string(),
            fmt_float(self.read_breakpoint_ratio),
        ]
    }
}

// ==================== Accumulator ====================

/// Per-base read depth and breakpoint credits for the open contig.
#[derive(Default)]
pub struct BreakpointAccumulator {
    readcount: Vec<u32>,
    breakcount: Vec<u32>,
}

impl BreakpointAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn credit(&mut self, index: usize) {
        if let Some(c) = self.breakcount.get_mut(index) {
            *c += 1;
        }
    }
}

/// 0-based positions credited as breakpoints by one alignment.
///
/// A supplementary alignment credits one end; any soft-clipped alignment
/// (supplementary or not) additionally credits each clipped end.
pub fn breakpoint_credits(rec: &AlignmentRecord) -> Vec<usize> {
    let blocks = rec.blocks();
    let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
        return Vec::new();
    };
    let cigar = rec.cigar_ops();
    let mut credits = Vec::new();

    if rec.is_supplementary() {
        if starts_with(cigar, CigarKind::HardClip) {
            credits.push(first.0);
        } else {
            credits.push(last.1 - 1);
        }
    }
    if rec.clip_stats().soft > 0 {
        if starts_with(cigar, CigarKind::SoftClip) {
            credits.push(first.0);
        }
        if ends_with(cigar, CigarKind::SoftClip) {
            credits.push(last.1 - 1);
        }
    }
    credits
}

impl ContigAccumulator for BreakpointAccumulator {
    type Row = BreakpointBase;

    fn name(&self) -> &'static str {
        "breakpoints"
    }

    fn begin_contig(&mut self, contig: &Contig) {
        self.readcount = vec![0; contig.length];
        self.breakcount = vec![0; contig.length];
    }

    fn process(&mut self, record: &AlignmentRecord) {
        let (Some(start), Some(end)) = (record.reference_start(), record.reference_end()) else {
            return;
        };
        let end = end.min(self.readcount.len());
        for depth in self.readcount.iter_mut().take(end).skip(start) {
            *depth += 1;
        }
        for index in breakpoint_credits(record) {
            self.credit(index);
        }
    }

    fn end_contig(&mut self, contig: &Contig, rows: &mut Vec<BreakpointBase>) {
        for (i, (&breakcount, &readcount)) in self.breakcount.iter().zip(&self.readcount).enumerate() {
            if breakcount > 0 {
                rows.push(BreakpointBase {
                    contig: contig.name.clone(),
                    position: i + 1,
                    breakcount,
                    readcount,
                });
            }
        }
        self.readcount = Vec::new();
        self.breakcount = Vec::new();
    }
}

// ==================== Windows ====================

/// Running maximum that ignores undefined ratios.
#[derive(Debug, Default, Clone, Copy)]
struct MaxRatio(Option<f64>);

impl MaxRatio {
    fn offer(&mut self, v: f64) {
        if v.is_nan() {
            return;
        }
        self.0 = Some(self.0.map_or(v, |m| m.max(v)));
    }
}

/// Reduce per-base rows (grouped by contig, sorted by position) to windows.
pub fn breakpoint_windows(plan: &WindowPlan, bases: &[BreakpointBase]) -> Vec<BreakpointWindow> {
    let mut windows = Vec::new();
    for group in bases.chunk_by(|a, b| a.contig == b.contig) {
        let mut buckets: Bucketed<MaxRatio> = Bucketed::new(*plan);
        for base in group {
            if let Some(max) = buckets.slot(base.position) {
                max.offer(base.ratio());
            }
        }
        windows.extend(buckets.finish().into_iter().map(|(start_pos, max)| BreakpointWindow {
            contig: group[0].contig.clone(),
            start_pos,
            read_breakpoint_ratio: max.0.unwrap_or(f64::NAN),
        }));
    }
    windows
}

/// Load a persisted per-base table.
pub fn load_per_base(path: &Path) -> Result<Vec<BreakpointBase>> {
    let table = read_table(path)?;
    let col = |name: &str| {
        table.column(name).ok_or_else(|| {
            ExtractError::MalformedRecord(format!("{}: missing column {}", path.display(), name))
        })
    };
    let (contig, position, breaks, reads) = (
        col("contig")?,
        col("position")?,
        col("read_breakpoint_count")?,
        col("read_count")?,
    );

    let parse = |cell: &str| -> Result<u64> {
        cell.parse().map_err(|_| {
            ExtractError::MalformedRecord(format!("{}: bad count {:?}", path.display(), cell)).into()
        })
    };
    let mut bases = Vec::with_capacity(table.len());
    for row in &table.rows {
        bases.push(BreakpointBase {
            contig: row[contig].clone(),
            position: parse(&row[position])? as usize,
            breakcount: parse(&row[breaks])? as u32,
            readcount: parse(&row[reads])? as u32,
        });
    }
    Ok(bases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::scan_contigs;
    use crate::input::{AlignmentHeader, MemorySource, FLAG_SUPPLEMENTARY};
    use crate::output::table::write_table;
    use approx::assert_relative_eq;

    fn supplementary(pos: i32, cigar: &str) -> AlignmentRecord {
        AlignmentRecord::mapped(0, pos, cigar).unwrap().with_flags(FLAG_SUPPLEMENTARY)
    }

    #[test]
    fn test_supplementary_credits() {
        assert_eq!(breakpoint_credits(&supplementary(499, "30H70M")), vec![499]);
        assert_eq!(breakpoint_credits(&supplementary(499, "70M30H")), vec![568]);
        // two blocks: the last block's end
        assert_eq!(breakpoint_credits(&supplementary(100, "20M5D30M50H")), vec![154]);
    }

    #[test]
    fn test_soft_clip_credits() {
        let left = AlignmentRecord::mapped(0, 200, "10S90M").unwrap();
        assert_eq!(breakpoint_credits(&left), vec![200]);
        let right = AlignmentRecord::mapped(0, 200, "90M10S").unwrap();
        assert_eq!(breakpoint_credits(&right), vec![289]);
        let both = AlignmentRecord::mapped(0, 200, "5S90M5S").unwrap();
        assert_eq!(breakpoint_credits(&both), vec![200, 289]);
        let unclipped = AlignmentRecord::mapped(0, 200, "100M").unwrap();
        assert!(breakpoint_credits(&unclipped).is_empty());
    }

    #[test]
    fn test_empty_alignment_at_contig_start_credits_nothing() {
        let rec = AlignmentRecord::mapped(0, 0, "5S0M").unwrap();
        assert!(breakpoint_credits(&rec).is_empty());
        assert!(breakpoint_credits(&supplementary(0, "5H0M")).is_empty());

        let header = AlignmentHeader::new(&[("c1", 1000)]);
        let source = MemorySource::new(header, vec![rec]);
        let bases = scan_contigs(&source, 0, &mut BreakpointAccumulator::new()).unwrap();
        assert!(bases.is_empty());
    }

    #[test]
    fn test_supplementary_soft_clipped_credits_twice() {
        let rec = supplementary(300, "40M60S");
        assert_eq!(breakpoint_credits(&rec), vec![339, 339]);
        let rec = supplementary(300, "30H40M10S");
        assert_eq!(breakpoint_credits(&rec), vec![300, 339]);
    }

    #[test]
    fn test_single_hard_clipped_supplementary_window_ratio() {
        let header = AlignmentHeader::new(&[("c1", 2000)]);
        let records = vec![
            AlignmentRecord::mapped(0, 450, "100M").unwrap(),
            AlignmentRecord::mapped(0, 470, "100M").unwrap(),
            AlignmentRecord::mapped(0, 480, "100M").unwrap(),
            supplementary(499, "30H70M"),
        ];
        let source = MemorySource::new(header, records);
        let bases = scan_contigs(&source, 0, &mut BreakpointAccumulator::new()).unwrap();
        assert_eq!(
            bases,
            vec![BreakpointBase {
                contig: "c1".into(),
                position: 500,
                breakcount: 1,
                readcount: 4,
            }]
        );

        let windows = breakpoint_windows(&WindowPlan::default(), &bases);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_pos, 500);
        assert_relative_eq!(windows[0].read_breakpoint_ratio, 0.25);
    }

    #[test]
    fn test_window_takes_max_ratio() {
        let base = |contig: &str, position, breakcount, readcount| BreakpointBase {
            contig: contig.into(),
            position,
            breakcount,
            readcount,
        };
        let bases = vec![
            base("a", 120, 1, 1),
            base("a", 310, 1, 10),
            base("a", 350, 3, 6),
            base("a", 420, 0, 0),
            base("b", 305, 2, 4),
        ];
        let windows = breakpoint_windows(&WindowPlan::default(), &bases);
        let got: Vec<_> = windows
            .iter()
            .map(|w| (w.contig.as_str(), w.start_pos, w.read_breakpoint_ratio))
            .collect();
        assert_eq!(got[0], ("a", 300, 0.5));
        assert_eq!((got[1].0, got[1].1), ("a", 400));
        assert!(got[1].2.is_nan());
        assert_eq!(got[2], ("b", 300, 0.5));
    }

    #[test]
    fn test_per_base_checkpoint_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("per_base.txt");
        let bases = vec![BreakpointBase {
            contig: "c1".into(),
            position: 777,
            breakcount: 2,
            readcount: 9,
        }];
        write_table(&path, &bases).unwrap();
        assert_eq!(load_per_base(&path).unwrap(), bases);
    }
}
