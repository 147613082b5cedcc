//! Pileup text parsing and per-window base agreement signals.
//!
//! Input is `samtools mpileup` output: contig, 1-based position, reference
//! base, depth, read bases, qualities (tab separated). Each contig's lines must
//! be contiguous.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Result;
use log::{debug, info, warn};

use crate::error::ExtractError;
use crate::input::AlignmentHeader;
use crate::output::table::{fmt_float, TableRow};
use crate::utils::stats::{mean_and_cv, normalize_by_mean, ratio};
use crate::window::{reduce_track, WindowPlan};

/// Malformed lines reported verbatim before only the total is kept.
const MAX_REPORTED: u64 = 5;

// ==================== Line parsing ====================

/// Event counts at one reference base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseCounts {
    pub correct: u32,
    pub ambiguous: u32,
    pub insert: u32,
    pub deletion: u32,
    pub disagree: u32,
    pub depth: u32,
}

impl BaseCounts {
    fn add(&mut self, other: &BaseCounts) {
        self.correct += other.correct;
        self.ambiguous += other.ambiguous;
        self.insert += other.insert;
        self.deletion += other.deletion;
        self.disagree += other.disagree;
        self.depth += other.depth;
    }
}

/// Count the events encoded in a read-bases column. `depth` is left at zero.
///
/// `^` and the mapping quality after it are skipped, `$` is ignored, and
/// `+n`/`-n` consume the `n` inserted or deleted bases plus any nucleotide
/// letters directly following them, so none are taken for mismatches.
pub fn parse_read_bases(bases: &str) -> BaseCounts {
    let mut counts = BaseCounts::default();
    let bytes = bases.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'.' | b',' => counts.correct += 1,
            b'*' => counts.ambiguous += 1,
            b'A' | b'C' | b'G' | b'T' | b'a' | b'c' | b'g' | b't' => counts.disagree += 1,
            b'^' => i += 1,
            marker @ (b'+' | b'-') => {
                if marker == b'+' {
                    counts.insert += 1;
                } else {
                    counts.deletion += 1;
                }
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                let n: usize = bases[i + 1..i + 1 + digits].parse().unwrap_or(0);
                i += digits + n;
                let run = bytes[(i + 1).min(bytes.len())..]
                    .iter()
                    .take_while(|b| b"ACGTacgt".contains(b))
                    .count();
                i += run;
            }
            _ => {}
        }
        i += 1;
    }
    counts
}

/// One parsed pileup line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PileupLine<'a> {
    pub contig: &'a str,
    pub position: usize,
    pub ref_base: u8,
    pub counts: BaseCounts,
}

pub fn parse_line(line: &str) -> std::result::Result<PileupLine<'_>, ExtractError> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() < 5 {
        return Err(ExtractError::MalformedRecord(format!(
            "expected at least 5 fields, found {}",
            fields.len()
        )));
    }
    let position: usize = fields[1]
        .parse()
        .map_err(|_| ExtractError::MalformedRecord(format!("bad position {:?}", fields[1])))?;
    let depth: u32 = fields[3]
        .parse()
        .map_err(|_| ExtractError::MalformedRecord(format!("bad depth {:?}", fields[3])))?;
    if position == 0 {
        return Err(ExtractError::MalformedRecord("position 0".into()));
    }

    let mut counts = parse_read_bases(fields[4]);
    counts.depth = depth;
    Ok(PileupLine {
        contig: fields[0],
        position,
        ref_base: fields[2].bytes().next().unwrap_or(b'N'),
        counts,
    })
}

// ==================== Windows ====================

/// Output row of the pileup family.
#[derive(Debug, Clone, PartialEq)]
pub struct PileupWindow {
    pub contig: String,
    pub start_pos: usize,
    pub correct_portion: f64,
    pub ambiguous_portion: f64,
    pub disagree_portion: f64,
    pub deletion_portion: f64,
    pub insert_portion: f64,
    pub normalized_coverage: f64,
    pub normalized_deviation: f64,
    pub mean_coverage: f64,
}

impl TableRow for PileupWindow {
    const COLUMNS: &'static [&'static str] = &[
        "contig",
        "start_pos",
        "correct_portion",
        "ambiguous_portion",
        "disagree_portion",
        "deletion_portion",
        "insert_portion",
        "normalized_coverage",
        "normalized_deviation",
        "mean_coverage",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.contig.clone(),
            self.start_pos.to_string(),
            fmt_float(self.correct_portion),
            fmt_float(self.ambiguous_portion),
            fmt_float(self.disagree_portion),
            fmt_float(self.deletion_portion),
            fmt_float(self.insert_portion),
            fmt_float(self.normalized_coverage),
            fmt_float(self.normalized_deviation),
            fmt_float(self.mean_coverage),
        ]
    }
}

/// Reduce one contig's per-base track (index = position - 1) to windows.
pub fn pileup_windows(plan: &WindowPlan, contig: &str, track: &[BaseCounts]) -> Vec<PileupWindow> {
    let windows = reduce_track(plan, track, |start, slice| {
        let mut sum = BaseCounts::default();
        for counts in slice {
            sum.add(counts);
        }
        let depths: Vec<u32> = slice.iter().map(|c| c.depth).collect();
        let (coverage, deviation) = mean_and_cv(&depths);
        (start, sum, coverage, deviation)
    });

    let coverages: Vec<f64> = windows.iter().map(|w| w.2).collect();
    let (mean_coverage, normalized) = normalize_by_mean(&coverages);

    windows
        .into_iter()
        .zip(normalized)
        .map(|((start_pos, sum, _, deviation), normalized_coverage)| {
            let total = sum.depth as f64;
            PileupWindow {
                contig: contig.to_string(),
                start_pos,
                correct_portion: ratio(sum.correct as f64, total),
                ambiguous_portion: ratio(sum.ambiguous as f64, total),
                disagree_portion: ratio(sum.disagree as f64, total),
                deletion_portion: ratio(sum.deletion as f64, total),
                insert_portion: ratio(sum.insert as f64, total),
                normalized_coverage,
                normalized_deviation: deviation,
                mean_coverage,
            }
        })
        .collect()
}

// ==================== Aggregator ====================

struct ContigTrack {
    name: String,
    counts: Vec<BaseCounts>,
}

/// Streams pileup lines into per-contig tracks and windows each contig as
/// soon as its lines end.
pub struct PileupAggregator {
    plan: WindowPlan,
    min_length: usize,
    lengths: HashMap<String, usize>,
    current: Option<ContigTrack>,
    done: HashSet<String>,
    rows: Vec<PileupWindow>,
    lines: u64,
    malformed: u64,
}

impl PileupAggregator {
    pub fn new(plan: WindowPlan, header: &AlignmentHeader, min_length: usize) -> Self {
        let lengths = header
            .refs
            .iter()
            .cloned()
            .zip(header.lengths.iter().copied())
            .collect();
        Self {
            plan,
            min_length,
            lengths,
            current: None,
            done: HashSet::new(),
            rows: Vec::new(),
            lines: 0,
            malformed: 0,
        }
    }

    fn reject(&mut self, line: &str, why: &str) {
        self.malformed += 1;
        if self.malformed <= MAX_REPORTED {
            warn!("[pileup] skipping line {} ({}): {}", self.lines, why, line.trim_end());
        }
    }

    /// Consume one pileup line. Only a contig reappearing after its lines
    /// ended is an error; malformed lines are counted and skipped.
    pub fn feed_line(&mut self, line: &str) -> Result<()> {
        self.lines += 1;
        if line.trim().is_empty() {
            return Ok(());
        }
        let parsed = match parse_line(line) {
            Ok(p) => p,
            Err(e) => {
                self.reject(line, &e.to_string());
                return Ok(());
            }
        };
        let Some(&length) = self.lengths.get(parsed.contig) else {
            self.reject(line, "contig not in alignment header");
            return Ok(());
        };
        if length < self.min_length {
            return Ok(());
        }
        if parsed.position > length {
            self.reject(line, "position past contig end");
            return Ok(());
        }
        if parsed.ref_base.eq_ignore_ascii_case(&b'N') {
            return Ok(());
        }

        let switch = self.current.as_ref().is_none_or(|t| t.name != parsed.contig);
        if switch {
            if self.done.contains(parsed.contig) {
                return Err(ExtractError::Unsorted(format!(
                    "pileup lines of {} are not contiguous",
                    parsed.contig
                ))
                .into());
            }
            self.close_contig();
            self.current = Some(ContigTrack {
                name: parsed.contig.to_string(),
                counts: vec![BaseCounts::default(); length],
            });
        }
        if let Some(track) = self.current.as_mut() {
            track.counts[parsed.position - 1] = parsed.counts;
        }
        Ok(())
    }

    fn close_contig(&mut self) {
        if let Some(track) = self.current.take() {
            let windows = pileup_windows(&self.plan, &track.name, &track.counts);
            debug!("[pileup] {}: {} windows", track.name, windows.len());
            self.rows.extend(windows);
            self.done.insert(track.name);
        }
    }

    pub fn finish(mut self) -> Vec<PileupWindow> {
        self.close_contig();
        if self.malformed > 0 {
            warn!("[pileup] {} of {} lines skipped as malformed", self.malformed, self.lines);
        }
        info!("[pileup] {} lines, {} contigs, {} rows", self.lines, self.done.len(), self.rows.len());
        self.rows
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Consume every line of `reader`.
    pub fn read_from<R: BufRead>(mut self, reader: R) -> Result<Vec<PileupWindow>> {
        for line in reader.lines() {
            self.feed_line(&line?)?;
        }
        Ok(self.finish())
    }
}

/// Window a pileup file against the contigs of `header`.
pub fn pileup_file_windows(
    path: &Path,
    header: &AlignmentHeader,
    plan: WindowPlan,
    min_length: usize,
) -> Result<Vec<PileupWindow>> {
    let file = File::open(path).map_err(|e| ExtractError::io(e, path))?;
    PileupAggregator::new(plan, header, min_length).read_from(BufReader::new(file))
}
