//! Coverage by properly sized fragments, windowed and normalized per contig.

use log::debug;

use crate::config::ReadThresholds;
use crate::feature::fragment::FragmentStats;
use crate::feature::ContigAccumulator;
use crate::input::{AlignmentRecord, Contig};
use crate::output::table::{fmt_float, TableRow};
use crate::utils::stats::{mean_and_cv, normalize_by_mean};
use crate::window::{reduce_track, WindowPlan};

/// Output row of the fragment coverage family.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentWindow {
    pub contig: String,
    pub start_pos: usize,
    pub normalized_fragment_coverage: f64,
    pub normalized_fragment_deviation: f64,
}

impl TableRow for FragmentWindow {
    const COLUMNS: &'static [&'static str] = &[
        "contig",
        "start_pos",
        "normalized_fragment_coverage",
        "normalized_fragment_deviation",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.contig.clone(),
            self.start_pos.to_string(),
            fmt_float(self.normalized_fragment_coverage),
            fmt_float(self.normalized_fragment_deviation),
        ]
    }
}

/// Builds a per-base fragment coverage track for the open contig.
///
/// Spans are recorded as +1/-1 edges and summed into the track when the
/// contig closes.
pub struct FragmentCoverageAccumulator {
    plan: WindowPlan,
    stats: FragmentStats,
    multiplier: f64,
    edges: Vec<i64>,
    fragments: u64,
}

impl FragmentCoverageAccumulator {
    pub fn new(plan: WindowPlan, stats: FragmentStats, thresholds: &ReadThresholds) -> Self {
        Self {
            plan,
            stats,
            multiplier: thresholds.mad_multiplier,
            edges: Vec::new(),
            fragments: 0,
        }
    }

    /// The fragment span credited by `rec`, if it is the upstream read of a
    /// properly sized proper pair.
    fn fragment_span(&self, rec: &AlignmentRecord) -> Option<(usize, usize)> {
        if !(rec.is_paired() && rec.is_proper_pair() && rec.mate_on_same_reference()) {
            return None;
        }
        let size = rec.fragment_size();
        if !self.stats.is_proper_size(size, self.multiplier) {
            return None;
        }
        let own_start = rec.reference_start()?;
        let own_end = rec.reference_end()?;
        let mate_start = rec.mate_start()?;
        // only the downstream read credits its fragment; equal starts credit neither
        if mate_start >= own_start {
            return None;
        }
        let start = mate_start.min(own_start).min(own_end);
        Some((start, start + size as usize))
    }

    fn track(&self) -> Vec<u32> {
        let len = self.edges.len().saturating_sub(1);
        let mut track = Vec::with_capacity(len);
        let mut depth = 0i64;
        for &edge in &self.edges[..len] {
            depth += edge;
            track.push(depth.max(0) as u32);
        }
        track
    }
}

impl ContigAccumulator for FragmentCoverageAccumulator {
    type Row = FragmentWindow;

    fn name(&self) -> &'static str {
        "coverage"
    }

    fn begin_contig(&mut self, contig: &Contig) {
        self.edges = vec![0; contig.length + 1];
        self.fragments = 0;
    }

    fn process(&mut self, record: &AlignmentRecord) {
        let Some((start, end)) = self.fragment_span(record) else {
            return;
        };
        let len = self.edges.len() - 1;
        let (start, end) = (start.min(len), end.min(len));
        if start < end {
            self.edges[start] += 1;
            self.edges[end] -= 1;
            self.fragments += 1;
        }
    }

    fn end_contig(&mut self, contig: &Contig, rows: &mut Vec<FragmentWindow>) {
        let track = self.track();
        let windows = reduce_track(&self.plan, &track, |start, slice| {
            let (coverage, deviation) = mean_and_cv(slice);
            (start, coverage, deviation)
        });
        let coverages: Vec<f64> = windows.iter().map(|w| w.1).collect();
        let (_, normalized) = normalize_by_mean(&coverages);

        debug!(
            "[coverage] {}: {} fragments, {} windows",
            contig.name,
            self.fragments,
            windows.len()
        );
        rows.extend(windows.into_iter().zip(normalized).map(
            |((start_pos, _, deviation), coverage)| FragmentWindow {
                contig: contig.name.clone(),
                start_pos,
                normalized_fragment_coverage: coverage,
                normalized_fragment_deviation: deviation,
            },
        ));
        self.edges = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::scan_contigs;
    use crate::input::{AlignmentHeader, MemorySource, FLAG_PROPER_PAIR};
    use approx::assert_relative_eq;

    fn acc() -> FragmentCoverageAccumulator {
        FragmentCoverageAccumulator::new(
            WindowPlan::default(),
            FragmentStats::new(300.0, 10.0),
            &ReadThresholds::default(),
        )
    }

    fn downstream_mate(pos: i32, mate: i32, tlen: i32) -> AlignmentRecord {
        AlignmentRecord::mapped(0, pos, "100M")
            .unwrap()
            .with_mate(0, mate, tlen)
            .with_flags(FLAG_PROPER_PAIR)
    }

    #[test]
    fn test_only_downstream_read_credits() {
        let a = acc();
        assert_eq!(a.fragment_span(&downstream_mate(400, 200, -300)), Some((200, 500)));
        assert_eq!(a.fragment_span(&downstream_mate(200, 400, 300)), None);
        assert_eq!(a.fragment_span(&downstream_mate(200, 200, 100)), None);
    }

    #[test]
    fn test_improper_or_oversized_fragments_skipped() {
        let a = acc();
        let improper = AlignmentRecord::mapped(0, 400, "100M").unwrap().with_mate(0, 200, -300);
        assert_eq!(a.fragment_span(&improper), None);
        assert_eq!(a.fragment_span(&downstream_mate(900, 200, -800)), None);
    }

    #[test]
    fn test_uniform_coverage_normalizes_to_one() {
        // one 300 bp fragment starting at each of the first 700 bases
        let header = AlignmentHeader::new(&[("c1", 1000)]);
        let mut records = Vec::new();
        for mate in 0..700 {
            records.push(downstream_mate(mate + 200, mate, -300));
        }
        let source = MemorySource::sorted(header, records);
        let rows = scan_contigs(&source, 0, &mut acc()).unwrap();

        let starts: Vec<usize> = rows.iter().map(|r| r.start_pos).collect();
        assert_eq!(starts, vec![300, 400, 500, 600]);
        for row in &rows {
            assert_relative_eq!(row.normalized_fragment_coverage, 1.0);
            assert_relative_eq!(row.normalized_fragment_deviation, 0.0);
        }
    }

    #[test]
    fn test_contig_without_fragments_yields_nan() {
        let header = AlignmentHeader::new(&[("c1", 1000)]);
        let source = MemorySource::new(header, Vec::new());
        let rows = scan_contigs(&source, 0, &mut acc()).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.normalized_fragment_coverage.is_nan()));
        assert!(rows.iter().all(|r| r.normalized_fragment_deviation.is_nan()));
    }
}
