//! Per-window read classification counters.

use crate::config::ReadThresholds;
use crate::feature::fragment::FragmentStats;
use crate::feature::ContigAccumulator;
use crate::input::{AlignmentRecord, Contig};
use crate::output::table::TableRow;
use crate::window::{Bucketed, WindowPlan};

/// Read signal counters for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCounts {
    pub read_count: u32,
    pub proper_read_count: u32,
    pub inversion_read_count: u32,
    pub clipped_read_count: u32,
    pub supplementary_read_count: u32,
    pub discordant_size_count: u32,
    pub discordant_loc_count: u32,
}

impl ReadCounts {
    /// Classify one read into the counters it belongs to.
    pub fn observe(&mut self, rec: &AlignmentRecord, stats: &FragmentStats, thresholds: &ReadThresholds) {
        self.read_count += 1;

        if rec.is_paired() {
            if rec.mate_on_same_reference() {
                if rec.is_proper_pair() {
                    self.proper_read_count += 1;
                }
                // exactly one of read and mate is reverse
                if rec.is_reverse() != rec.is_mate_reverse() {
                    self.inversion_read_count += 1;
                }
                if !stats.is_proper_size(rec.fragment_size(), thresholds.mad_multiplier) {
                    self.discordant_size_count += 1;
                }
            } else {
                self.discordant_loc_count += 1;
            }
        }

        let clips = rec.clip_stats();
        if clips.soft > thresholds.clip_min {
            self.clipped_read_count += 1;
        }
        if rec.is_supplementary() && clips.hard > thresholds.hard_clip_min {
            self.supplementary_read_count += 1;
        }
    }
}

/// Output row: counters for one (contig, window) plus the contig length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWindow {
    pub contig: String,
    pub start_pos: usize,
    pub counts: ReadCounts,
    pub length: usize,
}

impl TableRow for ReadWindow {
    const COLUMNS: &'static [&'static str] = &[
        "contig",
        "start_pos",
        "read_count",
        "proper_read_count",
        "inversion_read_count",
        "clipped_read_count",
        "supplementary_read_count",
        "discordant_size_count",
        "discordant_loc_count",
        "length",
    ];

    fn fields(&self) -> Vec<String> {
        let c = &self.counts;
        vec![
            self.contig.clone(),
            self.start_pos.to_string(),
            c.read_count.to_string(),
            c.proper_read_count.to_string(),
            c.inversion_read_count.to_string(),
            c.clipped_read_count.to_string(),
            c.supplementary_read_count.to_string(),
            c.discordant_size_count.to_string(),
            c.discordant_loc_count.to_string(),
            self.length.to_string(),
        ]
    }
}

/// Buckets reads by start position and counts their signal classes.
pub struct ReadSignalAccumulator {
    plan: WindowPlan,
    stats: FragmentStats,
    thresholds: ReadThresholds,
    buckets: Bucketed<ReadCounts>,
}

impl ReadSignalAccumulator {
    pub fn new(plan: WindowPlan, stats: FragmentStats, thresholds: ReadThresholds) -> Self {
        Self {
            plan,
            stats,
            thresholds,
            buckets: Bucketed::new(plan),
        }
    }
}

impl ContigAccumulator for ReadSignalAccumulator {
    type Row = ReadWindow;

    fn name(&self) -> &'static str {
        "reads"
    }

    fn begin_contig(&mut self, _contig: &Contig) {
        self.buckets = Bucketed::new(self.plan);
    }

    fn process(&mut self, record: &AlignmentRecord) {
        let Some(start) = record.reference_start() else {
            return;
        };
        if let Some(counts) = self.buckets.slot(start) {
            counts.observe(record, &self.stats, &self.thresholds);
        }
    }

    fn end_contig(&mut self, contig: &Contig, rows: &mut Vec<ReadWindow>) {
        let buckets = std::mem::replace(&mut self.buckets, Bucketed::new(self.plan));
        rows.extend(buckets.finish().into_iter().map(|(start_pos, counts)| ReadWindow {
            contig: contig.name.clone(),
            start_pos,
            counts,
            length: contig.length,
        }));
    }
}
