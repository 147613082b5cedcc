//! Builder collecting per-family results into a [`RunSummary`].

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};

use crate::feature::fragment::FragmentStats;

use super::types::{FamilyReport, KadReport, RunSummary, TableReport};

/// Builder for the run summary
pub struct SummaryCollector {
    summary: RunSummary,
}

impl SummaryCollector {
    /// Create a new collector stamped with version and timestamp
    pub fn new() -> Self {
        Self {
            summary: RunSummary {
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: crate::utils::time::utc_now_iso8601(),
                ..Default::default()
            },
        }
    }

    pub fn with_run(mut self, bam: &str, min_length: usize, threads: usize) -> Self {
        self.summary.bam = bam.to_string();
        self.summary.min_length = min_length;
        self.summary.threads = threads;
        self
    }

    pub fn with_fragment(mut self, stats: FragmentStats) -> Self {
        self.summary.fragment = Some(stats);
        self
    }

    /// Add a family report, replacing an earlier one for the same family
    pub fn with_family(mut self, report: FamilyReport) -> Self {
        self.summary.families.retain(|r| r.family != report.family);
        self.summary.families.push(report);
        self
    }

    pub fn with_kad(mut self, kad: KadReport) -> Self {
        self.summary.kad = Some(kad);
        self
    }

    pub fn with_feature_matrix(mut self, matrix: TableReport) -> Self {
        self.summary.feature_matrix = Some(matrix);
        self
    }

    pub fn build(self) -> RunSummary {
        self.summary
    }
}

impl Default for SummaryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    /// Write pretty JSON to `path`, validating against the schema when enabled.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if super::schema::should_validate() {
            let value = serde_json::to_value(self)?;
            if let Err(msg) = super::schema::validate(&value) {
                log::warn!("Schema validation failed for {}: {}", path.display(), msg);
                if cfg!(debug_assertions) {
                    anyhow::bail!(msg);
                }
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::types::{Family, FamilyStatus};

    fn report(family: Family, status: FamilyStatus) -> FamilyReport {
        FamilyReport {
            family,
            status,
            path: format!("{}.txt", family),
            rows: Some(3),
            message: None,
            elapsed_secs: 0.5,
        }
    }

    #[test]
    fn test_collector_builder() {
        let summary = SummaryCollector::new()
            .with_run("x.bam", 5000, 4)
            .with_fragment(FragmentStats::new(300.0, 12.0))
            .with_family(report(Family::Reads, FamilyStatus::Failed))
            .with_family(report(Family::Pileup, FamilyStatus::Skipped))
            .with_family(report(Family::Reads, FamilyStatus::Computed))
            .build();

        assert_eq!(summary.threads, 4);
        assert_eq!(summary.families.len(), 2);
        assert_eq!(summary.family(Family::Reads).unwrap().status, FamilyStatus::Computed);
        assert!(!summary.timestamp.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = SummaryCollector::new()
            .with_run("x.bam", 5000, 1)
            .with_family(report(Family::Kad, FamilyStatus::Computed))
            .with_kad(KadReport { contigs: 3, computed: 2, skipped: 1, ..Default::default() })
            .build();
        summary.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"status\": \"computed\""));
        let loaded = RunSummary::load_json(&path).unwrap();
        assert_eq!(loaded.kad, summary.kad);
        assert_eq!(loaded.families[0].family, Family::Kad);
    }
}
