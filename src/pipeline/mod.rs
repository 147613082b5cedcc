//! Extraction orchestrator.
//!
//! Fragment statistics are computed first when a pending family needs them;
//! the feature families then run concurrently, each writing its own table.
//! A family whose table already exists is skipped, and one family failing
//! never stops the others.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use rayon::prelude::*;

use crate::config::ExtractConfig;
use crate::error::ExtractError;
use crate::feature::breakpoint::{breakpoint_windows, load_per_base, BreakpointAccumulator};
use crate::feature::coverage::FragmentCoverageAccumulator;
use crate::feature::fragment::{FragmentSizeDistribution, FragmentStats};
use crate::feature::kad::{KadEngine, KadSource, KadWindow};
use crate::feature::pileup::pileup_file_windows;
use crate::feature::reads::ReadSignalAccumulator;
use crate::feature::scan_contigs;
use crate::input::AlignmentSource;
use crate::output::{
    read_table, write_table, Family, FamilyReport, FamilyStatus, FeatureMatrix, KadReport,
    RunSummary, SummaryCollector, TableReport,
};
use crate::utils::fasta::{read_contigs, ContigSequence};
use crate::utils::time::StepTimer;
use crate::window::WindowPlan;

// ==================== Output layout ====================

/// Where every table lives under the output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp(&self, rel: &str) -> PathBuf {
        self.root.join("temp").join(rel)
    }

    pub fn table(&self, family: Family) -> PathBuf {
        match family {
            Family::Pileup => self.temp("pileup/pileup_feature.txt"),
            Family::Reads => self.temp("read_feature/read_feature.txt"),
            Family::Coverage => self.temp("coverage/fragment_coverage.txt"),
            Family::Breakpoints => self.temp("read_breakpoint/read_breakpoint_per_window.txt"),
            Family::Kad => self.temp("KAD/KAD_window_data.txt"),
        }
    }

    pub fn breakpoint_per_base(&self) -> PathBuf {
        self.temp("read_breakpoint/read_breakpoint_per_base.txt")
    }

    /// Pileup text picked up when no pileup path is given.
    pub fn default_pileup(&self) -> PathBuf {
        self.temp("pileup/contigs_pipelup.out")
    }

    pub fn kmer_dir(&self) -> PathBuf {
        self.temp("KAD/temp")
    }

    pub fn kad_cache_dir(&self) -> PathBuf {
        self.temp("KAD/KAD_data")
    }

    pub fn feature_matrix(&self) -> PathBuf {
        self.root.join("feature_matrix.tsv")
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    /// Delete the outputs and checkpoints of `families` so they are recomputed.
    pub fn clear(&self, families: &[Family]) -> Result<()> {
        let mut paths: Vec<PathBuf> = families.iter().map(|&f| self.table(f)).collect();
        if families.contains(&Family::Breakpoints) {
            paths.push(self.breakpoint_per_base());
        }
        paths.push(self.feature_matrix());
        for path in paths {
            if path.exists() {
                info!("Removing existing output {}", path.display());
                fs::remove_file(&path).map_err(|e| ExtractError::io(e, &path))?;
            }
        }
        let cache = self.kad_cache_dir();
        if families.contains(&Family::Kad) && cache.exists() {
            info!("Removing KAD cache {}", cache.display());
            fs::remove_dir_all(&cache).map_err(|e| ExtractError::io(e, &cache))?;
        }
        Ok(())
    }
}

// ==================== Extractor ====================

struct FamilyOutcome {
    report: FamilyReport,
    kad: Option<KadReport>,
}

/// Builder-style runner over one alignment source.
pub struct Extractor<'a> {
    source: &'a dyn AlignmentSource,
    label: String,
    layout: OutputLayout,
    config: ExtractConfig,
    families: Vec<Family>,
    pileup: Option<PathBuf>,
    assemblies: Option<PathBuf>,
    sequences: Option<Vec<ContigSequence>>,
    kmer_dir: Option<PathBuf>,
    feature_matrix: bool,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn AlignmentSource, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            label: String::new(),
            layout: OutputLayout::new(out_dir),
            config: ExtractConfig::default(),
            families: Family::ALL.to_vec(),
            pileup: None,
            assemblies: None,
            sequences: None,
            kmer_dir: None,
            feature_matrix: true,
        }
    }

    /// Name of the alignment input recorded in the summary.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_config(mut self, config: ExtractConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_families(mut self, families: &[Family]) -> Self {
        self.families = families.to_vec();
        self
    }

    pub fn with_pileup(mut self, path: Option<PathBuf>) -> Self {
        self.pileup = path;
        self
    }

    /// Assembly FASTA used by the KAD family.
    pub fn with_assemblies(mut self, path: Option<PathBuf>) -> Self {
        self.assemblies = path;
        self
    }

    /// Contig sequences held in memory; takes precedence over the FASTA.
    pub fn with_sequences(mut self, sequences: Vec<ContigSequence>) -> Self {
        self.sequences = Some(sequences);
        self
    }

    /// Directory holding `<contig>_count.txt` / `<contig>_count.read.txt` dumps.
    pub fn with_kmer_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.kmer_dir = dir;
        self
    }

    pub fn with_feature_matrix(mut self, enabled: bool) -> Self {
        self.feature_matrix = enabled;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    fn plan(&self) -> WindowPlan {
        WindowPlan::new(&self.config.window)
    }

    pub fn run(self) -> Result<RunSummary> {
        self.config.validate()?;
        let timer = StepTimer::start("extract");
        let mut collector = SummaryCollector::new().with_run(
            &self.label,
            self.config.min_length,
            self.config.threads,
        );

        let mut pending = Vec::new();
        for &family in &self.families {
            let path = self.layout.table(family);
            if path.exists() {
                info!("[{}] {} exists, skipping", family, path.display());
                collector = collector.with_family(FamilyReport {
                    family,
                    status: FamilyStatus::Skipped,
                    path: path.display().to_string(),
                    rows: read_table(&path).ok().map(|t| t.len()),
                    message: Some("output exists".into()),
                    elapsed_secs: 0.0,
                });
            } else {
                pending.push(family);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads.max(1))
            .build()?;

        // Fragment statistics are shared read-only by the families that need them
        let fragment = if pending.iter().any(|f| f.needs_fragment_stats()) {
            let step = StepTimer::start("fragment statistics");
            let stats = FragmentSizeDistribution::from_source(self.source)
                .and_then(|dist| Ok(dist.stats()?));
            step.finish();
            match &stats {
                Ok(s) => {
                    info!("Fragment size median {} / MAD {:.2} ({} reads)", s.median, s.mad, s.pairs);
                    collector = collector.with_fragment(*s);
                }
                Err(e) => error!("Fragment statistics unavailable: {:#}", e),
            }
            Some(stats.map_err(|e| format!("{:#}", e)))
        } else {
            None
        };

        let mut outcomes: Vec<Option<FamilyOutcome>> = pending.iter().map(|_| None).collect();
        pool.install(|| {
            rayon::scope(|s| {
                for (&family, slot) in pending.iter().zip(outcomes.iter_mut()) {
                    let this = &self;
                    let stats = fragment.as_ref();
                    s.spawn(move |_| {
                        *slot = Some(this.run_family(family, stats));
                    });
                }
            })
        });

        for outcome in outcomes.into_iter().flatten() {
            if let Some(kad) = outcome.kad {
                collector = collector.with_kad(kad);
            }
            collector = collector.with_family(outcome.report);
        }

        if self.feature_matrix {
            match self.write_feature_matrix() {
                Ok(Some(report)) => collector = collector.with_feature_matrix(report),
                Ok(None) => warn!("No feature tables available; feature matrix not written"),
                Err(e) => error!("Failed to write feature matrix: {:#}", e),
            }
        }

        let mut summary = collector.build();
        summary.families.sort_by_key(|r| Family::ALL.iter().position(|&f| f == r.family));
        fs::create_dir_all(self.layout.root()).map_err(|e| ExtractError::io(e, self.layout.root()))?;
        summary.write_json(&self.layout.summary())?;
        timer.finish();
        Ok(summary)
    }

    fn run_family(
        &self,
        family: Family,
        fragment: Option<&std::result::Result<FragmentStats, String>>,
    ) -> FamilyOutcome {
        let step = StepTimer::start(family.as_str());
        let path = self.layout.table(family);
        let mut kad = None;

        let result = match family {
            Family::Pileup => self.run_pileup(&path),
            Family::Reads | Family::Coverage => match fragment {
                Some(Ok(stats)) => {
                    if family == Family::Reads {
                        self.run_reads(&path, *stats)
                    } else {
                        self.run_coverage(&path, *stats)
                    }
                }
                Some(Err(msg)) => Err(anyhow::anyhow!("fragment statistics unavailable: {}", msg)),
                None => Err(anyhow::anyhow!("fragment statistics were not computed")),
            },
            Family::Breakpoints => self.run_breakpoints(&path),
            Family::Kad => self.run_kad(&path).map(|(rows, report)| {
                kad = Some(report);
                rows
            }),
        };

        let (status, rows, message) = match result {
            Ok(rows) => (FamilyStatus::Computed, Some(rows), None),
            Err(e) => {
                let missing = matches!(
                    e.downcast_ref::<ExtractError>(),
                    Some(ExtractError::MissingInput(_))
                );
                if missing {
                    warn!("[{}] skipped: {:#}", family, e);
                    (FamilyStatus::Skipped, None, Some(format!("{:#}", e)))
                } else {
                    error!("[{}] failed: {:#}", family, e);
                    (FamilyStatus::Failed, None, Some(format!("{:#}", e)))
                }
            }
        };
        FamilyOutcome {
            report: FamilyReport {
                family,
                status,
                path: path.display().to_string(),
                rows,
                message,
                elapsed_secs: step.finish(),
            },
            kad,
        }
    }

    fn run_pileup(&self, path: &Path) -> Result<usize> {
        let pileup = match &self.pileup {
            Some(p) => p.clone(),
            None => self.layout.default_pileup(),
        };
        if !pileup.exists() {
            return Err(ExtractError::MissingInput(format!("pileup file {}", pileup.display())).into());
        }
        let rows = pileup_file_windows(&pileup, self.source.header(), self.plan(), self.config.min_length)?;
        write_table(path, &rows)?;
        Ok(rows.len())
    }

    fn run_reads(&self, path: &Path, stats: FragmentStats) -> Result<usize> {
        let mut acc = ReadSignalAccumulator::new(self.plan(), stats, self.config.reads);
        let rows = scan_contigs(self.source, self.config.min_length, &mut acc)?;
        write_table(path, &rows)?;
        Ok(rows.len())
    }

    fn run_coverage(&self, path: &Path, stats: FragmentStats) -> Result<usize> {
        let mut acc = FragmentCoverageAccumulator::new(self.plan(), stats, &self.config.reads);
        let rows = scan_contigs(self.source, self.config.min_length, &mut acc)?;
        write_table(path, &rows)?;
        Ok(rows.len())
    }

    fn run_breakpoints(&self, path: &Path) -> Result<usize> {
        let per_base = self.layout.breakpoint_per_base();
        let bases = if per_base.exists() {
            info!("[breakpoints] reusing {}", per_base.display());
            load_per_base(&per_base)?
        } else {
            let bases = scan_contigs(self.source, self.config.min_length, &mut BreakpointAccumulator::new())?;
            write_table(&per_base, &bases)?;
            bases
        };
        let rows = breakpoint_windows(&self.plan(), &bases);
        write_table(path, &rows)?;
        Ok(rows.len())
    }

    fn kad_contigs(&self) -> Result<Vec<ContigSequence>> {
        let min_length = self.config.min_length;
        if let Some(seqs) = &self.sequences {
            return Ok(seqs.iter().filter(|c| c.len() >= min_length).cloned().collect());
        }
        match &self.assemblies {
            Some(path) if path.exists() => read_contigs(path, min_length),
            Some(path) => Err(ExtractError::MissingInput(format!("assemblies {}", path.display())).into()),
            None => Err(ExtractError::MissingInput("no assembly sequences given".into()).into()),
        }
    }

    fn run_kad(&self, path: &Path) -> Result<(usize, KadReport)> {
        let contigs = self.kad_contigs()?;
        let kmer_dir = self.kmer_dir.clone().unwrap_or_else(|| self.layout.kmer_dir());
        let engine = KadEngine::new(self.plan(), self.config.kad, kmer_dir, self.layout.kad_cache_dir());

        let results: Vec<Result<(KadSource, Vec<KadWindow>)>> =
            contigs.par_iter().map(|contig| engine.process_contig(contig)).collect();

        let mut report = KadReport {
            contigs: contigs.len(),
            ..Default::default()
        };
        let mut rows = Vec::new();
        for (contig, result) in contigs.iter().zip(results) {
            match result {
                Ok((source, windows)) => {
                    match source {
                        KadSource::Computed => report.computed += 1,
                        KadSource::Cached => report.cached += 1,
                    }
                    rows.extend(windows);
                }
                Err(e) => {
                    let missing = matches!(
                        e.downcast_ref::<ExtractError>(),
                        Some(ExtractError::MissingInput(_))
                    );
                    if missing {
                        report.skipped += 1;
                        info!("[kad] {} skipped: {:#}", contig.name, e);
                    } else {
                        report.failed += 1;
                        warn!("[kad] {} failed: {:#}", contig.name, e);
                    }
                }
            }
        }
        info!(
            "[kad] {} contigs: {} computed, {} cached, {} skipped, {} failed",
            report.contigs, report.computed, report.cached, report.skipped, report.failed
        );
        write_table(path, &rows)?;
        Ok((rows.len(), report))
    }

    /// Join every family table present on disk.
    fn write_feature_matrix(&self) -> Result<Option<TableReport>> {
        let mut tables = Vec::new();
        for family in Family::ALL {
            let path = self.layout.table(family);
            if path.exists() {
                tables.push((family, read_table(&path)?));
            }
        }
        if tables.is_empty() {
            return Ok(None);
        }
        let named: Vec<(&str, &crate::output::table::Table)> =
            tables.iter().map(|(f, t)| (f.as_str(), t)).collect();
        let matrix = FeatureMatrix::join(&named)?;
        let path = self.layout.feature_matrix();
        matrix.write(&path)?;
        Ok(Some(TableReport {
            path: path.display().to_string(),
            rows: matrix.rows.len(),
            columns: matrix.columns.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{AlignmentHeader, AlignmentRecord, MemorySource, FLAG_MATE_REVERSE, FLAG_PROPER_PAIR, FLAG_REVERSE};

    fn pair_source() -> MemorySource {
        let header = AlignmentHeader::new(&[("c1", 1000)]);
        let mut records = Vec::new();
        for start in (0..600).step_by(10) {
            records.push(
                AlignmentRecord::mapped(0, start, "100M")
                    .unwrap()
                    .with_mate(0, start + 200, 300)
                    .with_flags(FLAG_PROPER_PAIR | FLAG_MATE_REVERSE),
            );
            records.push(
                AlignmentRecord::mapped(0, start + 200, "100M")
                    .unwrap()
                    .with_mate(0, start, -300)
                    .with_flags(FLAG_PROPER_PAIR | FLAG_REVERSE),
            );
        }
        MemorySource::sorted(header, records)
    }

    fn config() -> ExtractConfig {
        ExtractConfig {
            min_length: 0,
            threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("out");
        assert_eq!(layout.table(Family::Reads), Path::new("out/temp/read_feature/read_feature.txt"));
        assert_eq!(layout.kad_cache_dir(), Path::new("out/temp/KAD/KAD_data"));
    }

    #[test]
    fn test_missing_inputs_skip_without_failing_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let source = pair_source();
        let summary = Extractor::new(&source, dir.path())
            .with_config(config())
            .run()
            .unwrap();

        let status = |f| summary.family(f).unwrap().status;
        assert_eq!(status(Family::Reads), FamilyStatus::Computed);
        assert_eq!(status(Family::Coverage), FamilyStatus::Computed);
        assert_eq!(status(Family::Breakpoints), FamilyStatus::Computed);
        assert_eq!(status(Family::Pileup), FamilyStatus::Skipped);
        assert_eq!(status(Family::Kad), FamilyStatus::Skipped);
        assert!(summary.fragment.is_some());
        assert!(dir.path().join("summary.json").exists());
    }

    #[test]
    fn test_no_pairs_fails_dependent_families_only() {
        let dir = tempfile::tempdir().unwrap();
        let header = AlignmentHeader::new(&[("c1", 1000)]);
        let source = MemorySource::new(header, vec![AlignmentRecord::mapped(0, 400, "10S90M").unwrap()]);
        let summary = Extractor::new(&source, dir.path())
            .with_config(config())
            .with_families(&[Family::Reads, Family::Coverage, Family::Breakpoints])
            .run()
            .unwrap();

        assert_eq!(summary.family(Family::Reads).unwrap().status, FamilyStatus::Failed);
        assert_eq!(summary.family(Family::Coverage).unwrap().status, FamilyStatus::Failed);
        assert_eq!(summary.family(Family::Breakpoints).unwrap().status, FamilyStatus::Computed);
        assert!(summary.fragment.is_none());
    }

    #[test]
    fn test_clear_removes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let source = pair_source();
        Extractor::new(&source, dir.path())
            .with_config(config())
            .with_families(&[Family::Breakpoints])
            .run()
            .unwrap();
        let layout = OutputLayout::new(dir.path());
        assert!(layout.breakpoint_per_base().exists());

        layout.clear(&[Family::Breakpoints]).unwrap();
        assert!(!layout.table(Family::Breakpoints).exists());
        assert!(!layout.breakpoint_per_base().exists());
    }
}
