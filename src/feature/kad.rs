//! K-mer abundance deviation (KAD) per contig.
//!
//! For each k-mer `KAD = log2((r + d) / (d * (a + 1)))` with `a` the assembly
//! count, `r` the read count and `d` the contig's k-mer depth. Scores are
//! mapped onto 1-based k-mer start positions of the contig and summarised in
//! windows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, info};

use crate::config::KadConfig;
use crate::error::ExtractError;
use crate::kmer::KmerCountTable;
use crate::output::table::{fmt_float, parse_float, read_table, write_table, TableRow};
use crate::utils::fasta::ContigSequence;
use crate::utils::stats::{mean, ratio, std_dev};
use crate::window::WindowPlan;

// ==================== Scores ====================

/// Most frequent value; ties resolve to the smallest value.
fn mode(values: impl IntoIterator<Item = u32>) -> Option<u32> {
    let mut freq: HashMap<u32, usize> = HashMap::new();
    for v in values {
        *freq.entry(v).or_insert(0) += 1;
    }
    freq.into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(v, _)| v)
}

/// Typical read coverage of a single-copy k-mer on this contig.
///
/// The mode of read counts over assembly-unique k-mers seen in reads, or if
/// there are none, the mode over read k-mers counted more than
/// `fallback_min` times.
pub fn kmer_depth(assembly: &KmerCountTable, reads: &KmerCountTable, fallback_min: u32) -> Option<u32> {
    let shared = assembly
        .iter()
        .filter(|&(_, a)| a == 1)
        .filter_map(|(kmer, _)| reads.get(kmer));
    mode(shared).or_else(|| mode(reads.iter().map(|(_, r)| r).filter(|&r| r > fallback_min)))
}

pub fn kad_score(read_count: u32, assembly_count: u32, depth: u32) -> f64 {
    let d = depth as f64;
    ((read_count as f64 + d) / (d * (assembly_count as f64 + 1.0))).log2()
}

/// One scored k-mer, as cached in `<contig>.KAD`.
#[derive(Debug, Clone, PartialEq)]
pub struct KadEntry {
    pub kmer: String,
    pub kad: f64,
}

impl TableRow for KadEntry {
    const COLUMNS: &'static [&'static str] = &["k-mer", "KAD"];

    fn fields(&self) -> Vec<String> {
        vec![self.kmer.clone(), fmt_float(self.kad)]
    }
}

/// Score the outer join of both tables (missing counts are zero).
///
/// K-mers seen once in reads and never in the assembly are dropped, as are
/// undefined scores. Assembly k-mers come first, then read-only k-mers.
pub fn score_kmers(assembly: &KmerCountTable, reads: &KmerCountTable, depth: u32) -> Vec<KadEntry> {
    let joined = assembly
        .iter()
        .map(|(kmer, a)| (kmer, a, reads.get(kmer).unwrap_or(0)))
        .chain(
            reads
                .iter()
                .filter(|(kmer, _)| !assembly.contains(kmer))
                .map(|(kmer, r)| (kmer, 0, r)),
        );

    joined
        .filter(|&(_, a, r)| !(r == 1 && a == 0))
        .map(|(kmer, a, r)| KadEntry {
            kmer: kmer.to_string(),
            kad: kad_score(r, a, depth),
        })
        .filter(|e| e.kad.is_finite())
        .collect()
}

pub fn write_cache(path: &Path, entries: &[KadEntry]) -> Result<()> {
    write_table(path, entries)
}

/// Read a `<contig>.KAD` cache into a lookup; duplicate k-mers keep the first score.
pub fn read_cache(path: &Path) -> Result<HashMap<String, f64>> {
    let table = read_table(path)?;
    let (Some(kmer), Some(kad)) = (table.column("k-mer"), table.column("KAD")) else {
        return Err(ExtractError::MalformedRecord(format!(
            "{}: expected k-mer and KAD columns",
            path.display()
        ))
        .into());
    };
    let mut pool = HashMap::with_capacity(table.len());
    for row in &table.rows {
        if let Some(score) = parse_float(&row[kad]).filter(|s| !s.is_nan()) {
            pool.entry(row[kmer].clone()).or_insert(score);
        }
    }
    Ok(pool)
}

// ==================== Positions and windows ====================

/// KAD at every 1-based start position whose full k-mer is in `pool`.
pub fn positional_kad(sequence: &[u8], pool: &HashMap<String, f64>, k: usize) -> Vec<(usize, f64)> {
    if k == 0 || sequence.len() < k {
        return Vec::new();
    }
    sequence
        .windows(k)
        .enumerate()
        .filter_map(|(i, kmer)| {
            let kmer = std::str::from_utf8(kmer).ok()?;
            pool.get(kmer).map(|&kad| (i + 1, kad))
        })
        .collect()
}

/// Output row of the KAD family.
#[derive(Debug, Clone, PartialEq)]
pub struct KadWindow {
    pub contig: String,
    pub start_pos: usize,
    pub mean_kad: f64,
    pub abnormal_kad_ratio: f64,
    pub dev_kad: f64,
}

impl TableRow for KadWindow {
    const COLUMNS: &'static [&'static str] =
        &["contig", "start_pos", "mean_KAD", "abnormal_KAD_ratio", "dev_KAD"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.contig.clone(),
            self.start_pos.to_string(),
            fmt_float(self.mean_kad),
            fmt_float(self.abnormal_kad_ratio),
            fmt_float(self.dev_kad),
        ]
    }
}

/// Summarise |KAD| over windows of k-mer start positions.
///
/// Windows open while their start does not pass the last k-mer start of the
/// contig; a window without scored k-mers is all NaN.
pub fn kad_windows(
    plan: &WindowPlan,
    contig: &ContigSequence,
    positions: &[(usize, f64)],
    config: &KadConfig,
) -> Vec<KadWindow> {
    if config.k == 0 || contig.len() < config.k {
        return Vec::new();
    }
    let last_start = contig.len() - config.k + 1;

    plan.open_windows(last_start)
        .map(|w| {
            let lo = positions.partition_point(|&(p, _)| p < w.start);
            let hi = positions.partition_point(|&(p, _)| p < w.end);
            let abs: Vec<f64> = positions[lo..hi].iter().map(|&(_, k)| k.abs()).collect();
            let abnormal = abs.iter().filter(|&&v| v > config.abnormal_threshold).count();
            KadWindow {
                contig: contig.name.clone(),
                start_pos: w.start,
                mean_kad: mean(abs.iter().copied()),
                abnormal_kad_ratio: ratio(abnormal as f64, abs.len() as f64),
                dev_kad: std_dev(&abs),
            }
        })
        .collect()
}

// ==================== Engine ====================

/// How one contig's windows were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KadSource {
    Computed,
    Cached,
}

/// Runs KAD per contig against k-mer dumps in `kmer_dir`, caching scores in `cache_dir`.
///
/// Dumps are named `<contig>_count.txt` (assembly) and
/// `<contig>_count.read.txt` (reads mapped to the contig). A missing assembly
/// dump is counted from the sequence instead.
#[derive(Debug, Clone)]
pub struct KadEngine {
    plan: WindowPlan,
    config: KadConfig,
    kmer_dir: PathBuf,
    cache_dir: PathBuf,
}

impl KadEngine {
    pub fn new(plan: WindowPlan, config: KadConfig, kmer_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            plan,
            config,
            kmer_dir: kmer_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_path(&self, contig: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.KAD", contig))
    }

    fn assembly_kmers(&self, contig: &ContigSequence) -> Result<KmerCountTable> {
        let path = self.kmer_dir.join(format!("{}_count.txt", contig.name));
        if path.exists() {
            KmerCountTable::from_path(&path, self.config.k)
        } else {
            debug!("[kad] {}: counting assembly k-mers from sequence", contig.name);
            Ok(KmerCountTable::from_sequence(&contig.sequence, self.config.k))
        }
    }

    fn read_kmers(&self, contig: &ContigSequence) -> Result<KmerCountTable> {
        let path = self.kmer_dir.join(format!("{}_count.read.txt", contig.name));
        let table = KmerCountTable::from_path(&path, self.config.k)?;
        if table.is_empty() {
            return Err(ExtractError::MissingInput(format!("no read k-mers for {}", contig.name)).into());
        }
        Ok(table)
    }

    /// Score a contig's k-mers and write its cache.
    pub fn score_contig(&self, contig: &ContigSequence) -> Result<Vec<KadEntry>> {
        let assembly = self.assembly_kmers(contig)?;
        let reads = self.read_kmers(contig)?;
        let depth = kmer_depth(&assembly, &reads, self.config.depth_fallback_min_count)
            .ok_or_else(|| ExtractError::MissingInput(format!("no k-mer depth estimate for {}", contig.name)))?;
        let entries = score_kmers(&assembly, &reads, depth);
        debug!(
            "[kad] {}: depth {}, {} assembly / {} read k-mers, {} scored",
            contig.name,
            depth,
            assembly.len(),
            reads.len(),
            entries.len()
        );
        write_cache(&self.cache_path(&contig.name), &entries)?;
        Ok(entries)
    }

    /// Windows for one contig, reusing its cache when present.
    pub fn process_contig(&self, contig: &ContigSequence) -> Result<(KadSource, Vec<KadWindow>)> {
        let cache = self.cache_path(&contig.name);
        let (source, pool) = if cache.exists() {
            (KadSource::Cached, read_cache(&cache)?)
        } else {
            let entries = self.score_contig(contig)?;
            let pool = entries.into_iter().map(|e| (e.kmer, e.kad)).collect();
            (KadSource::Computed, pool)
        };
        let positions = positional_kad(&contig.sequence, &pool, self.config.k);
        let windows = kad_windows(&self.plan, contig, &positions, &self.config);
        info!("[kad] {}: {} windows ({:?})", contig.name, windows.len(), source);
        Ok((source, windows))
    }
}
