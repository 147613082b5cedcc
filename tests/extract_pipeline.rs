use std::fs;
use std::path::Path;

use approx::assert_relative_eq;

use metamic::config::ExtractConfig;
use metamic::input::{
    AlignmentHeader, AlignmentRecord, MemorySource, FLAG_MATE_REVERSE, FLAG_PROPER_PAIR,
    FLAG_REVERSE,
};
use metamic::kmer::KmerCountTable;
use metamic::output::{read_table, Family, FamilyStatus, RunSummary};
use metamic::output::table::{parse_float, Table};
use metamic::pipeline::{Extractor, OutputLayout};
use metamic::utils::fasta::ContigSequence;

const CONTIG_LEN: usize = 1000;

/// One 300 bp forward/reverse pair starting at each of the first 700 bases,
/// plus a single unpaired read soft-clipped at 550.
fn paired_source() -> MemorySource {
    let header = AlignmentHeader::new(&[("c1", CONTIG_LEN)]);
    let mut records = Vec::new();
    for start in 0..700 {
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
    records.push(AlignmentRecord::mapped(0, 550, "10S90M").unwrap());
    MemorySource::sorted(header, records)
}

fn contig_sequence() -> ContigSequence {
    let mut state = 42u64;
    let seq: Vec<u8> = (0..CONTIG_LEN)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            b"ACGT"[(state >> 62) as usize]
        })
        .collect();
    ContigSequence::new("c1", seq)
}

/// Read k-mer dump at twenty times the assembly counts.
fn write_read_kmers(dir: &Path, contig: &ContigSequence) {
    let assembly = KmerCountTable::from_sequence(&contig.sequence, 25);
    let mut dump = String::new();
    for (kmer, count) in assembly.iter() {
        dump.push_str(&format!("{}\t{}\n", kmer, count * 20));
    }
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("c1_count.read.txt"), dump).unwrap();
}

/// Uniform pileup: ten matching reads on every base.
fn write_pileup(path: &Path) {
    let mut text = String::new();
    for pos in 1..=CONTIG_LEN {
        text.push_str(&format!("c1\t{}\tA\t10\t..........\tIIIIIIIIII\n", pos));
    }
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn config() -> ExtractConfig {
    ExtractConfig {
        min_length: 0,
        threads: 3,
        ..Default::default()
    }
}

fn column(table: &Table, name: &str) -> Vec<f64> {
    let idx = table.column(name).unwrap();
    table.rows.iter().map(|r| parse_float(&r[idx]).unwrap_or(f64::NAN)).collect()
}

fn run_all(source: &MemorySource, out: &Path) -> RunSummary {
    let layout = OutputLayout::new(out);
    Extractor::new(source, out)
        .with_label("memory")
        .with_config(config())
        .with_pileup(Some(layout.default_pileup()))
        .with_sequences(vec![contig_sequence()])
        .run()
        .unwrap()
}

#[test]
fn test_full_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    write_pileup(&layout.default_pileup());
    write_read_kmers(&layout.kmer_dir(), &contig_sequence());

    let source = paired_source();
    let summary = run_all(&source, dir.path());

    for family in Family::ALL {
        let report = summary.family(family).unwrap();
        assert_eq!(report.status, FamilyStatus::Computed, "{}: {:?}", family, report.message);
    }
    let fragment = summary.fragment.unwrap();
    assert_relative_eq!(fragment.median, 300.0);
    assert_relative_eq!(fragment.mad, 0.0);

    // pileup
    let pileup = read_table(&layout.table(Family::Pileup)).unwrap();
    assert_eq!(pileup.len(), 4);
    for v in column(&pileup, "correct_portion") {
        assert_relative_eq!(v, 1.0);
    }
    for v in column(&pileup, "normalized_coverage") {
        assert_relative_eq!(v, 1.0);
    }
    for v in column(&pileup, "mean_coverage") {
        assert_relative_eq!(v, 10.0);
    }

    // reads: the 300 bucket holds upstream starts 300..400 and their mates' downstream reads
    let reads = read_table(&layout.table(Family::Reads)).unwrap();
    let start = reads.column("start_pos").unwrap();
    let first = reads.rows.iter().find(|r| r[start] == "300").unwrap();
    let value = |name: &str| first[reads.column(name).unwrap()].parse::<u32>().unwrap();
    assert_eq!(value("read_count"), 200);
    assert_eq!(value("proper_read_count"), 200);
    // every read faces its mate, so exactly one of each pair is reverse
    assert_eq!(value("inversion_read_count"), 200);
    for v in column(&reads, "discordant_size_count") {
        assert_relative_eq!(v, 0.0);
    }

    // fragment coverage
    let coverage = read_table(&layout.table(Family::Coverage)).unwrap();
    assert_eq!(coverage.len(), 4);
    for v in column(&coverage, "normalized_fragment_coverage") {
        assert_relative_eq!(v, 1.0);
    }

    // breakpoints: the clipped read breaks at base 551, covered by 201 reads
    let per_base = read_table(&layout.breakpoint_per_base()).unwrap();
    assert_eq!(per_base.len(), 1);
    assert_eq!(per_base.rows[0][per_base.column("position").unwrap()], "551");
    assert_eq!(per_base.rows[0][per_base.column("read_count").unwrap()], "201");
    let breakpoints = read_table(&layout.table(Family::Breakpoints)).unwrap();
    assert_eq!(breakpoints.len(), 1);
    assert_eq!(column(&breakpoints, "start_pos"), vec![500.0]);
    assert_relative_eq!(column(&breakpoints, "read_breakpoint_ratio")[0], 1.0 / 201.0, epsilon = 1e-6);

    // KAD: proportional read counts score zero
    let kad = read_table(&layout.table(Family::Kad)).unwrap();
    assert!(!kad.is_empty());
    for v in column(&kad, "mean_KAD") {
        assert!(v.abs() < 1e-9);
    }
    let kad_report = summary.kad.clone().unwrap();
    assert_eq!(kad_report.contigs, 1);
    assert_eq!(kad_report.computed, 1);
    assert!(layout.kad_cache_dir().join("c1.KAD").exists());

    // feature matrix joins every family on (contig, start_pos)
    let matrix = read_table(&layout.feature_matrix()).unwrap();
    assert!(matrix.column("correct_portion").is_some());
    assert!(matrix.column("proper_read_count").is_some());
    assert!(matrix.column("normalized_fragment_coverage").is_some());
    assert!(matrix.column("read_breakpoint_ratio").is_some());
    assert!(matrix.column("mean_KAD").is_some());
    let starts = column(&matrix, "start_pos");
    assert!(starts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(summary.feature_matrix.as_ref().unwrap().rows, matrix.len());

    let loaded = RunSummary::load_json(&layout.summary()).unwrap();
    assert_eq!(loaded.families.len(), Family::ALL.len());
    assert_eq!(loaded.bam, "memory");
}

#[test]
fn test_rerun_skips_existing_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let source = paired_source();
    let first = Extractor::new(&source, dir.path())
        .with_config(config())
        .with_families(&[Family::Reads, Family::Breakpoints])
        .run()
        .unwrap();
    assert_eq!(first.family(Family::Reads).unwrap().status, FamilyStatus::Computed);

    let table = OutputLayout::new(dir.path()).table(Family::Reads);
    let before = fs::read_to_string(&table).unwrap();

    let second = Extractor::new(&source, dir.path())
        .with_config(config())
        .with_families(&[Family::Reads, Family::Breakpoints])
        .run()
        .unwrap();
    let reads = second.family(Family::Reads).unwrap();
    assert_eq!(reads.status, FamilyStatus::Skipped);
    assert_eq!(reads.rows, first.family(Family::Reads).unwrap().rows);
    assert_eq!(second.family(Family::Breakpoints).unwrap().status, FamilyStatus::Skipped);
    assert!(second.fragment.is_none());
    assert_eq!(fs::read_to_string(&table).unwrap(), before);
}

#[test]
fn test_short_contigs_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let source = paired_source();
    let summary = Extractor::new(&source, dir.path())
        .with_config(ExtractConfig {
            min_length: CONTIG_LEN + 1,
            ..config()
        })
        .with_families(&[Family::Coverage])
        .run()
        .unwrap();
    assert_eq!(summary.family(Family::Coverage).unwrap().rows, Some(0));
}
