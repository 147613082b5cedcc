//! Windowed feature extraction for metagenome mis-assembly detection.
//!
//! Reads-to-contig alignments, a samtools-style pileup and k-mer count dumps
//! are summarised into per-window signal tables, one per feature family, and
//! joined into a single feature matrix.

pub mod bam;
pub mod config;
pub mod error;
pub mod feature;
pub mod input;
pub mod kmer;
pub mod output;
pub mod pipeline;
pub mod utils;
pub mod window;
