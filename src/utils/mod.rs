pub mod fasta;
pub mod stats;
pub mod time;
