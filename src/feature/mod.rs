//! Windowed feature families.
//!
//! The alignment-derived families (`reads`, `coverage`, `breakpoint`) are
//! [`ContigAccumulator`]s driven by [`scan_contigs`]: one sequential pass over
//! a coordinate-sorted source, contig by contig.

pub mod breakpoint;
pub mod coverage;
pub mod fragment;
pub mod kad;
pub mod pileup;
pub mod reads;

use anyhow::Result;
use log::{debug, info};

use crate::error::ExtractError;
use crate::input::{AlignmentRecord, AlignmentSource, Contig};

/// Per-contig accumulation of alignment records into output rows.
pub trait ContigAccumulator {
    type Row;

    fn name(&self) -> &'static str;

    /// Called once for every contig passing the length filter, in header order,
    /// whether or not it has records.
    fn begin_contig(&mut self, contig: &Contig);

    fn process(&mut self, record: &AlignmentRecord);

    /// Emit the rows of the contig opened by the last `begin_contig`.
    fn end_contig(&mut self, contig: &Contig, rows: &mut Vec<Self::Row>);
}

/// Feed every mapped record of `source` to `acc`, contig by contig.
///
/// Contigs shorter than `min_length` are skipped entirely. Fails with
/// [`ExtractError::Unsorted`] if records are not sorted by reference then start.
pub fn scan_contigs<A: ContigAccumulator>(
    source: &dyn AlignmentSource,
    min_length: usize,
    acc: &mut A,
) -> Result<Vec<A::Row>> {
    let header = source.header();
    let mut scan = ContigCursor::new(header.contigs().collect(), min_length);
    let mut rows = Vec::new();
    let mut last: Option<(usize, usize)> = None;
    let mut n = 0u64;

    info!("[{}] scanning alignments...", acc.name());
    for record in source.records()? {
        let record = record?;
        let Some(start) = record.reference_start() else {
            continue;
        };
        let ref_id = record.ref_id as usize;
        if ref_id >= header.refs.len() {
            return Err(ExtractError::MalformedRecord(format!(
                "reference id {} not in header",
                ref_id
            ))
            .into());
        }
        if let Some(prev) = last
            && (ref_id, start) < prev
        {
            return Err(ExtractError::Unsorted(format!(
                "{}:{} follows {}:{}",
                header.refs[ref_id], start, header.refs[prev.0], prev.1
            ))
            .into());
        }
        last = Some((ref_id, start));

        if scan.advance_to(ref_id, acc, &mut rows) {
            acc.process(&record);
        }
        n += 1;
        if n % 1_000_000 == 0 {
            debug!("[{}] processed {} records", acc.name(), n);
        }
    }
    scan.finish(acc, &mut rows);
    info!("[{}] {} records, {} rows", acc.name(), n, rows.len());
    Ok(rows)
}

/// Tracks which contig is open while records stream past.
struct ContigCursor {
    contigs: Vec<Contig>,
    min_length: usize,
    next: usize,
    open: Option<usize>,
}

impl ContigCursor {
    fn new(contigs: Vec<Contig>, min_length: usize) -> Self {
        Self {
            contigs,
            min_length,
            next: 0,
            open: None,
        }
    }

    /// Close contigs before `ref_id` and open it; true if its records are wanted.
    fn advance_to<A: ContigAccumulator>(
        &mut self,
        ref_id: usize,
        acc: &mut A,
        rows: &mut Vec<A::Row>,
    ) -> bool {
        if self.next > ref_id {
            return self.open == Some(ref_id);
        }
        self.close(acc, rows);
        while self.next <= ref_id {
            let id = self.next;
            self.next += 1;
            if self.contigs[id].length < self.min_length {
                continue;
            }
            acc.begin_contig(&self.contigs[id]);
            if id == ref_id {
                self.open = Some(id);
            } else {
                acc.end_contig(&self.contigs[id], rows);
            }
        }
        self.open == Some(ref_id)
    }

    fn close<A: ContigAccumulator>(&mut self, acc: &mut A, rows: &mut Vec<A::Row>) {
        if let Some(id) = self.open.take() {
            acc.end_contig(&self.contigs[id], rows);
        }
    }

    fn finish<A: ContigAccumulator>(mut self, acc: &mut A, rows: &mut Vec<A::Row>) {
        self.close(acc, rows);
        if self.next < self.contigs.len() {
            let last = self.contigs.len() - 1;
            self.advance_to(last, acc, rows);
            self.close(acc, rows);
        }
    }
}
