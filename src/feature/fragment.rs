//! Paired-end fragment size distribution and its robust centre/spread.

use std::collections::BTreeMap;

use anyhow::Result;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::input::{AlignmentRecord, AlignmentSource};
use crate::utils::stats::weighted_median;

/// Scale factor making the MAD a consistent estimator of a normal sigma.
pub const MAD_SCALE: f64 = 1.4826;

/// Frequency multiset of observed |template length| values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentSizeDistribution {
    freq: BTreeMap<u32, u64>,
}

impl FragmentSizeDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, size: u32) {
        *self.freq.entry(size).or_insert(0) += 1;
    }

    /// Count a record if it is paired with its mate on the same contig.
    pub fn observe(&mut self, record: &AlignmentRecord) {
        if record.is_unmapped() {
            return;
        }
        if record.is_paired() && record.mate_on_same_reference() {
            self.add(record.fragment_size());
        }
    }

    /// One pass over every record of `source`.
    pub fn from_source(source: &dyn AlignmentSource) -> Result<Self> {
        let mut dist = Self::new();
        for record in source.records()? {
            dist.observe(&record?);
        }
        info!("Fragment sizes observed: {}", dist.total());
        Ok(dist)
    }

    pub fn total(&self) -> u64 {
        self.freq.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn median(&self) -> Option<f64> {
        let mut pairs: Vec<(f64, u64)> = self.freq.iter().map(|(&s, &c)| (s as f64, c)).collect();
        weighted_median(&mut pairs)
    }

    /// `1.4826 * median(|x - median(x)|)`.
    pub fn mad(&self) -> Option<f64> {
        let median = self.median()?;
        let mut residuals: Vec<(f64, u64)> = self
            .freq
            .iter()
            .map(|(&s, &c)| ((s as f64 - median).abs(), c))
            .collect();
        weighted_median(&mut residuals).map(|m| MAD_SCALE * m)
    }

    /// Median and MAD; an empty distribution is a missing input for every consumer.
    pub fn stats(&self) -> std::result::Result<FragmentStats, ExtractError> {
        match (self.median(), self.mad()) {
            (Some(median), Some(mad)) => Ok(FragmentStats {
                median,
                mad,
                pairs: self.total(),
            }),
            _ => Err(ExtractError::MissingInput(
                "no paired reads with both mates on the same contig".into(),
            )),
        }
    }
}

/// Read-only fragment statistics shared by the read and coverage families.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FragmentStats {
    pub median: f64,
    pub mad: f64,
    /// Number of reads contributing to the distribution
    pub pairs: u64,
}

impl FragmentStats {
    pub fn new(median: f64, mad: f64) -> Self {
        Self { median, mad, pairs: 0 }
    }

    /// Closed interval `[median - k*mad, median + k*mad]`.
    pub fn proper_range(&self, multiplier: f64) -> (f64, f64) {
        (
            self.median - multiplier * self.mad,
            self.median + multiplier * self.mad,
        )
    }

    pub fn is_proper_size(&self, size: u32, multiplier: f64) -> bool {
        let (lo, hi) = self.proper_range(multiplier);
        let size = size as f64;
        lo <= size && size <= hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_and_mad() {
        let mut dist = FragmentSizeDistribution::new();
        for size in [300, 310, 290, 305, 295, 1000] {
            dist.add(size);
        }
        // sorted: 290 295 300 305 310 1000 -> median 302.5
        assert_relative_eq!(dist.median().unwrap(), 302.5);
        // residuals: 12.5 7.5 2.5 2.5 7.5 697.5 -> median 7.5
        assert_relative_eq!(dist.mad().unwrap(), 1.4826 * 7.5);
    }

    #[test]
    fn test_mad_is_insertion_order_invariant() {
        let sizes = [250u32, 400, 310, 310, 275, 500, 333, 298, 301];
        let mut forward = FragmentSizeDistribution::new();
        let mut backward = FragmentSizeDistribution::new();
        for &s in &sizes {
            forward.add(s);
        }
        for &s in sizes.iter().rev() {
            backward.add(s);
        }
        assert_eq!(forward.median(), backward.median());
        assert_eq!(forward.mad(), backward.mad());
    }

    #[test]
    fn test_observe_filters_pairs() {
        let mut dist = FragmentSizeDistribution::new();
        let same = AlignmentRecord::mapped(0, 100, "100M").unwrap().with_mate(0, 300, -300);
        let other = AlignmentRecord::mapped(0, 100, "100M").unwrap().with_mate(1, 300, 0);
        let single = AlignmentRecord::mapped(0, 100, "100M").unwrap();
        dist.observe(&same);
        dist.observe(&other);
        dist.observe(&single);
        assert_eq!(dist.total(), 1);
        assert_eq!(dist.median(), Some(300.0));
    }

    #[test]
    fn test_empty_distribution_is_missing_input() {
        let dist = FragmentSizeDistribution::new();
        assert!(matches!(dist.stats(), Err(ExtractError::MissingInput(_))));
    }

    #[test]
    fn test_proper_range() {
        let stats = FragmentStats::new(300.0, 10.0);
        assert_eq!(stats.proper_range(3.0), (270.0, 330.0));
        assert!(stats.is_proper_size(270, 3.0));
        assert!(stats.is_proper_size(330, 3.0));
        assert!(!stats.is_proper_size(331, 3.0));
    }
}
