//! Run summary structures serialized to `summary.json`.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::feature::fragment::FragmentStats;

/// Top-level record of one extraction run
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    /// Crate version that produced the run
    pub version: String,

    /// Timestamp of the run (ISO 8601, UTC)
    pub timestamp: String,

    /// Alignment input
    pub bam: String,

    /// Contig minimum length filter in effect
    pub min_length: usize,

    /// Worker threads
    pub threads: usize,

    /// Fragment size median/MAD, when it was needed and available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<FragmentStats>,

    /// One entry per feature family that was requested
    pub families: Vec<FamilyReport>,

    /// Per-contig KAD outcome counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kad: Option<KadReport>,

    /// Joined feature matrix, if written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_matrix: Option<TableReport>,
}

// ============================================================================
// Feature Families
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Pileup,
    Reads,
    Coverage,
    Breakpoints,
    Kad,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::Pileup,
        Family::Reads,
        Family::Coverage,
        Family::Breakpoints,
        Family::Kad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Pileup => "pileup",
            Family::Reads => "reads",
            Family::Coverage => "coverage",
            Family::Breakpoints => "breakpoints",
            Family::Kad => "kad",
        }
    }

    /// Whether the family consumes fragment size statistics.
    pub fn needs_fragment_stats(&self) -> bool {
        matches!(self, Family::Reads | Family::Coverage)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FamilyStatus {
    /// Table computed in this run
    Computed,
    /// Table already present, or a required input was missing
    Skipped,
    /// Computation failed; see `message`
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FamilyReport {
    pub family: Family,
    pub status: FamilyStatus,

    /// Destination table
    pub path: String,

    /// Rows in the table, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,

    /// Skip reason or error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Wall time spent on the family
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KadReport {
    /// Contigs considered (length filter passed)
    pub contigs: usize,
    /// Scored in this run
    pub computed: usize,
    /// Reused from an existing cache
    pub cached: usize,
    /// No read k-mers or no depth estimate
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableReport {
    pub path: String,
    pub rows: usize,
    pub columns: usize,
}

impl RunSummary {
    pub fn family(&self, family: Family) -> Option<&FamilyReport> {
        self.families.iter().find(|r| r.family == family)
    }
}
