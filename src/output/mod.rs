//! Output tables and the run summary
//!
//! - `table`: typed TSV rows per feature family
//! - `join`: outer join of all families into one feature matrix
//! - `SummaryCollector`: builds `summary.json` (schema in `schema`)

pub mod collector;
pub mod join;
pub mod schema;
pub mod table;
pub mod types;

pub use collector::SummaryCollector;
pub use join::FeatureMatrix;
pub use table::{read_table, write_table, TableRow};
pub use types::{Family, FamilyReport, FamilyStatus, KadReport, RunSummary, TableReport};
