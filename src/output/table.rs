//! Tab-separated feature tables keyed by (contig, start_pos).

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::ExtractError;

/// Missing or undefined cell.
pub const NA: &str = "NA";

/// A typed output row with a fixed column layout.
pub trait TableRow {
    /// Column names, key columns first.
    const COLUMNS: &'static [&'static str];

    /// Cell values in `COLUMNS` order.
    fn fields(&self) -> Vec<String>;
}

/// Format a float cell; NaN becomes `NA`.
pub fn fmt_float(v: f64) -> String {
    if v.is_nan() { NA.to_string() } else { v.to_string() }
}

/// Parse a float cell; `NA` and `nan` become NaN.
pub fn parse_float(s: &str) -> Option<f64> {
    if s == NA || s.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    s.parse().ok()
}

/// Write `rows` with a header line.
///
/// Data goes to a sibling `.part` file renamed into place once complete, so an
/// interrupted run never leaves a table that later runs would skip over.
pub fn write_table<R: TableRow>(path: &Path, rows: &[R]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let part = part_path(path);
    {
        let file = File::create(&part).map_err(|e| ExtractError::io(e, &part))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", R::COLUMNS.join("\t"))?;
        for row in rows {
            writeln!(out, "{}", row.fields().join("\t"))?;
        }
        out.flush()?;
    }
    fs::rename(&part, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// An untyped table read back from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read a header-first TSV. Rows with the wrong number of cells are rejected.
pub fn read_table(path: &Path) -> Result<Table> {
    let file = File::open(path).map_err(|e| ExtractError::io(e, path))?;
    let mut lines = BufReader::new(file).lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok(Table::default()),
    };
    let columns: Vec<String> = header.split('\t').map(str::to_string).collect();

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let cells: Vec<String> = line.split('\t').map(str::to_string).collect();
        if cells.len() != columns.len() {
            return Err(ExtractError::MalformedRecord(format!(
                "{} line {}: expected {} columns, found {}",
                path.display(),
                i + 2,
                columns.len(),
                cells.len()
            ))
            .into());
        }
        rows.push(cells);
    }
    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        contig: String,
        start_pos: usize,
        value: f64,
    }

    impl TableRow for Pair {
        const COLUMNS: &'static [&'static str] = &["contig", "start_pos", "value"];

        fn fields(&self) -> Vec<String> {
            vec![
                self.contig.clone(),
                self.start_pos.to_string(),
                fmt_float(self.value),
            ]
        }
    }

    #[test]
    fn test_write_and_read_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/table.txt");
        let rows = vec![
            Pair { contig: "c1".into(), start_pos: 300, value: 0.5 },
            Pair { contig: "c1".into(), start_pos: 400, value: f64::NAN },
        ];
        write_table(&path, &rows).unwrap();
        assert!(!part_path(&path).exists());

        let table = read_table(&path).unwrap();
        assert_eq!(table.columns, vec!["contig", "start_pos", "value"]);
        assert_eq!(table.rows[0], vec!["c1", "300", "0.5"]);
        assert_eq!(table.rows[1][2], "NA");
        assert_eq!(table.column("value"), Some(2));
    }

    #[test]
    fn test_read_table_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, "a\tb\n1\t2\n3\n").unwrap();
        let err = read_table(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_float_cells() {
        assert_eq!(fmt_float(f64::NAN), "NA");
        assert_eq!(fmt_float(1.25), "1.25");
        assert!(parse_float("NA").unwrap().is_nan());
        assert_eq!(parse_float("0.75"), Some(0.75));
        assert_eq!(parse_float("x"), None);
    }
}
