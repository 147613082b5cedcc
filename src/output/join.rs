//! Full outer join of the windowed tables into one feature matrix.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::error::ExtractError;
use crate::output::table::{Table, NA};

const KEY: [&str; 2] = ["contig", "start_pos"];

/// Tables joined on (contig, start_pos); missing cells are `NA`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<(String, usize, Vec<String>)>,
}

impl FeatureMatrix {
    /// Join `tables` in order. Contigs keep their first-seen order; windows
    /// within a contig are sorted by start.
    pub fn join(tables: &[(&str, &Table)]) -> Result<Self> {
        let mut columns: Vec<String> = KEY.iter().map(|s| s.to_string()).collect();
        let mut contig_rank: HashMap<String, usize> = HashMap::new();
        let mut cells: HashMap<(String, usize), Vec<String>> = HashMap::new();

        for (family, table) in tables {
            let (Some(ci), Some(si)) = (table.column(KEY[0]), table.column(KEY[1])) else {
                return Err(ExtractError::MalformedRecord(format!(
                    "{} table has no contig/start_pos columns",
                    family
                ))
                .into());
            };
            let value_cols: Vec<usize> = (0..table.columns.len()).filter(|&i| i != ci && i != si).collect();
            let offset = columns.len() - KEY.len();
            for &i in &value_cols {
                let name = &table.columns[i];
                if columns.contains(name) {
                    columns.push(format!("{}_{}", family, name));
                } else {
                    columns.push(name.clone());
                }
            }

            for row in &table.rows {
                let contig = row[ci].clone();
                let start: usize = row[si].parse().map_err(|_| {
                    ExtractError::MalformedRecord(format!("{} table: bad start_pos {:?}", family, row[si]))
                })?;
                if !contig_rank.contains_key(&contig) {
                    contig_rank.insert(contig.clone(), contig_rank.len());
                }
                let entry = cells.entry((contig, start)).or_default();
                if entry.len() < offset {
                    entry.resize(offset, NA.to_string());
                }
                // a duplicated key keeps its first row
                if entry.len() == offset {
                    entry.extend(value_cols.iter().map(|&i| row[i].clone()));
                }
            }
        }

        let width = columns.len() - KEY.len();
        let mut rows: Vec<(String, usize, Vec<String>)> = cells
            .into_iter()
            .map(|((contig, start), mut values)| {
                values.resize(width, NA.to_string());
                (contig, start, values)
            })
            .collect();
        rows.sort_by_key(|(contig, start, _)| (contig_rank[contig], *start));
        Ok(Self { columns, rows })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", self.columns.join("\t"))?;
        for (contig, start, values) in &self.rows {
            write!(out, "{}\t{}", contig, start)?;
            for v in values {
                write!(out, "\t{}", v)?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        info!("Wrote feature matrix: {} ({} windows)", path.display(), self.rows.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_outer_join_fills_na() {
        let reads = table(
            &["contig", "start_pos", "read_count"],
            &[&["b", "300", "5"], &["a", "400", "7"], &["a", "300", "6"]],
        );
        let kad = table(
            &["contig", "start_pos", "mean_KAD"],
            &[&["a", "300", "0.1"], &["c", "300", "0.2"]],
        );
        let m = FeatureMatrix::join(&[("reads", &reads), ("kad", &kad)]).unwrap();
        assert_eq!(m.columns, vec!["contig", "start_pos", "read_count", "mean_KAD"]);

        let got: Vec<(&str, usize, Vec<&str>)> = m
            .rows
            .iter()
            .map(|(c, s, v)| (c.as_str(), *s, v.iter().map(|x| x.as_str()).collect()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("b", 300, vec!["5", "NA"]),
                ("a", 300, vec!["6", "0.1"]),
                ("a", 400, vec!["7", "NA"]),
                ("c", 300, vec!["NA", "0.2"]),
            ]
        );
    }

    #[test]
    fn test_colliding_columns_are_prefixed() {
        let a = table(&["contig", "start_pos", "x"], &[&["c", "300", "1"]]);
        let b = table(&["contig", "start_pos", "x"], &[&["c", "300", "2"]]);
        let m = FeatureMatrix::join(&[("a", &a), ("b", &b)]).unwrap();
        assert_eq!(m.columns, vec!["contig", "start_pos", "x", "b_x"]);
        assert_eq!(m.rows[0].2, vec!["1", "2"]);
    }

    #[test]
    fn test_write_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let t = table(&["contig", "start_pos", "x"], &[&["c", "300", "1"]]);
        let m = FeatureMatrix::join(&[("t", &t)]).unwrap();
        let path = dir.path().join("feature_matrix.tsv");
        m.write(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "contig\tstart_pos\tx\nc\t300\t1\n");
    }
}
