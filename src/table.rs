//! In-memory CSV table with named, nullable string cells.
//!
//! Raw exports vary in which columns they carry, so stages look columns up by
//! name and treat absent columns and null cells the same way.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Cell spellings read as null, matching what spreadsheet/pandas exports emit.
const NULL_MARKERS: &[&str] = &["", "NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "<NA>"];

pub fn is_null_marker(s: &str) -> bool {
    NULL_MARKERS.contains(&s)
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    index: FxHashMap<String, usize>,
}

/// Borrowed view of one row. `line` is 1-based and excludes the header.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    cells: &'a [Option<String>],
    pub line: usize,
}

impl<'a> Row<'a> {
    /// Cell value, `None` when the column is absent or the cell is null.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = self.table.column_index(column)?;
        self.cells.get(idx).and_then(|c| c.as_deref())
    }

    pub fn cells(&self) -> &'a [Option<String>] {
        self.cells
    }
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, None);
                r
            })
            .collect();
        Self { headers, rows, index }
    }

    /// Convenience constructor for literal data; empty strings become null.
    pub fn from_strs(headers: &[&str], rows: &[&[&str]]) -> Self {
        let headers = headers.iter().map(|h| h.to_string()).collect();
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| to_cell(c)).collect())
            .collect();
        Self::new(headers, rows)
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(to_cell).collect());
        }
        Ok(Self::new(headers, rows))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().enumerate().map(move |(i, cells)| Row {
            table: self,
            cells,
            line: i + 1,
        })
    }

    /// All values of a column; empty iterator when the column is absent.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |r| idx.map(|i| r[i].as_deref()))
    }

    /// Rough in-memory size: string payloads plus per-cell overhead.
    pub fn approx_memory_bytes(&self) -> usize {
        let cell_overhead = std::mem::size_of::<Option<String>>();
        let payload: usize = self
            .rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|c| c.as_ref().map_or(0, |s| s.len()) + cell_overhead)
            .sum();
        payload + self.headers.iter().map(|h| h.len()).sum::<usize>()
    }

    /// Number of rows identical to an earlier row.
    pub fn duplicate_row_count(&self) -> usize {
        let mut seen = rustc_hash::FxHashSet::default();
        self.rows.iter().filter(|r| !seen.insert(r.as_slice())).count()
    }
}

fn to_cell(s: &str) -> Option<String> {
    if is_null_marker(s) {
        None
    } else {
        Some(s.to_string())
    }
}

fn create_with_bom(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    file.write_all(UTF8_BOM)?;
    Ok(file)
}

/// Write a header and string rows as UTF-8-with-BOM CSV.
pub fn write_rows(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let file = create_with_bom(path)?;
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush().map_err(PipelineError::from)
}

/// Serialize records (header from field names) as UTF-8-with-BOM CSV.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = create_with_bom(path)?;
    let mut wtr = csv::Writer::from_writer(file);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush().map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_bom_header_and_nulls() {
        let data = "\u{feff}id,name,popularity\nabc,Song,\ndef,,NaN\n";
        let table = Table::from_reader(data.as_bytes()).unwrap();
        assert_eq!(table.headers(), &["id", "name", "popularity"]);
        assert_eq!(table.len(), 2);
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows[0].get("name"), Some("Song"));
        assert_eq!(rows[0].get("popularity"), None);
        assert_eq!(rows[1].get("name"), None);
        assert_eq!(rows[1].get("missing_column"), None);
        assert_eq!(rows[1].line, 2);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let data = "a,b,c\n1,2\n";
        let table = Table::from_reader(data.as_bytes()).unwrap();
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("a"), Some("1"));
        assert_eq!(row.get("c"), None);
    }

    #[test]
    fn test_duplicate_rows_counted() {
        let table = Table::from_strs(&["a", "b"], &[&["1", "x"], &["1", "x"], &["1", "y"], &["1", "x"]]);
        assert_eq!(table.duplicate_row_count(), 2);
    }

    #[test]
    fn test_column_iterator() {
        let table = Table::from_strs(&["a", "b"], &[&["1", ""], &["2", "z"]]);
        let b: Vec<_> = table.column("b").collect();
        assert_eq!(b, vec![None, Some("z")]);
        assert_eq!(table.column("nope").count(), 0);
    }

    #[test]
    fn test_write_rows_round_trips_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        write_rows(&path, &["id", "name"], &[vec!["a".into(), "Hello, World".into()]]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let table = Table::read_csv(&path).unwrap();
        assert_eq!(table.headers(), &["id", "name"]);
        assert_eq!(table.rows().next().unwrap().get("name"), Some("Hello, World"));
    }
}
