//! Structural read of CSV and Excel files into raw string cells.

use crate::encoding::{decode, detect_encoding, TextEncoding};
use crate::error::{FileProcessingError, Result};
use calamine::{open_workbook_auto, Data, Reader};
use sage_schema::FileFormat;
use std::path::Path;
use tracing::debug;

/// One physical data row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line (CSV) or sheet row (Excel) the record starts on.
    pub line: u64,
    pub cells: Vec<String>,
}

/// Cells as read from the file, before any type coercion.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    /// Header names, trimmed. Empty when the format declares no header.
    pub header: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Set for delimited files only.
    pub encoding: Option<TextEncoding>,
}

impl RawTable {
    fn from_records(records: Vec<RawRow>, has_header: bool) -> Self {
        let mut rows = records.into_iter();
        let header = if has_header {
            rows.next()
                .map(|r| r.cells.into_iter().map(|c| c.trim().to_string()).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Self {
            header,
            rows: rows.collect(),
            encoding: None,
        }
    }

    /// Widest row, counting the header.
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.cells.len())
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }
}

pub fn read_csv(path: &Path, format: &FileFormat) -> Result<RawTable> {
    let bytes = std::fs::read(path).map_err(|e| FileProcessingError::io(path, e))?;
    let encoding = detect_encoding(&bytes);
    let text = decode(&bytes, encoding);
    debug!(file = %path.display(), encoding = %encoding, "decoded delimited file");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter_byte().unwrap_or(b','))
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| FileProcessingError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        records.push(RawRow {
            line,
            cells: record.iter().map(str::to_string).collect(),
        });
    }

    let mut table = RawTable::from_records(records, format.header);
    table.encoding = Some(encoding);
    Ok(table)
}

/// First worksheet of an `.xlsx`/`.xls` workbook.
pub fn read_excel(path: &Path, format: &FileFormat) -> Result<RawTable> {
    let excel_err = |message: String| FileProcessingError::Excel {
        path: path.to_path_buf(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| excel_err(e.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return Err(excel_err(e.to_string())),
        None => return Err(excel_err("workbook has no worksheets".to_string())),
    };

    let first_row = range.start().map(|(row, _)| row as u64).unwrap_or(0);
    let records = range
        .rows()
        .enumerate()
        .filter(|(_, cells)| cells.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|(i, cells)| RawRow {
            line: first_row + i as u64 + 1,
            cells: cells.iter().map(cell_text).collect(),
        })
        .collect();

    Ok(RawTable::from_records(records, format.header))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Whole floats come from numeric cells typed as integers by the author.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == chrono::NaiveTime::MIN => ts.format("%Y-%m-%d").to_string(),
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::Error(e) => format!("#{:?}", e),
    }
}
