use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, ReviewError};

/// Raw dataset: header plus rows of optional text cells.
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Hex SHA-256 prefix of the source bytes.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Xlsx,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("xlsx") | Some("xlsm") => Self::Xlsx,
            _ => Self::Csv,
        }
    }
}

pub fn load_table(path: &Path) -> Result<Table> {
    if !path.is_file() {
        return Err(ReviewError::FileNotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    let fingerprint = fingerprint(&bytes);

    let (headers, rows) = match TableFormat::from_path(path) {
        TableFormat::Csv => read_csv(path, &bytes)?,
        TableFormat::Xlsx => read_xlsx(path)?,
    };

    tracing::debug!(
        "Loaded {} rows x {} columns from {}",
        rows.len(),
        headers.len(),
        path.display()
    );

    Ok(Table {
        headers,
        rows,
        fingerprint,
    })
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

type RawTable = (Vec<String>, Vec<Vec<Option<String>>>);

fn read_csv(path: &Path, bytes: &[u8]) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record?,
        None => return Err(ReviewError::EmptyFile(path.to_path_buf())),
    };
    let headers = normalize_headers(header.iter().map(str::to_string));
    if headers.is_empty() {
        return Err(ReviewError::EmptyFile(path.to_path_buf()));
    }

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(fit_row(record.iter().map(str::to_string), headers.len()));
    }

    Ok((headers, rows))
}

fn read_xlsx(path: &Path) -> Result<RawTable> {
    use calamine::{open_workbook, Reader, Xlsx};

    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e| ReviewError::Spreadsheet(format!("{}: {}", path.display(), e)))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ReviewError::EmptyFile(path.to_path_buf()))?;

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| ReviewError::Spreadsheet(format!("{}: {}", sheet, e)))?;

    let mut rows_iter = range.rows();
    let header = rows_iter
        .next()
        .ok_or_else(|| ReviewError::EmptyFile(path.to_path_buf()))?;
    let headers = normalize_headers(header.iter().map(|cell| cell.to_string()));

    let rows = rows_iter
        .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| fit_row(row.into_iter(), headers.len()))
        .collect();

    Ok((headers, rows))
}

/// Trims names, strips a BOM, names blank columns and de-duplicates.
fn normalize_headers<I: Iterator<Item = String>>(raw: I) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut headers = Vec::new();

    for (idx, name) in raw.enumerate() {
        let name = name.trim_start_matches('\u{feff}').trim().to_string();
        let base = if name.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            name
        };

        let mut candidate = base.clone();
        let mut suffix = 2;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        headers.push(candidate);
    }

    headers
}

/// Pads short rows with NULLs, drops surplus cells, maps blanks to NULL.
fn fit_row<I: Iterator<Item = String>>(cells: I, width: usize) -> Vec<Option<String>> {
    let mut row: Vec<Option<String>> = cells
        .take(width)
        .map(|cell| {
            if cell.trim().is_empty() {
                None
            } else {
                Some(cell)
            }
        })
        .collect();
    row.resize(width, None);
    row
}
