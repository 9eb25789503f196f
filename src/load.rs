use std::fs;
use std::path::Path;

use anyhow::Context;
use calamine::{open_workbook_auto, Reader};
use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::grid::{Cell, Sheet, Workbook};

/// Defensive input caps, checked before any parsing happens.
pub const MAX_FILE_BYTES: u64 = 32 * 1024 * 1024;
pub const MAX_SHEET_ROWS: usize = 100_000;

const EXCEL_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

#[derive(Debug, Clone)]
pub struct LoadedWorkbook {
    pub workbook: Workbook,
    pub file_name: String,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn read_bytes(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Load a workbook from disk, dispatching on the file extension:
/// xlsx/xlsm/xls/ods through calamine, csv as a single-sheet workbook named
/// after the file stem. The returned fingerprint covers the raw bytes, so
/// callers can verify that re-ingesting an unchanged file is a no-op.
pub fn load_workbook(path: &Path) -> Result<LoadedWorkbook, IngestError> {
    let meta = fs::metadata(path)
        .map_err(|e| IngestError::ReadFailed(format!("{}: {e}", path.display())))?;
    if meta.len() > MAX_FILE_BYTES {
        return Err(IngestError::FileTooLarge {
            actual: meta.len(),
            limit: MAX_FILE_BYTES,
        });
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workbook")
        .to_string();

    let bytes = read_bytes(path).map_err(|e| IngestError::ReadFailed(format!("{e:#}")))?;
    let sha256 = sha256_hex(&bytes);

    let workbook = if ext == "csv" {
        csv_workbook(&bytes, &file_name)?
    } else if EXCEL_EXTENSIONS.contains(&ext.as_str()) {
        excel_workbook(path)?
    } else {
        return Err(IngestError::UnsupportedFormat(ext));
    };

    if workbook.sheets.is_empty() {
        return Err(IngestError::EmptyWorkbook);
    }
    for sheet in &workbook.sheets {
        if sheet.rows.len() > MAX_SHEET_ROWS {
            return Err(IngestError::SheetTooLarge {
                sheet: sheet.name.clone(),
                actual: sheet.rows.len(),
                limit: MAX_SHEET_ROWS,
            });
        }
    }

    Ok(LoadedWorkbook {
        workbook,
        file_name,
        sha256,
    })
}

fn excel_workbook(path: &Path) -> Result<Workbook, IngestError> {
    let mut book =
        open_workbook_auto(path).map_err(|e| IngestError::ReadFailed(e.to_string()))?;
    let names = book.sheet_names().to_owned();

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = book
            .worksheet_range(&name)
            .map_err(|e| IngestError::ReadFailed(format!("sheet {name}: {e}")))?;
        let rows = range
            .rows()
            .map(|row| row.iter().map(Cell::from).collect())
            .collect();
        sheets.push(Sheet { name, rows });
    }
    Ok(Workbook { sheets })
}

/// Raw exports arrive from portal downloads with ragged rows and mixed
/// encodings, so records are read as bytes and decoded lossily.
fn csv_workbook(bytes: &[u8], file_name: &str) -> Result<Workbook, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(IngestError::ReadFailed(e.to_string())),
        }
        let row = record
            .iter()
            .map(|field| {
                let text = String::from_utf8_lossy(field);
                if text.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(text.into_owned())
                }
            })
            .collect();
        rows.push(row);
    }

    let name = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Sheet1")
        .to_string();
    Ok(Workbook {
        sheets: vec![Sheet { name, rows }],
    })
}
