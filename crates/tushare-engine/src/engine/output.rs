//! File output for downloaded rows.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rust_xlsxwriter::Workbook;
use serde_json::Value;

use super::result_set::{display_value, ResultSet};
use crate::error::{EngineError, EngineResult};

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Csv,
    Excel,
    Json,
}

impl SaveFormat {
    /// Parse a configured format; blank or unknown values mean CSV.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("csv") => SaveFormat::Csv,
            Some("excel") | Some("xlsx") => SaveFormat::Excel,
            Some("json") => SaveFormat::Json,
            Some(other) => {
                tracing::warn!(format = %other, "Unknown save format, writing CSV");
                SaveFormat::Csv
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Csv => "csv",
            SaveFormat::Excel => "xlsx",
            SaveFormat::Json => "json",
        }
    }
}

/// Base file name, without extension.
///
/// Workflow steps pass their `step_order`; fan-out calls pass their
/// 1-based combination index.
pub fn file_stem(
    api_code: &str,
    step_order: Option<i32>,
    download_date: &str,
    at: DateTime<Local>,
    combo: Option<usize>,
) -> String {
    let mut stem = match step_order {
        Some(order) => format!("{}_{}_{}_{}", api_code, order, download_date, at.format("%H%M%S")),
        None => format!("{}_{}_{}", api_code, download_date, at.format("%H%M%S")),
    };
    if let Some(index) = combo {
        stem.push_str(&format!("_combo{}", index));
    }
    stem
}

/// Write `rows` to `dir/stem.<ext>`, creating `dir` if needed.
pub async fn write_file(dir: &Path, stem: &str, format: SaveFormat, rows: &ResultSet) -> EngineResult<PathBuf> {
    let path = dir.join(format!("{}.{}", stem, format.extension()));
    let dir = dir.to_path_buf();
    let target = path.clone();
    let rows = rows.clone();

    tokio::task::spawn_blocking(move || -> EngineResult<()> {
        std::fs::create_dir_all(&dir)?;
        match format {
            SaveFormat::Csv => write_csv(&target, &rows),
            SaveFormat::Excel => write_xlsx(&target, &rows),
            SaveFormat::Json => write_json(&target, &rows),
        }
    })
    .await??;

    Ok(path)
}

fn write_csv(path: &Path, rows: &ResultSet) -> EngineResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    // UTF-8 BOM so spreadsheet tools pick the right encoding.
    file.write_all("\u{feff}".as_bytes())?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(rows.columns())?;
    for row in rows.rows() {
        writer.write_record(
            rows.columns()
                .iter()
                .map(|c| row.get(c).map(display_value).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(path: &Path, rows: &ResultSet) -> EngineResult<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, name) in rows.columns().iter().enumerate() {
        sheet.write_string(0, excel_col(col)?, name)?;
    }
    for (r, row) in rows.rows().iter().enumerate() {
        let line = u32::try_from(r + 1).map_err(|_| EngineError::Output("too many rows for xlsx".to_string()))?;
        for (col, name) in rows.columns().iter().enumerate() {
            let col = excel_col(col)?;
            match row.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::Bool(b)) => {
                    sheet.write_boolean(line, col, *b)?;
                }
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => {
                        sheet.write_number(line, col, f)?;
                    }
                    None => {
                        sheet.write_string(line, col, n.to_string())?;
                    }
                },
                Some(other) => {
                    sheet.write_string(line, col, display_value(other))?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn excel_col(index: usize) -> EngineResult<u16> {
    u16::try_from(index).map_err(|_| EngineError::Output("too many columns for xlsx".to_string()))
}

fn write_json(path: &Path, rows: &ResultSet) -> EngineResult<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, rows.rows())?;
    Ok(())
}
