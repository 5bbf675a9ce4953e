//! Delimited text input and output for draw matrices, design matrices, and labels.
//!
//! Files carry a header row. `.tsv` files are tab separated; everything else is read as
//! comma separated.

use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::{Array1, Array2, ArrayView2};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed delimited file: {0}")]
    Csv(#[from] csv::Error),
    #[error("Rows do not form a rectangular matrix: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Could not parse '{value}' at line {line}, column {column} of {path} as a number.")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        value: String,
    },
    #[error("{path} contains no data rows.")]
    Empty { path: String },
    #[error("Label file {path} must have exactly one column, found {found}.")]
    LabelColumns { path: String, found: usize },
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

fn read_records(path: &Path) -> Result<(usize, Vec<Vec<String>>), IoError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .trim(Trim::All)
        .has_headers(true)
        .from_path(path)?;
    let width = reader.headers()?.len();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    if rows.is_empty() {
        return Err(IoError::Empty {
            path: path.display().to_string(),
        });
    }
    Ok((width, rows))
}

/// Reads a numeric matrix, one row per line after the header.
pub fn read_matrix(path: impl AsRef<Path>) -> Result<Array2<f64>, IoError> {
    let path = path.as_ref();
    let (width, rows) = read_records(path)?;
    let mut values = Vec::with_capacity(rows.len() * width);
    for (i, row) in rows.iter().enumerate() {
        for (j, field) in row.iter().enumerate() {
            let value = field.parse::<f64>().map_err(|_| IoError::Parse {
                path: path.display().to_string(),
                line: i + 2,
                column: j + 1,
                value: field.clone(),
            })?;
            values.push(value);
        }
    }
    let matrix = Array2::from_shape_vec((rows.len(), width), values)?;
    Ok(matrix)
}

/// Reads a single integer column.
pub fn read_labels(path: impl AsRef<Path>) -> Result<Array1<i64>, IoError> {
    let path = path.as_ref();
    let (width, rows) = read_records(path)?;
    if width != 1 {
        return Err(IoError::LabelColumns {
            path: path.display().to_string(),
            found: width,
        });
    }
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let field = &row[0];
            // Accept "1.0"-style labels written by numeric tools.
            field
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    field
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.fract() == 0.0)
                        .map(|v| v as i64)
                })
                .ok_or_else(|| IoError::Parse {
                    path: path.display().to_string(),
                    line: i + 2,
                    column: 1,
                    value: field.clone(),
                })
        })
        .collect()
}

/// Writes a matrix with a `{prefix}_{j}` header for each column.
pub fn write_matrix(
    path: impl AsRef<Path>,
    values: ArrayView2<f64>,
    prefix: &str,
) -> Result<(), IoError> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter_for(path))
        .from_path(path)?;
    let header: Vec<String> = (0..values.ncols()).map(|j| format!("{prefix}_{j}")).collect();
    writer.write_record(&header)?;
    for row in values.rows() {
        let mut buffer = ryu::Buffer::new();
        writer.write_record(row.iter().map(|&v| buffer.format(v).to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
