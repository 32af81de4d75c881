//! Observation sets: CSV ingestion, missing-value policy, schema validation,
//! and engine data-bundle assembly.
//!
//! Cells are `Option<f64>` so missingness is explicit. The only missing-data
//! policy is drop, never impute: a missing value that reaches model
//! preparation is an error, not something to paper over.

use serde_json::json;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{FieldType, ModelSpec};

/// Missing-value sentinels accepted when parsing CSV cells.
const MISSING_SENTINELS: [&str; 2] = ["NA", "."];

/// A columnar observation set with named numeric columns.
#[derive(Debug, Clone)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl Dataset {
    /// Build a dataset from parallel columns. All columns must have the same
    /// length and distinct names.
    pub fn new(names: Vec<String>, columns: Vec<Vec<Option<f64>>>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(Error::Validation(format!(
                "{} column names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::Validation(format!("duplicate column `{}`", name)));
            }
        }
        if let Some(first) = columns.first() {
            let n = first.len();
            if columns.iter().any(|c| c.len() != n) {
                return Err(Error::Validation("ragged columns".into()));
            }
        }
        Ok(Self { names, columns })
    }

    /// Load a dataset from a CSV file.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse_csv(&content)
    }

    /// Parse CSV text. The first row names the columns; `NA`, `.`, and empty
    /// cells are missing; every other cell must parse as a number.
    pub fn parse_csv(content: &str) -> Result<Self> {
        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Validation("empty CSV: no header row".into()))?;
        let names: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();

        let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
        for (line_num, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
            if cells.len() != names.len() {
                return Err(Error::Validation(format!(
                    "line {} has {} cells, expected {}",
                    line_num + 2,
                    cells.len(),
                    names.len()
                )));
            }
            for (col, cell) in columns.iter_mut().zip(&cells) {
                if cell.is_empty() || MISSING_SENTINELS.contains(cell) {
                    col.push(None);
                } else {
                    let value: f64 = cell.parse().map_err(|_| {
                        Error::Validation(format!(
                            "invalid number `{}` at line {}",
                            cell,
                            line_num + 2
                        ))
                    })?;
                    col.push(Some(value));
                }
            }
        }

        Self::new(names, columns)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[idx])
    }

    /// Total count of missing cells.
    pub fn n_missing(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.iter().filter(|v| v.is_none()).count())
            .sum()
    }

    /// Remove every row with at least one missing cell. Returns the filtered
    /// dataset and the number of rows dropped.
    pub fn drop_missing(&self) -> (Dataset, usize) {
        let n = self.n_rows();
        let keep: Vec<usize> = (0..n)
            .filter(|&i| self.columns.iter().all(|c| c[i].is_some()))
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|c| keep.iter().map(|&i| c[i]).collect())
            .collect();
        let filtered = Dataset {
            names: self.names.clone(),
            columns,
        };
        let dropped = n - keep.len();
        (filtered, dropped)
    }

    /// Validate this dataset against a model specification and extract the
    /// declared columns as dense vectors. All schema failures happen here,
    /// before any sampler is invoked.
    pub fn prepare(&self, spec: &ModelSpec) -> Result<PreparedData> {
        let n = self.n_rows();
        if n == 0 {
            return Err(Error::Validation(format!(
                "model `{}` needs at least one observation",
                spec.name
            )));
        }

        let mut fields = Vec::with_capacity(spec.data.len());
        for decl in &spec.data {
            let column = self.column(&decl.name).ok_or_else(|| {
                Error::SchemaMismatch(format!(
                    "column `{}` required by model `{}` not found (have: {})",
                    decl.name,
                    spec.name,
                    self.names.join(", ")
                ))
            })?;

            let mut dense = Vec::with_capacity(n);
            for (row, cell) in column.iter().enumerate() {
                let value = cell.ok_or_else(|| {
                    Error::Validation(format!(
                        "missing value in `{}` at row {}; drop incomplete rows before fitting",
                        decl.name, row
                    ))
                })?;
                if !value.is_finite() {
                    return Err(Error::Validation(format!(
                        "non-finite value in `{}` at row {}",
                        decl.name, row
                    )));
                }
                if decl.ty == FieldType::Count && (value < 0.0 || value.fract() != 0.0) {
                    return Err(Error::SchemaMismatch(format!(
                        "column `{}` must hold non-negative integers; found {} at row {}",
                        decl.name, value, row
                    )));
                }
                dense.push(value);
            }
            fields.push((decl.name.clone(), dense));
        }

        Ok(PreparedData { n, fields })
    }

    /// Assemble the JSON data bundle the external engine reads: `N` plus one
    /// array per declared field, keyed by the declared names.
    pub fn to_stan_data(&self, spec: &ModelSpec) -> Result<String> {
        let prepared = self.prepare(spec)?;
        let mut bundle = json!({ "N": prepared.n });
        let obj = bundle
            .as_object_mut()
            .ok_or_else(|| Error::Validation("data bundle is not a JSON object".into()))?;
        for decl in &spec.data {
            let values = prepared
                .column(&decl.name)
                .ok_or_else(|| Error::SchemaMismatch(format!("column `{}` missing", decl.name)))?;
            let json_values = match decl.ty {
                FieldType::Real => json!(values),
                // Counts were validated as whole numbers in prepare().
                FieldType::Count => json!(values.iter().map(|&v| v as i64).collect::<Vec<_>>()),
            };
            obj.insert(decl.name.clone(), json_values);
        }
        Ok(serde_json::to_string_pretty(&bundle)?)
    }

    /// Write the dataset as CSV, with `NA` for missing cells.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        use std::fmt::Write as _;

        let mut out = String::new();
        out.push_str(&self.names.join(","));
        out.push('\n');
        for row in 0..self.n_rows() {
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match col[row] {
                    Some(v) => {
                        let _ = write!(out, "{}", v);
                    }
                    None => out.push_str("NA"),
                }
            }
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }
}

/// A dataset validated against a spec: dense columns in declaration order.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub n: usize,
    fields: Vec<(String, Vec<f64>)>,
}

impl PreparedData {
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}
