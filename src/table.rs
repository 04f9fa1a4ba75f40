use std::collections::HashMap;

use serde::Serialize;

use crate::construct::Column;
use crate::datatype::{CellType, Value};
use crate::error::{CcdbError, Result};
use crate::lexical::{quote_cell, Tokenizer};

/// A rows × columns grid of raw cells, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    n_rows: usize,
    n_columns: usize,
    cells: Vec<String>,
}

impl Table {
    /// Pages a flat token sequence into rows of `n_columns` cells.
    pub fn from_tokens(tokens: Vec<String>, n_rows: usize, n_columns: usize) -> Result<Self> {
        if n_columns == 0 {
            return Err(CcdbError::invalid("a table needs at least one column"));
        }
        if tokens.len() != n_rows * n_columns {
            return Err(CcdbError::invalid(format!(
                "expected {} cells ({} rows x {} columns) but found {}",
                n_rows * n_columns,
                n_rows,
                n_columns,
                tokens.len()
            )));
        }
        Ok(Self {
            n_rows,
            n_columns,
            cells: tokens,
        })
    }
    /// Tokenizes calibration text and pages it into a table.
    pub fn parse(source: &str, n_rows: usize, n_columns: usize) -> Result<Self> {
        Self::from_tokens(Tokenizer::new().split(source), n_rows, n_columns)
    }
    /// Builds a table from row vectors, which must all have the same length.
    pub fn from_rows(rows: &[Vec<String>]) -> Result<Self> {
        let n_columns = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_columns) {
            return Err(CcdbError::invalid(format!(
                "row {} has {} cells, the first row has {}",
                i,
                row.len(),
                n_columns
            )));
        }
        Self::from_tokens(rows.concat(), rows.len(), n_columns)
    }
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
    pub fn n_columns(&self) -> usize {
        self.n_columns
    }
    pub fn row(&self, row: usize) -> Option<&[String]> {
        if row >= self.n_rows {
            return None;
        }
        let start = row * self.n_columns;
        Some(&self.cells[start..start + self.n_columns])
    }
    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.cells.chunks(self.n_columns)
    }
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        if column >= self.n_columns {
            return None;
        }
        self.row(row).map(|r| r[column].as_str())
    }
    /// Reads one cell as `T`.
    pub fn value<T: CellType>(&self, row: usize, column: usize) -> Result<T> {
        let cell = self.cell(row, column).ok_or_else(|| {
            CcdbError::not_found(format!("cell ({}, {}) in a {}x{} table", row, column, self.n_rows, self.n_columns))
        })?;
        T::parse_token(cell).ok_or_else(|| CcdbError::Parse {
            message: format!("'{}' is not a valid {}", cell, T::COLUMN_TYPE),
            position: Some(row * self.n_columns + column),
        })
    }
    /// Converts every cell of a row according to the column metadata.
    pub fn typed_row(&self, row: usize, columns: &[Column]) -> Result<Vec<Value>> {
        let cells = self
            .row(row)
            .ok_or_else(|| CcdbError::not_found(format!("row {}", row)))?;
        if columns.len() != cells.len() {
            return Err(CcdbError::invalid(format!(
                "{} columns given for a row of {} cells",
                columns.len(),
                cells.len()
            )));
        }
        cells
            .iter()
            .zip(columns)
            .map(|(cell, column)| column.column_type().parse(cell))
            .collect()
    }
    /// Column name to raw cell for one row.
    pub fn row_map(&self, row: usize, columns: &[Column]) -> Result<HashMap<String, String>> {
        let cells = self
            .row(row)
            .ok_or_else(|| CcdbError::not_found(format!("row {}", row)))?;
        Ok(columns
            .iter()
            .zip(cells)
            .map(|(column, cell)| (column.name().to_string(), cell.clone()))
            .collect())
    }
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        self.rows().map(|r| r.to_vec()).collect()
    }
    /// Writes the table as calibration text, one line per row.
    pub fn encode(&self) -> Result<String> {
        let mut lines = Vec::with_capacity(self.n_rows);
        for (r, row) in self.rows().enumerate() {
            let mut line = Vec::with_capacity(self.n_columns);
            for (c, cell) in row.iter().enumerate() {
                let quoted = quote_cell(cell).ok_or_else(|| {
                    CcdbError::invalid(format!(
                        "cell ({}, {}) cannot be written as calibration text: {:?}",
                        r, c, cell
                    ))
                })?;
                line.push(quoted);
            }
            lines.push(line.join(" "));
        }
        Ok(lines.join("\n"))
    }
}

/// Writes rows of cells as calibration text that tokenizes back to the same cells.
pub fn encode_rows(rows: &[Vec<String>]) -> Result<String> {
    Table::from_rows(rows)?.encode()
}
