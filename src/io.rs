//! Tabular data adapters: named typed columns turned into estimator inputs

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IoError {
    #[error("column {name} has {got} rows, expected {expected}")]
    LengthMismatch { name: String, expected: usize, got: usize },
    #[error("column {name} holds strings and cannot be used as numeric data")]
    StringColumn { name: String },
    #[error("labels must come from exactly one column, got {count}")]
    LabelColumns { count: usize },
    #[error("malformed CSV at line {line}: {message}")]
    Csv { line: usize, message: String },
    #[error("frame has no columns")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f32>),
    Int(Vec<i64>),
    Str(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn numeric(&self, name: &str) -> Result<Vec<f32>, IoError> {
        match self {
            Column::Float(v) => Ok(v.clone()),
            Column::Int(v) => Ok(v.iter().map(|&i| i as f32).collect()),
            Column::Str(_) => Err(IoError::StringColumn { name: name.to_string() }),
        }
    }

    /// Integer column if every cell is an integer, float if every cell is a number,
    /// strings otherwise
    fn infer(cells: Vec<String>) -> Self {
        if let Ok(ints) = cells.iter().map(|c| c.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
            return Column::Int(ints);
        }
        if let Ok(floats) = cells.iter().map(|c| c.parse::<f32>()).collect::<Result<Vec<_>, _>>() {
            return Column::Float(floats);
        }
        Column::Str(cells)
    }
}

/// Named columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<(String, Column)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self, IoError> {
        if let Some(expected) = self.n_rows() {
            if column.len() != expected {
                return Err(IoError::LengthMismatch {
                    name: name.to_string(),
                    expected,
                    got: column.len(),
                });
            }
        }
        self.columns.push((name.to_string(), column));
        Ok(self)
    }

    /// Parses comma separated values with a header row. Cells are trimmed, and
    /// quoting is not supported.
    pub fn from_csv_str(text: &str) -> Result<Self, IoError> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (_, header) = lines.next().ok_or(IoError::Empty)?;
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let mut cells: Vec<Vec<String>> = vec![vec![]; names.len()];
        for (i, line) in lines {
            let row: Vec<&str> = line.split(',').map(str::trim).collect();
            if row.len() != names.len() {
                return Err(IoError::Csv {
                    line: i + 1,
                    message: format!("expected {} fields, got {}", names.len(), row.len()),
                });
            }
            for (column, cell) in cells.iter_mut().zip(row) {
                column.push(cell.to_string());
            }
        }
        names
            .into_iter()
            .zip(cells)
            .try_fold(Frame::new(), |frame, (name, column)| {
                frame.with_column(name, Column::infer(column))
            })
    }

    pub fn n_rows(&self) -> Option<usize> {
        self.columns.first().map(|(_, c)| c.len())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Keeps only the named columns, in the given order
    pub fn select(&self, names: &[&str]) -> Frame {
        Frame {
            columns: names
                .iter()
                .filter_map(|name| self.column(name).map(|c| (name.to_string(), c.clone())))
                .collect(),
        }
    }

    /// Row-major feature rows from every column
    pub fn extract_data(&self) -> Result<Vec<Vec<f32>>, IoError> {
        let n_rows = self.n_rows().ok_or(IoError::Empty)?;
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| column.numeric(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((0..n_rows)
            .map(|row| columns.iter().map(|c| c[row]).collect())
            .collect())
    }

    /// One label row per example from the frame's only column
    pub fn extract_labels(&self) -> Result<Vec<Vec<f32>>, IoError> {
        match self.columns.as_slice() {
            [(name, column)] => Ok(column.numeric(name)?.into_iter().map(|v| vec![v]).collect()),
            columns => Err(IoError::LabelColumns { count: columns.len() }),
        }
    }
}
