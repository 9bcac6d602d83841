use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2};
use thiserror::Error;

/// Failures raised while reading, shaping or writing a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// Filesystem failure.
    #[error("{}: {source}", path.display())]
    Io {
        /// Offending file.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: io::Error,
    },
    /// Malformed CSV (ragged rows, bad quoting, invalid UTF-8).
    #[error("{}: {source}", path.display())]
    Csv {
        /// Offending file.
        path: PathBuf,
        /// Parser failure.
        #[source]
        source: csv::Error,
    },
    /// The file has no header line.
    #[error("{}: missing header row", .0.display())]
    MissingHeader(PathBuf),
    /// A required column is absent.
    #[error("column `{0}` not found")]
    MissingColumn(String),
    /// A cell could not be parsed as a number.
    #[error("row {row}, column `{column}`: `{value}` is not numeric")]
    NonNumeric {
        /// Column name.
        column: String,
        /// Zero-based data row.
        row: usize,
        /// Raw cell text.
        value: String,
    },
    /// The table holds no data rows.
    #[error("table has no data rows")]
    Empty,
}

/// Row-oriented table with a header, kept as raw cell text so a round trip through
/// disk preserves the original formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Builds a table from a header and rows of equal width.
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Builds a table from numeric rows.
    #[must_use]
    pub fn from_numeric(headers: Vec<String>, rows: &[Vec<f64>]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();
        Self { headers, rows }
    }

    /// Reads a comma-separated file with a header line.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|source| csv_error(path, source))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| csv_error(path, source))?
            .iter()
            .map(|name| name.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(TableError::MissingHeader(path.to_path_buf()));
        }
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|source| csv_error(path, source))?;
            rows.push(record.iter().map(ToString::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    /// Writes the table, replacing any existing file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_path(path).map_err(|source| csv_error(path, source))?;
        writer
            .write_record(&self.headers)
            .map_err(|source| csv_error(path, source))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|source| csv_error(path, source))?;
        }
        writer.flush().map_err(|source| io_error(path, source))
    }

    /// Appends rows; the header is written only when the file is new or empty.
    pub fn append_csv(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let fresh = !matches!(fs::metadata(path), Ok(meta) if meta.len() > 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| io_error(path, source))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer
                .write_record(&self.headers)
                .map_err(|source| csv_error(path, source))?;
        }
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|source| csv_error(path, source))?;
        }
        writer.flush().map_err(|source| io_error(path, source))
    }

    /// Column names in file order.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Raw rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column.
    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Subset of rows, in the order given.
    #[must_use]
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            headers: self.headers.clone(),
            rows: indices
                .iter()
                .filter_map(|&idx| self.rows.get(idx).cloned())
                .collect(),
        }
    }

    /// Projection onto the named columns.
    pub fn select(&self, columns: &[String]) -> Result<Self, TableError> {
        let indices = columns
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            headers: columns.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&idx| row[idx].clone()).collect())
                .collect(),
        })
    }

    /// Splits into feature names, a feature matrix (every column except `target`, in file
    /// order) and the target vector.
    pub fn features_and_target(
        &self,
        target: &str,
    ) -> Result<(Vec<String>, Array2<f64>, Array1<f64>), TableError> {
        if self.rows.is_empty() {
            return Err(TableError::Empty);
        }
        let target_idx = self.column_index(target)?;
        let feature_idx: Vec<usize> = (0..self.headers.len())
            .filter(|&idx| idx != target_idx)
            .collect();
        let names = feature_idx
            .iter()
            .map(|&idx| self.headers[idx].clone())
            .collect();
        let mut x = Array2::<f64>::zeros((self.rows.len(), feature_idx.len()));
        let mut y = Array1::<f64>::zeros(self.rows.len());
        for (r, row) in self.rows.iter().enumerate() {
            for (c, &idx) in feature_idx.iter().enumerate() {
                x[[r, c]] = self.numeric(row, r, idx)?;
            }
            y[r] = self.numeric(row, r, target_idx)?;
        }
        Ok((names, x, y))
    }

    fn numeric(&self, row: &[String], r: usize, idx: usize) -> Result<f64, TableError> {
        let raw = row.get(idx).map_or("", String::as_str);
        raw.trim()
            .parse::<f64>()
            .map_err(|_| TableError::NonNumeric {
                column: self.headers[idx].clone(),
                row: r,
                value: raw.to_string(),
            })
    }
}

fn ensure_parent(path: &Path) -> Result<(), TableError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))
        }
        _ => Ok(()),
    }
}

fn csv_error(path: &Path, source: csv::Error) -> TableError {
    TableError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn io_error(path: &Path, source: io::Error) -> TableError {
    TableError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Table {
        Table::new(
            vec!["f1".into(), "target".into(), "f2".into()],
            vec![
                vec!["1.0".into(), "3".into(), "2.5".into()],
                vec!["2.0".into(), "5".into(), "0.5".into()],
            ],
        )
    }

    #[test]
    fn separates_features_from_target() {
        let (names, x, y) = sample().features_and_target("target").unwrap();
        assert_eq!(names, vec!["f1", "f2"]);
        assert_eq!(x.dim(), (2, 2));
        assert!((x[[0, 1]] - 2.5).abs() < f64::EPSILON);
        assert!((y[1] - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reports_missing_target_and_bad_cells() {
        assert!(matches!(
            sample().features_and_target("quality"),
            Err(TableError::MissingColumn(name)) if name == "quality"
        ));
        let bad = Table::new(
            vec!["f1".into(), "target".into()],
            vec![vec!["abc".into(), "1".into()]],
        );
        assert!(matches!(
            bad.features_and_target("target"),
            Err(TableError::NonNumeric { row: 0, .. })
        ));
    }

    #[test]
    fn write_then_read_preserves_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/data.csv");
        sample().write_csv(&path).unwrap();
        let loaded = Table::read_csv(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn append_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        sample().append_csv(&path).unwrap();
        sample().append_csv(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("f1,target,f2").count(), 1);
        assert_eq!(content.lines().count(), 5);
    }

    #[test]
    fn empty_file_has_no_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            Table::read_csv(&path),
            Err(TableError::MissingHeader(_))
        ));
    }

    #[test]
    fn select_projects_columns() {
        let projected = sample()
            .select(&["f2".to_string(), "f1".to_string()])
            .unwrap();
        assert_eq!(projected.headers(), ["f2", "f1"]);
        assert_eq!(projected.rows()[1], vec!["0.5", "2.0"]);
        assert_eq!(sample().take_rows(&[1]).len(), 1);
    }
}
