//! Dataset Provider
//!
//! Loads the tabular source once, caches it process-wide, and substitutes a
//! synthetic table when the source cannot be read. The cached `Dataset` is
//! immutable; queries only ever borrow it.

pub mod frame;

use crate::error::PipelineError;
use crate::Result;
use frame::{Cell, Column, DType, Frame};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Where the cached table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetOrigin {
    File,
    Fallback,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    frame: Frame,
    fingerprint: String,
    origin: DatasetOrigin,
}

impl Dataset {
    pub fn new(frame: Frame, origin: DatasetOrigin) -> Self {
        let fingerprint = fingerprint(&frame);
        Self {
            frame,
            fingerprint,
            origin,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn origin(&self) -> DatasetOrigin {
        self.origin
    }

    /// SHA-256 over the rendered header and rows
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.frame.n_rows(), self.frame.n_cols())
    }

    pub fn field_names(&self) -> Vec<String> {
        self.frame.column_names()
    }

    /// `(field, type name)` pairs in column order
    pub fn dtypes(&self) -> Vec<(String, &'static str)> {
        self.frame
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.dtype().name()))
            .collect()
    }

    pub fn head_text(&self, n: usize) -> String {
        self.frame.render(n)
    }
}

pub struct DatasetProvider {
    path: PathBuf,
    cache: RwLock<Option<Arc<Dataset>>>,
}

impl DatasetProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Provider pre-seeded with an in-memory table; nothing is read from disk
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            path: PathBuf::new(),
            cache: RwLock::new(Some(Arc::new(Dataset::new(frame, DatasetOrigin::Memory)))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached dataset, loading it on first access
    pub fn get(&self) -> Arc<Dataset> {
        if let Some(dataset) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Arc::clone(dataset);
        }

        let mut slot = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if let Some(dataset) = slot.as_ref() {
            return Arc::clone(dataset);
        }

        let dataset = Arc::new(self.load());
        *slot = Some(Arc::clone(&dataset));
        dataset
    }

    /// Drop the cached table; the next `get` reloads it
    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!(path = %self.path.display(), "Dataset cache invalidated");
    }

    fn load(&self) -> Dataset {
        match read_csv(&self.path) {
            Ok(frame) => {
                let dataset = Dataset::new(frame, DatasetOrigin::File);
                info!(
                    path = %self.path.display(),
                    rows = dataset.shape().0,
                    columns = dataset.shape().1,
                    fingerprint = %dataset.fingerprint(),
                    "Dataset loaded"
                );
                dataset
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Dataset unavailable, using fallback table");
                let frame = fallback_frame();
                if !self.path.as_os_str().is_empty() && !self.path.exists() {
                    match write_csv(&self.path, &frame) {
                        Ok(()) => info!(path = %self.path.display(), "Fallback dataset written"),
                        Err(e) => warn!(error = %e, "Could not write fallback dataset"),
                    }
                }
                Dataset::new(frame, DatasetOrigin::Fallback)
            }
        }
    }
}

/// Read a headed CSV file, inferring one type per column
pub fn read_csv(path: &Path) -> Result<Frame> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        for (i, column) in raw.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or_default().to_string());
        }
    }
    let columns: Vec<Vec<Cell>> = raw.iter().map(|values| DType::parse_column(values)).collect();

    if headers.is_empty() || columns.first().map(|c| c.is_empty()).unwrap_or(true) {
        return Err(PipelineError::Dataset(format!(
            "{} contains no rows",
            path.display()
        )));
    }

    let columns = headers
        .into_iter()
        .zip(columns)
        .map(|(name, values)| Column::new(name, values))
        .collect();
    Frame::new(columns).map_err(|e| PipelineError::Dataset(e.to_string()))
}

pub fn write_csv(path: &Path, frame: &Frame) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(frame.column_names())?;
    for row in 0..frame.n_rows() {
        let record: Vec<String> = frame
            .columns()
            .iter()
            .map(|c| match &c.values[row] {
                Cell::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Ten employees across five departments
pub fn fallback_frame() -> Frame {
    let text = |values: &[&str]| -> Vec<Cell> {
        values.iter().map(|v| Cell::Text(v.to_string())).collect()
    };

    let ids: Vec<Cell> = (1..=10).map(|i| Cell::Text(format!("Employee_{}", i))).collect();
    let departments = text(&[
        "IT", "Marketing", "Sales", "HR", "Finance", "IT", "Marketing", "Sales", "HR", "Finance",
    ]);
    let salaries = [85000, 70000, 65000, 60000, 75000, 90000, 72000, 68000, 62000, 78000]
        .iter()
        .map(|v| Cell::Int(*v))
        .collect();
    let experience = [5, 3, 4, 2, 6, 7, 4, 5, 3, 8]
        .iter()
        .map(|v| Cell::Int(*v))
        .collect();
    let performance = [4.2, 3.8, 3.5, 4.0, 4.5, 4.8, 3.9, 3.7, 4.1, 4.3]
        .iter()
        .map(|v| Cell::Float(*v))
        .collect();

    let columns = vec![
        Column::new("EmployeeID", ids),
        Column::new("Department", departments),
        Column::new("Salary", salaries),
        Column::new("Experience", experience),
        Column::new("Performance", performance),
    ];

    // Columns above are built with equal lengths
    Frame::new(columns).unwrap_or_default()
}

fn fingerprint(frame: &Frame) -> String {
    let mut hasher = Sha256::new();
    hasher.update(frame.column_names().join(",").as_bytes());
    for row in 0..frame.n_rows() {
        hasher.update(b"\n");
        for column in frame.columns() {
            hasher.update(column.values[row].to_string().as_bytes());
            hasher.update(b",");
        }
    }
    hex::encode(hasher.finalize())
}
