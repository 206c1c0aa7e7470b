//! In-memory table primitives
//!
//! `Frame` is column-major with a row index; `Series` is one labelled column.
//! Operations never mutate in place: every transform returns a new value, so
//! the loaded dataset stays untouched for the life of the process.

use crate::error::ExecutionError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

type OpResult<T> = std::result::Result<T, ExecutionError>;

// =============================
// Cells
// =============================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Infer a typed cell from raw source text
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Cell::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Cell::Float(f);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Cell::Bool(true),
            "false" => Cell::Bool(false),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric view; booleans count as 0/1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if !f.is_nan() => Some(*f),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            Cell::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Int(_) | Cell::Float(_) | Cell::Bool(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Text(_) => "text",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }

    /// Truthiness for masks: only `true` selects a row
    pub fn is_true(&self) -> bool {
        matches!(self, Cell::Bool(true))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NaN"),
            Cell::Bool(true) => write!(f, "True"),
            Cell::Bool(false) => write!(f, "False"),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(x) if x.is_nan() => write!(f, "NaN"),
            Cell::Float(x) if x.fract() == 0.0 && x.abs() < 1e16 => write!(f, "{:.1}", x),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Equality used by filters, grouping and lookups (`1 == 1.0`)
pub fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) => x == y,
        (Cell::Null, Cell::Null) => true,
        _ if a.is_null() || b.is_null() => false,
        (Cell::Bool(x), Cell::Bool(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Total order for sorting: numbers, then text, then nulls
pub fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) => x.cmp(y),
        (Cell::Text(_), _) => Ordering::Greater,
        (_, Cell::Text(_)) => Ordering::Less,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn compare_keys(a: &[Cell], b: &[Cell]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| compare_cells(x, y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Column type as reported in schema summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Int,
    Float,
    Bool,
    Text,
    Mixed,
}

impl DType {
    pub fn infer(values: &[Cell]) -> DType {
        let mut dtype: Option<DType> = None;
        for cell in values.iter().filter(|c| !c.is_null()) {
            let this = match cell {
                Cell::Int(_) => DType::Int,
                Cell::Float(_) => DType::Float,
                Cell::Bool(_) => DType::Bool,
                _ => DType::Text,
            };
            dtype = Some(match (dtype, this) {
                (None, t) => t,
                (Some(a), b) if a == b => a,
                (Some(DType::Int), DType::Float) | (Some(DType::Float), DType::Int) => DType::Float,
                _ => DType::Mixed,
            });
        }
        // All-null columns read as float, like NaN-only columns
        dtype.unwrap_or(DType::Float)
    }

    /// Type a whole column of raw text at once: a column is numeric or
    /// boolean only if every non-empty value is, otherwise it keeps the raw text
    pub fn parse_column<S: AsRef<str>>(raw: &[S]) -> Vec<Cell> {
        let parsed: Vec<Cell> = raw.iter().map(|r| Cell::parse(r.as_ref())).collect();
        match DType::infer(&parsed) {
            DType::Int | DType::Bool => parsed,
            DType::Float => parsed
                .into_iter()
                .map(|c| match c {
                    Cell::Int(i) => Cell::Float(i as f64),
                    other => other,
                })
                .collect(),
            DType::Text | DType::Mixed => raw
                .iter()
                .map(|r| match r.as_ref().trim() {
                    "" => Cell::Null,
                    text => Cell::Text(text.to_string()),
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Int => "int64",
            DType::Float => "float64",
            DType::Bool => "bool",
            DType::Text => "object",
            DType::Mixed => "object",
        }
    }
}

// =============================
// Aggregations
// =============================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agg {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Count,
    Nunique,
}

impl Agg {
    pub fn from_name(name: &str) -> Option<Agg> {
        Some(match name {
            "sum" => Agg::Sum,
            "mean" => Agg::Mean,
            "median" => Agg::Median,
            "min" => Agg::Min,
            "max" => Agg::Max,
            "std" => Agg::Std,
            "count" => Agg::Count,
            "nunique" => Agg::Nunique,
            _ => return None,
        })
    }

    /// Whether the aggregation only applies to numeric data
    pub fn numeric_only(&self) -> bool {
        matches!(self, Agg::Sum | Agg::Mean | Agg::Median | Agg::Std)
    }

    pub fn apply(&self, values: &[Cell]) -> OpResult<Cell> {
        let present: Vec<&Cell> = values.iter().filter(|c| !c.is_null()).collect();

        match self {
            Agg::Count => return Ok(Cell::Int(present.len() as i64)),
            Agg::Nunique => {
                let mut seen: Vec<&Cell> = Vec::new();
                for cell in &present {
                    if !seen.iter().any(|s| cells_equal(s, cell)) {
                        seen.push(cell);
                    }
                }
                return Ok(Cell::Int(seen.len() as i64));
            }
            Agg::Min | Agg::Max => return self.extreme(&present),
            _ => {}
        }

        if let Some(bad) = present.iter().find(|c| !c.is_numeric()) {
            return Err(ExecutionError::TypeMismatch(format!(
                "cannot compute {:?} over {} values",
                self,
                bad.type_name()
            ).to_lowercase()));
        }

        let numbers: Vec<f64> = present.iter().filter_map(|c| c.as_f64()).collect();

        match self {
            Agg::Sum => {
                if present.iter().all(|c| c.as_int().is_some()) {
                    let total = present
                        .iter()
                        .filter_map(|c| c.as_int())
                        .fold(0i64, |acc, v| acc.saturating_add(v));
                    Ok(Cell::Int(total))
                } else {
                    Ok(Cell::Float(numbers.iter().sum()))
                }
            }
            Agg::Mean => {
                if numbers.is_empty() {
                    Ok(Cell::Null)
                } else {
                    Ok(Cell::Float(numbers.iter().sum::<f64>() / numbers.len() as f64))
                }
            }
            Agg::Median => {
                if numbers.is_empty() {
                    return Ok(Cell::Null);
                }
                let mut sorted = numbers;
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                let mid = sorted.len() / 2;
                let median = if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                };
                Ok(Cell::Float(median))
            }
            Agg::Std => {
                if numbers.len() < 2 {
                    return Ok(Cell::Null);
                }
                let n = numbers.len() as f64;
                let mean = numbers.iter().sum::<f64>() / n;
                let variance =
                    numbers.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                Ok(Cell::Float(variance.sqrt()))
            }
            Agg::Count | Agg::Nunique | Agg::Min | Agg::Max => self.extreme(&present),
        }
    }

    fn extreme(&self, present: &[&Cell]) -> OpResult<Cell> {
        let numeric = present.iter().all(|c| c.is_numeric());
        let text = present.iter().all(|c| matches!(c, Cell::Text(_)));
        if !numeric && !text {
            return Err(ExecutionError::TypeMismatch(
                "cannot compare text with numbers".to_string(),
            ));
        }
        let picked = present.iter().copied().reduce(|best, c| {
            let ord = compare_cells(c, best);
            match self {
                Agg::Min if ord == Ordering::Less => c,
                Agg::Max if ord == Ordering::Greater => c,
                _ => best,
            }
        });
        Ok(picked.cloned().unwrap_or(Cell::Null))
    }
}

// =============================
// Series
// =============================

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub index: Vec<Cell>,
    pub values: Vec<Cell>,
}

impl Series {
    pub fn new(name: Option<String>, index: Vec<Cell>, values: Vec<Cell>) -> Self {
        Self { name, index, values }
    }

    /// Series with a positional 0..n index
    pub fn from_values(name: Option<String>, values: Vec<Cell>) -> Self {
        let index = (0..values.len() as i64).map(Cell::Int).collect();
        Self { name, index, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reduce(&self, agg: Agg) -> OpResult<Cell> {
        agg.apply(&self.values)
    }

    pub fn take(&self, positions: &[usize]) -> Series {
        Series {
            name: self.name.clone(),
            index: positions.iter().map(|&p| self.index[p].clone()).collect(),
            values: positions.iter().map(|&p| self.values[p].clone()).collect(),
        }
    }

    /// Boolean view of a mask series; nulls never select
    pub fn as_mask(&self) -> OpResult<Vec<bool>> {
        self.values
            .iter()
            .map(|c| match c {
                Cell::Bool(b) => Ok(*b),
                c if c.is_null() => Ok(false),
                other => Err(ExecutionError::TypeMismatch(format!(
                    "boolean mask contains {} values",
                    other.type_name()
                ))),
            })
            .collect()
    }

    pub fn is_mask(&self) -> bool {
        !self.values.is_empty()
            && self
                .values
                .iter()
                .all(|c| matches!(c, Cell::Bool(_)) || c.is_null())
    }

    pub fn filter(&self, mask: &[bool]) -> OpResult<Series> {
        if mask.len() != self.len() {
            return Err(ExecutionError::TypeMismatch(format!(
                "mask of length {} does not match series of length {}",
                mask.len(),
                self.len()
            )));
        }
        let positions: Vec<usize> = positions_where(mask);
        Ok(self.take(&positions))
    }

    pub fn head(&self, n: i64) -> Series {
        self.take(&head_positions(self.len(), n))
    }

    pub fn tail(&self, n: i64) -> Series {
        self.take(&tail_positions(self.len(), n))
    }

    pub fn sort(&self, ascending: bool) -> Series {
        let mut positions: Vec<usize> = (0..self.len()).collect();
        positions.sort_by(|&a, &b| directed(&self.values[a], &self.values[b], ascending));
        self.take(&positions)
    }

    pub fn nlargest(&self, n: i64, largest: bool) -> Series {
        self.sort(!largest).head(n)
    }

    pub fn position_of(&self, label: &Cell) -> Option<usize> {
        self.index.iter().position(|l| cells_equal(l, label))
    }

    pub fn get(&self, label: &Cell) -> Option<Cell> {
        self.position_of(label).map(|p| self.values[p].clone())
    }

    /// Index label of the largest (or smallest) value
    pub fn idx_extreme(&self, max: bool) -> OpResult<Cell> {
        let agg = if max { Agg::Max } else { Agg::Min };
        let target = self.reduce(agg)?;
        if target.is_null() {
            return Err(ExecutionError::Unsupported(
                "idxmax/idxmin of an empty series".to_string(),
            ));
        }
        let position = self
            .values
            .iter()
            .position(|c| cells_equal(c, &target))
            .unwrap_or(0);
        Ok(self.index[position].clone())
    }

    pub fn unique(&self) -> Vec<Cell> {
        let mut seen: Vec<Cell> = Vec::new();
        for cell in &self.values {
            if !seen.iter().any(|s| cells_equal(s, cell)) {
                seen.push(cell.clone());
            }
        }
        seen
    }

    /// Occurrence counts, most frequent first (ties keep first appearance)
    pub fn value_counts(&self) -> Series {
        let mut counts: Vec<(Cell, i64)> = Vec::new();
        for cell in self.values.iter().filter(|c| !c.is_null()) {
            match counts.iter_mut().find(|(k, _)| cells_equal(k, cell)) {
                Some((_, n)) => *n += 1,
                None => counts.push((cell.clone(), 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let (index, values) = counts
            .into_iter()
            .map(|(k, n)| (k, Cell::Int(n)))
            .unzip();
        Series::new(Some("count".to_string()), index, values)
    }

    pub fn map<F>(&self, f: F) -> OpResult<Series>
    where
        F: Fn(&Cell) -> OpResult<Cell>,
    {
        let values = self.values.iter().map(f).collect::<OpResult<Vec<_>>>()?;
        Ok(Series {
            name: self.name.clone(),
            index: self.index.clone(),
            values,
        })
    }

    /// Element-wise combination with an aligned series of the same length
    pub fn zip_with<F>(&self, other: &Series, f: F) -> OpResult<Series>
    where
        F: Fn(&Cell, &Cell) -> OpResult<Cell>,
    {
        if self.len() != other.len() {
            return Err(ExecutionError::TypeMismatch(format!(
                "cannot combine series of lengths {} and {}",
                self.len(),
                other.len()
            )));
        }
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| f(a, b))
            .collect::<OpResult<Vec<_>>>()?;
        Ok(Series {
            name: self.name.clone(),
            index: self.index.clone(),
            values,
        })
    }

    /// Label → value mapping used as the shaped query result
    pub fn to_mapping(&self) -> Map<String, Value> {
        self.index
            .iter()
            .zip(self.values.iter())
            .map(|(label, value)| (label.to_string(), value.to_json()))
            .collect()
    }
}

// =============================
// Frame
// =============================

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn dtype(&self) -> DType {
        DType::infer(&self.values)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    index: Vec<Cell>,
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(columns: Vec<Column>) -> OpResult<Self> {
        let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
            return Err(ExecutionError::TypeMismatch(format!(
                "column '{}' has {} values, expected {}",
                bad.name,
                bad.values.len(),
                rows
            )));
        }
        Ok(Self {
            index: (0..rows as i64).map(Cell::Int).collect(),
            columns,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn index(&self) -> &[Cell] {
        &self.index
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    fn unknown_field(&self, name: &str) -> ExecutionError {
        ExecutionError::UnknownField {
            field: name.to_string(),
            available: self.column_names().join(", "),
        }
    }

    pub fn series(&self, name: &str) -> OpResult<Series> {
        let column = self.column(name).ok_or_else(|| self.unknown_field(name))?;
        Ok(Series::new(
            Some(column.name.clone()),
            self.index.clone(),
            column.values.clone(),
        ))
    }

    pub fn select(&self, names: &[String]) -> OpResult<Frame> {
        let columns = names
            .iter()
            .map(|n| {
                self.column(n)
                    .cloned()
                    .ok_or_else(|| self.unknown_field(n))
            })
            .collect::<OpResult<Vec<_>>>()?;
        Ok(Frame {
            index: self.index.clone(),
            columns,
        })
    }

    pub fn take(&self, positions: &[usize]) -> Frame {
        Frame {
            index: positions.iter().map(|&p| self.index[p].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: positions.iter().map(|&p| c.values[p].clone()).collect(),
                })
                .collect(),
        }
    }

    pub fn filter(&self, mask: &[bool]) -> OpResult<Frame> {
        if mask.len() != self.n_rows() {
            return Err(ExecutionError::TypeMismatch(format!(
                "mask of length {} does not match {} rows",
                mask.len(),
                self.n_rows()
            )));
        }
        Ok(self.take(&positions_where(mask)))
    }

    pub fn head(&self, n: i64) -> Frame {
        self.take(&head_positions(self.n_rows(), n))
    }

    pub fn tail(&self, n: i64) -> Frame {
        self.take(&tail_positions(self.n_rows(), n))
    }

    pub fn sort_by(&self, keys: &[String], ascending: &[bool]) -> OpResult<Frame> {
        let key_columns = keys
            .iter()
            .map(|k| self.column(k).ok_or_else(|| self.unknown_field(k)))
            .collect::<OpResult<Vec<_>>>()?;

        let mut positions: Vec<usize> = (0..self.n_rows()).collect();
        positions.sort_by(|&a, &b| {
            key_columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let asc = ascending.get(i).or(ascending.last()).copied().unwrap_or(true);
                    directed(&col.values[a], &col.values[b], asc)
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(self.take(&positions))
    }

    pub fn nlargest(&self, n: i64, column: &str, largest: bool) -> OpResult<Frame> {
        Ok(self
            .sort_by(&[column.to_string()], &[!largest])?
            .head(n))
    }

    /// Row at `position` as a series labelled by column name
    pub fn row(&self, position: usize) -> Series {
        Series::new(
            Some(self.index[position].to_string()),
            self.columns
                .iter()
                .map(|c| Cell::Text(c.name.clone()))
                .collect(),
            self.columns
                .iter()
                .map(|c| c.values[position].clone())
                .collect(),
        )
    }

    pub fn position_of(&self, label: &Cell) -> Option<usize> {
        self.index.iter().position(|l| cells_equal(l, label))
    }

    /// Keep the first row of each distinct `subset` tuple (all columns if `None`)
    pub fn drop_duplicates(&self, subset: Option<&[String]>) -> OpResult<Frame> {
        let compared: Vec<&Column> = match subset {
            Some(names) => names
                .iter()
                .map(|n| self.column(n).ok_or_else(|| self.unknown_field(n)))
                .collect::<OpResult<Vec<_>>>()?,
            None => self.columns.iter().collect(),
        };

        let mut keep: Vec<usize> = Vec::new();
        for row in 0..self.n_rows() {
            let duplicate = keep.iter().any(|&k| {
                compared
                    .iter()
                    .all(|c| cells_equal(&c.values[k], &c.values[row]))
            });
            if !duplicate {
                keep.push(row);
            }
        }
        Ok(self.take(&keep))
    }

    pub fn dropna(&self) -> Frame {
        let keep: Vec<usize> = (0..self.n_rows())
            .filter(|&row| self.columns.iter().all(|c| !c.values[row].is_null()))
            .collect();
        self.take(&keep)
    }

    pub fn reset_index(&self) -> Frame {
        Frame {
            index: (0..self.n_rows() as i64).map(Cell::Int).collect(),
            columns: self.columns.clone(),
        }
    }

    /// Column-wise reduction; numeric-only aggregations skip non-numeric columns
    pub fn reduce(&self, agg: Agg) -> OpResult<Series> {
        let mut index = Vec::new();
        let mut values = Vec::new();
        for column in &self.columns {
            let dtype = column.dtype();
            if agg.numeric_only() && !matches!(dtype, DType::Int | DType::Float | DType::Bool) {
                continue;
            }
            if matches!(agg, Agg::Min | Agg::Max) && dtype == DType::Mixed {
                continue;
            }
            index.push(Cell::Text(column.name.clone()));
            values.push(agg.apply(&column.values)?);
        }
        Ok(Series::new(None, index, values))
    }

    /// Row positions per distinct key tuple, ordered by key
    pub fn group_positions(&self, keys: &[String]) -> OpResult<Vec<(Vec<Cell>, Vec<usize>)>> {
        let key_columns = keys
            .iter()
            .map(|k| self.column(k).ok_or_else(|| self.unknown_field(k)))
            .collect::<OpResult<Vec<_>>>()?;

        let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = Vec::new();
        for row in 0..self.n_rows() {
            let key: Vec<Cell> = key_columns.iter().map(|c| c.values[row].clone()).collect();
            if key.iter().any(|c| c.is_null()) {
                continue;
            }
            match groups.iter_mut().find(|(k, _)| {
                k.iter().zip(key.iter()).all(|(a, b)| cells_equal(a, b))
            }) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        groups.sort_by(|a, b| compare_keys(&a.0, &b.0));
        Ok(groups)
    }

    /// Rows as JSON objects, at most `limit`
    pub fn records(&self, limit: usize) -> Vec<Map<String, Value>> {
        (0..self.n_rows().min(limit))
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect()
            })
            .collect()
    }

    /// Aligned text rendering of the first `n` rows, index first
    pub fn render(&self, n: usize) -> String {
        let rows = self.n_rows().min(n);
        let mut table: Vec<Vec<String>> = Vec::with_capacity(rows + 1);

        let mut header = vec![String::new()];
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        table.push(header);

        for row in 0..rows {
            let mut line = vec![self.index[row].to_string()];
            line.extend(self.columns.iter().map(|c| c.values[row].to_string()));
            table.push(line);
        }

        let widths: Vec<usize> = (0..=self.columns.len())
            .map(|col| {
                table
                    .iter()
                    .map(|line| line[col].chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        table
            .iter()
            .map(|line| {
                line.iter()
                    .zip(widths.iter())
                    .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join("  ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================
// Helpers
// =============================

fn positions_where(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter(|(_, keep)| **keep)
        .map(|(i, _)| i)
        .collect()
}

fn head_positions(len: usize, n: i64) -> Vec<usize> {
    let count = if n >= 0 {
        (n as usize).min(len)
    } else {
        len.saturating_sub(n.unsigned_abs() as usize)
    };
    (0..count).collect()
}

fn tail_positions(len: usize, n: i64) -> Vec<usize> {
    let count = if n >= 0 {
        (n as usize).min(len)
    } else {
        len.saturating_sub(n.unsigned_abs() as usize)
    };
    (len - count..len).collect()
}

/// Sort order with nulls always last regardless of direction
fn directed(a: &Cell, b: &Cell, ascending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (false, false) if !ascending => compare_cells(a, b).reverse(),
        _ => compare_cells(a, b),
    }
}
