//! Tree-walking evaluator over the in-memory table
//!
//! The only resolvable names are `df`, `pd` and a handful of builtins.
//! Everything else, including any attribute outside the supported table
//! vocabulary, is an error rather than a lookup.

use super::parser::{BinaryOp, CompareOp, Expr, UnaryOp};
use crate::dataset::frame::{cells_equal, Agg, Cell, Column, Frame, Series};
use crate::error::ExecutionError;
use regex::RegexBuilder;
use std::cmp::Ordering;

type EvalResult<T> = Result<T, ExecutionError>;

const FRAME_METHODS: &[&str] = &[
    "head", "tail", "sort_values", "nlargest", "nsmallest", "groupby", "drop_duplicates",
    "dropna", "reset_index", "sum", "mean", "median", "min", "max", "std", "count", "nunique",
    "copy",
];

const SERIES_METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "std", "count", "nunique", "idxmax", "idxmin",
    "value_counts", "unique", "tolist", "to_list", "head", "tail", "sort_values", "nlargest",
    "nsmallest", "round", "abs", "isin", "between", "isna", "isnull", "notna", "notnull",
    "fillna", "dropna", "copy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerKind {
    Loc,
    Iloc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Round,
    Abs,
    Int,
    Float,
    Str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    Column(String),
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    frame: Frame,
    keys: Vec<String>,
    selection: Selection,
    as_index: bool,
}

/// Runtime value of a (sub)expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Frame(Frame),
    Series(Series),
    GroupBy(GroupBy),
    Scalar(Cell),
    List(Vec<Cell>),
    FrameIndexer(Frame, IndexerKind),
    SeriesIndexer(Series, IndexerKind),
    StrAccessor(Series),
    Pandas,
    Builtin(Builtin),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Frame(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::Scalar(c) => c.type_name(),
            Value::List(_) => "list",
            Value::FrameIndexer(..) | Value::SeriesIndexer(..) => "indexer",
            Value::StrAccessor(_) => "StringMethods",
            Value::Pandas => "module",
            Value::Builtin(_) => "builtin_function",
        }
    }
}

pub struct Interpreter<'a> {
    frame: &'a Frame,
}

impl<'a> Interpreter<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        Self { frame }
    }

    pub fn eval(&self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(cell) => Ok(Value::Scalar(cell.clone())),
            Expr::Name(name) => self.resolve(name),
            Expr::List(items) | Expr::Tuple(items) => self.list(items),
            Expr::Slice { .. } => Err(ExecutionError::Unsupported(
                "slices are only valid inside []".to_string(),
            )),
            Expr::Attribute { target, name } => attribute(self.eval(target)?, name),
            Expr::Subscript { target, index } => {
                let target = self.eval(target)?;
                self.subscript(target, index)
            }
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs),
            Expr::Unary { op, operand } => unary(*op, self.eval(operand)?),
            Expr::Binary { op, left, right } => binary(*op, self.eval(left)?, self.eval(right)?),
            Expr::Compare { op, left, right } => {
                compare(*op, self.eval(left)?, self.eval(right)?)
            }
        }
    }

    fn resolve(&self, name: &str) -> EvalResult<Value> {
        Ok(match name {
            "df" => Value::Frame(self.frame.clone()),
            "pd" => Value::Pandas,
            "len" => Value::Builtin(Builtin::Len),
            "round" => Value::Builtin(Builtin::Round),
            "abs" => Value::Builtin(Builtin::Abs),
            "int" => Value::Builtin(Builtin::Int),
            "float" => Value::Builtin(Builtin::Float),
            "str" => Value::Builtin(Builtin::Str),
            other => return Err(ExecutionError::UnknownName(other.to_string())),
        })
    }

    fn list(&self, items: &[Expr]) -> EvalResult<Value> {
        let cells = items
            .iter()
            .map(|item| match self.eval(item)? {
                Value::Scalar(c) => Ok(c),
                other => Err(ExecutionError::TypeMismatch(format!(
                    "list items must be scalars, got {}",
                    other.kind()
                ))),
            })
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(Value::List(cells))
    }

    fn call(&self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> EvalResult<Value> {
        let args = Args {
            positional: args
                .iter()
                .map(|a| self.eval(a))
                .collect::<EvalResult<Vec<_>>>()?,
            keywords: kwargs
                .iter()
                .map(|(k, v)| Ok::<_, ExecutionError>((k.clone(), self.eval(v)?)))
                .collect::<EvalResult<Vec<_>>>()?,
        };

        match func {
            Expr::Attribute { target, name } => call_method(self.eval(target)?, name, &args),
            other => match self.eval(other)? {
                Value::Builtin(builtin) => call_builtin(builtin, &args),
                value => Err(ExecutionError::TypeMismatch(format!(
                    "'{}' object is not callable",
                    value.kind()
                ))),
            },
        }
    }

    fn subscript(&self, target: Value, index: &Expr) -> EvalResult<Value> {
        match target {
            Value::Frame(frame) => {
                if let Expr::Slice { start, stop } = index {
                    let positions = self.positional_slice(frame.n_rows(), start, stop)?;
                    return Ok(Value::Frame(frame.take(&positions)));
                }
                match self.eval(index)? {
                    Value::Scalar(Cell::Text(name)) => Ok(Value::Series(frame.series(&name)?)),
                    Value::List(names) => Ok(Value::Frame(frame.select(&texts(&names)?)?)),
                    Value::Series(mask) => Ok(Value::Frame(frame.filter(&mask.as_mask()?)?)),
                    Value::Scalar(other) => Err(ExecutionError::UnknownField {
                        field: other.to_string(),
                        available: frame.column_names().join(", "),
                    }),
                    other => Err(not_subscriptable("DataFrame", &other)),
                }
            }
            Value::Series(series) => {
                if let Expr::Slice { start, stop } = index {
                    let positions = self.positional_slice(series.len(), start, stop)?;
                    return Ok(Value::Series(series.take(&positions)));
                }
                match self.eval(index)? {
                    Value::Series(mask) => Ok(Value::Series(series.filter(&mask.as_mask()?)?)),
                    Value::Scalar(label) => series
                        .get(&label)
                        .map(Value::Scalar)
                        .ok_or_else(|| ExecutionError::IndexOutOfRange(label.to_string())),
                    Value::List(labels) => {
                        let positions = label_positions(&series.index, &labels)?;
                        Ok(Value::Series(series.take(&positions)))
                    }
                    other => Err(not_subscriptable("Series", &other)),
                }
            }
            Value::FrameIndexer(frame, kind) => self.frame_indexer(&frame, kind, index),
            Value::SeriesIndexer(series, kind) => {
                let rows = match kind {
                    IndexerKind::Loc => self.label_rows(&series.index, index)?,
                    IndexerKind::Iloc => self.position_rows(series.len(), index)?,
                };
                Ok(match rows {
                    Rows::Single(p) => Value::Scalar(series.values[p].clone()),
                    Rows::All => Value::Series(series),
                    Rows::Positions(ps) => Value::Series(series.take(&ps)),
                })
            }
            Value::GroupBy(mut group) => {
                group.selection = match self.eval(index)? {
                    Value::Scalar(Cell::Text(name)) => {
                        ensure_column(&group.frame, &name)?;
                        Selection::Column(name)
                    }
                    Value::List(names) => {
                        let names = texts(&names)?;
                        for name in &names {
                            ensure_column(&group.frame, name)?;
                        }
                        Selection::Columns(names)
                    }
                    other => return Err(not_subscriptable("DataFrameGroupBy", &other)),
                };
                Ok(Value::GroupBy(group))
            }
            Value::List(items) => {
                if let Expr::Slice { start, stop } = index {
                    let positions = self.positional_slice(items.len(), start, stop)?;
                    return Ok(Value::List(positions.iter().map(|&p| items[p].clone()).collect()));
                }
                let i = as_int(&self.eval(index)?, "list index")?;
                let p = normalize_position(i, items.len())?;
                Ok(Value::Scalar(items[p].clone()))
            }
            other => Err(ExecutionError::TypeMismatch(format!(
                "'{}' object is not subscriptable",
                other.kind()
            ))),
        }
    }

    fn frame_indexer(&self, frame: &Frame, kind: IndexerKind, index: &Expr) -> EvalResult<Value> {
        let (row_expr, col_expr) = match index {
            Expr::Tuple(items) if items.len() == 2 => (&items[0], Some(&items[1])),
            Expr::Tuple(items) => {
                return Err(ExecutionError::Unsupported(format!(
                    "indexer takes at most 2 dimensions, got {}",
                    items.len()
                )))
            }
            single => (single, None),
        };

        let rows = match kind {
            IndexerKind::Loc => self.label_rows(frame.index(), row_expr)?,
            IndexerKind::Iloc => self.position_rows(frame.n_rows(), row_expr)?,
        };
        let cols = match (kind, col_expr) {
            (_, None) => Cols::All,
            (IndexerKind::Loc, Some(expr)) => self.label_cols(frame, expr)?,
            (IndexerKind::Iloc, Some(expr)) => self.position_cols(frame, expr)?,
        };

        assemble(frame, rows, cols)
    }

    fn label_rows(&self, index: &[Cell], expr: &Expr) -> EvalResult<Rows> {
        if let Expr::Slice { start, stop } = expr {
            let find = |e: &Expr| -> EvalResult<usize> {
                let label = self.scalar(e)?;
                index
                    .iter()
                    .position(|l| cells_equal(l, &label))
                    .ok_or_else(|| ExecutionError::IndexOutOfRange(label.to_string()))
            };
            let first = start.as_deref().map(find).transpose()?.unwrap_or(0);
            let last = match stop.as_deref() {
                Some(e) => Some(find(e)?),
                None => index.len().checked_sub(1),
            };
            return Ok(match last {
                Some(last) if first <= last => Rows::Positions((first..=last).collect()),
                _ if start.is_none() && stop.is_none() => Rows::All,
                _ => Rows::Positions(Vec::new()),
            });
        }

        match self.eval(expr)? {
            Value::Series(mask) => {
                let mask = mask.as_mask()?;
                if mask.len() != index.len() {
                    return Err(ExecutionError::TypeMismatch(format!(
                        "mask of length {} does not match {} rows",
                        mask.len(),
                        index.len()
                    )));
                }
                Ok(Rows::Positions(
                    mask.iter()
                        .enumerate()
                        .filter(|(_, keep)| **keep)
                        .map(|(i, _)| i)
                        .collect(),
                ))
            }
            Value::List(labels) => Ok(Rows::Positions(label_positions(index, &labels)?)),
            Value::Scalar(label) => index
                .iter()
                .position(|l| cells_equal(l, &label))
                .map(Rows::Single)
                .ok_or_else(|| ExecutionError::IndexOutOfRange(label.to_string())),
            other => Err(not_subscriptable("loc", &other)),
        }
    }

    fn position_rows(&self, len: usize, expr: &Expr) -> EvalResult<Rows> {
        if let Expr::Slice { start, stop } = expr {
            if start.is_none() && stop.is_none() {
                return Ok(Rows::All);
            }
            return Ok(Rows::Positions(self.positional_slice(len, start, stop)?));
        }
        match self.eval(expr)? {
            Value::Scalar(Cell::Bool(_)) => Err(ExecutionError::TypeMismatch(
                "iloc expects integer positions".to_string(),
            )),
            Value::Scalar(cell) => {
                let i = as_int(&Value::Scalar(cell), "iloc position")?;
                Ok(Rows::Single(normalize_position(i, len)?))
            }
            Value::List(items) => Ok(Rows::Positions(
                items
                    .iter()
                    .map(|c| normalize_position(as_int(&Value::Scalar(c.clone()), "iloc position")?, len))
                    .collect::<EvalResult<Vec<_>>>()?,
            )),
            other => Err(not_subscriptable("iloc", &other)),
        }
    }

    fn label_cols(&self, frame: &Frame, expr: &Expr) -> EvalResult<Cols> {
        if let Expr::Slice { start: None, stop: None } = expr {
            return Ok(Cols::All);
        }
        match self.eval(expr)? {
            Value::Scalar(Cell::Text(name)) => {
                ensure_column(frame, &name)?;
                Ok(Cols::Single(name))
            }
            Value::List(names) => Ok(Cols::Many(texts(&names)?)),
            other => Err(not_subscriptable("loc columns", &other)),
        }
    }

    fn position_cols(&self, frame: &Frame, expr: &Expr) -> EvalResult<Cols> {
        let names = frame.column_names();
        if let Expr::Slice { start, stop } = expr {
            if start.is_none() && stop.is_none() {
                return Ok(Cols::All);
            }
            let positions = self.positional_slice(names.len(), start, stop)?;
            return Ok(Cols::Many(positions.iter().map(|&p| names[p].clone()).collect()));
        }
        match self.eval(expr)? {
            Value::List(items) => Ok(Cols::Many(
                items
                    .iter()
                    .map(|c| {
                        let i = as_int(&Value::Scalar(c.clone()), "iloc column")?;
                        Ok(names[normalize_position(i, names.len())?].clone())
                    })
                    .collect::<EvalResult<Vec<_>>>()?,
            )),
            value => {
                let i = as_int(&value, "iloc column")?;
                Ok(Cols::Single(names[normalize_position(i, names.len())?].clone()))
            }
        }
    }

    /// Python slice semantics: negative bounds count from the end, out-of-range clamps
    fn positional_slice(
        &self,
        len: usize,
        start: &Option<Box<Expr>>,
        stop: &Option<Box<Expr>>,
    ) -> EvalResult<Vec<usize>> {
        let bound = |e: &Option<Box<Expr>>, default: usize| -> EvalResult<usize> {
            match e.as_deref() {
                None => Ok(default),
                Some(expr) => {
                    let cell = self.scalar(expr)?;
                    if cell.is_null() {
                        return Ok(default);
                    }
                    let i = as_int(&Value::Scalar(cell), "slice bound")?;
                    Ok(if i < 0 {
                        len.saturating_sub(i.unsigned_abs() as usize)
                    } else {
                        (i as usize).min(len)
                    })
                }
            }
        };
        let first = bound(start, 0)?;
        let last = bound(stop, len)?;
        Ok((first..last.max(first)).collect())
    }

    fn scalar(&self, expr: &Expr) -> EvalResult<Cell> {
        match self.eval(expr)? {
            Value::Scalar(c) => Ok(c),
            other => Err(ExecutionError::TypeMismatch(format!(
                "expected a scalar, got {}",
                other.kind()
            ))),
        }
    }
}

enum Rows {
    All,
    Single(usize),
    Positions(Vec<usize>),
}

enum Cols {
    All,
    Single(String),
    Many(Vec<String>),
}

fn assemble(frame: &Frame, rows: Rows, cols: Cols) -> EvalResult<Value> {
    let selected = match &cols {
        Cols::All => frame.clone(),
        Cols::Single(name) => frame.select(std::slice::from_ref(name))?,
        Cols::Many(names) => frame.select(names)?,
    };

    Ok(match (rows, cols) {
        (Rows::Single(r), Cols::Single(_)) => Value::Scalar(selected.columns()[0].values[r].clone()),
        (Rows::Single(r), _) => Value::Series(selected.row(r)),
        (Rows::All, Cols::Single(name)) => Value::Series(selected.series(&name)?),
        (Rows::Positions(ps), Cols::Single(name)) => Value::Series(selected.take(&ps).series(&name)?),
        (Rows::All, _) => Value::Frame(selected),
        (Rows::Positions(ps), _) => Value::Frame(selected.take(&ps)),
    })
}

// =============================
// Arguments
// =============================

struct Args {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    fn get(&self, position: usize, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(position))
    }

    fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn require(&self, function: &str, position: usize, name: &str) -> EvalResult<&Value> {
        self.get(position, name).ok_or_else(|| ExecutionError::Arity {
            function: function.to_string(),
            expected: format!("argument '{}'", name),
        })
    }

    /// Reject extra positionals and unknown keywords
    fn check(&self, function: &str, names: &[&str]) -> EvalResult<()> {
        if self.positional.len() > names.len() {
            return Err(ExecutionError::Arity {
                function: function.to_string(),
                expected: format!("at most {} positional arguments", names.len()),
            });
        }
        if let Some((k, _)) = self.keywords.iter().find(|(k, _)| !names.contains(&k.as_str())) {
            return Err(ExecutionError::Unsupported(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, k
            )));
        }
        Ok(())
    }

    fn int_or(&self, function: &str, position: usize, name: &str, default: i64) -> EvalResult<i64> {
        match self.get(position, name) {
            Some(v) => as_int(v, &format!("{}() argument '{}'", function, name)),
            None => Ok(default),
        }
    }

    fn bool_or(&self, position: usize, name: &str, default: bool) -> EvalResult<bool> {
        match self.get(position, name) {
            Some(Value::Scalar(Cell::Bool(b))) => Ok(*b),
            Some(other) => Err(ExecutionError::TypeMismatch(format!(
                "'{}' must be True or False, got {}",
                name,
                other.kind()
            ))),
            None => Ok(default),
        }
    }
}

fn as_int(value: &Value, what: &str) -> EvalResult<i64> {
    match value {
        Value::Scalar(Cell::Int(i)) => Ok(*i),
        Value::Scalar(Cell::Bool(b)) => Ok(*b as i64),
        Value::Scalar(Cell::Float(f)) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        other => Err(ExecutionError::TypeMismatch(format!(
            "{} must be an integer, got {}",
            what,
            other.kind()
        ))),
    }
}

fn as_text(value: &Value, what: &str) -> EvalResult<String> {
    match value {
        Value::Scalar(Cell::Text(s)) => Ok(s.clone()),
        other => Err(ExecutionError::TypeMismatch(format!(
            "{} must be a string, got {}",
            what,
            other.kind()
        ))),
    }
}

/// A single column name or a list of them
fn as_names(value: &Value) -> EvalResult<Vec<String>> {
    match value {
        Value::Scalar(Cell::Text(s)) => Ok(vec![s.clone()]),
        Value::List(items) => texts(items),
        other => Err(ExecutionError::TypeMismatch(format!(
            "expected a column name or list of names, got {}",
            other.kind()
        ))),
    }
}

fn as_cells(value: &Value) -> EvalResult<Vec<Cell>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Series(s) => Ok(s.values.clone()),
        Value::Scalar(c) => Ok(vec![c.clone()]),
        other => Err(ExecutionError::TypeMismatch(format!(
            "expected a list of values, got {}",
            other.kind()
        ))),
    }
}

fn texts(cells: &[Cell]) -> EvalResult<Vec<String>> {
    cells
        .iter()
        .map(|c| match c {
            Cell::Text(s) => Ok(s.clone()),
            other => Err(ExecutionError::TypeMismatch(format!(
                "column names must be strings, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn ensure_column(frame: &Frame, name: &str) -> EvalResult<()> {
    if frame.has_column(name) {
        Ok(())
    } else {
        Err(ExecutionError::UnknownField {
            field: name.to_string(),
            available: frame.column_names().join(", "),
        })
    }
}

fn label_positions(index: &[Cell], labels: &[Cell]) -> EvalResult<Vec<usize>> {
    labels
        .iter()
        .map(|label| {
            index
                .iter()
                .position(|l| cells_equal(l, label))
                .ok_or_else(|| ExecutionError::IndexOutOfRange(label.to_string()))
        })
        .collect()
}

fn normalize_position(i: i64, len: usize) -> EvalResult<usize> {
    let p = if i < 0 { len as i64 + i } else { i };
    if p < 0 || p as usize >= len {
        return Err(ExecutionError::IndexOutOfRange(i.to_string()));
    }
    Ok(p as usize)
}

fn not_subscriptable(target: &str, index: &Value) -> ExecutionError {
    ExecutionError::TypeMismatch(format!("cannot index {} with {}", target, index.kind()))
}

// =============================
// Attributes and methods
// =============================

fn attribute(value: Value, name: &str) -> EvalResult<Value> {
    match value {
        Value::Frame(frame) => match name {
            "loc" => Ok(Value::FrameIndexer(frame, IndexerKind::Loc)),
            "iloc" => Ok(Value::FrameIndexer(frame, IndexerKind::Iloc)),
            "shape" => Ok(Value::List(vec![
                Cell::Int(frame.n_rows() as i64),
                Cell::Int(frame.n_cols() as i64),
            ])),
            "columns" => Ok(Value::List(
                frame.column_names().into_iter().map(Cell::Text).collect(),
            )),
            "empty" => Ok(Value::Scalar(Cell::Bool(frame.n_rows() == 0))),
            "size" => Ok(Value::Scalar(Cell::Int((frame.n_rows() * frame.n_cols()) as i64))),
            column if frame.has_column(column) => Ok(Value::Series(frame.series(column)?)),
            method if FRAME_METHODS.contains(&method) => Err(uncalled(method)),
            _ => Err(ExecutionError::UnknownAttribute {
                target: "DataFrame".to_string(),
                name: name.to_string(),
            }),
        },
        Value::Series(series) => match name {
            "loc" => Ok(Value::SeriesIndexer(series, IndexerKind::Loc)),
            "iloc" => Ok(Value::SeriesIndexer(series, IndexerKind::Iloc)),
            "str" => Ok(Value::StrAccessor(series)),
            "size" => Ok(Value::Scalar(Cell::Int(series.len() as i64))),
            "shape" => Ok(Value::List(vec![Cell::Int(series.len() as i64)])),
            "empty" => Ok(Value::Scalar(Cell::Bool(series.is_empty()))),
            "index" => Ok(Value::List(series.index)),
            "values" => Ok(Value::List(series.values)),
            "name" => Ok(Value::Scalar(series.name.map(Cell::Text).unwrap_or(Cell::Null))),
            method if SERIES_METHODS.contains(&method) => Err(uncalled(method)),
            _ => Err(ExecutionError::UnknownAttribute {
                target: "Series".to_string(),
                name: name.to_string(),
            }),
        },
        Value::GroupBy(mut group) if group.frame.has_column(name) => {
            group.selection = Selection::Column(name.to_string());
            Ok(Value::GroupBy(group))
        }
        Value::Pandas => match name {
            "isna" | "isnull" | "notna" | "notnull" => Err(uncalled(name)),
            _ => Err(ExecutionError::UnknownAttribute {
                target: "pd".to_string(),
                name: name.to_string(),
            }),
        },
        other => Err(ExecutionError::UnknownAttribute {
            target: other.kind().to_string(),
            name: name.to_string(),
        }),
    }
}

fn uncalled(method: &str) -> ExecutionError {
    ExecutionError::Unsupported(format!("method '{}' must be called", method))
}

fn call_method(receiver: Value, name: &str, args: &Args) -> EvalResult<Value> {
    match receiver {
        Value::Frame(frame) => frame_method(frame, name, args),
        Value::Series(series) => series_method(series, name, args),
        Value::GroupBy(group) => groupby_method(group, name, args),
        Value::StrAccessor(series) => str_method(series, name, args),
        Value::Pandas => pandas_function(name, args),
        Value::Scalar(cell) => match name {
            "round" => {
                args.check("round", &["decimals"])?;
                let decimals = args.int_or("round", 0, "decimals", 0)?;
                Ok(Value::Scalar(round_cell(&cell, Some(decimals))?))
            }
            "item" => Ok(Value::Scalar(cell)),
            _ => Err(ExecutionError::UnknownAttribute {
                target: cell.type_name().to_string(),
                name: name.to_string(),
            }),
        },
        Value::List(items) => match name {
            "tolist" | "to_list" => Ok(Value::List(items)),
            _ => Err(ExecutionError::UnknownAttribute {
                target: "list".to_string(),
                name: name.to_string(),
            }),
        },
        other => Err(ExecutionError::UnknownAttribute {
            target: other.kind().to_string(),
            name: name.to_string(),
        }),
    }
}

fn frame_method(frame: Frame, name: &str, args: &Args) -> EvalResult<Value> {
    if let Some(agg) = Agg::from_name(name) {
        args.check(name, &["numeric_only"])?;
        return Ok(Value::Series(frame.reduce(agg)?));
    }

    match name {
        "head" | "tail" => {
            args.check(name, &["n"])?;
            let n = args.int_or(name, 0, "n", 5)?;
            Ok(Value::Frame(if name == "head" {
                frame.head(n)
            } else {
                frame.tail(n)
            }))
        }
        "sort_values" => {
            args.check(name, &["by", "ascending"])?;
            let by = as_names(args.require(name, 0, "by")?)?;
            let ascending = match args.get(1, "ascending") {
                None => vec![true],
                Some(Value::Scalar(Cell::Bool(b))) => vec![*b],
                Some(Value::List(flags)) => flags.iter().map(|c| c.is_true()).collect(),
                Some(other) => {
                    return Err(ExecutionError::TypeMismatch(format!(
                        "'ascending' must be a bool or list of bools, got {}",
                        other.kind()
                    )))
                }
            };
            Ok(Value::Frame(frame.sort_by(&by, &ascending)?))
        }
        "nlargest" | "nsmallest" => {
            args.check(name, &["n", "columns"])?;
            let n = args.int_or(name, 0, "n", 5)?;
            let columns = as_names(args.require(name, 1, "columns")?)?;
            let largest = name == "nlargest";
            Ok(Value::Frame(
                frame
                    .sort_by(&columns, &[!largest])?
                    .head(n),
            ))
        }
        "groupby" => {
            args.check(name, &["by", "as_index", "sort"])?;
            let keys = as_names(args.require(name, 0, "by")?)?;
            for key in &keys {
                ensure_column(&frame, key)?;
            }
            let as_index = args.bool_or(usize::MAX, "as_index", true)?;
            Ok(Value::GroupBy(GroupBy {
                frame,
                keys,
                selection: Selection::All,
                as_index,
            }))
        }
        "drop_duplicates" => {
            args.check(name, &["subset"])?;
            let subset = args.get(0, "subset").map(as_names).transpose()?;
            Ok(Value::Frame(frame.drop_duplicates(subset.as_deref())?))
        }
        "dropna" => {
            args.check(name, &[])?;
            Ok(Value::Frame(frame.dropna()))
        }
        "reset_index" => {
            args.check(name, &["drop"])?;
            Ok(Value::Frame(frame.reset_index()))
        }
        "copy" => Ok(Value::Frame(frame)),
        _ => Err(ExecutionError::UnknownAttribute {
            target: "DataFrame".to_string(),
            name: name.to_string(),
        }),
    }
}

fn series_method(series: Series, name: &str, args: &Args) -> EvalResult<Value> {
    if let Some(agg) = Agg::from_name(name) {
        args.check(name, &["skipna"])?;
        return Ok(Value::Scalar(series.reduce(agg)?));
    }

    match name {
        "idxmax" | "idxmin" => {
            args.check(name, &[])?;
            Ok(Value::Scalar(series.idx_extreme(name == "idxmax")?))
        }
        "value_counts" => {
            args.check(name, &["normalize"])?;
            let counts = series.value_counts();
            if args.bool_or(0, "normalize", false)? {
                let total: i64 = counts
                    .values
                    .iter()
                    .filter_map(|c| match c {
                        Cell::Int(n) => Some(*n),
                        _ => None,
                    })
                    .sum();
                let shares = counts.map(|c| {
                    Ok(match (c, total) {
                        (Cell::Int(n), t) if t > 0 => Cell::Float(*n as f64 / t as f64),
                        _ => Cell::Null,
                    })
                })?;
                return Ok(Value::Series(Series {
                    name: Some("proportion".to_string()),
                    ..shares
                }));
            }
            Ok(Value::Series(counts))
        }
        "unique" => Ok(Value::List(series.unique())),
        "tolist" | "to_list" => Ok(Value::List(series.values)),
        "head" | "tail" => {
            args.check(name, &["n"])?;
            let n = args.int_or(name, 0, "n", 5)?;
            Ok(Value::Series(if name == "head" {
                series.head(n)
            } else {
                series.tail(n)
            }))
        }
        "sort_values" => {
            args.check(name, &["ascending"])?;
            Ok(Value::Series(series.sort(args.bool_or(0, "ascending", true)?)))
        }
        "nlargest" | "nsmallest" => {
            args.check(name, &["n"])?;
            let n = args.int_or(name, 0, "n", 5)?;
            Ok(Value::Series(series.nlargest(n, name == "nlargest")))
        }
        "round" => {
            args.check(name, &["decimals"])?;
            let decimals = args.int_or(name, 0, "decimals", 0)?;
            Ok(Value::Series(series.map(|c| round_cell(c, Some(decimals)))?))
        }
        "abs" => Ok(Value::Series(series.map(abs_cell)?)),
        "isin" => {
            args.check(name, &["values"])?;
            let values = as_cells(args.require(name, 0, "values")?)?;
            Ok(Value::Series(series.map(|c| {
                Ok(Cell::Bool(values.iter().any(|v| cells_equal(v, c))))
            })?))
        }
        "between" => {
            args.check(name, &["left", "right", "inclusive"])?;
            let low = scalar_arg(args.require(name, 0, "left")?)?;
            let high = scalar_arg(args.require(name, 1, "right")?)?;
            let inclusive = match args.get(2, "inclusive") {
                Some(v) => as_text(v, "'inclusive'")?,
                None => "both".to_string(),
            };
            let (low_ok, high_ok): (&[Ordering], &[Ordering]) = match inclusive.as_str() {
                "both" => (&[Ordering::Greater, Ordering::Equal], &[Ordering::Less, Ordering::Equal]),
                "neither" => (&[Ordering::Greater], &[Ordering::Less]),
                "left" => (&[Ordering::Greater, Ordering::Equal], &[Ordering::Less]),
                "right" => (&[Ordering::Greater], &[Ordering::Less, Ordering::Equal]),
                other => {
                    return Err(ExecutionError::Unsupported(format!(
                        "inclusive='{}'",
                        other
                    )))
                }
            };
            Ok(Value::Series(series.map(|c| {
                if c.is_null() {
                    return Ok(Cell::Bool(false));
                }
                let lo = order(c, &low, ">=")?;
                let hi = order(c, &high, "<=")?;
                Ok(Cell::Bool(low_ok.contains(&lo) && high_ok.contains(&hi)))
            })?))
        }
        "isna" | "isnull" => Ok(Value::Series(series.map(|c| Ok(Cell::Bool(c.is_null())))?)),
        "notna" | "notnull" => Ok(Value::Series(series.map(|c| Ok(Cell::Bool(!c.is_null())))?)),
        "fillna" => {
            args.check(name, &["value"])?;
            let fill = scalar_arg(args.require(name, 0, "value")?)?;
            Ok(Value::Series(series.map(|c| {
                Ok(if c.is_null() { fill.clone() } else { c.clone() })
            })?))
        }
        "dropna" => {
            let mask: Vec<bool> = series.values.iter().map(|c| !c.is_null()).collect();
            Ok(Value::Series(series.filter(&mask)?))
        }
        "copy" => Ok(Value::Series(series)),
        _ => Err(ExecutionError::UnknownAttribute {
            target: "Series".to_string(),
            name: name.to_string(),
        }),
    }
}

fn scalar_arg(value: &Value) -> EvalResult<Cell> {
    match value {
        Value::Scalar(c) => Ok(c.clone()),
        other => Err(ExecutionError::TypeMismatch(format!(
            "expected a scalar argument, got {}",
            other.kind()
        ))),
    }
}

// =============================
// GroupBy
// =============================

fn groupby_method(group: GroupBy, name: &str, args: &Args) -> EvalResult<Value> {
    match name {
        "size" => {
            args.check(name, &[])?;
            group_size(&group)
        }
        "agg" | "aggregate" => {
            args.check(name, &["func"])?;
            match args.require(name, 0, "func")? {
                Value::Scalar(Cell::Text(func)) => {
                    let agg = Agg::from_name(func).ok_or_else(|| {
                        ExecutionError::Unsupported(format!("aggregation '{}'", func))
                    })?;
                    group_reduce(&group, agg)
                }
                other => Err(ExecutionError::Unsupported(format!(
                    "agg() with {} argument; pass a single aggregation name",
                    other.kind()
                ))),
            }
        }
        _ => match Agg::from_name(name) {
            Some(agg) => {
                args.check(name, &["numeric_only"])?;
                group_reduce(&group, agg)
            }
            None => Err(ExecutionError::UnknownAttribute {
                target: "DataFrameGroupBy".to_string(),
                name: name.to_string(),
            }),
        },
    }
}

fn group_label(key: &[Cell]) -> Cell {
    if key.len() == 1 {
        return key[0].clone();
    }
    Cell::Text(format!(
        "({})",
        key.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
    ))
}

fn key_columns(group: &GroupBy, groups: &[(Vec<Cell>, Vec<usize>)]) -> Vec<Column> {
    group
        .keys
        .iter()
        .enumerate()
        .map(|(i, key)| Column::new(key.clone(), groups.iter().map(|(k, _)| k[i].clone()).collect()))
        .collect()
}

fn group_size(group: &GroupBy) -> EvalResult<Value> {
    let groups = group.frame.group_positions(&group.keys)?;
    let counts: Vec<Cell> = groups.iter().map(|(_, rows)| Cell::Int(rows.len() as i64)).collect();

    if !group.as_index {
        let mut columns = key_columns(group, &groups);
        columns.push(Column::new("size", counts));
        return Ok(Value::Frame(Frame::new(columns)?));
    }
    Ok(Value::Series(Series::new(
        None,
        groups.iter().map(|(k, _)| group_label(k)).collect(),
        counts,
    )))
}

fn group_reduce(group: &GroupBy, agg: Agg) -> EvalResult<Value> {
    let groups = group.frame.group_positions(&group.keys)?;

    let aggregate = |column: &Column| -> EvalResult<Vec<Cell>> {
        groups
            .iter()
            .map(|(_, rows)| {
                let values: Vec<Cell> = rows.iter().map(|&r| column.values[r].clone()).collect();
                agg.apply(&values)
            })
            .collect()
    };

    if let (Selection::Column(name), true) = (&group.selection, group.as_index) {
        let column = group
            .frame
            .column(name)
            .ok_or_else(|| ExecutionError::UnknownField {
                field: name.clone(),
                available: group.frame.column_names().join(", "),
            })?;
        return Ok(Value::Series(Series::new(
            Some(name.clone()),
            groups.iter().map(|(k, _)| group_label(k)).collect(),
            aggregate(column)?,
        )));
    }

    let targets: Vec<&Column> = match &group.selection {
        Selection::Column(name) => vec![group
            .frame
            .column(name)
            .ok_or_else(|| ExecutionError::UnknownField {
                field: name.clone(),
                available: group.frame.column_names().join(", "),
            })?],
        Selection::Columns(names) => names
            .iter()
            .filter_map(|n| group.frame.column(n))
            .collect(),
        Selection::All => group
            .frame
            .columns()
            .iter()
            .filter(|c| !group.keys.contains(&c.name))
            .filter(|c| {
                !agg.numeric_only()
                    || c.values.iter().filter(|v| !v.is_null()).all(|v| v.is_numeric())
            })
            .collect(),
    };

    let mut columns = key_columns(group, &groups);
    for column in targets {
        columns.push(Column::new(column.name.clone(), aggregate(column)?));
    }
    Ok(Value::Frame(Frame::new(columns)?))
}

// =============================
// String accessor and namespace
// =============================

fn str_method(series: Series, name: &str, args: &Args) -> EvalResult<Value> {
    let text_map = |f: &dyn Fn(&str) -> Cell| -> EvalResult<Value> {
        Ok(Value::Series(series.map(|c| {
            Ok(match c {
                Cell::Text(s) => f(s),
                _ => Cell::Null,
            })
        })?))
    };

    match name {
        "contains" => {
            args.check("str.contains", &["pat", "case", "na", "regex"])?;
            let pattern = as_text(args.require("str.contains", 0, "pat")?, "pattern")?;
            let case = args.bool_or(1, "case", true)?;
            let use_regex = args.bool_or(usize::MAX, "regex", true)?;
            let na = match args.keyword("na") {
                Some(v) => scalar_arg(v)?,
                None => Cell::Null,
            };

            let matcher: Box<dyn Fn(&str) -> bool> = if use_regex {
                let re = RegexBuilder::new(&pattern)
                    .case_insensitive(!case)
                    .build()
                    .map_err(|e| ExecutionError::TypeMismatch(format!("invalid pattern: {}", e)))?;
                Box::new(move |s: &str| re.is_match(s))
            } else if case {
                Box::new(move |s: &str| s.contains(pattern.as_str()))
            } else {
                let lowered = pattern.to_lowercase();
                Box::new(move |s: &str| s.to_lowercase().contains(lowered.as_str()))
            };

            Ok(Value::Series(series.map(|c| {
                Ok(match c {
                    Cell::Text(s) => Cell::Bool(matcher(s)),
                    _ => na.clone(),
                })
            })?))
        }
        "startswith" | "endswith" => {
            args.check(name, &["pat"])?;
            let pattern = as_text(args.require(name, 0, "pat")?, "pattern")?;
            let starts = name == "startswith";
            text_map(&|s| {
                Cell::Bool(if starts {
                    s.starts_with(pattern.as_str())
                } else {
                    s.ends_with(pattern.as_str())
                })
            })
        }
        "lower" => text_map(&|s| Cell::Text(s.to_lowercase())),
        "upper" => text_map(&|s| Cell::Text(s.to_uppercase())),
        "strip" => text_map(&|s| Cell::Text(s.trim().to_string())),
        "len" => text_map(&|s| Cell::Int(s.chars().count() as i64)),
        _ => Err(ExecutionError::UnknownAttribute {
            target: "StringMethods".to_string(),
            name: name.to_string(),
        }),
    }
}

fn pandas_function(name: &str, args: &Args) -> EvalResult<Value> {
    let missing = match name {
        "isna" | "isnull" => true,
        "notna" | "notnull" => false,
        _ => {
            return Err(ExecutionError::UnknownAttribute {
                target: "pd".to_string(),
                name: name.to_string(),
            })
        }
    };
    args.check(name, &["obj"])?;
    let flag = move |c: &Cell| Cell::Bool(c.is_null() == missing);
    match args.require(name, 0, "obj")? {
        Value::Scalar(c) => Ok(Value::Scalar(flag(c))),
        Value::Series(s) => Ok(Value::Series(s.map(|c| Ok(flag(c)))?)),
        other => Err(ExecutionError::TypeMismatch(format!(
            "pd.{}() does not accept {}",
            name,
            other.kind()
        ))),
    }
}

fn call_builtin(builtin: Builtin, args: &Args) -> EvalResult<Value> {
    let function = match builtin {
        Builtin::Len => "len",
        Builtin::Round => "round",
        Builtin::Abs => "abs",
        Builtin::Int => "int",
        Builtin::Float => "float",
        Builtin::Str => "str",
    };
    if builtin == Builtin::Round {
        args.check(function, &["number", "ndigits"])?;
    } else {
        args.check(function, &["x"])?;
    }
    let arg = args.require(function, 0, "x").or_else(|_| args.require(function, 0, "number"))?;

    match (builtin, arg) {
        (Builtin::Len, Value::Frame(f)) => Ok(Value::Scalar(Cell::Int(f.n_rows() as i64))),
        (Builtin::Len, Value::Series(s)) => Ok(Value::Scalar(Cell::Int(s.len() as i64))),
        (Builtin::Len, Value::List(items)) => Ok(Value::Scalar(Cell::Int(items.len() as i64))),
        (Builtin::Len, Value::Scalar(Cell::Text(s))) => {
            Ok(Value::Scalar(Cell::Int(s.chars().count() as i64)))
        }
        (Builtin::Len, Value::GroupBy(g)) => Ok(Value::Scalar(Cell::Int(
            g.frame.group_positions(&g.keys)?.len() as i64,
        ))),
        (Builtin::Round, value) => {
            let ndigits = match args.get(1, "ndigits") {
                None | Some(Value::Scalar(Cell::Null)) => None,
                Some(v) => Some(as_int(v, "round() ndigits")?),
            };
            match value {
                Value::Scalar(c) => Ok(Value::Scalar(round_builtin(c, ndigits)?)),
                Value::Series(s) => Ok(Value::Series(
                    s.map(|c| round_cell(c, Some(ndigits.unwrap_or(0))))?,
                )),
                other => Err(bad_builtin_arg(function, other)),
            }
        }
        (Builtin::Abs, Value::Scalar(c)) => Ok(Value::Scalar(abs_cell(c)?)),
        (Builtin::Abs, Value::Series(s)) => Ok(Value::Series(s.map(abs_cell)?)),
        (Builtin::Int, Value::Scalar(c)) => Ok(Value::Scalar(match c {
            Cell::Int(i) => Cell::Int(*i),
            Cell::Bool(b) => Cell::Int(*b as i64),
            Cell::Float(f) if f.is_finite() => Cell::Int(f.trunc() as i64),
            Cell::Text(s) => Cell::Int(s.trim().parse().map_err(|_| {
                ExecutionError::TypeMismatch(format!("invalid literal for int(): '{}'", s))
            })?),
            other => return Err(bad_builtin_arg(function, &Value::Scalar(other.clone()))),
        })),
        (Builtin::Float, Value::Scalar(c)) => Ok(Value::Scalar(match c {
            Cell::Text(s) => Cell::Float(s.trim().parse().map_err(|_| {
                ExecutionError::TypeMismatch(format!("could not convert string to float: '{}'", s))
            })?),
            Cell::Null => Cell::Float(f64::NAN),
            other => Cell::Float(other.as_f64().unwrap_or(f64::NAN)),
        })),
        (Builtin::Str, Value::Scalar(c)) => Ok(Value::Scalar(Cell::Text(match c {
            Cell::Null => "None".to_string(),
            other => other.to_string(),
        }))),
        (_, other) => Err(bad_builtin_arg(function, other)),
    }
}

fn bad_builtin_arg(function: &str, value: &Value) -> ExecutionError {
    ExecutionError::TypeMismatch(format!("{}() does not accept {}", function, value.kind()))
}

// =============================
// Operators
// =============================

fn unary(op: UnaryOp, value: Value) -> EvalResult<Value> {
    let apply = |c: &Cell| -> EvalResult<Cell> {
        if c.is_null() {
            return Ok(Cell::Null);
        }
        match (op, c) {
            (UnaryOp::Pos, c) if c.is_numeric() => Ok(c.clone()),
            (UnaryOp::Neg, Cell::Int(i)) => Ok(i
                .checked_neg()
                .map(Cell::Int)
                .unwrap_or(Cell::Float(-(*i as f64)))),
            (UnaryOp::Neg, Cell::Bool(b)) => Ok(Cell::Int(-(*b as i64))),
            (UnaryOp::Neg, Cell::Float(f)) => Ok(Cell::Float(-f)),
            (UnaryOp::Invert, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
            (UnaryOp::Invert, Cell::Int(i)) => Ok(Cell::Int(!i)),
            (_, other) => Err(ExecutionError::TypeMismatch(format!(
                "bad operand type for unary operator: {}",
                other.type_name()
            ))),
        }
    };

    match value {
        Value::Scalar(c) => Ok(Value::Scalar(apply(&c)?)),
        Value::Series(s) => Ok(Value::Series(s.map(apply)?)),
        other => Err(ExecutionError::TypeMismatch(format!(
            "bad operand type for unary operator: {}",
            other.kind()
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(arith(op, &a, &b)?)),
        (Value::Series(s), Value::Scalar(b)) => Ok(Value::Series(s.map(|a| arith(op, a, &b))?)),
        (Value::Scalar(a), Value::Series(s)) => Ok(Value::Series(s.map(|b| arith(op, &a, b))?)),
        (Value::Series(a), Value::Series(b)) => {
            Ok(Value::Series(a.zip_with(&b, |x, y| arith(op, x, y))?))
        }
        (l, r) => Err(ExecutionError::TypeMismatch(format!(
            "unsupported operand types for {:?}: '{}' and '{}'",
            op,
            l.kind(),
            r.kind()
        ))),
    }
}

fn int_like(c: &Cell) -> Option<i64> {
    match c {
        Cell::Int(i) => Some(*i),
        Cell::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn arith(op: BinaryOp, a: &Cell, b: &Cell) -> EvalResult<Cell> {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        return logical(op, a, b);
    }
    if a.is_null() || b.is_null() {
        return Ok(Cell::Null);
    }

    if let (Cell::Text(x), Cell::Text(y), BinaryOp::Add) = (a, b, op) {
        return Ok(Cell::Text(format!("{}{}", x, y)));
    }

    if let (Some(x), Some(y)) = (int_like(a), int_like(b)) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::FloorDiv if y == 0 => return Ok(Cell::Null),
            BinaryOp::FloorDiv => floor_div(x, y),
            BinaryOp::Mod if y == 0 => return Ok(Cell::Null),
            BinaryOp::Mod => floor_mod(x, y),
            BinaryOp::Pow if (0..=u32::MAX as i64).contains(&y) => x.checked_pow(y as u32),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Cell::Int(v));
        }
    }

    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(ExecutionError::TypeMismatch(format!(
                "unsupported operand types for {:?}: '{}' and '{}'",
                op,
                a.type_name(),
                b.type_name()
            )))
        }
    };

    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if y == 0.0 => return Ok(Cell::Null),
        BinaryOp::Div => x / y,
        BinaryOp::FloorDiv => (x / y).floor(),
        BinaryOp::Mod => x - y * (x / y).floor(),
        BinaryOp::Pow => x.powf(y),
        BinaryOp::And | BinaryOp::Or => return logical(op, a, b),
    };
    Ok(Cell::Float(value))
}

/// `None` on overflow; the caller falls back to float arithmetic
fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder carrying the divisor's sign
fn floor_mod(x: i64, y: i64) -> Option<i64> {
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        r.checked_add(y)
    } else {
        Some(r)
    }
}

fn logical(op: BinaryOp, a: &Cell, b: &Cell) -> EvalResult<Cell> {
    let truth = |c: &Cell| -> Option<bool> {
        match c {
            Cell::Bool(v) => Some(*v),
            c if c.is_null() => Some(false),
            _ => None,
        }
    };
    match (truth(a), truth(b)) {
        (Some(x), Some(y)) => Ok(Cell::Bool(if op == BinaryOp::And { x && y } else { x || y })),
        _ => match (int_like(a), int_like(b)) {
            (Some(x), Some(y)) => Ok(Cell::Int(if op == BinaryOp::And { x & y } else { x | y })),
            _ => Err(ExecutionError::TypeMismatch(format!(
                "'&' and '|' need boolean operands, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn compare(op: CompareOp, left: Value, right: Value) -> EvalResult<Value> {
    let test = |a: &Cell, b: &Cell| -> EvalResult<Cell> { Ok(Cell::Bool(compare_cells(op, a, b)?)) };
    match (left, right) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(test(&a, &b)?)),
        (Value::Series(s), Value::Scalar(b)) => Ok(Value::Series(s.map(|a| test(a, &b))?)),
        (Value::Scalar(a), Value::Series(s)) => Ok(Value::Series(s.map(|b| test(&a, b))?)),
        (Value::Series(a), Value::Series(b)) => Ok(Value::Series(a.zip_with(&b, test)?)),
        (l, r) => Err(ExecutionError::TypeMismatch(format!(
            "'{}' not supported between '{}' and '{}'",
            op.symbol(),
            l.kind(),
            r.kind()
        ))),
    }
}

fn compare_cells(op: CompareOp, a: &Cell, b: &Cell) -> EvalResult<bool> {
    match op {
        CompareOp::Eq => return Ok(cells_equal(a, b)),
        CompareOp::Ne => return Ok(!cells_equal(a, b)),
        _ => {}
    }
    if a.is_null() || b.is_null() {
        return Ok(false);
    }
    let ordering = order(a, b, op.symbol())?;
    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

fn order(a: &Cell, b: &Cell, symbol: &str) -> EvalResult<Ordering> {
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => Err(ExecutionError::TypeMismatch(format!(
                "'{}' not supported between {} and {}",
                symbol,
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

// =============================
// Rounding
// =============================

fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}

fn round_to(x: f64, digits: i64) -> f64 {
    let digits = digits.clamp(-308, 308) as i32;
    if digits >= 0 {
        let factor = 10f64.powi(digits);
        round_half_even(x * factor) / factor
    } else {
        let factor = 10f64.powi(-digits);
        round_half_even(x / factor) * factor
    }
}

/// Element-wise rounding; integers pass through unchanged
fn round_cell(c: &Cell, digits: Option<i64>) -> EvalResult<Cell> {
    match c {
        Cell::Float(f) => Ok(Cell::Float(round_to(*f, digits.unwrap_or(0)))),
        Cell::Int(_) | Cell::Bool(_) | Cell::Null => Ok(c.clone()),
        other => Err(ExecutionError::TypeMismatch(format!(
            "cannot round {} values",
            other.type_name()
        ))),
    }
}

/// Python `round()`: without ndigits the result is an integer
fn round_builtin(c: &Cell, ndigits: Option<i64>) -> EvalResult<Cell> {
    match (c, ndigits) {
        (Cell::Float(f), None) if f.is_finite() => Ok(Cell::Int(round_half_even(*f) as i64)),
        (Cell::Null, _) => Ok(Cell::Null),
        _ => round_cell(c, ndigits),
    }
}

fn abs_cell(c: &Cell) -> EvalResult<Cell> {
    match c {
        Cell::Int(i) => Ok(Cell::Int(i.saturating_abs())),
        Cell::Float(f) => Ok(Cell::Float(f.abs())),
        Cell::Bool(b) => Ok(Cell::Int(*b as i64)),
        Cell::Null => Ok(Cell::Null),
        other => Err(ExecutionError::TypeMismatch(format!(
            "bad operand type for abs(): {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fallback_frame;
    use crate::execution::parser::parse;

    fn eval(source: &str) -> EvalResult<Value> {
        let frame = fallback_frame();
        let expr = parse(source)?;
        Interpreter::new(&frame).eval(&expr)
    }

    fn scalar(source: &str) -> Cell {
        match eval(source).unwrap() {
            Value::Scalar(c) => c,
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_column_mean() {
        assert_eq!(scalar("df['Salary'].mean()"), Cell::Float(72500.0));
        assert_eq!(scalar("df.Salary.max()"), Cell::Int(90000));
    }

    #[test]
    fn test_filter_then_count() {
        assert_eq!(scalar("len(df[df['Salary'] > 70000])"), Cell::Int(5));
        assert_eq!(
            scalar("df[(df['Department'] == 'IT') & (df['Experience'] >= 5)]['Salary'].sum()"),
            Cell::Int(175000)
        );
    }

    #[test]
    fn test_idxmax_through_loc() {
        assert_eq!(
            scalar("df.loc[df['Performance'].idxmax(), 'EmployeeID']"),
            Cell::Text("Employee_6".to_string())
        );
    }

    #[test]
    fn test_groupby_column_mean() {
        let Value::Series(series) = eval("df.groupby('Department')['Salary'].mean()").unwrap() else {
            panic!("expected series");
        };
        assert_eq!(series.get(&Cell::Text("IT".to_string())), Some(Cell::Float(87500.0)));
        assert_eq!(series.index[0], Cell::Text("Finance".to_string()));
    }

    #[test]
    fn test_groupby_frame_keeps_keys() {
        let Value::Frame(frame) = eval("df.groupby('Department').mean()").unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(
            frame.column_names(),
            vec!["Department", "Salary", "Experience", "Performance"]
        );
        assert_eq!(frame.n_rows(), 5);
    }

    #[test]
    fn test_groupby_size_and_agg() {
        let Value::Series(sizes) = eval("df.groupby('Department').size()").unwrap() else {
            panic!("expected series");
        };
        assert!(sizes.values.iter().all(|c| *c == Cell::Int(2)));

        let Value::Series(maxes) = eval("df.groupby('Department')['Experience'].agg('max')").unwrap() else {
            panic!("expected series");
        };
        assert_eq!(maxes.get(&Cell::Text("Finance".to_string())), Some(Cell::Int(8)));
    }

    #[test]
    fn test_sort_and_head() {
        let Value::Frame(top) = eval("df.sort_values('Salary', ascending=False).head(3)").unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(top.series("Salary").unwrap().values[0], Cell::Int(90000));
        assert_eq!(top.n_rows(), 3);

        let Value::Frame(nl) = eval("df.nlargest(2, 'Experience')").unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(nl.series("Experience").unwrap().values, vec![Cell::Int(8), Cell::Int(7)]);
    }

    #[test]
    fn test_string_accessor() {
        assert_eq!(
            scalar("df[df['Department'].str.contains('market', case=False)].shape[0]"),
            Cell::Int(2)
        );
        assert_eq!(
            scalar("df['Department'].str.startswith('H').sum()"),
            Cell::Int(2)
        );
    }

    #[test]
    fn test_isin_between_and_value_counts() {
        assert_eq!(scalar("df['Department'].isin(['IT', 'HR']).sum()"), Cell::Int(4));
        assert_eq!(scalar("df['Experience'].between(3, 5).sum()"), Cell::Int(6));
        let Value::Series(counts) = eval("df['Department'].value_counts()").unwrap() else {
            panic!("expected series");
        };
        assert_eq!(counts.len(), 5);
    }

    #[test]
    fn test_round_matches_python() {
        assert_eq!(scalar("round(df['Performance'].mean(), 2)"), Cell::Float(4.08));
        assert_eq!(scalar("round(2.5)"), Cell::Int(2));
        assert_eq!(scalar("df['Salary'].mean().round(1)"), Cell::Float(72500.0));
    }

    #[test]
    fn test_iloc_and_shape() {
        assert_eq!(scalar("df.iloc[-1]['Salary']"), Cell::Int(78000));
        assert_eq!(scalar("df.shape[1]"), Cell::Int(5));
        assert_eq!(scalar("df.iloc[0, 1]"), Cell::Text("IT".to_string()));
    }

    #[test]
    fn test_pandas_namespace_is_restricted() {
        assert_eq!(scalar("pd.isna(df['Salary']).sum()"), Cell::Int(0));
        assert!(matches!(
            eval("pd.read_csv('x.csv')"),
            Err(ExecutionError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert_eq!(
            eval("globals()").unwrap_err(),
            ExecutionError::UnknownName("globals".to_string())
        );
        assert!(matches!(
            eval("df['Salry'].mean()"),
            Err(ExecutionError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        assert!(matches!(
            eval("df['Department'] > 5"),
            Err(ExecutionError::TypeMismatch(_))
        ));
        assert!(matches!(
            eval("df['Department'].mean()"),
            Err(ExecutionError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_arithmetic_between_columns() {
        let Value::Series(per_year) = eval("df['Salary'] / df['Experience']").unwrap() else {
            panic!("expected series");
        };
        assert_eq!(per_year.values[0], Cell::Float(17000.0));
        assert_eq!(scalar("7 // -2"), Cell::Int(-4));
        assert_eq!(scalar("-7 % 3"), Cell::Int(2));
    }

    #[test]
    fn test_integer_division_overflow_falls_back_to_float() {
        assert_eq!(
            scalar("(-9223372036854775807-1) // -1"),
            Cell::Float(9223372036854775808.0)
        );
        assert_eq!(scalar("(-9223372036854775807-1) % -1"), Cell::Float(0.0));
        assert_eq!(scalar("9223372036854775807 % -2"), Cell::Int(-1));
        assert!(eval("(df['Salary'] - 9223372036854775807 - 85001) // -1").is_ok());
    }

    #[test]
    fn test_uncalled_method() {
        assert!(matches!(
            eval("df['Salary'].mean"),
            Err(ExecutionError::Unsupported(_))
        ));
    }
}
