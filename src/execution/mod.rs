//! Execution engine for generated expressions
//!
//! Parses the expression into the restricted grammar, evaluates it against
//! the dataset, and shapes whatever comes out into a `QueryResult`.
//! Failures are returned as `ExecutionError`, never raised further.

pub mod eval;
pub mod lexer;
pub mod parser;

use crate::dataset::Dataset;
use crate::error::ExecutionError;
use crate::models::QueryResult;
use eval::{Interpreter, Value};
use serde_json::Value as Json;
use tracing::debug;

/// Maximum rows returned for record-set results
pub const MAX_RESULT_ROWS: usize = 100;

pub struct ExecutionEngine {
    max_rows: usize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self {
            max_rows: MAX_RESULT_ROWS,
        }
    }

    pub fn execute(&self, expression: &str, dataset: &Dataset) -> Result<QueryResult, ExecutionError> {
        let expr = parser::parse(expression)?;
        let value = Interpreter::new(dataset.frame()).eval(&expr)?;
        let result = self.shape(value)?;
        debug!(expression = %expression, "Expression evaluated");
        Ok(result)
    }

    fn shape(&self, value: Value) -> Result<QueryResult, ExecutionError> {
        match value {
            Value::Frame(frame) => {
                let total = frame.n_rows();
                let note = if total > self.max_rows {
                    format!("(Showing first {} of {} results)", self.max_rows, total)
                } else {
                    format!("(Found {} results)", total)
                };
                Ok(QueryResult::Records {
                    rows: frame.records(self.max_rows),
                    total,
                    note,
                })
            }
            Value::Series(series) => Ok(QueryResult::Mapping(series.to_mapping())),
            Value::Scalar(cell) => Ok(QueryResult::Scalar(cell.to_json())),
            Value::List(items) => Ok(QueryResult::Scalar(Json::Array(
                items.iter().map(|c| c.to_json()).collect(),
            ))),
            other => Err(ExecutionError::Unsupported(format!(
                "expression evaluated to a {} object, not a result",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::frame::{Cell, Column, Frame};
    use crate::dataset::{fallback_frame, DatasetOrigin};
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::new(fallback_frame(), DatasetOrigin::Memory)
    }

    #[test]
    fn test_mixed_code_column_stays_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.csv");
        std::fs::write(&path, "Code,Amount\nA1,10\n007,20\nB2,30\n").unwrap();
        let dataset = Dataset::new(crate::dataset::read_csv(&path).unwrap(), DatasetOrigin::File);
        let engine = ExecutionEngine::new();

        assert_eq!(
            engine.execute("df[df['Code'] == '007']['Amount'].sum()", &dataset).unwrap(),
            QueryResult::Scalar(json!(20))
        );
        assert_eq!(
            engine.execute("df['Code'].str.startswith('0').sum()", &dataset).unwrap(),
            QueryResult::Scalar(json!(1))
        );
        assert_eq!(dataset.dtypes()[0], ("Code".to_string(), "object"));
        assert_eq!(dataset.dtypes()[1], ("Amount".to_string(), "int64"));
    }

    #[test]
    fn test_scalar_result() {
        let result = ExecutionEngine::new()
            .execute("df['Salary'].mean()", &dataset())
            .unwrap();
        assert_eq!(result, QueryResult::Scalar(json!(72500.0)));
    }

    #[test]
    fn test_series_becomes_mapping() {
        let result = ExecutionEngine::new()
            .execute("df.groupby('Department')['Salary'].max()", &dataset())
            .unwrap();
        let QueryResult::Mapping(map) = result else {
            panic!("expected mapping");
        };
        assert_eq!(map["Sales"], json!(68000));
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_records_report_count() {
        let result = ExecutionEngine::new()
            .execute("df[df['Department'] == 'IT']", &dataset())
            .unwrap();
        let QueryResult::Records { rows, total, note } = result else {
            panic!("expected records");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(total, 2);
        assert_eq!(note, "(Found 2 results)");
        assert_eq!(rows[0]["EmployeeID"], json!("Employee_1"));
    }

    #[test]
    fn test_records_truncated_to_limit() {
        let ids: Vec<Cell> = (0..250).map(Cell::Int).collect();
        let frame = Frame::new(vec![Column::new("id", ids)]).unwrap();
        let big = Dataset::new(frame, DatasetOrigin::Memory);

        let result = ExecutionEngine::new().execute("df", &big).unwrap();
        let QueryResult::Records { rows, total, note } = result else {
            panic!("expected records");
        };
        assert_eq!(rows.len(), 100);
        assert_eq!(total, 250);
        assert_eq!(note, "(Showing first 100 of 250 results)");
    }

    #[test]
    fn test_errors_are_descriptive() {
        let err = ExecutionEngine::new()
            .execute("df['Bonus'].sum()", &dataset())
            .unwrap_err();
        assert!(err.to_string().contains("'Bonus' does not exist"));

        let err = ExecutionEngine::new()
            .execute("df.groupby('Department')", &dataset())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Unsupported(_)));
    }

    #[test]
    fn test_list_results_are_arrays() {
        let result = ExecutionEngine::new()
            .execute("df['Department'].unique().tolist()", &dataset())
            .unwrap();
        assert_eq!(
            result,
            QueryResult::Scalar(json!(["IT", "Marketing", "Sales", "HR", "Finance"]))
        );
    }
}
