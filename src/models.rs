//! Core data models for the query pipeline

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

//
// ================= Enums =================
//

/// Routing decision made by the classifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    DataQuery,
    General,
}

impl QueryType {
    /// Exact label match after trimming; anything else is `None`
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "DATA_QUERY" => Some(QueryType::DataQuery),
            "GENERAL" => Some(QueryType::General),
            _ => None,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::DataQuery => write!(f, "DATA_QUERY"),
            QueryType::General => write!(f, "GENERAL"),
        }
    }
}

/// Which path produced an answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Conversation,
    Dataframe,
    Error,
}

//
// ================= Query Result =================
//

/// Shaped output of an executed expression
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Row set, already truncated to at most 100 rows
    Records {
        rows: Vec<Map<String, Value>>,
        total: usize,
        note: String,
    },
    /// Reduced or grouped result keyed by label
    Mapping(Map<String, Value>),
    Scalar(Value),
}

impl QueryResult {
    /// JSON form stored as `last_result` and returned in debug output
    pub fn to_json(&self) -> Value {
        match self {
            QueryResult::Records { rows, total, note } => serde_json::json!({
                "records": rows,
                "total": total,
                "note": note,
            }),
            QueryResult::Mapping(map) => Value::Object(map.clone()),
            QueryResult::Scalar(value) => value.clone(),
        }
    }

    /// Plain rendering used in prompts and as the fallback answer
    pub fn render(&self) -> String {
        match self {
            QueryResult::Records { rows, note, .. } => {
                let lines: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|(k, v)| format!("{}: {}", k, plain(v)))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .collect();
                if lines.is_empty() {
                    note.clone()
                } else {
                    format!("{}\n{}", lines.join("\n"), note)
                }
            }
            QueryResult::Mapping(map) => map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, plain(v)))
                .collect::<Vec<_>>()
                .join("\n"),
            QueryResult::Scalar(value) => plain(value),
        }
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

//
// ================= Responses =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugInfo {
    pub expression: Option<String>,
    pub raw_result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub answer: String,
    pub source: ResponseSource,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_requires_exact_match() {
        assert_eq!(QueryType::from_label(" DATA_QUERY\n"), Some(QueryType::DataQuery));
        assert_eq!(QueryType::from_label("data_query"), None);
        assert_eq!(QueryType::from_label("DATA_QUERY."), None);
    }

    #[test]
    fn test_render_scalar_and_mapping() {
        assert_eq!(QueryResult::Scalar(json!(72500.0)).render(), "72500.0");

        let mut map = Map::new();
        map.insert("IT".to_string(), json!(2));
        map.insert("HR".to_string(), json!(1));
        let rendered = QueryResult::Mapping(map).render();
        assert!(rendered.contains("IT: 2"));
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let value = serde_json::to_value(ResponseSource::Dataframe).unwrap();
        assert_eq!(value, json!("dataframe"));
    }
}
