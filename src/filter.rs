use crate::errors::CoreError;
use crate::model::EmbeddingRecord;
use serde_json::Value;

/// Filter over embedding records, parsed from the JSON `where` shape used by
/// fetch/delete/query requests. Named columns resolve against the record
/// struct; any other field resolves into the `derived` metadata object
/// (dot notation for nesting).
#[derive(Debug, Clone)]
pub struct RecordFilter {
    conditions: Vec<Condition>,
    operator: BooleanOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Condition {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    Range { field: String, min: Option<f64>, max: Option<f64> },
    Contains { field: String, substring: String },
    Regex { field: String, pattern: String },
    Exists { field: String },
    NotExists { field: String },
}

impl RecordFilter {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            operator: BooleanOperator::And,
        }
    }

    /// Shorthand for the common `{namespace: ns}` filter.
    pub fn namespace_only(namespace: &str) -> Self {
        Self::new().equals("namespace", Value::String(namespace.to_string()))
    }

    pub fn or(mut self) -> Self {
        self.operator = BooleanOperator::Or;
        self
    }

    pub fn equals(mut self, field: &str, value: Value) -> Self {
        self.conditions.push(Condition::Equals {
            field: field.to_string(),
            value,
        });
        self
    }

    pub fn in_values(mut self, field: &str, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::In {
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn range(mut self, field: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.conditions.push(Condition::Range {
            field: field.to_string(),
            min,
            max,
        });
        self
    }

    pub fn contains(mut self, field: &str, substring: &str) -> Self {
        self.conditions.push(Condition::Contains {
            field: field.to_string(),
            substring: substring.to_string(),
        });
        self
    }

    pub fn exists(mut self, field: &str) -> Self {
        self.conditions.push(Condition::Exists {
            field: field.to_string(),
        });
        self
    }

    /// The namespace this filter is pinned to, if any. Only an `And` filter
    /// with an equality condition on `namespace` counts; an `Or` filter
    /// cannot guarantee the constraint.
    pub fn namespace(&self) -> Option<&str> {
        if self.operator == BooleanOperator::Or && self.conditions.len() > 1 {
            return None;
        }
        self.conditions.iter().find_map(|c| match c {
            Condition::Equals { field, value } if field == "namespace" => value.as_str(),
            _ => None,
        })
    }

    /// True when the filter is exactly `{namespace: ..}` — the whole-namespace
    /// delete shape that drops the index outright.
    pub fn is_namespace_only(&self) -> bool {
        self.conditions.len() == 1 && self.namespace().is_some()
    }

    pub fn matches(&self, record: &EmbeddingRecord) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.operator {
            BooleanOperator::And => self.conditions.iter().all(|c| evaluate(c, record)),
            BooleanOperator::Or => self.conditions.iter().any(|c| evaluate(c, record)),
        }
    }
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn evaluate(condition: &Condition, record: &EmbeddingRecord) -> bool {
    match condition {
        Condition::Equals { field, value } => {
            field_value(record, field).map(|v| &v == value).unwrap_or(false)
        }
        Condition::NotEquals { field, value } => {
            field_value(record, field).map(|v| &v != value).unwrap_or(true)
        }
        Condition::In { field, values } => field_value(record, field)
            .map(|v| values.contains(&v))
            .unwrap_or(false),
        Condition::NotIn { field, values } => field_value(record, field)
            .map(|v| !values.contains(&v))
            .unwrap_or(true),
        Condition::Range { field, min, max } => field_value(record, field)
            .and_then(|v| v.as_f64())
            .map(|num| {
                min.map(|m| num >= m).unwrap_or(true) && max.map(|m| num <= m).unwrap_or(true)
            })
            .unwrap_or(false),
        Condition::Contains { field, substring } => field_value(record, field)
            .and_then(|v| v.as_str().map(|s| s.contains(substring.as_str())))
            .unwrap_or(false),
        Condition::Regex { field, pattern } => field_value(record, field)
            .and_then(|v| {
                v.as_str().map(|s| {
                    regex::Regex::new(pattern)
                        .map(|re| re.is_match(s))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false),
        Condition::Exists { field } => field_value(record, field).is_some(),
        Condition::NotExists { field } => field_value(record, field).is_none(),
    }
}

/// Resolve a filter field against a record. Named columns first, then the
/// derived metadata object.
fn field_value(record: &EmbeddingRecord, field: &str) -> Option<Value> {
    match field {
        "uuid" => Some(Value::String(record.uuid.to_string())),
        "namespace" => Some(Value::String(record.namespace.clone())),
        "source_uri" => Some(Value::String(record.source_uri.clone())),
        "dataset_label" => Some(Value::String(record.dataset_label.clone())),
        "inference_class" => record.inference_class.clone().map(Value::String),
        "ground_truth_label" => record.ground_truth_label.clone().map(Value::String),
        _ => {
            let mut current = &record.derived;
            for part in field.split('.') {
                current = current.get(part)?;
            }
            Some(current.clone())
        }
    }
}

/// Parse a filter from the JSON query shape, e.g.
/// `{"namespace": "t1", "distance_score": {"$gte": 2.0}}`.
impl TryFrom<Value> for RecordFilter {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, CoreError> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(CoreError::InvalidFilter(format!(
                    "filter must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut filter = RecordFilter::new();
        for (field, condition) in map {
            match &condition {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    filter = filter.equals(&field, condition);
                }
                Value::Object(cond_map) => {
                    for (op, val) in cond_map {
                        filter = apply_operator(filter, &field, op, val)?;
                    }
                }
                _ => {
                    return Err(CoreError::InvalidFilter(format!(
                        "invalid condition for field {}",
                        field
                    )))
                }
            }
        }
        Ok(filter)
    }
}

fn apply_operator(
    mut filter: RecordFilter,
    field: &str,
    op: &str,
    val: &Value,
) -> Result<RecordFilter, CoreError> {
    let as_f64 = |val: &Value| {
        val.as_f64()
            .ok_or_else(|| CoreError::InvalidFilter(format!("{} requires a numeric value", op)))
    };
    let as_array = |val: &Value| match val {
        Value::Array(arr) => Ok(arr.clone()),
        _ => Err(CoreError::InvalidFilter(format!("{} requires an array value", op))),
    };
    let as_str = |val: &Value| {
        val.as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::InvalidFilter(format!("{} requires a string value", op)))
    };

    match op {
        "$eq" => filter = filter.equals(field, val.clone()),
        "$ne" => filter.conditions.push(Condition::NotEquals {
            field: field.to_string(),
            value: val.clone(),
        }),
        "$in" => filter = filter.in_values(field, as_array(val)?),
        "$nin" => filter.conditions.push(Condition::NotIn {
            field: field.to_string(),
            values: as_array(val)?,
        }),
        "$gte" => filter = filter.range(field, Some(as_f64(val)?), None),
        "$lte" => filter = filter.range(field, None, Some(as_f64(val)?)),
        "$gt" => filter = filter.range(field, Some(as_f64(val)? + f64::EPSILON), None),
        "$lt" => filter = filter.range(field, None, Some(as_f64(val)? - f64::EPSILON)),
        "$contains" => filter = filter.contains(field, &as_str(val)?),
        "$regex" => filter.conditions.push(Condition::Regex {
            field: field.to_string(),
            pattern: as_str(val)?,
        }),
        "$exists" => {
            if val.as_bool().unwrap_or(false) {
                filter = filter.exists(field);
            } else {
                filter.conditions.push(Condition::NotExists {
                    field: field.to_string(),
                });
            }
        }
        other => {
            return Err(CoreError::InvalidFilter(format!(
                "unknown filter operator: {}",
                other
            )))
        }
    }
    Ok(filter)
}
