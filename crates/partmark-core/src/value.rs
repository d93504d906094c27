//! Values produced and consumed by marking scripts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use uuid::Uuid;

use crate::error::EvalError;
use crate::feedback::FeedbackOp;

/// The future behind a [`Deferred`] value.
pub type TaskFuture = Shared<BoxFuture<'static, Result<Value, EvalError>>>;

/// A value that a scope computes asynchronously, such as a remote answer
/// check started by a `pre_submit` note.
#[derive(Clone)]
pub struct Deferred {
    id: Uuid,
    task: TaskFuture,
}

impl Deferred {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, EvalError>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            task: future.boxed().shared(),
        }
    }

    /// A deferred value that is already available.
    pub fn ready(value: Value) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The shared task. Awaiting it more than once is fine.
    pub fn task(&self) -> TaskFuture {
        self.task.clone()
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("id", &self.id).finish()
    }
}

/// A script value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nothing,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Op(FeedbackOp),
    Deferred(Deferred),
}

impl Value {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key in a dictionary value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(map) => map.get(key),
            _ => None,
        }
    }

    /// Short description of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dictionary",
            Value::Op(_) => "feedback operation",
            Value::Deferred(_) => "deferred value",
        }
    }

    /// Interpret the value as a list of feedback operations.
    ///
    /// Accepts a single op, a list of ops (nested lists are flattened) and
    /// dictionaries shaped like a serialized op (`{"op": "set_credit", ...}`).
    pub fn feedback_ops(&self) -> Result<Vec<FeedbackOp>, EvalError> {
        let mut out = Vec::new();
        self.collect_ops(&mut out)?;
        Ok(out)
    }

    fn collect_ops(&self, out: &mut Vec<FeedbackOp>) -> Result<(), EvalError> {
        match self {
            Value::Nothing => Ok(()),
            Value::Op(op) => {
                out.push(op.clone());
                Ok(())
            }
            Value::List(items) => items.iter().try_for_each(|item| item.collect_ops(out)),
            Value::Dict(_) => {
                let op = serde_json::from_value::<FeedbackOp>(self.to_json())
                    .map_err(|e| EvalError::NotFeedback(format!("dictionary ({e})")))?;
                out.push(op);
                Ok(())
            }
            other => Err(EvalError::NotFeedback(other.type_name().to_string())),
        }
    }

    /// All deferred values reachable from this one.
    pub fn deferred_tasks(&self) -> Vec<Deferred> {
        let mut out = Vec::new();
        self.collect_deferred(&mut out);
        out
    }

    fn collect_deferred(&self, out: &mut Vec<Deferred>) {
        match self {
            Value::Deferred(d) => out.push(d.clone()),
            Value::List(items) => items.iter().for_each(|v| v.collect_deferred(out)),
            Value::Dict(map) => map.values().for_each(|v| v.collect_deferred(out)),
            _ => {}
        }
    }

    /// Replace deferred values with their resolved results.
    pub fn resolve_deferred(&self, resolved: &HashMap<Uuid, Value>) -> Value {
        match self {
            Value::Deferred(d) => resolved.get(&d.id()).cloned().unwrap_or_else(|| self.clone()),
            Value::List(items) => {
                Value::List(items.iter().map(|v| v.resolve_deferred(resolved)).collect())
            }
            Value::Dict(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.resolve_deferred(resolved)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Nothing => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Dict(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Op(op) => serde_json::to_value(op).unwrap_or(Json::Null),
            Value::Deferred(d) => serde_json::json!({ "deferred": d.id().to_string() }),
        }
    }

    /// Convert from JSON. Objects carrying an `op` tag that parses as a
    /// feedback operation become [`Value::Op`].
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Nothing,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                if map.contains_key("op") {
                    if let Ok(op) = serde_json::from_value::<FeedbackOp>(json.clone()) {
                        return Value::Op(op);
                    }
                }
                Value::Dict(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Deferred(d) => write!(f, "<deferred {}>", d.id()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<FeedbackOp> for Value {
    fn from(op: FeedbackOp) -> Self {
        Value::Op(op)
    }
}

impl From<Vec<FeedbackOp>> for Value {
    fn from(ops: Vec<FeedbackOp>) -> Self {
        Value::List(ops.into_iter().map(Value::Op).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Value::Deferred(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::Credit;

    #[test]
    fn test_feedback_ops_flattens_lists_and_dicts() {
        let json = serde_json::json!([
            {"op": "set_credit", "value": 1, "message": "right"},
            [{"op": "feedback", "text": "nested"}],
            null
        ]);
        let value = Value::from_json(&json);
        let ops = value.feedback_ops().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], FeedbackOp::set_credit(Credit::ONE, None, "right"));
    }

    #[test]
    fn test_feedback_ops_rejects_numbers() {
        let err = Value::List(vec![Value::Number(1.0)])
            .feedback_ops()
            .unwrap_err();
        assert_eq!(err, EvalError::NotFeedback("number".into()));
    }

    #[test]
    fn test_plain_dict_is_not_an_op() {
        let value = Value::from_json(&serde_json::json!({"a": 1, "b": [true]}));
        assert!(matches!(value, Value::Dict(_)));
        assert!(value.feedback_ops().is_err());
        assert_eq!(value.get("a"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_deferred_equality_by_id() {
        let a = Deferred::ready(Value::from(1.0));
        let b = Deferred::ready(Value::from(1.0));
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[tokio::test]
    async fn test_resolve_deferred_in_nested_value() {
        let d = Deferred::new(async { Ok(Value::from("checked")) });
        let value = Value::List(vec![Value::from(2.0), Value::Deferred(d.clone())]);
        let tasks = value.deferred_tasks();
        assert_eq!(tasks.len(), 1);

        let result = tasks[0].task().await.unwrap();
        let resolved = value.resolve_deferred(&HashMap::from([(d.id(), result)]));
        assert_eq!(
            resolved,
            Value::List(vec![Value::from(2.0), Value::from("checked")])
        );
        assert!(resolved.deferred_tasks().is_empty());
    }
}
