//! Depth-bounded safe serializer for console arguments.
//!
//! Never fails and never recurses unboundedly: cycles become `[Circular]`,
//! anything past the depth limit becomes `[MaxDepth]`, live host objects become
//! an `[Unserializable:<tag>]` sentinel.

use super::value::{PageValue, Property, number_to_string};
use serde_json::{Map, Value, json};
use std::collections::HashSet;

pub const DEFAULT_DEPTH_LIMIT: usize = 3;

pub const CIRCULAR: &str = "[Circular]";
pub const MAX_DEPTH: &str = "[MaxDepth]";
pub const FUNCTION: &str = "[function]";
pub const SYMBOL: &str = "[symbol]";
pub const UNSERIALIZABLE: &str = "[Unserializable Object]";

#[derive(Debug, Clone, Copy)]
pub struct SafeSerializer {
    depth_limit: usize,
}

impl Default for SafeSerializer {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH_LIMIT)
    }
}

impl SafeSerializer {
    pub fn new(depth_limit: usize) -> Self {
        Self { depth_limit }
    }

    pub fn depth_limit(&self) -> usize {
        self.depth_limit
    }

    pub fn serialize(&self, value: &PageValue) -> Value {
        let mut ancestors = HashSet::new();
        self.walk(value, 0, &mut ancestors)
    }

    /// Renders one console argument the way the page console would print it:
    /// strings verbatim, object-like values as pretty JSON of their safe form,
    /// everything else through its string conversion.
    pub fn render(&self, value: &PageValue) -> String {
        self.serialize_and_render(value).1
    }

    /// Safe form and console text of one argument from a single walk, so
    /// page getters run once per capture.
    pub fn serialize_and_render(&self, value: &PageValue) -> (Value, String) {
        let serialized = self.serialize(value);
        let text = match value {
            PageValue::String(s) => s.clone(),
            PageValue::Undefined => "undefined".to_string(),
            PageValue::Bool(b) => b.to_string(),
            PageValue::Number(n) => number_to_string(*n),
            PageValue::BigInt(digits) => digits.clone(),
            PageValue::Symbol(desc) => format!("Symbol({})", desc),
            PageValue::Function(src) => src.clone(),
            _ => serde_json::to_string_pretty(&serialized)
                .unwrap_or_else(|_| UNSERIALIZABLE.to_string()),
        };
        (serialized, text)
    }

    fn walk(&self, value: &PageValue, depth: usize, ancestors: &mut HashSet<usize>) -> Value {
        if depth > self.depth_limit {
            return Value::String(MAX_DEPTH.to_string());
        }

        match value {
            PageValue::Undefined | PageValue::Null => Value::Null,
            PageValue::Bool(b) => Value::Bool(*b),
            PageValue::Number(n) => number_value(*n),
            PageValue::String(s) => Value::String(s.clone()),
            PageValue::BigInt(digits) => Value::String(format!("{}n", digits)),
            PageValue::Symbol(_) => Value::String(SYMBOL.to_string()),
            PageValue::Function(_) => Value::String(FUNCTION.to_string()),
            PageValue::Host(kind) => Value::String(format!("[Unserializable:{}]", kind.tag())),
            PageValue::Error(err) => json!({
                "name": err.name,
                "message": err.message,
                "stack": err.stack,
            }),
            PageValue::Array(obj) | PageValue::Object(obj) => {
                let id = obj.id();
                if !ancestors.insert(id) {
                    return Value::String(CIRCULAR.to_string());
                }

                let mut fields = Vec::new();
                for (key, prop) in obj.entries() {
                    let field = match prop {
                        Property::Value(v) => self.walk(&v, depth + 1, ancestors),
                        Property::Getter(getter) => match getter() {
                            Ok(v) => self.walk(&v, depth + 1, ancestors),
                            Err(_) => Value::String(format!("[Error extracting {}]", key)),
                        },
                    };
                    fields.push((key, field));
                }

                ancestors.remove(&id);

                if matches!(value, PageValue::Array(_)) {
                    Value::Array(fields.into_iter().map(|(_, v)| v).collect())
                } else {
                    Value::Object(fields.into_iter().collect::<Map<String, Value>>())
                }
            }
        }
    }
}

/// Integral numbers serialize without a fractional part; non-finite ones as
/// `null`, matching `JSON.stringify`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
