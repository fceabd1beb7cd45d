//! Conversion of DevTools `Runtime.RemoteObject` descriptions into
//! [`PageValue`]s, so that console arguments reported by a remote debugger go
//! through the same serializer as in-page ones.

use serde_json::Value;

use super::value::{ErrorValue, HostKind, ObjectRef, PageValue};

pub fn from_remote_object(obj: &Value) -> PageValue {
    let kind = obj.get("type").and_then(Value::as_str).unwrap_or("undefined");
    let subtype = obj.get("subtype").and_then(Value::as_str);
    let class_name = obj.get("className").and_then(Value::as_str).unwrap_or("Object");
    let description = obj.get("description").and_then(Value::as_str).unwrap_or_default();
    let unserializable = obj.get("unserializableValue").and_then(Value::as_str);

    match kind {
        "undefined" => PageValue::Undefined,
        "string" => PageValue::String(
            obj.get("value")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        "number" => match obj.get("value").and_then(Value::as_f64) {
            Some(n) => PageValue::Number(n),
            None => PageValue::Number(parse_unserializable_number(unserializable)),
        },
        "boolean" => PageValue::Bool(obj.get("value").and_then(Value::as_bool).unwrap_or(false)),
        "bigint" => PageValue::BigInt(unserializable.unwrap_or(description).trim_end_matches('n').to_string()),
        "symbol" => PageValue::Symbol(symbol_description(description)),
        "function" => PageValue::Function(description.to_string()),
        _ => object_value(obj, subtype, class_name, description),
    }
}

fn object_value(obj: &Value, subtype: Option<&str>, class_name: &str, description: &str) -> PageValue {
    match subtype {
        Some("null") => return PageValue::Null,
        Some("node") => return PageValue::Host(HostKind::Node(class_name.to_string())),
        Some("weakmap") => return PageValue::Host(HostKind::WeakMap),
        Some("weakset") => return PageValue::Host(HostKind::WeakSet),
        Some("proxy") => return PageValue::Host(HostKind::Proxy),
        Some("error") => return error_from_description(class_name, description),
        _ => {}
    }
    match class_name {
        "Window" => return PageValue::Host(HostKind::Window),
        "HTMLDocument" | "Document" => return PageValue::Host(HostKind::Document),
        "console" => return PageValue::Host(HostKind::Console),
        _ => {}
    }

    if let Some(value) = obj.get("value") {
        return from_json(value);
    }

    let is_array = subtype == Some("array");
    match obj.get("preview") {
        Some(preview) => from_preview(preview, is_array),
        None if is_array => PageValue::array([]),
        None => PageValue::Object(ObjectRef::new()),
    }
}

fn from_preview(preview: &Value, is_array: bool) -> PageValue {
    let body = ObjectRef::new();
    let props = preview
        .get("properties")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for prop in props {
        let name = prop.get("name").and_then(Value::as_str).unwrap_or_default();
        let value = preview_property(&prop);
        if is_array {
            body.push(value);
        } else {
            body.set(name, value);
        }
    }
    if is_array {
        PageValue::Array(body)
    } else {
        PageValue::Object(body)
    }
}

fn preview_property(prop: &Value) -> PageValue {
    let kind = prop.get("type").and_then(Value::as_str).unwrap_or("undefined");
    let subtype = prop.get("subtype").and_then(Value::as_str);
    let raw = prop.get("value").and_then(Value::as_str).unwrap_or_default();

    match kind {
        "undefined" => PageValue::Undefined,
        "string" => PageValue::String(raw.to_string()),
        "number" => raw
            .parse::<f64>()
            .map(PageValue::Number)
            .unwrap_or_else(|_| PageValue::Number(parse_unserializable_number(Some(raw)))),
        "boolean" => PageValue::Bool(raw == "true"),
        "bigint" => PageValue::BigInt(raw.trim_end_matches('n').to_string()),
        "symbol" => PageValue::Symbol(symbol_description(raw)),
        "function" => PageValue::Function(raw.to_string()),
        _ => match (subtype, prop.get("valuePreview")) {
            (Some("null"), _) => PageValue::Null,
            (Some("node"), _) => PageValue::Host(HostKind::Node(raw.to_string())),
            (_, Some(nested)) => from_preview(nested, subtype == Some("array")),
            // Nested objects beyond the preview are only known by description.
            (_, None) => PageValue::String(raw.to_string()),
        },
    }
}

/// Plain JSON (a `returnByValue` result) into the value model.
pub fn from_json(value: &Value) -> PageValue {
    match value {
        Value::Null => PageValue::Null,
        Value::Bool(b) => PageValue::Bool(*b),
        Value::Number(n) => PageValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => PageValue::String(s.clone()),
        Value::Array(items) => PageValue::array(items.iter().map(from_json)),
        Value::Object(map) => PageValue::object(map.iter().map(|(k, v)| (k.clone(), from_json(v)))),
    }
}

fn parse_unserializable_number(raw: Option<&str>) -> f64 {
    match raw {
        Some("Infinity") => f64::INFINITY,
        Some("-Infinity") => f64::NEG_INFINITY,
        Some("-0") => -0.0,
        _ => f64::NAN,
    }
}

fn symbol_description(description: &str) -> String {
    description
        .strip_prefix("Symbol(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(description)
        .to_string()
}

/// `description` of an error is `"<Name>: <message>\n    at ..."`.
fn error_from_description(class_name: &str, description: &str) -> PageValue {
    let first_line = description.lines().next().unwrap_or_default();
    let (name, message) = match first_line.split_once(": ") {
        Some((name, message)) => (name.to_string(), message.to_string()),
        None => (class_name.to_string(), first_line.to_string()),
    };
    PageValue::Error(ErrorValue {
        name,
        message,
        stack: (!description.is_empty()).then(|| description.to_string()),
    })
}
