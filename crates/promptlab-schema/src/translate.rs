//! Reduces a JSON Schema document to the subset the validator enforces.
//!
//! Supported: `object` (properties, required), `array` (items), `string`
//! (enum, pattern, minLength, maxLength), `number`/`integer` (minimum,
//! maximum), `boolean`, `null`, and `oneOf`/`anyOf`, both of which become an
//! `anyOf` union. Any other node accepts anything.

use serde_json::{Map, Value};

fn accept_anything() -> Value {
    Value::Object(Map::new())
}

fn copy_keys(from: &Map<String, Value>, to: &mut Map<String, Value>, keys: &[&str]) {
    for k in keys {
        if let Some(v) = from.get(*k) {
            to.insert((*k).to_string(), v.clone());
        }
    }
}

fn union(variants: &[Value]) -> Value {
    let mut out = Map::new();
    out.insert(
        "anyOf".into(),
        Value::Array(variants.iter().map(translate).collect()),
    );
    Value::Object(out)
}

fn typed(node: &Map<String, Value>, ty: &str) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), Value::String(ty.to_string()));

    match ty {
        "object" => {
            if let Some(Value::Object(props)) = node.get("properties") {
                let translated = props
                    .iter()
                    .map(|(k, v)| (k.clone(), translate(v)))
                    .collect();
                out.insert("properties".into(), Value::Object(translated));
            }
            if let Some(Value::Array(req)) = node.get("required") {
                let names: Vec<Value> = req.iter().filter(|v| v.is_string()).cloned().collect();
                out.insert("required".into(), Value::Array(names));
            }
        }
        "array" => {
            if let Some(items) = node.get("items") {
                out.insert("items".into(), translate(items));
            }
        }
        "string" => copy_keys(node, &mut out, &["enum", "pattern", "minLength", "maxLength"]),
        "number" | "integer" => copy_keys(node, &mut out, &["minimum", "maximum"]),
        "boolean" | "null" => {}
        _ => return accept_anything(),
    }
    Value::Object(out)
}

pub fn translate(schema: &Value) -> Value {
    let Value::Object(node) = schema else {
        return accept_anything();
    };

    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(variants)) = node.get(key) {
            return union(variants);
        }
    }

    match node.get("type") {
        Some(Value::String(ty)) => typed(node, ty),
        Some(Value::Array(types)) => {
            let variants: Vec<Value> = types
                .iter()
                .filter_map(Value::as_str)
                .map(|ty| typed(node, ty))
                .collect();
            let mut out = Map::new();
            out.insert("anyOf".into(), Value::Array(variants));
            Value::Object(out)
        }
        _ => accept_anything(),
    }
}
