//! JSON Schema generation for caller-supplied parameters.
//!
//! schemars emits `format` values such as `uint32` or `uint8` for Rust
//! integer types. JSON Schema only defines `int32` and `int64`, and some MCP
//! clients reject anything else, so other integer formats are dropped and
//! the `minimum`/`maximum` bounds carry the constraint instead.

use schemars::generate::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{Map, Value};

/// Draft-07 schema for `T`, subschemas inlined, with no `$schema` or `title`.
pub fn schema_for<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();

    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| Value::Object(Map::new()));

    // `true` accepts anything; spell it as an empty object for clients that
    // expect every property schema to be an object.
    if value == Value::Bool(true) {
        return Value::Object(Map::new());
    }

    if let Value::Object(ref mut map) = value {
        map.remove("$schema");
        map.remove("title");
    }
    strip_integer_formats(&mut value);
    value
}

fn strip_integer_formats(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let drop_format = matches!(
                map.get("format").and_then(Value::as_str),
                Some(format) if format != "int32" && format != "int64" && is_integer_format(format)
            );
            if drop_format {
                map.remove("format");
            }
            for child in map.values_mut() {
                strip_integer_formats(child);
            }
        }
        Value::Array(items) => {
            for child in items {
                strip_integer_formats(child);
            }
        }
        _ => {}
    }
}

fn is_integer_format(format: &str) -> bool {
    matches!(
        format,
        "int8" | "int16" | "uint" | "uint8" | "uint16" | "uint32" | "uint64" | "uint128" | "int128"
    )
}
