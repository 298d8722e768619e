//! Recognising this transform among a host's build plugins.
//!
//! A host registers the transform as a `[name, options]` pair produced by
//! [`transform_descriptor`]. The options carry a marker so the transform can
//! be picked out of a plugin list without comparing names or identities.
//! Transforms that were already instantiated carry a marker of their own.

use serde_json::{Map, Value};

/// Name the transform is registered under.
pub const TRANSFORM_NAME: &str = "buildmacros";
/// Marker key set in the options of a descriptor.
pub const CONFIG_MARKER: &str = "buildMacrosConfigMarker";
/// Marker key set on an instantiated transform.
pub const AST_MARKER: &str = "buildMacrosASTMarker";

/// `["buildmacros", {options..., "buildMacrosConfigMarker": true}]`
pub fn transform_descriptor(options: Map<String, Value>) -> Value {
    let mut options = options;
    options.insert(CONFIG_MARKER.to_string(), Value::Bool(true));
    Value::Array(vec![
        Value::String(TRANSFORM_NAME.to_string()),
        Value::Object(options),
    ])
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Whether `plugin` is this transform, in descriptor or instantiated form.
pub fn is_macros_transform(plugin: &Value) -> bool {
    match plugin {
        Value::Array(items) if items.len() >= 2 => match &items[1] {
            Value::Object(options) => truthy(options.get(CONFIG_MARKER)),
            _ => false,
        },
        Value::Object(object) => truthy(object.get(AST_MARKER)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_is_detected() {
        let mut options = Map::new();
        options.insert("owningPackageRoot".into(), json!("/app"));
        let descriptor = transform_descriptor(options);
        assert_eq!(descriptor[0], "buildmacros");
        assert_eq!(descriptor[1]["owningPackageRoot"], "/app");
        assert!(is_macros_transform(&descriptor));
    }

    #[test]
    fn test_instantiated_marker() {
        assert!(is_macros_transform(&json!({"buildMacrosASTMarker": true})));
        assert!(!is_macros_transform(&json!({"buildMacrosASTMarker": 0})));
    }

    #[test]
    fn test_other_plugins() {
        assert!(!is_macros_transform(&json!(["other", {}])));
        assert!(!is_macros_transform(&json!(["buildmacros"])));
        assert!(!is_macros_transform(&json!(["buildmacros", "opts"])));
        assert!(!is_macros_transform(&json!("buildmacros")));
        assert!(!is_macros_transform(&json!({"buildMacrosConfigMarker": true})));
    }
}
