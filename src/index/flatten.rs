use crate::manifest::{Body, Descriptor, Download, HashState, Manifest};
use serde_json::{json, Map, Value};

/// Flatten a manifest into its index item
pub(super) fn item(manifest: &Manifest, omit_fields: &[String]) -> Value {
    let mut item = manifest.extra.clone();

    item.insert("id".into(), json!(manifest.id));
    item.insert("name".into(), json!(manifest.name));
    item.insert("type".into(), json!(manifest.artifact_type()));
    item.insert("cloud_available".into(), json!(manifest.cloud_available));
    if let Some(category) = manifest.category {
        item.insert("category".into(), json!(category));
    }
    if let Some(homepage) = &manifest.homepage {
        item.insert("homepage".into(), json!(homepage));
    }

    match &manifest.body {
        Body::Asset {
            download: Download::File(descriptor),
            ..
        } => {
            item.insert("file".into(), Value::Object(descriptor_object(descriptor)));
        }
        Body::Asset {
            download: Download::Variants(variants),
            ..
        } => {
            let variants = variants
                .iter()
                .map(|variant| {
                    let mut object = descriptor_object(&variant.descriptor);
                    object.insert("id".into(), json!(variant.id));
                    if let Some(precision) = &variant.precision {
                        object.insert("precision".into(), json!(precision));
                    }
                    Value::Object(object)
                })
                .collect();
            item.insert("variants".into(), Value::Array(variants));
        }
        Body::Recipe(recipe) => {
            let mut object = recipe.extra.clone();
            object.insert("base_model".into(), json!(recipe.base_model));
            object.insert("training".into(), Value::Object(recipe.training.clone()));
            item.insert("recipe".into(), Value::Object(object));
        }
    }

    for field in omit_fields {
        item.remove(field);
    }

    let mut item = Value::Object(item);
    coerce_floats(&mut item);
    item
}

fn descriptor_object(descriptor: &Descriptor) -> Map<String, Value> {
    let mut object = descriptor.extra.clone();
    object.insert("url".into(), json!(descriptor.url));
    object.insert("sha256".into(), json!(descriptor.hash.declared()));
    object.insert("size".into(), json!(descriptor.size));
    if let Some(format) = &descriptor.format {
        object.insert("format".into(), json!(format));
    }
    if let Some(file_name) = &descriptor.file_name {
        object.insert("file".into(), json!(file_name));
    }
    if matches!(descriptor.hash, HashState::Probed(_)) {
        object.insert("sha256_source".into(), json!("probed"));
    }
    object
}

/// YAML leaves exponent floats like `1e-4` as strings; emit them as numbers
fn coerce_floats(value: &mut Value) {
    match value {
        Value::Object(map) => map.values_mut().for_each(coerce_floats),
        Value::Array(items) => items.iter_mut().for_each(coerce_floats),
        Value::String(s) => {
            if let Some(number) = exponent_float(s) {
                *value = number;
            }
        }
        _ => {}
    }
}

fn exponent_float(s: &str) -> Option<Value> {
    if !s.to_ascii_lowercase().contains('e') || s.starts_with("0x") {
        return None;
    }
    let parsed: f64 = s.trim().parse().ok()?;
    serde_json::Number::from_f64(parsed).map(Value::Number)
}
