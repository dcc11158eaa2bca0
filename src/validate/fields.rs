use super::{Collector, Rule, Validator};
use crate::manifest::{ArtifactType, Descriptor, HashState, Recipe, TrustLevel, Variant};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

type JsonMap = serde_json::Map<String, serde_json::Value>;

const DESCRIPTOR_KEYS: &[&str] = &["url", "sha256", "sha256_source", "size", "format", "file"];
const VARIANT_KEYS: &[&str] = &[
    "id",
    "precision",
    "url",
    "sha256",
    "sha256_source",
    "size",
    "format",
    "file",
];
const RECIPE_KEYS: &[&str] = &["base_model", "training"];

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

pub(super) fn required_str<'a>(
    map: &'a Mapping,
    key: &str,
    parent: &str,
    out: &mut Collector,
) -> Option<&'a str> {
    let path = join(parent, key);
    match map.get(key) {
        None | Some(Value::Null) => {
            out.error(path, Rule::MissingField, format!("Missing required field: {key}"));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => {
            out.error(
                path,
                Rule::FieldType,
                format!("Field '{key}' must be a string, found {}", yaml_kind(other)),
            );
            None
        }
    }
}

pub(super) fn optional_str<'a>(
    map: &'a Mapping,
    key: &str,
    parent: &str,
    out: &mut Collector,
) -> Option<&'a str> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => {
            out.error(
                join(parent, key),
                Rule::FieldType,
                format!("Field '{key}' must be a string, found {}", yaml_kind(other)),
            );
            None
        }
    }
}

pub(super) fn optional_bool(
    map: &Mapping,
    key: &str,
    parent: &str,
    out: &mut Collector,
) -> Option<bool> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            out.error(
                join(parent, key),
                Rule::FieldType,
                format!("Field '{key}' must be a boolean, found {}", yaml_kind(other)),
            );
            None
        }
    }
}

pub(super) fn check_shape(
    kind: Option<ArtifactType>,
    has_file: bool,
    has_variants: bool,
    has_recipe: bool,
    out: &mut Collector,
) {
    let Some(kind) = kind else {
        return;
    };

    if kind.is_recipe() {
        if has_file || has_variants {
            out.error(
                "",
                Rule::PayloadShape,
                "Recipe manifests must not have 'file' or 'variants'",
            );
        }
        if !has_recipe {
            out.error("recipe", Rule::PayloadShape, "Recipe manifests require a 'recipe' block");
        }
        return;
    }

    if has_recipe {
        out.error(
            "recipe",
            Rule::PayloadShape,
            format!("Only recipe manifests may have a 'recipe' block, not '{kind}'"),
        );
    }
    match (has_file, has_variants) {
        (true, true) => out.error(
            "",
            Rule::PayloadShape,
            "Must have exactly one of 'file' or 'variants', not both",
        ),
        (false, false) => out.error("", Rule::PayloadShape, "Must have either 'file' or 'variants'"),
        _ => {}
    }
}

/// Validate one download descriptor at `path`
pub(super) fn descriptor(
    validator: &Validator,
    value: &Value,
    path: &str,
    in_variant: bool,
    out: &mut Collector,
) -> Option<Descriptor> {
    let Some(map) = value.as_mapping() else {
        out.error(
            path,
            Rule::FieldType,
            format!("'{path}' must be a mapping, found {}", yaml_kind(value)),
        );
        return None;
    };

    let url = required_str(map, "url", path, out);
    if let Some(url) = url {
        if let Err((rule, message)) = validator.check_url(url) {
            out.error(join(path, "url"), rule, message);
        }
    }

    let hash = required_str(map, "sha256", path, out).and_then(|raw| hash_state(validator, map, raw, path, out));
    let size = size(map, path, out);

    let format = optional_str(map, "format", path, out);
    let file_name = optional_str(map, "file", path, out);
    if in_variant && file_name.is_none() {
        out.warning(join(path, "file"), Rule::MissingField, "Missing 'file' name");
    }

    let known = if in_variant { VARIANT_KEYS } else { DESCRIPTOR_KEYS };
    let extra = extra_fields(map, known, path, out);

    Some(Descriptor {
        url: url?.to_string(),
        hash: hash?,
        size: size?,
        format: format.map(str::to_string),
        file_name: file_name.map(str::to_string),
        extra,
    })
}

fn hash_state(
    validator: &Validator,
    map: &Mapping,
    raw: &str,
    path: &str,
    out: &mut Collector,
) -> Option<HashState> {
    let marker = match optional_str(map, "sha256_source", path, out) {
        None => None,
        Some(value) => {
            let level = TrustLevel::from_marker(value);
            if level.is_none() {
                out.error(
                    join(path, "sha256_source"),
                    Rule::FieldType,
                    format!("Unknown sha256_source '{value}'. Must be one of: probed, verified"),
                );
            }
            level
        }
    };

    if validator.is_placeholder(raw) && marker.is_some() {
        out.warning(
            join(path, "sha256_source"),
            Rule::InvalidHash,
            "sha256_source is ignored on a placeholder hash",
        );
    }

    match HashState::parse(raw, marker, validator.placeholder_prefix()) {
        Ok(state) => Some(state),
        Err(e) => {
            out.error(
                join(path, "sha256"),
                Rule::InvalidHash,
                format!(
                    "Invalid sha256 '{raw}': {e}. Use 64 lowercase hex characters or a '{}' placeholder",
                    validator.placeholder_prefix()
                ),
            );
            None
        }
    }
}

fn size(map: &Mapping, parent: &str, out: &mut Collector) -> Option<u64> {
    let path = join(parent, "size");
    match map.get("size") {
        None | Some(Value::Null) => {
            out.error(path, Rule::MissingField, "Missing required field: size");
            None
        }
        Some(Value::Number(n)) => match n.as_u64() {
            Some(size) if size > 0 => Some(size),
            _ => {
                out.error(path, Rule::InvalidSize, format!("Size must be a positive integer, got {n}"));
                None
            }
        },
        Some(other) => {
            out.error(
                path,
                Rule::InvalidSize,
                format!("Size must be a positive integer, found {}", yaml_kind(other)),
            );
            None
        }
    }
}

pub(super) fn variants(validator: &Validator, value: &Value, out: &mut Collector) -> Option<Vec<Variant>> {
    let Some(items) = value.as_sequence() else {
        out.error(
            "variants",
            Rule::FieldType,
            format!("'variants' must be a list, found {}", yaml_kind(value)),
        );
        return None;
    };
    if items.is_empty() {
        out.error("variants", Rule::PayloadShape, "'variants' must not be empty");
        return None;
    }

    let mut seen = HashSet::new();
    let mut variants = Vec::with_capacity(items.len());
    let mut complete = true;

    for (i, item) in items.iter().enumerate() {
        let path = format!("variants[{i}]");

        let (id, precision) = match item.as_mapping() {
            Some(map) => (
                required_str(map, "id", &path, out),
                optional_str(map, "precision", &path, out),
            ),
            None => (None, None),
        };

        if let Some(id) = id {
            if !seen.insert(id) {
                out.error(
                    join(&path, "id"),
                    Rule::DuplicateVariant,
                    format!("Duplicate variant id: {id}"),
                );
            }
        }

        let descriptor = descriptor(validator, item, &path, true, out);
        match (id, descriptor) {
            (Some(id), Some(descriptor)) => variants.push(Variant {
                id: id.to_string(),
                precision: precision.map(str::to_string),
                descriptor,
            }),
            _ => complete = false,
        }
    }

    complete.then_some(variants)
}

pub(super) fn recipe(value: Option<&Value>, out: &mut Collector) -> Option<Recipe> {
    let value = value.filter(|v| !v.is_null())?;
    let Some(map) = value.as_mapping() else {
        out.error(
            "recipe",
            Rule::FieldType,
            format!("'recipe' must be a mapping, found {}", yaml_kind(value)),
        );
        return None;
    };

    let base_model = match map.get("base_model") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => {
            out.error(
                "recipe.base_model",
                Rule::TypeRequirement,
                "Recipe requires a 'base_model' string",
            );
            None
        }
    };

    let training = match map.get("training") {
        Some(training @ Value::Mapping(_)) => match to_json(training, "recipe.training", out) {
            Some(serde_json::Value::Object(training)) => Some(training),
            _ => None,
        },
        _ => {
            out.error(
                "recipe.training",
                Rule::TypeRequirement,
                "Recipe requires a 'training' mapping",
            );
            None
        }
    };

    let extra = extra_fields(map, RECIPE_KEYS, "recipe", out);

    Some(Recipe {
        base_model: base_model?,
        training: training?,
        extra,
    })
}

pub(super) fn lora_base_models(map: &Mapping, out: &mut Collector) {
    let listed = map
        .get("base_models")
        .and_then(Value::as_sequence)
        .is_some_and(|models| !models.is_empty());
    if !listed {
        out.warning(
            "base_models",
            Rule::TypeRequirement,
            "LoRA should list compatible 'base_models'",
        );
    }
}

fn key_name(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_json(value: &Value, path: &str, out: &mut Collector) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(e) => {
            out.error(
                path,
                Rule::FieldType,
                format!("Value cannot be represented in the index: {e}"),
            );
            None
        }
    }
}

/// Collect fields the validator does not interpret, as JSON
pub(super) fn extra_fields(map: &Mapping, known: &[&str], parent: &str, out: &mut Collector) -> JsonMap {
    let mut extra = JsonMap::new();
    for (key, value) in map {
        let Some(name) = key_name(key) else {
            out.error(
                parent,
                Rule::FieldType,
                format!("Unsupported {} key", yaml_kind(key)),
            );
            continue;
        };
        if known.contains(&name.as_str()) {
            continue;
        }
        let path = join(parent, &name);
        if let Some(json) = to_json(value, &path, out) {
            extra.insert(name, json);
        }
    }
    extra
}
