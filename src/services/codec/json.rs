//! JSON arrays and entity-keyed bundles

use super::{normalize, FormatError};
use crate::models::{Bundle, EntityType, Record};
use chrono::Utc;
use serde_json::{json, Map, Value};

/// Bundle keys that describe the document rather than hold rows
const META_KEYS: &[&str] = &["version", "exported_at", "created_at", "manifest", "metadata"];

/// Records from an already-parsed JSON value: a top-level array or an
/// object wrapping one under `data`
pub fn decode_json_value(entity: EntityType, value: Value) -> Result<Vec<Record>, FormatError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(FormatError::Json(format!(
                    "expected an array of {} or an object with a \"data\" array",
                    entity
                )))
            }
        },
        _ => {
            return Err(FormatError::Json(format!(
                "expected an array of {}",
                entity
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(normalize(entity, record)),
            _ => Err(FormatError::NotAnObject { entity, index }),
        })
        .collect()
}

/// Decode `{ "<entity>": [...], ... }`, optionally wrapped under `data`.
///
/// Keys naming no entity type are reported as warnings.
pub fn decode_bundle_json(value: Value) -> Result<(Bundle, Vec<String>), FormatError> {
    let mut map = match value {
        Value::Object(map) => map,
        _ => return Err(FormatError::Bundle("expected a JSON object".to_string())),
    };
    if matches!(map.get("data"), Some(Value::Object(_))) {
        if let Some(Value::Object(inner)) = map.remove("data") {
            map = inner;
        }
    }

    let mut bundle = Bundle::new();
    let mut warnings = Vec::new();

    for (key, value) in map {
        if META_KEYS.contains(&key.as_str()) {
            continue;
        }
        let entity = match key.parse::<EntityType>() {
            Ok(entity) => entity,
            Err(_) => {
                warnings.push(format!("ignored unknown bundle key '{}'", key));
                continue;
            }
        };
        if !value.is_array() {
            return Err(FormatError::Bundle(format!("'{}' must be an array", key)));
        }
        bundle.insert(entity, decode_json_value(entity, value)?);
    }

    Ok((bundle, warnings))
}

/// Encode a bundle as a single JSON document
pub fn encode_bundle_json(bundle: &Bundle) -> Result<Vec<u8>, FormatError> {
    let mut data = Map::new();
    for (entity, records) in bundle.iter() {
        data.insert(entity.as_str().to_string(), Value::from(records.to_vec()));
    }
    let document = json!({
        "version": 1,
        "exported_at": Utc::now().to_rfc3339(),
        "data": data,
    });
    serde_json::to_vec_pretty(&document).map_err(|e| FormatError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_array_and_data_wrapper() {
        let plain = decode_json_value(EntityType::Tags, json!([{"name": "life"}])).unwrap();
        let wrapped =
            decode_json_value(EntityType::Tags, json!({"data": [{"name": "life"}]})).unwrap();
        assert_eq!(plain, wrapped);
    }

    #[test]
    fn test_non_object_element_names_index() {
        let err = decode_json_value(EntityType::Tags, json!([{"name": "a"}, 3])).unwrap_err();
        assert!(matches!(err, FormatError::NotAnObject { index: 1, .. }));
        assert!(err.to_string().contains("element 1"));
    }

    #[test]
    fn test_bundle_warns_on_unknown_keys() {
        let (bundle, warnings) = decode_bundle_json(json!({
            "authors": [{"name": "Ada Lovelace"}],
            "quote_references": [{"name": "Notes"}],
            "comments": [{"body": "?"}],
            "version": 1,
        }))
        .unwrap();

        assert_eq!(bundle.get(EntityType::Authors).map(<[_]>::len), Some(1));
        assert_eq!(bundle.get(EntityType::References).map(<[_]>::len), Some(1));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("comments"));
    }

    #[test]
    fn test_bundle_rejects_non_array_entity() {
        assert!(decode_bundle_json(json!({"users": {"email": "x"}})).is_err());
        assert!(decode_bundle_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_encoded_bundle_decodes() {
        let (bundle, _) = decode_bundle_json(json!({"tags": [{"name": "life"}]})).unwrap();
        let bytes = encode_bundle_json(&bundle).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let (decoded, warnings) = decode_bundle_json(value).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(decoded, bundle);
    }
}
