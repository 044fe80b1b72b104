//! Filter splitting and JSON:API query-string encoding for `$find`

use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::command::{LookupCommand, SortKey};
use crate::resource::ResourceType;

/// Filter operators and their Drupal JSON:API condition operators
const OPERATORS: &[(&str, &str)] = &[
    ("$eq", "="),
    ("$ne", "<>"),
    ("$gt", ">"),
    ("$gte", ">="),
    ("$lt", "<"),
    ("$lte", "<="),
    ("$in", "IN"),
    ("$nin", "NOT IN"),
    ("$contains", "CONTAINS"),
    ("$starts_with", "STARTS_WITH"),
];

fn operator(op: &str) -> Option<&'static str> {
    OPERATORS.iter().find(|(k, _)| *k == op).map(|(_, v)| *v)
}

/// One read per resource type, each with the shared conditions
pub fn split_filter_by_type(lookup: &LookupCommand) -> Vec<(ResourceType, Map<String, Value>)> {
    let mut seen = Vec::new();
    for rt in &lookup.types {
        if !seen.iter().any(|(t, _)| t == rt) {
            seen.push((rt.clone(), lookup.conditions.clone()));
        }
    }
    seen
}

/// Encode conditions, sort and limit as a JSON:API query string (no leading `?`)
pub fn encode_query(
    conditions: &Map<String, Value>,
    sort: &[SortKey],
    limit: Option<u64>,
) -> Result<String, String> {
    let mut ser = form_urlencoded::Serializer::new(String::new());

    for (field, value) in conditions {
        encode_condition(&mut ser, field, value)?;
    }

    if !sort.is_empty() {
        let sort = sort
            .iter()
            .map(SortKey::to_param)
            .collect::<Vec<_>>()
            .join(",");
        ser.append_pair("sort", &sort);
    }

    if let Some(limit) = limit {
        ser.append_pair("page[limit]", &limit.to_string());
    }

    Ok(ser.finish())
}

fn encode_condition(
    ser: &mut form_urlencoded::Serializer<'_, String>,
    path: &str,
    value: &Value,
) -> Result<(), String> {
    match value {
        Value::Null => {
            let group = group_name(path, "null");
            append_group(ser, &group, path, "IS NULL", None);
        }
        Value::Array(items) => {
            let group = group_name(path, "in");
            append_group(ser, &group, path, "IN", Some(items));
        }
        Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => {
            for (op, operand) in obj {
                let wire_op =
                    operator(op).ok_or_else(|| format!("unknown operator '{}' on '{}'", op, path))?;
                let group = group_name(path, op.trim_start_matches('$'));
                match operand {
                    Value::Array(items) => append_group(ser, &group, path, wire_op, Some(items)),
                    Value::Null if op == "$eq" => {
                        append_group(ser, &group, path, "IS NULL", None)
                    }
                    Value::Null if op == "$ne" => {
                        append_group(ser, &group, path, "IS NOT NULL", None)
                    }
                    scalar => {
                        append_group(ser, &group, path, wire_op, Some(std::slice::from_ref(scalar)))
                    }
                }
            }
        }
        Value::Object(obj) => {
            for (key, nested) in obj {
                encode_condition(ser, &format!("{}.{}", path, key), nested)?;
            }
        }
        scalar => {
            ser.append_pair(&format!("filter[{}]", path), &scalar_string(scalar));
        }
    }
    Ok(())
}

fn group_name(path: &str, suffix: &str) -> String {
    format!("{}-{}", path.replace('.', "-"), suffix)
}

fn append_group(
    ser: &mut form_urlencoded::Serializer<'_, String>,
    group: &str,
    path: &str,
    op: &str,
    values: Option<&[Value]>,
) {
    ser.append_pair(&format!("filter[{}][condition][path]", group), path);
    ser.append_pair(&format!("filter[{}][condition][operator]", group), op);
    match values {
        Some([single]) if op != "IN" && op != "NOT IN" => {
            ser.append_pair(
                &format!("filter[{}][condition][value]", group),
                &scalar_string(single),
            );
        }
        Some(items) => {
            for item in items {
                ser.append_pair(
                    &format!("filter[{}][condition][value][]", group),
                    &scalar_string(item),
                );
            }
        }
        None => {}
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        other => other.to_string(),
    }
}

/// Entity properties for a create-if-not-found payload
///
/// Keeps plain values, unwraps `{ "$eq": v }` and drops other operators.
pub fn create_props(conditions: &Map<String, Value>) -> Map<String, Value> {
    let mut props = Map::new();
    for (field, value) in conditions {
        if field.starts_with('$') {
            continue;
        }
        match value {
            Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => {
                if let Some(eq) = obj.get("$eq") {
                    props.insert(field.clone(), eq.clone());
                }
            }
            other => {
                props.insert(field.clone(), other.clone());
            }
        }
    }
    props
}
