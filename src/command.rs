//! Command tree
//!
//! The caller's nested JSON description is read into a closed set of
//! commands. Keys starting with `$` are keywords; everything else is an
//! entity field.
//!
//! ```text
//! { "$create": {                         Command::Create
//!     "type": "log--input",                resource log--input
//!     "title": "x",                        constant field
//!     "location": {                        nested field
//!       "$find": { "type": "asset--land",    Command::CreateIfNotFound
//!                  "name": "y" },
//!       "$limit": 1,
//!       "$createIfNotFound": true } } }
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::CommandError;
use crate::resource::ResourceType;

pub const CREATE: &str = "$create";
pub const UPDATE: &str = "$update";
pub const FIND: &str = "$find";
pub const CREATE_IF_NOT_FOUND: &str = "$createIfNotFound";

pub const LIMIT: &str = "$limit";
pub const SORT: &str = "$sort";
pub const ONCE: &str = "$once";

const COMMAND_KEYWORDS: &[&str] = &[CREATE, UPDATE, FIND, CREATE_IF_NOT_FOUND];

/// The fixed set of commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CommandKind {
    Create,
    Update,
    Find,
    CreateIfNotFound,
}

impl CommandKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            CommandKind::Create => CREATE,
            CommandKind::Update => UPDATE,
            CommandKind::Find => FIND,
            CommandKind::CreateIfNotFound => CREATE_IF_NOT_FOUND,
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create(WriteCommand),
    Update(WriteCommand),
    Find(LookupCommand),
    CreateIfNotFound(LookupCommand),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Create(_) => CommandKind::Create,
            Command::Update(_) => CommandKind::Update,
            Command::Find(_) => CommandKind::Find,
            Command::CreateIfNotFound(_) => CommandKind::CreateIfNotFound,
        }
    }
}

/// `$create` / `$update`
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommand {
    pub resource: ResourceType,
    /// Existing identifier (only meaningful for `$update`)
    pub id: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// `$once: true` opts this command into deduplication
    pub once: bool,
    /// Raw field map minus `type`/`id`, used for fingerprinting
    pub arguments: Map<String, Value>,
}

/// A field of a write command
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Constant(Value),
    /// One or more sub-commands whose results feed this field
    Nested(Vec<Command>),
}

/// `$find`, optionally with `$createIfNotFound`
#[derive(Debug, Clone, PartialEq)]
pub struct LookupCommand {
    /// One or more types; the filter is split per type
    pub types: Vec<ResourceType>,
    /// Filter conditions without `type`
    pub conditions: Map<String, Value>,
    pub limit: Option<u64>,
    pub sort: Vec<SortKey>,
    pub once: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    /// JSON:API sort token, `-field` for descending
    pub fn to_param(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// True for an object carrying at least one `$`-prefixed key
pub fn is_command_object(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.keys().any(|k| k.starts_with('$')))
        .unwrap_or(false)
}

/// True when `value` contains a command keyword anywhere below it
fn contains_command(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj
            .iter()
            .any(|(k, v)| COMMAND_KEYWORDS.contains(&k.as_str()) || contains_command(v)),
        Value::Array(items) => items.iter().any(contains_command),
        _ => false,
    }
}

/// Parse a command tree rooted at `value`
pub fn parse_command(value: &Value) -> Result<Command, CommandError> {
    parse_at(value, "$")
}

fn parse_at(value: &Value, path: &str) -> Result<Command, CommandError> {
    let obj = value.as_object().ok_or_else(|| CommandError::NotAnObject {
        path: path.to_string(),
    })?;

    let mut command: Option<(&str, &Value)> = None;
    let mut create_if_not_found: Option<&Value> = None;
    let mut limit = None;
    let mut sort = None;
    let mut once = None;

    for (key, val) in obj {
        match key.as_str() {
            CREATE | UPDATE | FIND => {
                if let Some((first, _)) = command {
                    return Err(CommandError::ConflictingCommands {
                        first: first.to_string(),
                        second: key.clone(),
                        path: path.to_string(),
                    });
                }
                command = Some((key.as_str(), val));
            }
            CREATE_IF_NOT_FOUND => create_if_not_found = Some(val),
            LIMIT => limit = Some(val),
            SORT => sort = Some(val),
            ONCE => once = Some(val),
            other => {
                return Err(CommandError::UnknownKeyword {
                    keyword: other.to_string(),
                    path: path.to_string(),
                })
            }
        }
    }

    let once = match once {
        None => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            return Err(CommandError::InvalidFilter {
                path: path.to_string(),
                reason: format!("{} must be a boolean", ONCE),
            })
        }
    };

    match (command, create_if_not_found) {
        (Some((FIND, filter)), cinf) => {
            let create = match cinf {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(_) => {
                    return Err(CommandError::InvalidModifier {
                        modifier: CREATE_IF_NOT_FOUND.to_string(),
                        command: FIND.to_string(),
                        path: path.to_string(),
                    })
                }
            };
            // Plain reads are never deduplicated
            if !create && once.is_some() {
                return invalid_modifier(ONCE, FIND, path);
            }
            let mut lookup = parse_lookup(filter, limit, sort, path)?;
            if create {
                lookup.once = once.unwrap_or(true);
                Ok(Command::CreateIfNotFound(lookup))
            } else {
                Ok(Command::Find(lookup))
            }
        }
        (None, Some(filter)) if filter.is_object() => {
            let mut lookup = parse_lookup(filter, limit, sort, path)?;
            lookup.once = once.unwrap_or(true);
            Ok(Command::CreateIfNotFound(lookup))
        }
        (None, _) => Err(CommandError::MissingCommand {
            path: path.to_string(),
        }),
        (Some((keyword, fields)), cinf) => {
            if cinf.is_some() {
                return invalid_modifier(CREATE_IF_NOT_FOUND, keyword, path);
            }
            if limit.is_some() {
                return invalid_modifier(LIMIT, keyword, path);
            }
            if sort.is_some() {
                return invalid_modifier(SORT, keyword, path);
            }
            let mut write = parse_write(fields, keyword, path)?;
            write.once = once.unwrap_or(false);
            if keyword == UPDATE {
                Ok(Command::Update(write))
            } else {
                Ok(Command::Create(write))
            }
        }
    }
}

fn invalid_modifier<T>(modifier: &str, command: &str, path: &str) -> Result<T, CommandError> {
    Err(CommandError::InvalidModifier {
        modifier: modifier.to_string(),
        command: command.to_string(),
        path: path.to_string(),
    })
}

fn parse_resource_type(value: Option<&Value>, path: &str) -> Result<ResourceType, CommandError> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::InvalidType {
            path: path.to_string(),
            reason: "'type' must be a string".to_string(),
        })?;
    raw.parse().map_err(|reason| CommandError::InvalidType {
        path: path.to_string(),
        reason,
    })
}

fn parse_write(fields: &Value, keyword: &str, path: &str) -> Result<WriteCommand, CommandError> {
    let path = format!("{}.{}", path, keyword);
    let obj = fields.as_object().ok_or_else(|| CommandError::NotAnObject {
        path: path.clone(),
    })?;

    let resource = parse_resource_type(obj.get("type"), &path)?;
    let id = obj.get("id").and_then(Value::as_str).map(str::to_string);

    let mut parsed = BTreeMap::new();
    let mut arguments = Map::new();
    for (name, value) in obj {
        if name == "type" || name == "id" {
            continue;
        }
        arguments.insert(name.clone(), value.clone());
        let field_path = format!("{}.{}", path, name);
        let field = if is_command_object(value) {
            FieldValue::Nested(vec![parse_at(value, &field_path)?])
        } else if let Some(items) = value.as_array().filter(|items| {
            !items.is_empty() && items.iter().any(is_command_object)
        }) {
            let mut commands = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                commands.push(parse_at(item, &format!("{}[{}]", field_path, i))?);
            }
            FieldValue::Nested(commands)
        } else {
            FieldValue::Constant(value.clone())
        };
        parsed.insert(name.clone(), field);
    }

    Ok(WriteCommand {
        resource,
        id,
        fields: parsed,
        once: false,
        arguments,
    })
}

fn parse_lookup(
    filter: &Value,
    limit: Option<&Value>,
    sort: Option<&Value>,
    path: &str,
) -> Result<LookupCommand, CommandError> {
    let path = format!("{}.{}", path, FIND);
    let obj = filter.as_object().ok_or_else(|| CommandError::NotAnObject {
        path: path.clone(),
    })?;

    let types = match obj.get("type") {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| parse_resource_type(Some(item), &path))
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![parse_resource_type(other, &path)?],
    };

    let mut conditions = Map::new();
    for (name, value) in obj {
        if name == "type" {
            continue;
        }
        if name.starts_with('$') {
            return Err(CommandError::InvalidFilter {
                path,
                reason: format!("unsupported filter keyword '{}'", name),
            });
        }
        if contains_command(value) {
            return Err(CommandError::NestedCommandInFind {
                field: name.clone(),
                path,
            });
        }
        conditions.insert(name.clone(), value.clone());
    }

    let limit = match limit {
        None => None,
        Some(v) => Some(v.as_u64().ok_or_else(|| CommandError::InvalidFilter {
            path: path.clone(),
            reason: format!("{} must be a non-negative integer", LIMIT),
        })?),
    };

    let sort = match sort {
        None => vec![],
        Some(v) => parse_sort(v).ok_or_else(|| CommandError::InvalidFilter {
            path: path.clone(),
            reason: format!(
                "{} must map fields to ASC/DESC or list field names",
                SORT
            ),
        })?,
    };

    Ok(LookupCommand {
        types,
        conditions,
        limit,
        sort,
        once: false,
    })
}

/// `{field: "ASC"|"DESC"}`, `"field"`, `"-field"` or a list of strings
fn parse_sort(value: &Value) -> Option<Vec<SortKey>> {
    fn from_str(s: &str) -> SortKey {
        match s.strip_prefix('-') {
            Some(field) => SortKey {
                field: field.to_string(),
                descending: true,
            },
            None => SortKey {
                field: s.to_string(),
                descending: false,
            },
        }
    }

    match value {
        Value::String(s) => Some(vec![from_str(s)]),
        Value::Array(items) => items.iter().map(|i| i.as_str().map(from_str)).collect(),
        Value::Object(obj) => obj
            .iter()
            .map(|(field, dir)| {
                let dir = dir.as_str()?.to_ascii_uppercase();
                match dir.as_str() {
                    "ASC" => Some(SortKey {
                        field: field.clone(),
                        descending: false,
                    }),
                    "DESC" => Some(SortKey {
                        field: field.clone(),
                        descending: true,
                    }),
                    _ => None,
                }
            })
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_create_with_lookup() {
        let cmd = parse_command(&json!({
            "$create": {
                "type": "log--input",
                "title": "x",
                "location": {
                    "$find": { "type": "asset--land", "name": "y" },
                    "$limit": 1,
                    "$createIfNotFound": true
                }
            }
        }))
        .unwrap();

        let Command::Create(write) = cmd else {
            panic!("expected create");
        };
        assert_eq!(write.resource.to_string(), "log--input");
        assert_eq!(
            write.fields.get("title"),
            Some(&FieldValue::Constant(json!("x")))
        );
        let Some(FieldValue::Nested(children)) = write.fields.get("location") else {
            panic!("expected nested location");
        };
        let Command::CreateIfNotFound(lookup) = &children[0] else {
            panic!("expected createIfNotFound");
        };
        assert_eq!(lookup.limit, Some(1));
        assert!(lookup.once);
        assert_eq!(lookup.conditions.get("name"), Some(&json!("y")));
    }

    #[test]
    fn test_standalone_create_if_not_found() {
        let cmd = parse_command(&json!({
            "$createIfNotFound": { "type": "asset--land", "name": "y" }
        }))
        .unwrap();
        assert_eq!(cmd.kind(), CommandKind::CreateIfNotFound);
    }

    #[test]
    fn test_find_with_several_types_and_sort() {
        let cmd = parse_command(&json!({
            "$find": { "type": ["asset--land", "asset--plant"], "status": "active" },
            "$sort": { "name": "ASC", "changed": "desc" }
        }))
        .unwrap();
        let Command::Find(lookup) = cmd else {
            panic!("expected find");
        };
        assert_eq!(lookup.types.len(), 2);
        // Object form keeps the caller's precedence
        assert_eq!(
            lookup.sort.iter().map(SortKey::to_param).collect::<Vec<_>>(),
            vec!["name", "-changed"]
        );
    }

    #[test]
    fn test_array_of_subcommands() {
        let cmd = parse_command(&json!({
            "$create": {
                "type": "log--activity",
                "asset": [
                    { "$find": { "type": "asset--land", "name": "a" } },
                    { "$create": { "type": "asset--land", "name": "b" } }
                ]
            }
        }))
        .unwrap();
        let Command::Create(write) = cmd else {
            panic!("expected create");
        };
        let Some(FieldValue::Nested(children)) = write.fields.get("asset") else {
            panic!("expected nested asset");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].kind(), CommandKind::Create);
    }

    #[test]
    fn test_missing_command() {
        let err = parse_command(&json!({ "$limit": 1 })).unwrap_err();
        assert!(matches!(err, CommandError::MissingCommand { .. }));
    }

    #[test]
    fn test_unknown_keyword() {
        let err = parse_command(&json!({ "$delete": { "type": "log--input" } })).unwrap_err();
        assert_eq!(
            err,
            CommandError::UnknownKeyword {
                keyword: "$delete".into(),
                path: "$".into()
            }
        );
    }

    #[test]
    fn test_conflicting_commands() {
        let err = parse_command(&json!({
            "$create": { "type": "log--input" },
            "$find": { "type": "log--input" }
        }))
        .unwrap_err();
        assert!(matches!(err, CommandError::ConflictingCommands { .. }));
    }

    #[test]
    fn test_nested_command_in_find_rejected() {
        let err = parse_command(&json!({
            "$find": {
                "type": "log--input",
                "location": { "$find": { "type": "asset--land" } }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, CommandError::NestedCommandInFind { ref field, .. } if field == "location"));
    }

    #[test]
    fn test_operator_objects_allowed_in_find() {
        let cmd = parse_command(&json!({
            "$find": { "type": "log--input", "timestamp": { "$gte": 100 } }
        }));
        assert!(cmd.is_ok());
    }

    #[test]
    fn test_limit_on_create_rejected() {
        let err = parse_command(&json!({
            "$create": { "type": "log--input" },
            "$limit": 1
        }))
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidModifier { ref modifier, .. } if modifier == LIMIT));
    }

    #[test]
    fn test_missing_type() {
        let err = parse_command(&json!({ "$create": { "name": "x" } })).unwrap_err();
        assert!(matches!(err, CommandError::InvalidType { .. }));
    }

    #[test]
    fn test_sort_object_precedence_reaches_query() {
        let cmd = parse_command(&json!({
            "$find": { "type": "log--input" },
            "$sort": { "timestamp": "DESC", "name": "ASC" }
        }))
        .unwrap();
        let Command::Find(lookup) = cmd else {
            panic!("expected find");
        };
        let query = crate::query::encode_query(&lookup.conditions, &lookup.sort, None).unwrap();
        assert_eq!(query, "sort=-timestamp%2Cname");
    }

    #[test]
    fn test_filter_keywords_rejected() {
        let err = parse_command(&json!({
            "$find": { "type": "asset--land", "$or": [{ "name": "a" }, { "name": "b" }] }
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidFilter { ref reason, .. } if reason.contains("$or")
        ));
    }

    #[test]
    fn test_once_on_plain_find_rejected() {
        let err = parse_command(&json!({
            "$find": { "type": "asset--land", "name": "a" },
            "$once": true
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidModifier { ref modifier, .. } if modifier == ONCE
        ));
        assert!(parse_command(&json!({
            "$find": { "type": "asset--land", "name": "a" },
            "$createIfNotFound": true,
            "$once": true
        }))
        .is_ok());
    }

    #[test]
    fn test_once_on_create() {
        let cmd = parse_command(&json!({
            "$create": { "type": "asset--land", "name": "x" },
            "$once": true
        }))
        .unwrap();
        let Command::Create(write) = cmd else {
            panic!("expected create");
        };
        assert!(write.once);
    }
}
