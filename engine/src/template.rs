// SPDX-License-Identifier: Apache-2.0
//! Definition templates: stored definitions with `$name` placeholders.

use serde_json::{Map, Value};

use crate::error::TemplateError;

/// Returns a copy of `template` with every `$name` string replaced by
/// `params[name]`. The template itself is never modified; it is chain state
/// shared by every address built from it.
pub fn fill(template: &Value, params: &Map<String, Value>) -> Result<Value, TemplateError> {
    match template {
        Value::Bool(_) | Value::Number(_) => Ok(template.clone()),
        Value::String(s) => match s.strip_prefix('$') {
            None => Ok(template.clone()),
            Some(name) => params
                .get(name)
                .cloned()
                .ok_or_else(|| TemplateError::MissingVariable {
                    name: name.to_owned(),
                }),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| fill(item, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| fill(v, params).map(|v| (k.clone(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        Value::Null => Err(TemplateError::UnsupportedValueType { kind: "null" }),
    }
}
