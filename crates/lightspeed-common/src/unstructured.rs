//! Path-based access to untyped Kubernetes documents
//!
//! Foreign resources such as OLSConfig and ClusterVersion are handled as
//! `serde_json::Value` so fields this operator does not model survive a
//! read-modify-write cycle. A missing field and a field of the wrong type are
//! distinct errors.

use serde_json::{Map, Value};
use thiserror::Error;

/// Failure to read or write a nested field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Some segment of the path does not exist
    #[error("field {path} not found")]
    NotFound {
        /// Dotted path that was requested
        path: String,
    },

    /// A segment exists but holds a different JSON type
    #[error("field {path} is not {expected}")]
    TypeMismatch {
        /// Dotted path of the offending segment
        path: String,
        /// JSON type that was expected there
        expected: &'static str,
    },
}

impl FieldError {
    /// True for a missing field
    pub fn is_not_found(&self) -> bool {
        matches!(self, FieldError::NotFound { .. })
    }
}

fn dotted(path: &[&str]) -> String {
    path.join(".")
}

/// Look up a nested field
pub fn nested_field<'a>(doc: &'a Value, path: &[&str]) -> Result<&'a Value, FieldError> {
    let mut current = doc;
    for (i, segment) in path.iter().enumerate() {
        let obj = current.as_object().ok_or_else(|| FieldError::TypeMismatch {
            path: dotted(&path[..i]),
            expected: "an object",
        })?;
        current = obj.get(*segment).ok_or_else(|| FieldError::NotFound {
            path: dotted(path),
        })?;
    }
    Ok(current)
}

/// Look up a nested string field
pub fn nested_str<'a>(doc: &'a Value, path: &[&str]) -> Result<&'a str, FieldError> {
    nested_field(doc, path)?
        .as_str()
        .ok_or_else(|| FieldError::TypeMismatch {
            path: dotted(path),
            expected: "a string",
        })
}

/// Look up a nested array field
pub fn nested_array<'a>(doc: &'a Value, path: &[&str]) -> Result<&'a Vec<Value>, FieldError> {
    nested_field(doc, path)?
        .as_array()
        .ok_or_else(|| FieldError::TypeMismatch {
            path: dotted(path),
            expected: "an array",
        })
}

/// Set a nested field, creating intermediate objects as needed.
///
/// Fails with `TypeMismatch` when an intermediate segment exists but is not an
/// object; the document is left untouched in that case.
pub fn set_nested_field(doc: &mut Value, path: &[&str], value: Value) -> Result<(), FieldError> {
    let Some((last, parents)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut current = doc;
    for (i, segment) in parents.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let obj = current
            .as_object_mut()
            .ok_or_else(|| FieldError::TypeMismatch {
                path: dotted(&path[..i]),
                expected: "an object",
            })?;
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    let obj = current
        .as_object_mut()
        .ok_or_else(|| FieldError::TypeMismatch {
            path: dotted(parents),
            expected: "an object",
        })?;
    obj.insert(last.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_string() {
        let doc = json!({"status": {"desired": {"version": "4.16.3"}}});
        assert_eq!(
            nested_str(&doc, &["status", "desired", "version"]),
            Ok("4.16.3")
        );
    }

    #[test]
    fn missing_and_mistyped_fields_are_distinct() {
        let doc = json!({"status": {"desired": "oops"}});
        let missing = nested_str(&doc, &["status", "history"]).unwrap_err();
        assert!(missing.is_not_found());

        let mistyped = nested_str(&doc, &["status", "desired", "version"]).unwrap_err();
        assert_eq!(
            mistyped,
            FieldError::TypeMismatch {
                path: "status.desired".to_string(),
                expected: "an object",
            }
        );

        let not_array = nested_array(&doc, &["status", "desired"]).unwrap_err();
        assert!(!not_array.is_not_found());
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut doc = json!({"spec": {"ols": {"keep": true}}});
        set_nested_field(
            &mut doc,
            &["spec", "ols", "additionalCAConfigMapRef", "name"],
            json!("ca-bundle"),
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({"spec": {"ols": {"keep": true, "additionalCAConfigMapRef": {"name": "ca-bundle"}}}})
        );
    }

    #[test]
    fn set_into_null_document_builds_it() {
        let mut doc = Value::Null;
        set_nested_field(&mut doc, &["spec", "llm", "providers"], json!([])).unwrap();
        assert_eq!(doc, json!({"spec": {"llm": {"providers": []}}}));
    }

    #[test]
    fn set_through_scalar_is_rejected() {
        let mut doc = json!({"spec": {"ols": "scalar"}});
        let err = set_nested_field(&mut doc, &["spec", "ols", "rag"], json!([])).unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
        assert_eq!(doc, json!({"spec": {"ols": "scalar"}}));
    }
}
