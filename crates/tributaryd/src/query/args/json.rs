use serde_json::{Map, Value};

use super::{ArgValue, FieldName};
use crate::query::errors::QueryError;

/// JSON parameters: one top-level object whose keys are parameter names.
#[derive(Debug, Default)]
pub(crate) struct JsonArgs {
    fields: Map<String, Value>,
}

impl JsonArgs {
    pub(crate) fn parse(body: &[u8]) -> Result<Self, QueryError> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(_) => Err(QueryError::type_mismatch("request body", "object")),
            Err(error) => Err(QueryError::bad_value("request body", error)),
        }
    }

    /// Visits fields in key order.
    pub(crate) fn for_each<F>(&self, mut visit: F) -> Result<(), QueryError>
    where
        F: FnMut(FieldName<'_>, ArgValue<'_>) -> Result<(), QueryError>,
    {
        for (name, value) in &self.fields {
            match FieldName::classify(name) {
                FieldName::Ignored => {}
                FieldName::Unknown(name) => return Err(QueryError::unrecognized_parameter(name)),
                field => visit(field, ArgValue::Json(value))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::errors::ErrorCode;

    #[test]
    fn body_must_be_an_object() {
        let error = JsonArgs::parse(b"[1, 2]").expect_err("array body");
        assert_eq!(error.code(), ErrorCode::TYPE_MISMATCH);
        let error = JsonArgs::parse(b"{\"statement\":").expect_err("truncated body");
        assert_eq!(error.code(), ErrorCode::BAD_VALUE);
    }

    #[test]
    fn unknown_key_stops_the_walk() {
        let args = JsonArgs::parse(br#"{"bogus": 1, "statement": "select 1"}"#).expect("parses");
        let mut visited = 0;
        let error = args
            .for_each(|_, _| {
                visited += 1;
                Ok(())
            })
            .expect_err("must fail");
        assert_eq!(error.code(), ErrorCode::UNRECOGNIZED_PARAMETER);
        assert_eq!(visited, 0, "bogus sorts first and aborts the walk");
    }
}
