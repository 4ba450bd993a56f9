use std::time::Duration;

use serde_json::Value;

use super::Parameter;
use crate::query::duration::parse_duration;
use crate::query::errors::QueryError;
use crate::query::tristate::Tristate;

/// A single parameter value as delivered by either payload encoding.
///
/// Form values are always text and are coerced; JSON values must already
/// carry the expected type.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ArgValue<'a> {
    Text(&'a str),
    Json(&'a Value),
}

impl ArgValue<'_> {
    pub(crate) fn string(self, parameter: Parameter) -> Result<String, QueryError> {
        match self {
            Self::Text(text) => Ok(text.to_owned()),
            Self::Json(Value::String(text)) => Ok(text.clone()),
            Self::Json(_) => Err(QueryError::type_mismatch(parameter.name(), "string")),
        }
    }

    pub(crate) fn boolean(self, parameter: Parameter) -> Result<bool, QueryError> {
        match self {
            Self::Text(text) => parse_bool(text)
                .ok_or_else(|| QueryError::bad_value(parameter.name(), text)),
            Self::Json(Value::Bool(flag)) => Ok(*flag),
            Self::Json(_) => Err(QueryError::type_mismatch(parameter.name(), "boolean")),
        }
    }

    pub(crate) fn tristate(self, parameter: Parameter) -> Result<Tristate, QueryError> {
        self.boolean(parameter).map(Tristate::from)
    }

    pub(crate) fn duration(self, parameter: Parameter) -> Result<Duration, QueryError> {
        let text = match self {
            Self::Text(text) => text,
            Self::Json(Value::String(text)) => text.as_str(),
            Self::Json(_) => {
                return Err(QueryError::type_mismatch(
                    parameter.name(),
                    "duration string",
                ));
            }
        };
        parse_duration(text).map_err(|error| QueryError::bad_value(parameter.name(), error))
    }

    pub(crate) fn unsigned(self, parameter: Parameter) -> Result<u64, QueryError> {
        match self {
            Self::Text(text) => parse_unsigned(parameter, text),
            Self::Json(Value::String(text)) => parse_unsigned(parameter, text),
            Self::Json(Value::Number(number)) => number
                .as_u64()
                .ok_or_else(|| QueryError::bad_value(parameter.name(), number)),
            Self::Json(_) => Err(QueryError::type_mismatch(parameter.name(), "number")),
        }
    }

    /// The value as JSON; form text must itself be JSON.
    pub(crate) fn json(self, name: &str) -> Result<Value, QueryError> {
        match self {
            Self::Text(text) => serde_json::from_str(text)
                .map_err(|error| QueryError::bad_value(name, error)),
            Self::Json(value) => Ok(value.clone()),
        }
    }
}

/// Accepts the spellings Go's `strconv.ParseBool` accepts.
fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_unsigned(parameter: Parameter, text: &str) -> Result<u64, QueryError> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) if parameter == Parameter::N1qlFeatCtrl => u64::from_str_radix(hex, 16),
        _ => trimmed.parse::<u64>(),
    };
    parsed.map_err(|error| QueryError::bad_value(parameter.name(), error))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::query::errors::ErrorCode;

    #[rstest]
    #[case("true", true)]
    #[case("T", true)]
    #[case("1", true)]
    #[case("False", false)]
    #[case("0", false)]
    fn form_booleans_follow_go_spellings(#[case] text: &str, #[case] expected: bool) {
        let parsed = ArgValue::Text(text).boolean(Parameter::Pretty).expect("parses");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn json_values_must_carry_their_type() {
        let text = json!("true");
        let error = ArgValue::Json(&text)
            .boolean(Parameter::Pretty)
            .expect_err("string is not a boolean");
        assert_eq!(error.code(), ErrorCode::TYPE_MISMATCH);
        assert_eq!(error.message(), "pretty has to be of type boolean");
    }

    #[rstest]
    #[case(ArgValue::Text("0x1F"), Parameter::N1qlFeatCtrl, Ok(31))]
    #[case(ArgValue::Text("12"), Parameter::ScanCap, Ok(12))]
    #[case(ArgValue::Text("0x1F"), Parameter::ScanCap, Err(ErrorCode::BAD_VALUE))]
    #[case(ArgValue::Text("-3"), Parameter::MaxParallelism, Err(ErrorCode::BAD_VALUE))]
    fn unsigned_values(
        #[case] value: ArgValue<'static>,
        #[case] parameter: Parameter,
        #[case] expected: Result<u64, ErrorCode>,
    ) {
        assert_eq!(value.unsigned(parameter).map_err(|e| e.code()), expected);
    }

    #[test]
    fn json_numbers_are_accepted_for_counts() {
        let number = json!(8);
        let negative = json!(-8);
        assert_eq!(ArgValue::Json(&number).unsigned(Parameter::PipelineBatch).ok(), Some(8));
        assert!(ArgValue::Json(&negative).unsigned(Parameter::PipelineBatch).is_err());
    }

    #[test]
    fn form_json_text_must_parse() {
        assert_eq!(
            ArgValue::Text("[1, \"a\"]").json("args").expect("parses"),
            json!([1, "a"])
        );
        let error = ArgValue::Text("[1,").json("args").expect_err("truncated");
        assert_eq!(error.code(), ErrorCode::BAD_VALUE);
    }
}
