use url::form_urlencoded;

use super::{ArgValue, FieldName, Parameter};
use crate::query::errors::QueryError;

/// URL-encoded parameters: every field is a list of strings.
#[derive(Debug, Default)]
pub(crate) struct FormArgs {
    fields: Vec<(String, Vec<String>)>,
}

impl FormArgs {
    /// Collects fields from a POST body (when it is a form) followed by the
    /// query string. A POST body that is not a form becomes the statement
    /// unless the query string already carries one.
    pub(crate) fn parse(post: bool, query: Option<&str>, body: &[u8]) -> Result<Self, QueryError> {
        let mut args = Self::default();
        let mut raw_statement = None;

        if post && !body.is_empty() {
            let pairs: Vec<(String, String)> = form_urlencoded::parse(body)
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();
            let is_form = pairs
                .iter()
                .any(|(name, _)| FieldName::classify(name).is_recognised());
            if is_form {
                args.extend(pairs);
            } else {
                let text = std::str::from_utf8(body)
                    .map_err(|error| QueryError::bad_value("statement", error))?;
                raw_statement = Some(text.to_owned());
            }
        }

        if let Some(query) = query {
            args.extend(
                form_urlencoded::parse(query.as_bytes())
                    .map(|(name, value)| (name.into_owned(), value.into_owned())),
            );
        }

        if let Some(statement) = raw_statement
            && !args.has(Parameter::Statement)
        {
            args.push(Parameter::Statement.name().to_owned(), statement);
        }
        Ok(args)
    }

    fn extend(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in pairs {
            self.push(name, value);
        }
    }

    fn push(&mut self, name: String, value: String) {
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, values)) => values.push(value),
            None => self.fields.push((name, vec![value])),
        }
    }

    fn has(&self, parameter: Parameter) -> bool {
        self.fields
            .iter()
            .any(|(name, _)| FieldName::classify(name) == FieldName::Known(parameter))
    }

    /// Visits fields in arrival order, enforcing single values.
    pub(crate) fn for_each<F>(&self, mut visit: F) -> Result<(), QueryError>
    where
        F: FnMut(FieldName<'_>, ArgValue<'_>) -> Result<(), QueryError>,
    {
        for (name, values) in &self.fields {
            let field = FieldName::classify(name);
            let value = match (field, values.as_slice()) {
                (FieldName::Ignored, _) => continue,
                (FieldName::Unknown(name), _) => {
                    return Err(QueryError::unrecognized_parameter(name));
                }
                (_, [value]) => value,
                (FieldName::Named(_), _) | (FieldName::Known(_), _) => {
                    return Err(QueryError::multiple_values(name));
                }
            };
            if matches!(field, FieldName::Named(_)) && value.is_empty() {
                return Err(QueryError::missing_value(&format!(
                    "named argument {name}"
                )));
            }
            visit(field, ArgValue::Text(value))?;
        }
        Ok(())
    }
}
