//! `Accept` negotiation for query responses.

use super::errors::QueryError;

/// Response format version served when the client does not ask for one.
pub const CURRENT_VERSION: &str = "2.0.0";

const SUPPORTED_VERSIONS: [&str; 2] = ["1.0.0", CURRENT_VERSION];

/// The negotiated response media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaType {
    version: &'static str,
}

impl MediaType {
    /// Response format version.
    #[must_use]
    pub const fn version(self) -> &'static str {
        self.version
    }

    /// `Content-Type` header value.
    #[must_use]
    pub fn content_type(self) -> String {
        format!("application/json; version={}", self.version)
    }
}

impl Default for MediaType {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
        }
    }
}

/// Picks the first range in `accept` the service can satisfy.
///
/// # Errors
///
/// Returns a media type error when no range names JSON (or a wildcard) at
/// a supported version.
pub fn negotiate(accept: Option<&str>) -> Result<MediaType, QueryError> {
    let Some(accept) = accept.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(MediaType::default());
    };
    accept
        .split(',')
        .find_map(acceptable)
        .ok_or_else(|| QueryError::media_type(accept))
}

fn acceptable(range: &str) -> Option<MediaType> {
    let mut parts = range.split(';').map(str::trim);
    let essence = parts.next()?.to_ascii_lowercase();
    let mut version = None;
    for parameter in parts {
        if let Some((key, value)) = parameter.split_once('=')
            && key.trim().eq_ignore_ascii_case("version")
        {
            version = Some(value.trim().trim_matches('"'));
        }
    }

    match essence.as_str() {
        "*/*" | "application/*" => Some(MediaType::default()),
        "application/json" => match version {
            None => Some(MediaType::default()),
            Some(requested) => SUPPORTED_VERSIONS
                .into_iter()
                .find(|supported| *supported == requested)
                .map(|version| MediaType { version }),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::query::errors::ErrorCode;

    #[rstest]
    #[case(None, "2.0.0")]
    #[case(Some(""), "2.0.0")]
    #[case(Some("*/*"), "2.0.0")]
    #[case(Some("application/*"), "2.0.0")]
    #[case(Some("application/json"), "2.0.0")]
    #[case(Some("application/json; version=1.0.0"), "1.0.0")]
    #[case(Some("text/html, application/json;version=\"1.0.0\";q=0.8"), "1.0.0")]
    fn negotiates_supported_ranges(#[case] accept: Option<&str>, #[case] expected: &str) {
        let media = negotiate(accept).expect("negotiable");
        assert_eq!(media.version(), expected);
    }

    #[rstest]
    #[case("text/html")]
    #[case("application/xml")]
    #[case("application/json; version=9.9.9")]
    fn rejects_unsupported_ranges(#[case] accept: &str) {
        let error = negotiate(Some(accept)).expect_err("not negotiable");
        assert_eq!(error.code(), ErrorCode::MEDIA_TYPE);
        assert_eq!(error.http_status(), 406);
    }

    #[test]
    fn content_type_carries_version() {
        assert_eq!(
            MediaType::default().content_type(),
            "application/json; version=2.0.0"
        );
    }
}
