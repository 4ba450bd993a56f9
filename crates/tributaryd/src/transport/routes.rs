//! Maps request lines onto service endpoints.

const QUERY_PATHS: [&str; 2] = ["/query/service", "/query"];
const ACTIVE_REQUESTS: &str = "/admin/active_requests";
const VITALS: &str = "/admin/vitals";

/// Endpoint selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route<'a> {
    /// The query service; method checks happen during extraction.
    Query,
    ListActive,
    GetActive(&'a str),
    StopActive(&'a str),
    Vitals,
    NotFound,
}

impl<'a> Route<'a> {
    pub(crate) fn resolve(method: &str, path: &'a str) -> Self {
        let path = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => path,
        };
        if QUERY_PATHS.contains(&path) {
            return Self::Query;
        }
        match (method, path) {
            ("GET", VITALS) => return Self::Vitals,
            ("GET", ACTIVE_REQUESTS) => return Self::ListActive,
            _ => {}
        }
        let Some(id) = path
            .strip_prefix(ACTIVE_REQUESTS)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|id| !id.is_empty() && !id.contains('/'))
        else {
            return Self::NotFound;
        };
        match method {
            "GET" => Self::GetActive(id),
            "DELETE" => Self::StopActive(id),
            _ => Self::NotFound,
        }
    }
}
